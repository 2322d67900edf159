//! Camera and rendering-context acquisition.
//!
//! A [`CaptureSession`] owns exactly one camera stream and one rendering
//! context. Acquisition goes stream first, then video binding, then context;
//! whatever was acquired before a failure or cancellation is released before
//! `acquire` returns. Releasing is idempotent and also happens on drop.
//!
//! Camera URLs understood by [`SystemDevices`]:
//! - `stub://<name>`: synthetic moving-pattern camera
//! - `stub://denied`: permission refused
//! - `stub://unavailable`: no such device
//! - `stub://audio-only`: a stream without a video track
//! - `v4l2:///dev/videoN`: local V4L2 device (feature `camera-v4l2`)

mod convert;
mod ledger;
mod stream;
mod synthetic;
#[cfg(feature = "camera-v4l2")]
mod v4l2;

pub use convert::{to_rgba, PixelFormat};
pub use ledger::{LedgerSnapshot, LedgerToken, ResourceKind, ResourceLedger};
pub use stream::{FrameGrabber, MediaStream, MediaTrack, TrackKind, TrackState};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use image::RgbaImage;

use crate::config::CameraSettings;
use crate::error::AcquisitionError;
use crate::render::{RenderContext, SoftwareContext};
use crate::scene::{PerspectiveCamera, SceneContext};

/// What to open: a camera URL plus the preferred frame geometry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureRequest {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl From<&CameraSettings> for CaptureRequest {
    fn from(settings: &CameraSettings) -> Self {
        Self {
            url: settings.url.clone(),
            width: settings.width,
            height: settings.height,
            target_fps: settings.target_fps,
        }
    }
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self::from(&CameraSettings::default())
    }
}

/// Shared cancellation flag for an in-flight acquisition.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Source of camera streams and rendering contexts.
pub trait DeviceProvider: Send + Sync {
    /// Request a video-only stream.
    fn open_video(&self, request: &CaptureRequest) -> Result<MediaStream, AcquisitionError>;

    fn create_context(
        &self,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn RenderContext>, AcquisitionError>;

    /// Ledger that streams and contexts from this provider are counted in.
    fn ledger(&self) -> &ResourceLedger;
}

/// Devices available on this machine, plus the `stub://` test devices.
#[derive(Debug, Default)]
pub struct SystemDevices {
    ledger: ResourceLedger,
}

impl SystemDevices {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceProvider for SystemDevices {
    fn open_video(&self, request: &CaptureRequest) -> Result<MediaStream, AcquisitionError> {
        if let Some(name) = request.url.strip_prefix("stub://") {
            return match name {
                "denied" => Err(AcquisitionError::CameraDenied(request.url.clone())),
                "unavailable" | "" => Err(AcquisitionError::CameraUnavailable(request.url.clone())),
                "audio-only" => Ok(MediaStream::new(
                    &self.ledger,
                    vec![MediaTrack::audio("stub microphone")],
                )),
                _ => {
                    let camera = synthetic::SyntheticCamera::new(name, request.width, request.height);
                    Ok(MediaStream::new(
                        &self.ledger,
                        vec![MediaTrack::video(Box::new(camera))],
                    ))
                }
            };
        }

        if let Some(path) = request.url.strip_prefix("v4l2://") {
            #[cfg(feature = "camera-v4l2")]
            {
                let camera = v4l2::V4l2Camera::open(path, request)?;
                return Ok(MediaStream::new(
                    &self.ledger,
                    vec![MediaTrack::video(Box::new(camera))],
                ));
            }
            #[cfg(not(feature = "camera-v4l2"))]
            {
                return Err(AcquisitionError::CameraUnavailable(format!(
                    "{} (built without camera-v4l2)",
                    path
                )));
            }
        }

        Err(AcquisitionError::CameraUnavailable(format!(
            "unsupported camera url '{}'",
            request.url
        )))
    }

    fn create_context(
        &self,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn RenderContext>, AcquisitionError> {
        Ok(Box::new(SoftwareContext::new(width, height, &self.ledger)?))
    }

    fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }
}

/// One acquired camera stream, bound as the video source, plus its context.
pub struct CaptureSession {
    stream: Option<MediaStream>,
    video_track: usize,
    context: Option<Box<dyn RenderContext>>,
}

impl CaptureSession {
    pub fn acquire(
        devices: &dyn DeviceProvider,
        request: &CaptureRequest,
        cancel: &CancelToken,
    ) -> Result<Self, AcquisitionError> {
        if cancel.is_cancelled() {
            return Err(AcquisitionError::Cancelled);
        }

        // From here on, dropping `session` on an early return releases
        // whatever it already holds.
        let mut session = Self {
            stream: Some(devices.open_video(request)?),
            video_track: 0,
            context: None,
        };
        if cancel.is_cancelled() {
            log::info!("CaptureSession: cancelled after opening {}", request.url);
            return Err(AcquisitionError::Cancelled);
        }

        session.video_track = session
            .stream
            .as_ref()
            .and_then(MediaStream::video_track_index)
            .ok_or(AcquisitionError::NoVideoTrack)?;

        session.context = Some(devices.create_context(request.width, request.height)?);
        if cancel.is_cancelled() {
            log::info!("CaptureSession: cancelled after creating context");
            return Err(AcquisitionError::Cancelled);
        }

        log::info!(
            "CaptureSession: acquired {} ({}x{})",
            request.url,
            request.width,
            request.height
        );
        Ok(session)
    }

    /// Whether the stream and context are both still held.
    pub fn is_held(&self) -> bool {
        self.stream.is_some() && self.context.is_some()
    }

    /// Next frame from the bound video track.
    pub fn next_frame(&mut self) -> Result<RgbaImage> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("capture session released"))?;
        let track = stream
            .track_mut(self.video_track)
            .ok_or_else(|| anyhow!("bound video track missing"))?;
        track.next_frame()
    }

    pub fn render(
        &mut self,
        scene: &SceneContext,
        camera: &PerspectiveCamera,
        background: Option<&RgbaImage>,
    ) -> Result<()> {
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| anyhow!("capture session released"))?;
        context.render(scene, camera, background)
    }

    pub fn context(&self) -> Option<&dyn RenderContext> {
        self.context.as_deref()
    }

    pub fn stream(&self) -> Option<&MediaStream> {
        self.stream.as_ref()
    }

    /// Stop every track and dispose the context. Safe to call repeatedly.
    pub fn release(&mut self) -> bool {
        let mut released = false;
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            released = true;
        }
        if let Some(mut context) = self.context.take() {
            context.dispose();
            released = true;
        }
        if released {
            log::info!("CaptureSession: released camera and context");
        }
        released
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}
