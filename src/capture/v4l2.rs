//! Local V4L2 camera behind `v4l2:///dev/videoN` URLs.

use anyhow::{Context, Result};
use image::RgbaImage;
use ouroboros::self_referencing;

use super::convert::{to_rgba, PixelFormat};
use super::stream::FrameGrabber;
use super::CaptureRequest;
use crate::error::AcquisitionError;

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub(crate) struct V4l2Camera {
    path: String,
    state: Option<DeviceState>,
    width: u32,
    height: u32,
    format: PixelFormat,
    frame_count: u64,
}

impl V4l2Camera {
    pub(crate) fn open(path: &str, request: &CaptureRequest) -> Result<Self, AcquisitionError> {
        Self::connect(path, request).map_err(|err| {
            let message = format!("{:#}", err);
            let denied = err
                .chain()
                .filter_map(|cause| cause.downcast_ref::<std::io::Error>())
                .any(|io| io.kind() == std::io::ErrorKind::PermissionDenied);
            if denied {
                AcquisitionError::CameraDenied(message)
            } else {
                AcquisitionError::CameraUnavailable(message)
            }
        })
    }

    fn connect(path: &str, request: &CaptureRequest) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device =
            v4l::Device::with_path(path).with_context(|| format!("open v4l2 device {}", path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = request.width;
        format.height = request.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Camera: failed to set format on {}: {}", path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let pixel_format = match &format.fourcc.repr {
            b"RGB3" => PixelFormat::Rgb24,
            b"YUYV" => PixelFormat::Yuyv,
            other => {
                anyhow::bail!(
                    "unsupported v4l2 pixel format {}",
                    String::from_utf8_lossy(other)
                )
            }
        };

        if request.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(request.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Camera: failed to set fps on {}: {}", path, err);
            }
        }

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Camera: connected to {} ({}x{} {:?})",
            path,
            format.width,
            format.height,
            pixel_format
        );
        Ok(Self {
            path: path.to_string(),
            state: Some(state),
            width: format.width,
            height: format.height,
            format: pixel_format,
            frame_count: 0,
        })
    }
}

impl FrameGrabber for V4l2Camera {
    fn grab(&mut self) -> Result<RgbaImage> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device closed")?;
        let (width, height, format) = (self.width, self.height, self.format);
        let frame = state.with_mut(|fields| -> Result<RgbaImage> {
            let (buf, _meta) = fields.stream.next().context("capture v4l2 frame")?;
            to_rgba(buf, width, height, format)
        })?;
        self.frame_count += 1;
        Ok(frame)
    }

    fn describe(&self) -> String {
        format!("v4l2://{}", self.path)
    }

    fn stop(&mut self) {
        if self.state.take().is_some() {
            log::info!(
                "V4l2Camera: closed {} after {} frames",
                self.path,
                self.frame_count
            );
        }
    }
}
