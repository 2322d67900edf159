//! Live AR view: camera background, wireframe markers and confidence labels.
//!
//! Lifecycle is `Uninitialized -> Initializing -> Running -> Disposed`.
//! [`ArSceneManager::activate`] hands acquisition to a worker thread; the
//! caller observes completion with [`ArSceneManager::poll_ready`],
//! [`ArSceneManager::wait_ready`] or simply by calling
//! [`ArSceneManager::tick`], which polls before drawing. Deactivation works
//! from any state and always releases the camera and context.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Result;
use image::{Rgba, RgbaImage};

use crate::capture::{CancelToken, CaptureRequest, CaptureSession, DeviceProvider};
use crate::detect::{DetectionRecord, MISSING_CLASS};
use crate::error::AcquisitionError;
use crate::label::{LabelRasterizer, LabelStyle};
use crate::scene::{
    viewport_aspect, MarkerLayout, PerspectiveCamera, PixelToScene, SceneContext, SceneOverlays,
    SceneSync, DEFAULT_FAR, DEFAULT_FOV_DEG, DEFAULT_NEAR,
};

/// Scene geometry and styling for the AR view.
#[derive(Clone, Debug, PartialEq)]
pub struct ArSettings {
    pub target_class: String,
    pub fov_deg: f32,
    /// Camera distance from the origin along +Z.
    pub camera_distance: f32,
    pub marker_depth: f32,
    /// Gap between a marker's top edge and its label's center.
    pub label_offset: f32,
    pub label_plane: (f32, f32),
    pub background_plane: (f32, f32),
    pub marker_color: Rgba<u8>,
    pub label: LabelStyle,
    pub sync: SceneSync,
    /// Image size the detections were measured in. `None` means detections
    /// are already in scene units.
    pub pixel_space: Option<(u32, u32)>,
}

impl Default for ArSettings {
    fn default() -> Self {
        Self {
            target_class: MISSING_CLASS.to_string(),
            fov_deg: DEFAULT_FOV_DEG,
            camera_distance: 5.0,
            marker_depth: 1.0,
            label_offset: 1.0,
            label_plane: (2.0, 1.0),
            background_plane: (16.0, 9.0),
            marker_color: Rgba([238, 130, 238, 255]),
            label: LabelStyle::default(),
            sync: SceneSync::Keyed,
            pixel_space: None,
        }
    }
}

impl ArSettings {
    fn marker_layout(&self) -> MarkerLayout {
        MarkerLayout {
            target_class: self.target_class.clone(),
            marker_depth: self.marker_depth,
            label_offset: self.label_offset,
            label_plane: self.label_plane,
            marker_color: self.marker_color,
            pixel_mapping: self
                .pixel_space
                .and_then(|size| PixelToScene::new(size, self.background_plane)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArState {
    Uninitialized,
    Initializing,
    Running,
    Disposed,
}

/// Outcome of one rendered frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: u64,
    pub markers: usize,
    pub added: usize,
    pub removed: usize,
    pub reused: usize,
}

type Update = (u64, Vec<DetectionRecord>);

/// Activation generations are odd; the even value between them means inactive.
fn is_live(generation: u64) -> bool {
    generation % 2 == 1
}

/// Posts detection lists to an [`ArSceneManager`] from any thread.
///
/// Bound to the activation it was created in; posts after that activation is
/// torn down are discarded. An updater taken while the view is inactive never
/// delivers.
#[derive(Clone)]
pub struct DetectionUpdater {
    generation: u64,
    current: Arc<AtomicU64>,
    tx: Sender<Update>,
}

impl DetectionUpdater {
    /// Queue `records` for the next tick. Returns false if the update is stale.
    pub fn post(&self, records: Vec<DetectionRecord>) -> bool {
        if !self.is_current() {
            return false;
        }
        self.tx.send((self.generation, records)).is_ok()
    }

    pub fn is_current(&self) -> bool {
        is_live(self.generation) && self.current.load(Ordering::SeqCst) == self.generation
    }
}

struct PendingAcquisition {
    cancel: CancelToken,
    worker: JoinHandle<()>,
    result: Receiver<Result<CaptureSession, AcquisitionError>>,
}

pub struct ArSceneManager {
    settings: ArSettings,
    layout: MarkerLayout,
    request: CaptureRequest,
    devices: Arc<dyn DeviceProvider>,
    rasterizer: LabelRasterizer,
    state: ArState,
    generation: Arc<AtomicU64>,
    pending: Option<PendingAcquisition>,
    session: Option<CaptureSession>,
    scene: SceneContext,
    overlays: SceneOverlays,
    camera: PerspectiveCamera,
    detections: Vec<DetectionRecord>,
    updates_tx: Sender<Update>,
    updates_rx: Receiver<Update>,
    frames: u64,
    last_error: Option<AcquisitionError>,
}

impl ArSceneManager {
    pub fn new(
        settings: ArSettings,
        request: CaptureRequest,
        devices: Arc<dyn DeviceProvider>,
        rasterizer: LabelRasterizer,
    ) -> Self {
        let camera = PerspectiveCamera::new(
            settings.fov_deg,
            viewport_aspect(request.width, request.height),
            DEFAULT_NEAR,
            DEFAULT_FAR,
            settings.camera_distance,
        );
        let (updates_tx, updates_rx) = mpsc::channel();
        Self {
            layout: settings.marker_layout(),
            scene: SceneContext::new(settings.background_plane.0, settings.background_plane.1),
            settings,
            request,
            devices,
            rasterizer,
            state: ArState::Uninitialized,
            generation: Arc::new(AtomicU64::new(0)),
            pending: None,
            session: None,
            overlays: SceneOverlays::new(),
            camera,
            detections: Vec::new(),
            updates_tx,
            updates_rx,
            frames: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> ArState {
        self.state
    }

    pub fn settings(&self) -> &ArSettings {
        &self.settings
    }

    pub fn scene(&self) -> &SceneContext {
        &self.scene
    }

    pub fn camera(&self) -> &PerspectiveCamera {
        &self.camera
    }

    pub fn detections(&self) -> &[DetectionRecord] {
        &self.detections
    }

    /// Frames rendered since construction.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Error from the most recent failed activation.
    pub fn last_error(&self) -> Option<&AcquisitionError> {
        self.last_error.as_ref()
    }

    pub fn session(&self) -> Option<&CaptureSession> {
        self.session.as_ref()
    }

    /// Last rendered frame, while running.
    pub fn surface(&self) -> Option<&RgbaImage> {
        self.session
            .as_ref()
            .and_then(CaptureSession::context)
            .and_then(|context| context.surface())
    }

    /// Start acquiring the camera and rendering context in the background.
    pub fn activate(&mut self) -> Result<(), AcquisitionError> {
        match self.state {
            ArState::Initializing | ArState::Running => return Err(AcquisitionError::AlreadyActive),
            ArState::Uninitialized | ArState::Disposed => {}
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancelToken::new();
        let (tx, rx) = mpsc::channel();
        let devices = Arc::clone(&self.devices);
        let request = self.request.clone();
        let worker_cancel = cancel.clone();
        let worker = std::thread::Builder::new()
            .name("shelf-ar-acquire".to_string())
            .spawn(move || {
                let result = CaptureSession::acquire(devices.as_ref(), &request, &worker_cancel);
                // If the manager is gone the session drops here and releases.
                let _ = tx.send(result);
            })
            .map_err(|e| AcquisitionError::ContextUnavailable(format!("spawn worker: {}", e)))?;

        log::info!(
            "ArSceneManager: activating {} (generation {})",
            self.request.url,
            generation
        );
        self.last_error = None;
        self.pending = Some(PendingAcquisition {
            cancel,
            worker,
            result: rx,
        });
        self.state = ArState::Initializing;
        Ok(())
    }

    /// Non-blocking check on a pending activation.
    ///
    /// `Some(Ok(()))` once running, `Some(Err(_))` when acquisition failed
    /// (the manager is then `Disposed`), `None` while still initializing or
    /// when nothing was activated.
    pub fn poll_ready(&mut self) -> Option<Result<(), AcquisitionError>> {
        match self.state {
            ArState::Running => return Some(Ok(())),
            ArState::Initializing => {}
            ArState::Uninitialized | ArState::Disposed => return None,
        }
        let pending = self.pending.as_ref()?;
        let outcome = match pending.result.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => Err(AcquisitionError::ContextUnavailable(
                "acquisition worker exited".to_string(),
            )),
        };
        Some(self.finish_activation(outcome))
    }

    /// Block until the pending activation completes or `timeout` passes.
    ///
    /// `Ok(true)` when running, `Ok(false)` on timeout or when nothing is
    /// pending.
    pub fn wait_ready(&mut self, timeout: Duration) -> Result<bool, AcquisitionError> {
        match self.state {
            ArState::Running => return Ok(true),
            ArState::Initializing => {}
            ArState::Uninitialized | ArState::Disposed => return Ok(false),
        }
        let Some(pending) = self.pending.as_ref() else {
            return Ok(false);
        };
        let outcome = match pending.result.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => return Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(AcquisitionError::ContextUnavailable(
                "acquisition worker exited".to_string(),
            )),
        };
        self.finish_activation(outcome).map(|()| true)
    }

    fn finish_activation(
        &mut self,
        outcome: Result<CaptureSession, AcquisitionError>,
    ) -> Result<(), AcquisitionError> {
        if let Some(pending) = self.pending.take() {
            if pending.worker.join().is_err() {
                log::warn!("ArSceneManager: acquisition worker panicked");
            }
        }
        match outcome {
            Ok(session) => {
                if let Some(context) = session.context() {
                    let (width, height) = context.size();
                    self.camera.set_aspect(viewport_aspect(width, height));
                }
                log::info!("ArSceneManager: running");
                self.session = Some(session);
                self.state = ArState::Running;
                Ok(())
            }
            Err(err) => {
                log::warn!("ArSceneManager: activation failed: {}", err);
                self.teardown();
                self.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Release the camera and context and move to `Disposed`.
    ///
    /// Valid in every state. A pending activation is cancelled and its worker
    /// joined; anything it acquired is released.
    pub fn deactivate(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel.cancel();
            if pending.worker.join().is_err() {
                log::warn!("ArSceneManager: acquisition worker panicked");
            }
            if let Ok(Ok(mut session)) = pending.result.try_recv() {
                session.release();
            }
            log::info!("ArSceneManager: activation cancelled");
        }
        if self.state != ArState::Disposed {
            log::info!("ArSceneManager: disposed after {} frames", self.frames);
        }
        self.teardown();
    }

    fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.release();
        }
        // Invalidate updaters handed out for this activation.
        let _ = self
            .generation
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |g| {
                is_live(g).then_some(g + 1)
            });
        while self.updates_rx.try_recv().is_ok() {}
        self.overlays.clear(&mut self.scene);
        self.detections.clear();
        self.state = ArState::Disposed;
    }

    /// Replace the current detection list.
    ///
    /// Returns false (and drops the list) when the view is not active.
    pub fn update_detections(&mut self, records: Vec<DetectionRecord>) -> bool {
        match self.state {
            ArState::Initializing | ArState::Running => {
                self.detections = records;
                true
            }
            ArState::Uninitialized | ArState::Disposed => {
                log::debug!(
                    "ArSceneManager: discarding {} detections while {:?}",
                    records.len(),
                    self.state
                );
                false
            }
        }
    }

    /// Handle for posting detections from other threads.
    pub fn updater(&self) -> DetectionUpdater {
        DetectionUpdater {
            generation: self.generation.load(Ordering::SeqCst),
            current: Arc::clone(&self.generation),
            tx: self.updates_tx.clone(),
        }
    }

    fn drain_updates(&mut self) {
        let current = self.generation.load(Ordering::SeqCst);
        while let Ok((generation, records)) = self.updates_rx.try_recv() {
            if generation == current {
                self.detections = records;
            } else {
                log::debug!("ArSceneManager: dropping stale update from generation {}", generation);
            }
        }
    }

    /// Advance one frame.
    ///
    /// Returns `Ok(None)` when the view is not running. An activation that
    /// failed since the last call surfaces as an error here.
    pub fn tick(&mut self) -> Result<Option<FrameReport>> {
        if self.state == ArState::Initializing {
            match self.poll_ready() {
                Some(Err(err)) => return Err(err.into()),
                Some(Ok(())) => {}
                None => return Ok(None),
            }
        }
        if self.state != ArState::Running {
            return Ok(None);
        }

        self.drain_updates();
        let Some(session) = self.session.as_mut() else {
            return Ok(None);
        };
        let frame = session.next_frame()?;

        let markers = self.layout.place(&self.detections);
        let rasterizer = &self.rasterizer;
        let label_style = &self.settings.label;
        let sync = self.overlays.reconcile(
            &mut self.scene,
            &markers,
            &self.layout,
            self.settings.sync,
            |marker| rasterizer.render(&marker.label_text, label_style),
        );

        session.render(&self.scene, &self.camera, Some(&frame))?;
        self.frames += 1;

        let report = FrameReport {
            frame: self.frames,
            markers: markers.len(),
            added: sync.added,
            removed: sync.removed,
            reused: sync.reused,
        };
        log::debug!("ArSceneManager: {:?}", report);
        Ok(Some(report))
    }
}

impl Drop for ArSceneManager {
    fn drop(&mut self) {
        self.deactivate();
    }
}
