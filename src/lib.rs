//! Shelf Overlay
//!
//! Renders shelf-gap detections over product photos and live camera frames.
//!
//! # Architecture
//!
//! A hosted object detector reports empty shelf slots as labelled boxes
//! (`class`, center `x`/`y`, `width`/`height`, `confidence`). This crate turns
//! those reports into two kinds of visual overlay:
//!
//! 1. **Annotated image**: the source photo with a stroked rectangle and a
//!    confidence label per target-class detection.
//! 2. **AR view**: a camera background plane in a perspective scene with a
//!    wireframe box and a floating label plane per detection, re-rendered
//!    every tick.
//!
//! # Module Structure
//!
//! - `detect`: detection records, provider payload parsing, provider seam
//! - `label`: text-to-texture rasterization for confidence labels
//! - `annotate`: 2D annotator
//! - `scene`: node arena, camera, detection-to-overlay reconciliation
//! - `render`: rendering contexts
//! - `capture`: camera stream and context acquisition, scoped release
//! - `ar`: AR view lifecycle and per-frame loop
//! - `config`: file and environment configuration

pub mod annotate;
pub mod ar;
pub mod capture;
pub mod config;
pub mod detect;
pub mod error;
pub mod label;
pub mod render;
pub mod scene;

pub use annotate::{
    AnnotatedImage, AnnotationStyle, AnnotationView, Annotator, BoxOverlay, SourceImage,
};
pub use ar::{ArSceneManager, ArSettings, ArState, DetectionUpdater, FrameReport};
pub use capture::{
    CancelToken, CaptureRequest, CaptureSession, DeviceProvider, ResourceLedger, SystemDevices,
};
pub use config::OverlayConfig;
#[cfg(feature = "provider-http")]
pub use detect::{HttpProvider, HttpProviderConfig};
pub use detect::{
    parse_response, DetectionBatch, DetectionProvider, DetectionRecord, StubProvider,
    MISSING_CLASS,
};
pub use error::{AcquisitionError, MalformedDetection, ProviderError};
pub use label::{LabelRasterizer, LabelStyle, LabelTexture};
pub use render::{RenderContext, SoftwareContext};
pub use scene::{SceneContext, SceneSync};
