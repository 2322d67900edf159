//! Scene graph for the AR view: an owned node arena, the perspective camera,
//! and the mapping from detections to overlay nodes.

mod arena;
mod camera;
mod overlay;

pub use arena::{NodeId, NodeKind, SceneContext, SceneNode};
pub use camera::{viewport_aspect, PerspectiveCamera, DEFAULT_FAR, DEFAULT_FOV_DEG, DEFAULT_NEAR};
pub use overlay::{
    MarkerLayout, MarkerSpec, OverlayKey, PixelToScene, SceneOverlays, SceneSync, SyncReport,
};
