//! Rendering contexts for the AR view.

mod software;

pub use software::SoftwareContext;

use anyhow::Result;
use image::RgbaImage;

use crate::scene::{PerspectiveCamera, SceneContext};

/// A drawing surface plus whatever device state backs it.
///
/// Contexts are created by a [`DeviceProvider`](crate::capture::DeviceProvider)
/// and owned by one capture session. Once disposed they refuse to render.
pub trait RenderContext: Send {
    fn backend(&self) -> &'static str;

    fn size(&self) -> (u32, u32);

    /// Draw `scene` from `camera`, texturing the background plane with
    /// `background` when given.
    fn render(
        &mut self,
        scene: &SceneContext,
        camera: &PerspectiveCamera,
        background: Option<&RgbaImage>,
    ) -> Result<()>;

    /// Last rendered frame. `None` once disposed.
    fn surface(&self) -> Option<&RgbaImage>;

    fn dispose(&mut self);

    fn is_disposed(&self) -> bool;
}
