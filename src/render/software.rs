use anyhow::{anyhow, Result};
use image::{Pixel, Rgba, RgbaImage};
use imageproc::drawing::draw_line_segment_mut;
use nalgebra::{Point2, Point3, Vector3};

use super::RenderContext;
use crate::capture::{LedgerToken, ResourceKind, ResourceLedger};
use crate::error::AcquisitionError;
use crate::scene::{NodeKind, PerspectiveCamera, SceneContext};

/// Render surfaces larger than this in either dimension are refused.
const MAX_SURFACE_DIM: u32 = 8192;

/// CPU rasterizer drawing into an RGBA surface.
///
/// Planes are camera-facing, so each projects to an axis-aligned rectangle and
/// is filled by nearest-texel lookup. Wire boxes are drawn edge by edge.
/// Nodes are painted background first, then boxes, then labels.
pub struct SoftwareContext {
    width: u32,
    height: u32,
    surface: Option<RgbaImage>,
    token: Option<LedgerToken>,
    frames: u64,
}

impl SoftwareContext {
    pub fn new(width: u32, height: u32, ledger: &ResourceLedger) -> Result<Self, AcquisitionError> {
        if width == 0 || height == 0 || width > MAX_SURFACE_DIM || height > MAX_SURFACE_DIM {
            return Err(AcquisitionError::ContextUnavailable(format!(
                "unsupported surface size {}x{}",
                width, height
            )));
        }
        Ok(Self {
            width,
            height,
            surface: Some(RgbaImage::new(width, height)),
            token: Some(ledger.track(ResourceKind::Context)),
            frames: 0,
        })
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl RenderContext for SoftwareContext {
    fn backend(&self) -> &'static str {
        "software"
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn render(
        &mut self,
        scene: &SceneContext,
        camera: &PerspectiveCamera,
        background: Option<&RgbaImage>,
    ) -> Result<()> {
        let surface = self
            .surface
            .as_mut()
            .ok_or_else(|| anyhow!("render context disposed"))?;
        surface.pixels_mut().for_each(|p| *p = Rgba([0, 0, 0, 0]));

        for (_, node) in scene.iter() {
            if let NodeKind::Background { width, height } = &node.kind {
                if let Some(frame) = background {
                    blit_plane(surface, camera, &node.position, *width, *height, frame);
                }
            }
        }
        for (_, node) in scene.iter() {
            if let NodeKind::WireBox { size, color } = &node.kind {
                draw_wire_box(surface, camera, &node.position, size, *color);
            }
        }
        for (_, node) in scene.iter() {
            if let NodeKind::LabelPlane {
                width,
                height,
                texture,
            } = &node.kind
            {
                if !texture.is_blank() {
                    blit_plane(surface, camera, &node.position, *width, *height, texture.image());
                }
            }
        }

        self.frames += 1;
        Ok(())
    }

    fn surface(&self) -> Option<&RgbaImage> {
        self.surface.as_ref()
    }

    fn dispose(&mut self) {
        if self.surface.take().is_some() {
            log::debug!(
                "SoftwareContext: disposed {}x{} after {} frames",
                self.width,
                self.height,
                self.frames
            );
        }
        self.token = None;
    }

    fn is_disposed(&self) -> bool {
        self.surface.is_none()
    }
}

impl Drop for SoftwareContext {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn blit_plane(
    surface: &mut RgbaImage,
    camera: &PerspectiveCamera,
    center: &Point3<f32>,
    width: f32,
    height: f32,
    texture: &RgbaImage,
) {
    let (sw, sh) = surface.dimensions();
    let (tw, th) = texture.dimensions();
    if tw == 0 || th == 0 {
        return;
    }
    let top_left = Point3::new(center.x - width / 2.0, center.y + height / 2.0, center.z);
    let bottom_right = Point3::new(center.x + width / 2.0, center.y - height / 2.0, center.z);
    let (Some(a), Some(b)) = (
        camera.project(&top_left, sw, sh),
        camera.project(&bottom_right, sw, sh),
    ) else {
        return;
    };
    let (x0, y0, x1, y1) = (a.x, a.y, b.x, b.y);
    if !(x1 > x0 && y1 > y0) {
        return;
    }

    let px_start = x0.floor().max(0.0) as u32;
    let px_end = (x1.ceil().max(0.0) as u32).min(sw);
    let py_start = y0.floor().max(0.0) as u32;
    let py_end = (y1.ceil().max(0.0) as u32).min(sh);
    for py in py_start..py_end {
        let cy = py as f32 + 0.5;
        if cy < y0 || cy >= y1 {
            continue;
        }
        let ty = (((cy - y0) / (y1 - y0)) * th as f32) as u32;
        for px in px_start..px_end {
            let cx = px as f32 + 0.5;
            if cx < x0 || cx >= x1 {
                continue;
            }
            let tx = (((cx - x0) / (x1 - x0)) * tw as f32) as u32;
            let texel = texture.get_pixel(tx.min(tw - 1), ty.min(th - 1));
            surface.get_pixel_mut(px, py).blend(texel);
        }
    }
}

fn draw_wire_box(
    surface: &mut RgbaImage,
    camera: &PerspectiveCamera,
    center: &Point3<f32>,
    size: &Vector3<f32>,
    color: Rgba<u8>,
) {
    let (sw, sh) = surface.dimensions();
    let half = *size / 2.0;
    let corners: Vec<Option<Point2<f32>>> = (0..8u8)
        .map(|i| {
            let sign = |bit: u8| if i & bit == 0 { -1.0 } else { 1.0 };
            let corner = *center + Vector3::new(sign(1) * half.x, sign(2) * half.y, sign(4) * half.z);
            camera.project(&corner, sw, sh)
        })
        .collect();

    for i in 0..8usize {
        for bit in [1usize, 2, 4] {
            if i & bit != 0 {
                continue;
            }
            // Edges with an end behind the camera are skipped.
            let (Some(a), Some(b)) = (corners[i], corners[i | bit]) else {
                continue;
            };
            if let Some((start, end)) = clip_segment(a, b, sw as f32, sh as f32) {
                draw_line_segment_mut(surface, start, end, color);
            }
        }
    }
}

/// Clip a segment to the viewport (one pixel of slack). Liang-Barsky.
fn clip_segment(
    a: Point2<f32>,
    b: Point2<f32>,
    width: f32,
    height: f32,
) -> Option<((f32, f32), (f32, f32))> {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let (mut t0, mut t1) = (0.0f32, 1.0f32);
    let checks = [
        (-dx, a.x + 1.0),
        (dx, width + 1.0 - a.x),
        (-dy, a.y + 1.0),
        (dy, height + 1.0 - a.y),
    ];
    for (p, q) in checks {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }
    Some((
        (a.x + t0 * dx, a.y + t0 * dy),
        (a.x + t1 * dx, a.y + t1 * dy),
    ))
}
