//! 2D annotation of a still image.
//!
//! The canvas is always the source image's natural size, so detection boxes in
//! source pixel space land on canvas pixels without any scaling. Every call
//! redraws from the source image; nothing is patched incrementally.

use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result};
use image::{ImageFormat, Rgba, RgbaImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

use crate::detect::{DetectionRecord, MISSING_CLASS};
use crate::label::{LabelRasterizer, LabelStyle, LabelTexture, MAX_TEXTURE_DIM};

/// A fully decoded source image. Holding one means decode has completed.
#[derive(Clone, Debug)]
pub struct SourceImage {
    image: RgbaImage,
}

impl SourceImage {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes).context("decode source image")?;
        Ok(Self {
            image: image.into_rgba8(),
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let image = image::open(path)
            .with_context(|| format!("open source image {}", path.display()))?;
        Ok(Self {
            image: image.into_rgba8(),
        })
    }

    pub fn from_rgba(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Natural pixel dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AnnotationStyle {
    /// Only detections of this class are drawn.
    pub target_class: String,
    pub line_width: f32,
    pub stroke: Rgba<u8>,
    pub label: LabelStyle,
    /// Gap between the box's top edge and the label baseline.
    pub label_offset: f32,
    /// Drop-shadow blur radius behind labels; `0` disables the shadow.
    pub shadow_blur: f32,
}

impl Default for AnnotationStyle {
    /// Thick red boxes with large red labels.
    fn default() -> Self {
        Self {
            target_class: MISSING_CLASS.to_string(),
            line_width: 10.0,
            stroke: Rgba([255, 0, 0, 255]),
            label: LabelStyle {
                font_size: 82.0,
                color: Rgba([255, 0, 0, 255]),
            },
            label_offset: 5.0,
            shadow_blur: 0.0,
        }
    }
}

impl AnnotationStyle {
    /// Thin violet boxes with small white labels on a dark shadow.
    pub fn compact() -> Self {
        Self {
            target_class: MISSING_CLASS.to_string(),
            line_width: 4.0,
            stroke: Rgba([238, 130, 238, 255]),
            label: LabelStyle {
                font_size: 18.0,
                color: Rgba([255, 255, 255, 255]),
            },
            label_offset: 5.0,
            shadow_blur: 5.0,
        }
    }
}

/// Geometry of one drawn overlay, in canvas pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct BoxOverlay {
    pub top_left: (f32, f32),
    pub width: f32,
    pub height: f32,
    pub label: String,
    /// Horizontal center and baseline of the label text.
    pub label_anchor: (f32, f32),
}

impl BoxOverlay {
    pub fn bottom_right(&self) -> (f32, f32) {
        (self.top_left.0 + self.width, self.top_left.1 + self.height)
    }
}

#[derive(Clone, Debug)]
pub struct AnnotatedImage {
    pub image: RgbaImage,
    pub overlays: Vec<BoxOverlay>,
}

impl AnnotatedImage {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        self.image
            .write_to(&mut out, ImageFormat::Png)
            .context("encode annotated image")?;
        Ok(out.into_inner())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.image
            .save(path)
            .with_context(|| format!("write annotated image {}", path.display()))
    }
}

pub struct Annotator {
    style: AnnotationStyle,
    rasterizer: LabelRasterizer,
}

impl Annotator {
    pub fn new(style: AnnotationStyle, rasterizer: LabelRasterizer) -> Self {
        Self { style, rasterizer }
    }

    pub fn style(&self) -> &AnnotationStyle {
        &self.style
    }

    /// Composite `source` with a box and confidence label per target detection.
    pub fn draw(&self, source: &SourceImage, detections: &[DetectionRecord]) -> AnnotatedImage {
        let mut canvas = source.image.clone();
        let mut overlays = Vec::new();

        for detection in detections
            .iter()
            .filter(|d| d.is_class(&self.style.target_class))
        {
            let (x, y) = detection.top_left();
            stroke_rect(
                &mut canvas,
                x,
                y,
                detection.width,
                detection.height,
                self.style.line_width,
                self.style.stroke,
            );

            let label = detection.confidence_label();
            let anchor = (detection.center_x, y - self.style.label_offset);
            let texture = self.rasterizer.render(&label, &self.style.label);
            if !texture.is_blank() {
                draw_label(&mut canvas, &texture, anchor, self.style.shadow_blur);
            }

            overlays.push(BoxOverlay {
                top_left: (x, y),
                width: detection.width,
                height: detection.height,
                label,
                label_anchor: anchor,
            });
        }

        log::debug!(
            "annotated {}x{} image with {} overlay(s)",
            canvas.width(),
            canvas.height(),
            overlays.len()
        );
        AnnotatedImage {
            image: canvas,
            overlays,
        }
    }
}

/// Source + detections with a lazily redrawn composite.
///
/// Changing either input marks the view dirty; the next [`Self::output`]
/// redraws from scratch.
pub struct AnnotationView {
    annotator: Annotator,
    source: Option<SourceImage>,
    detections: Vec<DetectionRecord>,
    output: Option<AnnotatedImage>,
    dirty: bool,
    redraws: u64,
}

impl AnnotationView {
    pub fn new(annotator: Annotator) -> Self {
        Self {
            annotator,
            source: None,
            detections: Vec::new(),
            output: None,
            dirty: false,
            redraws: 0,
        }
    }

    pub fn set_source(&mut self, source: SourceImage) {
        self.source = Some(source);
        self.dirty = true;
    }

    pub fn clear_source(&mut self) {
        self.source = None;
        self.output = None;
        self.dirty = false;
    }

    pub fn set_detections(&mut self, detections: Vec<DetectionRecord>) {
        self.detections = detections;
        self.dirty = true;
    }

    /// Current composite, redrawn if an input changed. `None` until a source is set.
    pub fn output(&mut self) -> Option<&AnnotatedImage> {
        if self.dirty {
            if let Some(source) = &self.source {
                self.output = Some(self.annotator.draw(source, &self.detections));
                self.redraws += 1;
            }
            self.dirty = false;
        }
        self.output.as_ref()
    }

    /// Number of full redraws performed so far.
    pub fn redraws(&self) -> u64 {
        self.redraws
    }
}

/// Stroke a rectangle outline centered on its path, like a canvas `stroke()`.
///
/// A pixel is painted when its center falls inside the stroke band.
fn stroke_rect(
    canvas: &mut RgbaImage,
    x: f32,
    y: f32,
    w: f32,
    h: f32,
    line_width: f32,
    color: Rgba<u8>,
) {
    if !(line_width > 0.0) {
        return;
    }
    let half = line_width / 2.0;
    let (ox0, oy0, ox1, oy1) = (x - half, y - half, x + w + half, y + h + half);
    let (ix0, iy0, ix1, iy1) = (x + half, y + half, x + w - half, y + h - half);

    fill_span(canvas, ox0, oy0, ox1, iy0.min(oy1), color);
    fill_span(canvas, ox0, iy1.max(oy0), ox1, oy1, color);
    fill_span(canvas, ox0, iy0, ix0.min(ox1), iy1, color);
    fill_span(canvas, ix1.max(ox0), iy0, ox1, iy1, color);
}

fn fill_span(canvas: &mut RgbaImage, x0: f32, y0: f32, x1: f32, y1: f32, color: Rgba<u8>) {
    let first = |v: f32| (v - 0.5).ceil() as i64;
    let (px0, py0) = (first(x0), first(y0));
    let (px1, py1) = (first(x1), first(y1));
    let (cw, ch) = (canvas.width() as i64, canvas.height() as i64);
    let (px0, py0) = (px0.clamp(0, cw), py0.clamp(0, ch));
    let (px1, py1) = (px1.clamp(0, cw), py1.clamp(0, ch));
    if px1 <= px0 || py1 <= py0 {
        return;
    }
    let rect = Rect::at(px0 as i32, py0 as i32).of_size((px1 - px0) as u32, (py1 - py0) as u32);
    draw_filled_rect_mut(canvas, rect, color);
}

/// Composite a label so that its horizontal center and baseline sit on `anchor`.
fn draw_label(canvas: &mut RgbaImage, texture: &LabelTexture, anchor: (f32, f32), shadow_blur: f32) {
    let left = (anchor.0 - texture.width() as f32 / 2.0).round() as i64;
    let top = (anchor.1 - texture.ascent()).round() as i64;

    if shadow_blur > 0.0 && shadow_blur.is_finite() {
        let sigma = shadow_blur / 2.0;
        let pad = (sigma * 3.0).ceil() as u32;
        let padded = pad.checked_mul(2).and_then(|extra| {
            Some((
                texture.width().checked_add(extra)?,
                texture.height().checked_add(extra)?,
            ))
        });
        match padded {
            Some((w, h)) if w <= MAX_TEXTURE_DIM && h <= MAX_TEXTURE_DIM => {
                let mut shadow = RgbaImage::new(w, h);
                for (x, y, pixel) in texture.image().enumerate_pixels() {
                    shadow.put_pixel(x + pad, y + pad, Rgba([0, 0, 0, pixel[3]]));
                }
                let shadow = imageproc::filter::gaussian_blur_f32(&shadow, sigma);
                image::imageops::overlay(canvas, &shadow, left - pad as i64, top - pad as i64);
            }
            _ => log::debug!("label shadow blur {} too large; drawing without it", shadow_blur),
        }
    }

    image::imageops::overlay(canvas, texture.image(), left, top);
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    fn white_source(w: u32, h: u32) -> SourceImage {
        SourceImage::from_rgba(RgbaImage::from_pixel(w, h, WHITE))
    }

    fn missing(cx: f32, cy: f32, w: f32, h: f32, conf: f32) -> DetectionRecord {
        DetectionRecord::new(MISSING_CLASS, cx, cy, w, h, conf).unwrap()
    }

    fn annotator(style: AnnotationStyle) -> Annotator {
        Annotator::new(style, LabelRasterizer::unavailable())
    }

    #[test]
    fn stroke_band_is_centered_on_path() {
        let mut canvas = RgbaImage::from_pixel(50, 50, WHITE);
        let red = Rgba([255, 0, 0, 255]);
        stroke_rect(&mut canvas, 10.0, 10.0, 20.0, 20.0, 4.0, red);
        // Band spans 8..12 around the top-left corner.
        assert_eq!(*canvas.get_pixel(8, 8), red);
        assert_eq!(*canvas.get_pixel(11, 11), red);
        assert_eq!(*canvas.get_pixel(7, 7), WHITE);
        assert_eq!(*canvas.get_pixel(12, 12), WHITE);
        assert_eq!(*canvas.get_pixel(20, 20), WHITE);
        // Far edge spans 28..32.
        assert_eq!(*canvas.get_pixel(31, 20), red);
        assert_eq!(*canvas.get_pixel(32, 20), WHITE);
    }

    #[test]
    fn stroke_clips_at_canvas_edges() {
        let mut canvas = RgbaImage::from_pixel(10, 10, WHITE);
        let red = Rgba([255, 0, 0, 255]);
        stroke_rect(&mut canvas, -5.0, -5.0, 8.0, 8.0, 2.0, red);
        assert_eq!(*canvas.get_pixel(2, 0), red);
        assert_eq!(*canvas.get_pixel(9, 9), WHITE);
    }

    #[test]
    fn thin_box_fills_solid() {
        let mut canvas = RgbaImage::from_pixel(20, 20, WHITE);
        let red = Rgba([255, 0, 0, 255]);
        stroke_rect(&mut canvas, 5.0, 5.0, 4.0, 2.0, 10.0, red);
        assert_eq!(*canvas.get_pixel(7, 6), red);
    }

    #[test]
    fn huge_shadow_blur_draws_label_without_shadow() {
        let green = Rgba([0, 255, 0, 255]);
        let texture = LabelTexture::from_image(RgbaImage::from_pixel(4, 4, green), 4.0);
        for blur in [f32::INFINITY, f32::NAN, 1.0e30, 1.0e5] {
            let mut canvas = RgbaImage::from_pixel(20, 20, WHITE);
            draw_label(&mut canvas, &texture, (10.0, 10.0), blur);
            assert_eq!(*canvas.get_pixel(9, 7), green);
            assert_eq!(*canvas.get_pixel(0, 0), WHITE);
        }
    }

    #[test]
    fn annotator_survives_unbounded_label_style() {
        let mut style = AnnotationStyle::default();
        style.shadow_blur = f32::INFINITY;
        style.label.font_size = f32::INFINITY;
        let annotator = Annotator::new(style, LabelRasterizer::system_default());
        let out = annotator.draw(&white_source(64, 64), &[missing(32.0, 32.0, 10.0, 10.0, 0.5)]);
        assert_eq!(out.dimensions(), (64, 64));
        assert_eq!(out.overlays.len(), 1);

        let mut style = AnnotationStyle::default();
        style.shadow_blur = f32::INFINITY;
        let annotator = Annotator::new(style, LabelRasterizer::system_default());
        let out = annotator.draw(&white_source(64, 64), &[missing(32.0, 32.0, 10.0, 10.0, 0.5)]);
        assert_eq!(out.overlays[0].label, "50%");
    }

    #[test]
    fn other_classes_are_not_drawn() {
        let source = white_source(64, 64);
        let product = DetectionRecord::new("product", 32.0, 32.0, 20.0, 20.0, 0.9).unwrap();
        let out = annotator(AnnotationStyle::default()).draw(&source, &[product]);
        assert!(out.overlays.is_empty());
        assert_eq!(out.image, *source.image());
    }

    #[test]
    fn view_redraws_only_when_inputs_change() {
        let mut view = AnnotationView::new(annotator(AnnotationStyle::compact()));
        assert!(view.output().is_none());

        view.set_detections(vec![missing(20.0, 20.0, 10.0, 10.0, 0.5)]);
        assert!(view.output().is_none());
        view.set_source(white_source(40, 40));
        assert_eq!(view.output().map(|o| o.overlays.len()), Some(1));
        assert_eq!(view.output().map(|o| o.overlays.len()), Some(1));
        assert_eq!(view.redraws(), 1);

        view.set_detections(Vec::new());
        let cleared = view.output().expect("output");
        assert!(cleared.overlays.is_empty());
        assert!(cleared.image.pixels().all(|p| *p == WHITE));
        assert_eq!(view.redraws(), 2);
    }
}
