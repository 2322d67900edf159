//! Text label rasterization.
//!
//! Turns a short display string ("87%") into an RGBA texture sized exactly to
//! the text: advance width by ascent-minus-descent at the requested pixel size.
//! When no font face could be loaded the rasterizer still answers, with a
//! blank 0x0 texture, so callers never have to special-case a missing font.

use std::path::Path;

use ab_glyph::{point, Font, FontArc, GlyphId, PxScale, PxScaleFont, ScaleFont};
use anyhow::{anyhow, Context, Result};
use image::{Rgba, RgbaImage};

/// Font locations searched by [`LabelRasterizer::system_default`], bold faces first.
const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Bold.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/Library/Fonts/Arial Bold.ttf",
    "/System/Library/Fonts/Supplemental/Arial Bold.ttf",
    "C:\\Windows\\Fonts\\arialbd.ttf",
];

/// Largest label texture edge, in pixels. Bigger requests render blank.
pub const MAX_TEXTURE_DIM: u32 = 8192;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LabelStyle {
    /// Pixel height of the em square.
    pub font_size: f32,
    pub color: Rgba<u8>,
}

impl Default for LabelStyle {
    fn default() -> Self {
        Self {
            font_size: 32.0,
            color: Rgba([238, 130, 238, 255]),
        }
    }
}

/// Rendered label. Pixels outside the glyph coverage are fully transparent.
#[derive(Clone, Debug, PartialEq)]
pub struct LabelTexture {
    image: RgbaImage,
    ascent: f32,
}

impl LabelTexture {
    /// Wrap a pre-rendered label whose baseline sits `ascent` pixels below the top.
    pub fn from_image(image: RgbaImage, ascent: f32) -> Self {
        Self { image, ascent }
    }

    pub fn blank() -> Self {
        Self {
            image: RgbaImage::new(0, 0),
            ascent: 0.0,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Distance from the top edge to the text baseline, in pixels.
    pub fn ascent(&self) -> f32 {
        self.ascent
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}

/// Label rasterizer holding the (optional) font face.
#[derive(Clone)]
pub struct LabelRasterizer {
    font: Option<FontArc>,
}

impl LabelRasterizer {
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let font = FontArc::try_from_vec(data).map_err(|e| anyhow!("invalid font data: {}", e))?;
        Ok(Self { font: Some(font) })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("read font file {}", path.display()))?;
        Self::from_bytes(data).with_context(|| format!("load font {}", path.display()))
    }

    /// Rasterizer with no font face; every label renders blank.
    pub fn unavailable() -> Self {
        Self { font: None }
    }

    /// Use `path` when given, otherwise search common system font locations.
    ///
    /// Never fails: a missing or broken font degrades to [`Self::unavailable`].
    pub fn load(path: Option<&Path>) -> Self {
        if let Some(path) = path {
            match Self::from_path(path) {
                Ok(rasterizer) => return rasterizer,
                Err(err) => log::warn!("label font unavailable: {:#}", err),
            }
        }
        Self::system_default()
    }

    pub fn system_default() -> Self {
        for candidate in SYSTEM_FONT_CANDIDATES {
            let path = Path::new(candidate);
            if !path.is_file() {
                continue;
            }
            match Self::from_path(path) {
                Ok(rasterizer) => {
                    log::debug!("label font: {}", path.display());
                    return rasterizer;
                }
                Err(err) => log::debug!("skipping font {}: {:#}", path.display(), err),
            }
        }
        log::warn!("no label font found; labels will render blank");
        Self::unavailable()
    }

    pub fn is_available(&self) -> bool {
        self.font.is_some()
    }

    /// Pixel size `text` would occupy at `font_size`, without rasterizing.
    pub fn measure(&self, text: &str, font_size: f32) -> (u32, u32) {
        match &self.font {
            Some(font) if !text.is_empty() && font_size > 0.0 && font_size.is_finite() => {
                let scaled = font.as_scaled(PxScale::from(font_size));
                let (advance, _) = layout(&scaled, text);
                (
                    advance.ceil().max(0.0) as u32,
                    (scaled.ascent() - scaled.descent()).ceil().max(0.0) as u32,
                )
            }
            _ => (0, 0),
        }
    }

    /// Rasterize `text`. Deterministic: the same text and style always give
    /// the same texture size.
    pub fn render(&self, text: &str, style: &LabelStyle) -> LabelTexture {
        let Some(font) = &self.font else {
            return LabelTexture::blank();
        };
        if text.is_empty() || !(style.font_size > 0.0) || !style.font_size.is_finite() {
            return LabelTexture::blank();
        }

        let scaled = font.as_scaled(PxScale::from(style.font_size));
        let ascent = scaled.ascent();
        let height = (ascent - scaled.descent()).ceil().max(0.0) as u32;
        let (advance, glyphs) = layout(&scaled, text);
        let width = advance.ceil().max(0.0) as u32;
        if width == 0 || height == 0 {
            return LabelTexture::blank();
        }
        if width > MAX_TEXTURE_DIM || height > MAX_TEXTURE_DIM {
            log::warn!(
                "label '{}' at {}px would be {}x{}; rendering blank",
                text,
                style.font_size,
                width,
                height
            );
            return LabelTexture::blank();
        }

        let mut image = RgbaImage::new(width, height);
        let [r, g, b, a] = style.color.0;
        for (id, x) in glyphs {
            let glyph = id.with_scale_and_position(scaled.scale(), point(x, ascent));
            let Some(outlined) = font.outline_glyph(glyph) else {
                continue;
            };
            let bounds = outlined.px_bounds();
            outlined.draw(|gx, gy, coverage| {
                let px = bounds.min.x as i64 + gx as i64;
                let py = bounds.min.y as i64 + gy as i64;
                if px < 0 || py < 0 || px >= width as i64 || py >= height as i64 {
                    return;
                }
                let alpha = (coverage.clamp(0.0, 1.0) * a as f32).round() as u8;
                let pixel = image.get_pixel_mut(px as u32, py as u32);
                // Overlapping glyph edges keep the stronger coverage.
                if alpha > pixel[3] {
                    *pixel = Rgba([r, g, b, alpha]);
                }
            });
        }

        LabelTexture { image, ascent }
    }
}

/// Lay out `text` on one line. Returns the total advance and each glyph's pen x.
fn layout(scaled: &PxScaleFont<&FontArc>, text: &str) -> (f32, Vec<(GlyphId, f32)>) {
    let mut caret = 0.0f32;
    let mut previous: Option<GlyphId> = None;
    let mut glyphs = Vec::with_capacity(text.len());
    for ch in text.chars() {
        let id = scaled.glyph_id(ch);
        if let Some(prev) = previous {
            caret += scaled.kern(prev, id);
        }
        glyphs.push((id, caret));
        caret += scaled.h_advance(id);
        previous = Some(id);
    }
    (caret, glyphs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_font_falls_back_to_blank() {
        let rasterizer = LabelRasterizer::unavailable();
        let texture = rasterizer.render("87%", &LabelStyle::default());
        assert!(texture.is_blank());
        assert_eq!((texture.width(), texture.height()), (0, 0));
        assert_eq!(rasterizer.measure("87%", 32.0), (0, 0));
    }

    #[test]
    fn invalid_font_bytes_rejected() {
        assert!(LabelRasterizer::from_bytes(vec![0, 1, 2, 3]).is_err());
    }

    #[test]
    fn missing_font_path_degrades() {
        let rasterizer = LabelRasterizer::load(Some(Path::new("/nonexistent/font.ttf")));
        // Either a system font was found or labels render blank; never an error.
        let texture = rasterizer.render("50%", &LabelStyle::default());
        assert_eq!(texture.is_blank(), !rasterizer.is_available());
    }

    #[test]
    fn rendering_is_sized_to_text_and_deterministic() {
        let rasterizer = LabelRasterizer::system_default();
        if !rasterizer.is_available() {
            eprintln!("no system font; skipping");
            return;
        }
        let style = LabelStyle::default();
        let a = rasterizer.render("87%", &style);
        let b = rasterizer.render("87%", &style);
        assert!(!a.is_blank());
        assert_eq!((a.width(), a.height()), (b.width(), b.height()));
        assert_eq!((a.width(), a.height()), rasterizer.measure("87%", style.font_size));
        assert!(a.ascent() > 0.0 && a.ascent() <= a.height() as f32);

        let wider = rasterizer.render("100%", &style);
        assert!(wider.width() > a.width());
        assert_eq!(wider.height(), a.height());

        // Some glyph coverage landed in the texture.
        assert!(a.image().pixels().any(|p| p[3] > 0));
    }

    #[test]
    fn unbounded_font_sizes_render_blank() {
        let rasterizer = LabelRasterizer::system_default();
        for font_size in [f32::INFINITY, f32::NAN, 1.0e9] {
            let style = LabelStyle {
                font_size,
                ..LabelStyle::default()
            };
            assert!(rasterizer.render("87%", &style).is_blank());
        }
        assert_eq!(rasterizer.measure("87%", f32::INFINITY), (0, 0));
    }

    #[test]
    fn empty_text_is_blank() {
        let rasterizer = LabelRasterizer::system_default();
        assert!(rasterizer.render("", &LabelStyle::default()).is_blank());
    }
}
