use anyhow::{anyhow, Result};
use image::RgbaImage;

/// Camera pixel layouts the grabbers can hand back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Yuyv,
}

/// Convert a raw camera buffer into an opaque RGBA frame.
pub fn to_rgba(pixels: &[u8], width: u32, height: u32, format: PixelFormat) -> Result<RgbaImage> {
    let w = width as usize;
    let h = height as usize;
    let area = w
        .checked_mul(h)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    let bytes_per_pixel = match format {
        PixelFormat::Rgb24 => 3,
        PixelFormat::Yuyv => 2,
    };
    let expected = area
        .checked_mul(bytes_per_pixel)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    // Drivers may pad the buffer; short buffers are an error.
    if pixels.len() < expected {
        return Err(anyhow!(
            "{:?} frame length mismatch: expected {}, got {}",
            format,
            expected,
            pixels.len()
        ));
    }
    if format == PixelFormat::Yuyv && w % 2 != 0 {
        return Err(anyhow!("YUYV frame width must be even, got {}", width));
    }

    let mut rgba = vec![0u8; area * 4];
    match format {
        PixelFormat::Rgb24 => {
            for (src, dst) in pixels[..expected]
                .chunks_exact(3)
                .zip(rgba.chunks_exact_mut(4))
            {
                dst[..3].copy_from_slice(src);
                dst[3] = 255;
            }
        }
        PixelFormat::Yuyv => {
            // Each 4-byte macropixel holds two pixels sharing U and V.
            for (src, dst) in pixels[..expected]
                .chunks_exact(4)
                .zip(rgba.chunks_exact_mut(8))
            {
                let u = src[1] as f32 - 128.0;
                let v = src[3] as f32 - 128.0;
                write_yuv(&mut dst[..4], src[0] as f32, u, v);
                write_yuv(&mut dst[4..], src[2] as f32, u, v);
            }
        }
    }

    RgbaImage::from_raw(width, height, rgba).ok_or_else(|| anyhow!("frame buffer size mismatch"))
}

fn write_yuv(dst: &mut [u8], y: f32, u: f32, v: f32) {
    dst[0] = clamp_to_u8(y + 1.402_f32 * v);
    dst[1] = clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v);
    dst[2] = clamp_to_u8(y + 1.772_f32 * u);
    dst[3] = 255;
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_neutral_chroma_is_gray() -> Result<()> {
        let frame = to_rgba(&[128, 128, 128, 128], 2, 1, PixelFormat::Yuyv)?;
        assert_eq!(frame.into_raw(), vec![128, 128, 128, 255, 128, 128, 128, 255]);
        Ok(())
    }

    #[test]
    fn rgb_gains_opaque_alpha() -> Result<()> {
        let frame = to_rgba(&[1, 2, 3, 4, 5, 6], 2, 1, PixelFormat::Rgb24)?;
        assert_eq!(frame.into_raw(), vec![1, 2, 3, 255, 4, 5, 6, 255]);
        Ok(())
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(to_rgba(&[0; 5], 2, 1, PixelFormat::Rgb24).is_err());
        assert!(to_rgba(&[0; 6], 3, 1, PixelFormat::Yuyv).is_err());
    }
}
