use anyhow::Result;
use image::{Rgba, RgbaImage};

use super::stream::FrameGrabber;

/// Moving-pattern camera behind `stub://<name>` URLs.
pub(crate) struct SyntheticCamera {
    name: String,
    width: u32,
    height: u32,
    frame_count: u64,
    /// Simulated scene state; shifts every 50 frames.
    scene_state: u8,
}

impl SyntheticCamera {
    pub(crate) fn new(name: &str, width: u32, height: u32) -> Self {
        log::info!("SyntheticCamera: opened {} ({}x{})", name, width, height);
        Self {
            name: name.to_string(),
            width,
            height,
            frame_count: 0,
            scene_state: 0,
        }
    }
}

impl FrameGrabber for SyntheticCamera {
    fn grab(&mut self) -> Result<RgbaImage> {
        self.frame_count += 1;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let shift = self.frame_count;
        let state = self.scene_state as u64;
        Ok(RgbaImage::from_fn(self.width, self.height, |x, y| {
            Rgba([
                ((x as u64 + shift) % 256) as u8,
                ((y as u64 + state * 16) % 256) as u8,
                ((x as u64 + y as u64 + shift) % 256) as u8,
                255,
            ])
        }))
    }

    fn describe(&self) -> String {
        format!("stub://{}", self.name)
    }

    fn stop(&mut self) {
        log::info!(
            "SyntheticCamera: closed {} after {} frames",
            self.name,
            self.frame_count
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_have_requested_size_and_move() -> Result<()> {
        let mut camera = SyntheticCamera::new("test", 32, 16);
        let first = camera.grab()?;
        let second = camera.grab()?;
        assert_eq!(first.dimensions(), (32, 16));
        assert_ne!(first, second);
        assert!(first.pixels().all(|p| p[3] == 255));
        Ok(())
    }
}
