use anyhow::{anyhow, Result};
use image::Rgba;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::annotate::AnnotationStyle;
use crate::ar::ArSettings;
use crate::label::LabelStyle;
use crate::scene::SceneSync;

const DEFAULT_TARGET_CLASS: &str = crate::detect::MISSING_CLASS;
const DEFAULT_CAMERA_URL: &str = "stub://shelf_camera";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;
const MAX_FONT_SIZE: f32 = 1024.0;
const MAX_SHADOW_BLUR: f32 = 256.0;
const MAX_LABEL_OFFSET: f32 = 4096.0;

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    target_class: Option<String>,
    font_path: Option<PathBuf>,
    annotate: Option<AnnotateConfigFile>,
    ar: Option<ArConfigFile>,
    provider: Option<ProviderConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct AnnotateConfigFile {
    preset: Option<String>,
    line_width: Option<f32>,
    stroke_color: Option<String>,
    font_size: Option<f32>,
    label_color: Option<String>,
    label_offset: Option<f32>,
    shadow_blur: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct ArConfigFile {
    camera_url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    fov_deg: Option<f32>,
    camera_distance: Option<f32>,
    marker_depth: Option<f32>,
    label_offset: Option<f32>,
    label_plane: Option<[f32; 2]>,
    background_plane: Option<[f32; 2]>,
    marker_color: Option<String>,
    font_size: Option<f32>,
    label_color: Option<String>,
    sync: Option<String>,
    pixel_space: Option<[u32; 2]>,
}

#[derive(Debug, Deserialize, Default)]
struct ProviderConfigFile {
    url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub target_class: String,
    pub font_path: Option<PathBuf>,
    pub annotate: AnnotationStyle,
    pub ar: ArSettings,
    pub camera: CameraSettings,
    pub provider: ProviderSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSettings {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_CAMERA_URL.to_string(),
            width: DEFAULT_CAMERA_WIDTH,
            height: DEFAULT_CAMERA_HEIGHT,
            target_fps: DEFAULT_CAMERA_FPS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

#[cfg(feature = "provider-http")]
impl ProviderSettings {
    pub fn http_config(&self) -> Result<crate::detect::HttpProviderConfig> {
        let url = self
            .url
            .clone()
            .ok_or_else(|| anyhow!("provider url not configured (SHELF_PROVIDER_URL)"))?;
        Ok(crate::detect::HttpProviderConfig {
            url,
            api_key: self.api_key.clone(),
            timeout: self.timeout,
        })
    }
}

impl OverlayConfig {
    /// Load defaults, then the file named by `SHELF_OVERLAY_CONFIG`, then
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SHELF_OVERLAY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from an explicit file, still honouring environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: OverlayConfigFile) -> Result<Self> {
        let target_class = file
            .target_class
            .unwrap_or_else(|| DEFAULT_TARGET_CLASS.to_string());

        let annotate_file = file.annotate.unwrap_or_default();
        let mut annotate = match annotate_file.preset.as_deref() {
            None | Some("default") => AnnotationStyle::default(),
            Some("compact") => AnnotationStyle::compact(),
            Some(other) => return Err(anyhow!("unknown annotate preset '{}'", other)),
        };
        annotate.target_class = target_class.clone();
        if let Some(width) = annotate_file.line_width {
            annotate.line_width = width;
        }
        if let Some(color) = annotate_file.stroke_color.as_deref() {
            annotate.stroke = parse_color(color)?;
        }
        if let Some(size) = annotate_file.font_size {
            annotate.label.font_size = size;
        }
        if let Some(color) = annotate_file.label_color.as_deref() {
            annotate.label.color = parse_color(color)?;
        }
        if let Some(offset) = annotate_file.label_offset {
            annotate.label_offset = offset;
        }
        if let Some(blur) = annotate_file.shadow_blur {
            annotate.shadow_blur = blur;
        }

        let ar_file = file.ar.unwrap_or_default();
        let defaults = ArSettings::default();
        let ar = ArSettings {
            target_class: target_class.clone(),
            fov_deg: ar_file.fov_deg.unwrap_or(defaults.fov_deg),
            camera_distance: ar_file.camera_distance.unwrap_or(defaults.camera_distance),
            marker_depth: ar_file.marker_depth.unwrap_or(defaults.marker_depth),
            label_offset: ar_file.label_offset.unwrap_or(defaults.label_offset),
            label_plane: ar_file
                .label_plane
                .map(|[w, h]| (w, h))
                .unwrap_or(defaults.label_plane),
            background_plane: ar_file
                .background_plane
                .map(|[w, h]| (w, h))
                .unwrap_or(defaults.background_plane),
            marker_color: match ar_file.marker_color.as_deref() {
                Some(color) => parse_color(color)?,
                None => defaults.marker_color,
            },
            label: LabelStyle {
                font_size: ar_file.font_size.unwrap_or(defaults.label.font_size),
                color: match ar_file.label_color.as_deref() {
                    Some(color) => parse_color(color)?,
                    None => defaults.label.color,
                },
            },
            sync: match ar_file.sync.as_deref() {
                Some(sync) => sync.parse()?,
                None => defaults.sync,
            },
            pixel_space: ar_file.pixel_space.map(|[w, h]| (w, h)),
        };

        let camera = CameraSettings {
            url: ar_file
                .camera_url
                .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
            width: ar_file.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: ar_file.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            target_fps: ar_file.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
        };

        let provider_file = file.provider.unwrap_or_default();
        let provider = ProviderSettings {
            url: provider_file.url,
            api_key: provider_file.api_key,
            timeout: Duration::from_secs(
                provider_file
                    .timeout_secs
                    .unwrap_or(DEFAULT_PROVIDER_TIMEOUT_SECS),
            ),
        };

        Ok(Self {
            target_class,
            font_path: file.font_path,
            annotate,
            ar,
            camera,
            provider,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(class) = std::env::var("SHELF_TARGET_CLASS") {
            if !class.trim().is_empty() {
                self.set_target_class(class.trim());
            }
        }
        if let Ok(url) = std::env::var("SHELF_CAMERA_URL") {
            if !url.trim().is_empty() {
                self.camera.url = url;
            }
        }
        if let Ok(path) = std::env::var("SHELF_FONT_PATH") {
            if !path.trim().is_empty() {
                self.font_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(url) = std::env::var("SHELF_PROVIDER_URL") {
            if !url.trim().is_empty() {
                self.provider.url = Some(url);
            }
        }
        if let Ok(key) = std::env::var("SHELF_PROVIDER_API_KEY") {
            if !key.trim().is_empty() {
                self.provider.api_key = Some(key);
            }
        }
        if let Ok(sync) = std::env::var("SHELF_SCENE_SYNC") {
            self.ar.sync = sync
                .parse()
                .map_err(|_| anyhow!("SHELF_SCENE_SYNC must be 'keyed' or 'rebuild'"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.target_class.trim().is_empty() {
            return Err(anyhow!("target_class must not be empty"));
        }
        if self.annotate.line_width < 0.0 || !self.annotate.line_width.is_finite() {
            return Err(anyhow!("annotate.line_width must be >= 0"));
        }
        let font_size_ok = |v: f32| v > 0.0 && v <= MAX_FONT_SIZE;
        if !font_size_ok(self.annotate.label.font_size) || !font_size_ok(self.ar.label.font_size) {
            return Err(anyhow!(
                "label font_size must be within (0, {}]",
                MAX_FONT_SIZE
            ));
        }
        if !(self.annotate.shadow_blur >= 0.0 && self.annotate.shadow_blur <= MAX_SHADOW_BLUR) {
            return Err(anyhow!(
                "annotate.shadow_blur must be within [0, {}]",
                MAX_SHADOW_BLUR
            ));
        }
        let offset_ok = |v: f32| v.abs() <= MAX_LABEL_OFFSET;
        if !offset_ok(self.annotate.label_offset) || !offset_ok(self.ar.label_offset) {
            return Err(anyhow!(
                "label_offset must be finite and within +/-{}",
                MAX_LABEL_OFFSET
            ));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if !(self.ar.fov_deg > 0.0 && self.ar.fov_deg < 180.0) {
            return Err(anyhow!("ar.fov_deg must be within (0, 180)"));
        }
        let positive = |v: f32| v.is_finite() && v > 0.0;
        if !positive(self.ar.camera_distance)
            || !positive(self.ar.marker_depth)
            || !positive(self.ar.label_plane.0)
            || !positive(self.ar.label_plane.1)
            || !positive(self.ar.background_plane.0)
            || !positive(self.ar.background_plane.1)
        {
            return Err(anyhow!(
                "ar camera distance, marker depth and plane sizes must be positive"
            ));
        }
        if matches!(self.ar.pixel_space, Some((0, _)) | Some((_, 0))) {
            return Err(anyhow!("ar.pixel_space dimensions must be greater than zero"));
        }
        if self.provider.timeout.as_secs() == 0 {
            return Err(anyhow!("provider timeout must be greater than zero"));
        }
        Ok(())
    }

    pub fn set_target_class(&mut self, class: &str) {
        self.target_class = class.to_string();
        self.annotate.target_class = class.to_string();
        self.ar.target_class = class.to_string();
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            target_class: DEFAULT_TARGET_CLASS.to_string(),
            font_path: None,
            annotate: AnnotationStyle::default(),
            ar: ArSettings::default(),
            camera: CameraSettings::default(),
            provider: ProviderSettings {
                url: None,
                api_key: None,
                timeout: Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
            },
        }
    }
}

fn read_config_file(path: &Path) -> Result<OverlayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

/// Parse a color name or `#rrggbb` / `#rrggbbaa` hex string.
pub fn parse_color(value: &str) -> Result<Rgba<u8>> {
    let value = value.trim();
    let named = match value.to_ascii_lowercase().as_str() {
        "red" => Some([255, 0, 0, 255]),
        "violet" => Some([238, 130, 238, 255]),
        "white" => Some([255, 255, 255, 255]),
        "black" => Some([0, 0, 0, 255]),
        "green" => Some([0, 128, 0, 255]),
        "lime" => Some([0, 255, 0, 255]),
        "blue" => Some([0, 0, 255, 255]),
        "yellow" => Some([255, 255, 0, 255]),
        _ => None,
    };
    if let Some(rgba) = named {
        return Ok(Rgba(rgba));
    }

    let hex = value
        .strip_prefix('#')
        .ok_or_else(|| anyhow!("unknown color '{}'", value))?;
    if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
        return Err(anyhow!("color '{}' must be #rrggbb or #rrggbbaa", value));
    }
    let channel = |i: usize| {
        u8::from_str_radix(&hex[i..i + 2], 16)
            .map_err(|_| anyhow!("color '{}' has invalid hex digits", value))
    };
    let alpha = if hex.len() == 8 { channel(6)? } else { 255 };
    Ok(Rgba([channel(0)?, channel(2)?, channel(4)?, alpha]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_and_hex_colors() {
        assert_eq!(parse_color("violet").unwrap(), Rgba([238, 130, 238, 255]));
        assert_eq!(parse_color("#FF8000").unwrap(), Rgba([255, 128, 0, 255]));
        assert_eq!(parse_color("#00000080").unwrap(), Rgba([0, 0, 0, 128]));
        assert!(parse_color("#12345").is_err());
        assert!(parse_color("chartreuse-ish").is_err());
    }

    #[test]
    fn defaults_validate() {
        let mut cfg = OverlayConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.annotate.target_class, crate::detect::MISSING_CLASS);
        assert_eq!(cfg.ar.sync, SceneSync::Keyed);
    }

    #[test]
    fn file_values_override_defaults() {
        let file: OverlayConfigFile = toml::from_str(
            r##"
            target_class = "empty"

            [annotate]
            preset = "compact"
            stroke_color = "#00ff00"

            [ar]
            sync = "rebuild"
            label_plane = [3.0, 1.5]
            "##,
        )
        .unwrap();
        let cfg = OverlayConfig::from_file(file).unwrap();
        assert_eq!(cfg.annotate.target_class, "empty");
        assert_eq!(cfg.ar.target_class, "empty");
        assert_eq!(cfg.annotate.line_width, 4.0);
        assert_eq!(cfg.annotate.stroke, Rgba([0, 255, 0, 255]));
        assert_eq!(cfg.ar.sync, SceneSync::Rebuild);
        assert_eq!(cfg.ar.label_plane, (3.0, 1.5));
    }

    #[test]
    fn unknown_preset_rejected() {
        let file = OverlayConfigFile {
            annotate: Some(AnnotateConfigFile {
                preset: Some("neon".to_string()),
                ..AnnotateConfigFile::default()
            }),
            ..OverlayConfigFile::default()
        };
        assert!(OverlayConfig::from_file(file).is_err());
    }

    #[test]
    fn oversized_label_and_shadow_values_rejected() {
        let annotate = |patch: AnnotateConfigFile| OverlayConfigFile {
            annotate: Some(patch),
            ..OverlayConfigFile::default()
        };
        let cases = [
            annotate(AnnotateConfigFile {
                shadow_blur: Some(f32::INFINITY),
                ..AnnotateConfigFile::default()
            }),
            annotate(AnnotateConfigFile {
                shadow_blur: Some(1.0e6),
                ..AnnotateConfigFile::default()
            }),
            annotate(AnnotateConfigFile {
                font_size: Some(f32::INFINITY),
                ..AnnotateConfigFile::default()
            }),
            annotate(AnnotateConfigFile {
                label_offset: Some(f32::NAN),
                ..AnnotateConfigFile::default()
            }),
            OverlayConfigFile {
                ar: Some(ArConfigFile {
                    font_size: Some(f32::INFINITY),
                    ..ArConfigFile::default()
                }),
                ..OverlayConfigFile::default()
            },
            OverlayConfigFile {
                ar: Some(ArConfigFile {
                    label_offset: Some(f32::NEG_INFINITY),
                    ..ArConfigFile::default()
                }),
                ..OverlayConfigFile::default()
            },
        ];
        for file in cases {
            let mut cfg = OverlayConfig::from_file(file).unwrap();
            assert!(cfg.validate().is_err());
        }

        let mut cfg = OverlayConfig::from_file(annotate(AnnotateConfigFile {
            shadow_blur: Some(MAX_SHADOW_BLUR),
            font_size: Some(MAX_FONT_SIZE),
            label_offset: Some(-5.0),
            ..AnnotateConfigFile::default()
        }))
        .unwrap();
        cfg.validate().unwrap();
    }
}
