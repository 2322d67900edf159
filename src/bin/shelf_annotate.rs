//! shelf_annotate - draw shelf-gap detections onto a product photo

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use shelf_overlay::detect::parse_response;
use shelf_overlay::{AnnotationStyle, Annotator, LabelRasterizer, OverlayConfig, SourceImage};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Source photo (JPEG or PNG).
    #[arg(long)]
    image: PathBuf,
    /// Detector response JSON to draw.
    #[arg(long, conflicts_with = "provider")]
    detections: Option<PathBuf>,
    /// Send the photo to the configured hosted detector instead.
    #[arg(long)]
    provider: bool,
    /// Output PNG path.
    #[arg(long, default_value = "annotated.png")]
    out: PathBuf,
    /// Style preset: default or compact. Overrides the config file.
    #[arg(long)]
    style: Option<String>,
    /// Config file (.toml or .json).
    #[arg(long, env = "SHELF_OVERLAY_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = match args.config.as_deref() {
        Some(path) => OverlayConfig::load_from(path)?,
        None => OverlayConfig::load()?,
    };

    let style = match args.style.as_deref() {
        None => cfg.annotate.clone(),
        Some(preset) => {
            let mut style = match preset {
                "default" => AnnotationStyle::default(),
                "compact" => AnnotationStyle::compact(),
                other => return Err(anyhow!("unknown style '{}'", other)),
            };
            style.target_class = cfg.target_class.clone();
            style
        }
    };

    let bytes = fs::read(&args.image)
        .with_context(|| format!("read image {}", args.image.display()))?;
    let source = SourceImage::decode(&bytes)?;

    let payload = match (&args.detections, args.provider) {
        (Some(path), _) => read_detections(path)?,
        (None, true) => detect_remote(&cfg, &bytes)?,
        (None, false) => return Err(anyhow!("pass --detections <json> or --provider")),
    };
    let batch = parse_response(&payload)?;
    if let Some((w, h)) = batch.image_size {
        if (w, h) != source.dimensions() {
            log::warn!(
                "detections were measured on {}x{}, image is {}x{}",
                w,
                h,
                source.dimensions().0,
                source.dimensions().1
            );
        }
    }

    let annotator = Annotator::new(style, LabelRasterizer::load(cfg.font_path.as_deref()));
    let annotated = annotator.draw(&source, &batch.records);
    annotated.save(&args.out)?;

    log::info!(
        "annotated {} of {} detections ({}x{}) -> {}",
        annotated.overlays.len(),
        batch.len(),
        annotated.dimensions().0,
        annotated.dimensions().1,
        args.out.display()
    );
    Ok(())
}

fn read_detections(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read detections {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse detections {}", path.display()))
}

#[cfg(feature = "provider-http")]
fn detect_remote(cfg: &OverlayConfig, image: &[u8]) -> Result<Value> {
    use shelf_overlay::{DetectionProvider, HttpProvider};

    let mut provider = HttpProvider::new(cfg.provider.http_config()?)?;
    Ok(provider.detect(image)?)
}

#[cfg(not(feature = "provider-http"))]
fn detect_remote(_cfg: &OverlayConfig, _image: &[u8]) -> Result<Value> {
    Err(anyhow!("built without the provider-http feature"))
}
