//! shelf_ar - live AR overlay loop on a camera feed
//!
//! Runs until `--frames` frames were rendered or Ctrl-C; either way the
//! camera and rendering context are released before exit.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shelf_overlay::capture::DeviceProvider;
use shelf_overlay::detect::parse_response;
use shelf_overlay::{
    ArSceneManager, ArState, CaptureRequest, LabelRasterizer, OverlayConfig, SystemDevices,
};

const READY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Frames to render; 0 runs until Ctrl-C.
    #[arg(long, default_value_t = 0)]
    frames: u64,
    /// Detector response JSON to overlay.
    #[arg(long)]
    detections: Option<PathBuf>,
    /// Write the last rendered frame here on exit.
    #[arg(long)]
    snapshot: Option<PathBuf>,
    /// Camera URL (stub://name or v4l2:///dev/videoN).
    #[arg(long, env = "SHELF_CAMERA_URL")]
    camera: Option<String>,
    /// Config file (.toml or .json).
    #[arg(long, env = "SHELF_OVERLAY_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = match args.config.as_deref() {
        Some(path) => OverlayConfig::load_from(path)?,
        None => OverlayConfig::load()?,
    };
    if let Some(url) = args.camera {
        cfg.camera.url = url;
    }

    let batch = match args.detections.as_ref() {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("read detections {}", path.display()))?;
            let payload = serde_json::from_str(&raw)
                .with_context(|| format!("parse detections {}", path.display()))?;
            Some(parse_response(&payload)?)
        }
        None => None,
    };
    if let Some(size) = batch.as_ref().and_then(|b| b.image_size) {
        if cfg.ar.pixel_space.is_none() {
            cfg.ar.pixel_space = Some(size);
        }
    }

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let devices = Arc::new(SystemDevices::new());
    let ledger = devices.ledger().clone();
    let frame_interval = Duration::from_millis(1000 / u64::from(cfg.camera.target_fps.max(1)));
    let mut ar = ArSceneManager::new(
        cfg.ar.clone(),
        CaptureRequest::from(&cfg.camera),
        devices,
        LabelRasterizer::load(cfg.font_path.as_deref()),
    );

    ar.activate()?;
    while !ar.wait_ready(READY_TIMEOUT)? {
        if stop.load(Ordering::SeqCst) {
            ar.deactivate();
            log::info!("interrupted while acquiring camera");
            return Ok(());
        }
        log::warn!("still waiting for camera {}", cfg.camera.url);
    }

    if let Some(batch) = batch {
        log::info!(
            "overlaying {} detections ({} dropped)",
            batch.len(),
            batch.dropped
        );
        ar.update_detections(batch.records);
    }

    let mut rendered = 0u64;
    while !stop.load(Ordering::SeqCst) && (args.frames == 0 || rendered < args.frames) {
        match ar.tick()? {
            Some(report) => {
                rendered += 1;
                if report.added > 0 || report.removed > 0 {
                    log::info!(
                        "frame {}: {} markers (+{} -{})",
                        report.frame,
                        report.markers,
                        report.added,
                        report.removed
                    );
                }
            }
            None if ar.state() != ArState::Running => break,
            None => {}
        }
        std::thread::sleep(frame_interval);
    }

    if let Some(path) = args.snapshot.as_ref() {
        match ar.surface() {
            Some(surface) => surface
                .save(path)
                .with_context(|| format!("write snapshot {}", path.display()))?,
            None => log::warn!("no rendered frame to snapshot"),
        }
    }

    ar.deactivate();
    let usage = ledger.snapshot();
    log::info!(
        "rendered {} frames; streams live {} (peak {}), contexts live {} (peak {})",
        rendered,
        usage.live_streams,
        usage.peak_streams,
        usage.live_contexts,
        usage.peak_contexts
    );
    Ok(())
}
