//! scan_demo - end-to-end synthetic run of the capture session and detection pipeline

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use scan_kernel::capture::{CameraPlatform, CaptureSession, SessionState, SyntheticPlatform};
use scan_kernel::detect::backends::coco_label;
use scan_kernel::{
    Detection, DetectionSource, InferenceAdapter, ModelOutput, NormalizedRect, Pipeline,
    ScanConfig, ScriptedModel, StillImage,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Duration in seconds to run the live session.
    #[arg(long, default_value_t = 5)]
    seconds: u64,
    /// Override the configured capture frame rate.
    #[arg(long)]
    fps: Option<u32>,
    /// Override the live-frame confidence threshold.
    #[arg(long)]
    confidence: Option<f32>,
    /// Also run still-image detection on the last captured frame.
    #[arg(long)]
    still: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = ScanConfig::load()?;
    if let Some(fps) = args.fps {
        if fps == 0 {
            return Err(anyhow!("fps must be >= 1"));
        }
        cfg.camera.target_fps = fps;
    }
    let live_threshold = args.confidence.unwrap_or(cfg.detection.live_confidence);
    if !(0.0..=1.0).contains(&live_threshold) {
        return Err(anyhow!("confidence must be within [0, 1]"));
    }

    let adapter = cfg.detection.model_adapter().unwrap_or_else(|| {
        log::info!("no model configured; using the scripted demo model");
        InferenceAdapter::new(demo_model())
            .with_iou_threshold(cfg.detection.iou_threshold)
            .with_vertical_origin(cfg.detection.model_origin)
    });
    let pipeline = Pipeline::new(adapter)?.with_thresholds(cfg.thresholds());

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .context("install ctrl-c handler")?;
    }

    let session = open_session(&cfg)?;
    let frames = session.subscribe();
    session.activate();
    if !session.wait_for_state(SessionState::Running, Duration::from_secs(5)) {
        log::warn!(
            "session did not start (state {:?}, authorization {:?})",
            session.state(),
            session.authorization_status()
        );
    }

    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    let mut processed = 0u64;
    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
        let Some(frame) = frames.recv_timeout(Duration::from_millis(200)) else {
            continue;
        };
        let (sequence, captured) = (frame.sequence, frame.clone());
        let detections = pipeline.detect(frame, live_threshold).wait();
        processed += 1;
        log::debug!("frame #{} detected {:?} after capture", sequence, captured.age());
        report(&format!("frame #{}", sequence), &detections);
    }

    if args.still {
        match session.latest_frame() {
            Some(frame) => {
                let source = DetectionSource::from(StillImage::from(frame));
                let threshold = pipeline.threshold_for(&source);
                let detections = pipeline.detect_blocking(source, threshold);
                report("still", &detections);
                for detection in &detections {
                    if let Some(crop) = detection.crop() {
                        log::info!(
                            "  crop for {}: {}x{}",
                            detection.id(),
                            crop.width(),
                            crop.height()
                        );
                    }
                }
            }
            None => log::warn!("no frame captured; skipping still detection"),
        }
    }

    session.stop();
    session.sync()?;
    let stats = session.relay().stats();
    session.shutdown()?;
    log::info!(
        "processed {} frame(s); relay received {}, dropped {}",
        processed,
        stats.frames_received,
        stats.frames_dropped
    );
    Ok(())
}

fn open_session(cfg: &ScanConfig) -> Result<CaptureSession> {
    if cfg.uses_synthetic_camera() {
        let mut platform = SyntheticPlatform::new();
        if !platform
            .devices()
            .iter()
            .any(|device| device.id == cfg.camera.device)
        {
            platform = platform.with_device(&cfg.camera.device, "Synthetic camera");
        }
        return CaptureSession::new(platform, cfg.session_settings());
    }
    open_device_session(cfg)
}

#[cfg(feature = "ingest-v4l2")]
fn open_device_session(cfg: &ScanConfig) -> Result<CaptureSession> {
    CaptureSession::new(scan_kernel::capture::V4l2Platform::new(), cfg.session_settings())
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_device_session(cfg: &ScanConfig) -> Result<CaptureSession> {
    Err(anyhow!(
        "camera {} requires the ingest-v4l2 feature",
        cfg.camera.device
    ))
}

/// Two overlapping cups (one suppressed), a book, and a low-confidence chair.
fn demo_model() -> ScriptedModel {
    ScriptedModel::repeating(vec![
        ModelOutput::new(coco_label(41), 0.91, NormalizedRect::new(0.30, 0.40, 0.20, 0.30)),
        ModelOutput::new(coco_label(41), 0.62, NormalizedRect::new(0.32, 0.41, 0.20, 0.30)),
        ModelOutput::new(coco_label(73), 0.78, NormalizedRect::new(0.60, 0.70, 0.25, 0.20)),
        ModelOutput::new(coco_label(56), 0.40, NormalizedRect::new(0.05, 0.05, 0.30, 0.50)),
    ])
    .with_latency(Duration::from_millis(20))
}

fn report(what: &str, detections: &[Detection]) {
    if detections.is_empty() {
        log::info!("{}: no detections found", what);
        return;
    }
    for detection in detections {
        let bbox = detection.bbox();
        log::info!(
            "{}: {} {} at ({:.2}, {:.2}, {:.2}x{:.2})",
            what,
            detection.label(),
            detection.confidence_percentage(),
            bbox.x,
            bbox.y,
            bbox.width,
            bbox.height
        );
    }
}
