use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::capture::{CaptureFormat, SessionSettings, DEFAULT_QUEUE_DEPTH};
use crate::detect::{InferenceAdapter, VerticalOrigin, DEFAULT_IOU_THRESHOLD};
use crate::pipeline::{DetectionThresholds, DEFAULT_LIVE_CONFIDENCE, DEFAULT_STILL_CONFIDENCE};

const DEFAULT_CAMERA_DEVICE: &str = "stub://back_camera";
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_MODEL_INPUT: u32 = 640;

#[derive(Debug, Deserialize, Default)]
struct ScanConfigFile {
    camera: Option<CameraConfigFile>,
    detection: Option<DetectionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    queue_depth: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    still_confidence: Option<f32>,
    live_confidence: Option<f32>,
    iou_threshold: Option<f32>,
    model_path: Option<PathBuf>,
    model_origin: Option<VerticalOrigin>,
    model_input_width: Option<u32>,
    model_input_height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub camera: CameraSettings,
    pub detection: DetectionSettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// Device id; `stub://` ids select the synthetic platform.
    pub device: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    pub queue_depth: usize,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub still_confidence: f32,
    pub live_confidence: f32,
    pub iou_threshold: f32,
    pub model_path: Option<PathBuf>,
    pub model_origin: VerticalOrigin,
    pub model_input_width: u32,
    pub model_input_height: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::from_file(ScanConfigFile::default())
    }
}

impl ScanConfig {
    /// File named by `SCAN_CONFIG` (if any), then defaults, then `SCAN_*`
    /// environment overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SCAN_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ScanConfigFile) -> Self {
        let camera = file.camera.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        Self {
            camera: CameraSettings {
                device: camera
                    .device
                    .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                queue_depth: camera.queue_depth.unwrap_or(DEFAULT_QUEUE_DEPTH),
            },
            detection: DetectionSettings {
                still_confidence: detection
                    .still_confidence
                    .unwrap_or(DEFAULT_STILL_CONFIDENCE),
                live_confidence: detection.live_confidence.unwrap_or(DEFAULT_LIVE_CONFIDENCE),
                iou_threshold: detection.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
                model_path: detection.model_path,
                model_origin: detection.model_origin.unwrap_or_default(),
                model_input_width: detection.model_input_width.unwrap_or(DEFAULT_MODEL_INPUT),
                model_input_height: detection
                    .model_input_height
                    .unwrap_or(DEFAULT_MODEL_INPUT),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("SCAN_CAMERA_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device.trim().to_string();
            }
        }
        if let Ok(fps) = std::env::var("SCAN_TARGET_FPS") {
            self.camera.target_fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("SCAN_TARGET_FPS must be an integer frame rate"))?;
        }
        if let Some(value) = env_threshold("SCAN_STILL_CONFIDENCE")? {
            self.detection.still_confidence = value;
        }
        if let Some(value) = env_threshold("SCAN_LIVE_CONFIDENCE")? {
            self.detection.live_confidence = value;
        }
        if let Some(value) = env_threshold("SCAN_IOU_THRESHOLD")? {
            self.detection.iou_threshold = value;
        }
        if let Ok(path) = std::env::var("SCAN_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detection.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(origin) = std::env::var("SCAN_MODEL_ORIGIN") {
            self.detection.model_origin = origin.parse()?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.camera.device.trim().is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        if self.camera.target_fps == 0 {
            return Err(anyhow!("camera target_fps must be greater than zero"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera resolution must be non-zero"));
        }
        for (name, value) in [
            ("still_confidence", self.detection.still_confidence),
            ("live_confidence", self.detection.live_confidence),
            ("iou_threshold", self.detection.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
            }
        }
        Ok(())
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            device_id: Some(self.camera.device.clone()),
            format: CaptureFormat {
                width: self.camera.width,
                height: self.camera.height,
                target_fps: self.camera.target_fps,
            },
            queue_depth: self.camera.queue_depth,
        }
    }

    pub fn thresholds(&self) -> DetectionThresholds {
        DetectionThresholds {
            still: self.detection.still_confidence,
            live: self.detection.live_confidence,
        }
    }

    pub fn uses_synthetic_camera(&self) -> bool {
        self.camera.device.starts_with("stub://")
    }
}

impl DetectionSettings {
    /// Adapter for the configured model file, or `None` when no model path is
    /// set. A model that cannot be loaded yields an unavailable adapter.
    pub fn model_adapter(&self) -> Option<InferenceAdapter> {
        let path = self.model_path.as_ref()?;
        let adapter = match self.load_model(path) {
            Ok(adapter) => adapter,
            Err(err) => {
                log::warn!("model {} unavailable: {:#}", path.display(), err);
                InferenceAdapter::unavailable()
            }
        };
        Some(
            adapter
                .with_iou_threshold(self.iou_threshold)
                .with_vertical_origin(self.model_origin),
        )
    }

    #[cfg(feature = "backend-tract")]
    fn load_model(&self, path: &Path) -> Result<InferenceAdapter> {
        let model = crate::detect::backends::TractModel::new(
            path,
            self.model_input_width,
            self.model_input_height,
        )?;
        Ok(InferenceAdapter::new(model))
    }

    #[cfg(not(feature = "backend-tract"))]
    fn load_model(&self, _path: &Path) -> Result<InferenceAdapter> {
        Err(anyhow!("built without the backend-tract feature"))
    }
}

fn env_threshold(name: &str) -> Result<Option<f32>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a number in [0, 1]", name)),
        Err(_) => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<ScanConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
