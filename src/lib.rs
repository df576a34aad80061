//! Scan Kernel
//!
//! Camera capture and object detection core: a live camera session that is
//! safe under concurrent start/stop/reconfigure requests, and a pipeline that
//! turns a still image or camera frame into a de-duplicated list of labeled,
//! confidence-scored, normalized bounding boxes.
//!
//! # Data flow
//!
//! ```text
//! CaptureSession -> FrameRelay -> Pipeline -> InferenceAdapter -> NMS -> Vec<Detection>
//! ```
//!
//! Still images bypass the session and go straight to the pipeline.
//!
//! # Module Structure
//!
//! - `geometry`: normalized/pixel rectangles, IoU
//! - `frame`: shared frame handles, still images, cropping
//! - `detect`: model capability trait, inference adapter, suppression
//! - `capture`: camera platform abstraction, session state machine, frame relay
//! - `pipeline`: off-thread detection orchestration
//! - `config`: file + environment configuration

pub mod capture;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod pipeline;

pub use capture::{
    AuthorizationStatus, CaptureSession, FrameRelay, FrameSubscription, SessionSettings,
    SessionState, SyntheticPlatform,
};
pub use config::ScanConfig;
pub use detect::{
    suppress, Detection, DetectionModel, InferenceAdapter, ModelOutput, RawCandidate,
    ScriptedModel, VerticalOrigin,
};
pub use error::ScanError;
pub use frame::{crop, crop_normalized, Frame, StillImage};
pub use geometry::{iou, NormalizedRect, PixelRect};
pub use pipeline::{DetectionSource, PendingDetections, Pipeline};
