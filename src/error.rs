//! Error taxonomy for the capture and detection paths.
//!
//! None of these abort a caller of the detection pipeline: detection degrades
//! to an empty result, crops degrade to `None`, and capture failures show up
//! as observable session state.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanError {
    /// Camera access was refused by the platform or the user.
    #[error("camera permission denied")]
    PermissionDenied,

    /// No camera device (or output sink) could be bound to the session.
    #[error("camera device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The detection model is not loaded.
    #[error("detection model unavailable")]
    ModelUnavailable,

    /// The model failed during a single inference call.
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    /// A crop was requested on a rectangle with no area after clamping.
    #[error("invalid crop region {width}x{height}")]
    InvalidRegion { width: i64, height: i64 },
}
