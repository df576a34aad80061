//! Camera capture: platform abstraction, session state machine, frame relay.
//!
//! A `CaptureSession` owns one device at a time and serializes configure,
//! start and stop on its command queue. Devices push frames into the
//! session's `FrameRelay`, which keeps the latest one for on-demand crops and
//! forwards each to a single subscriber without ever blocking capture.
//!
//! `stub://` devices come from `SyntheticPlatform`; real V4L2 nodes are
//! available with the `ingest-v4l2` feature.

mod gate;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
mod platform;
mod relay;
mod session;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
mod v4l2;

pub use gate::ConfigGate;
pub use platform::{AuthorizationStatus, CameraDevice, CameraPlatform, CaptureFormat, DeviceInfo};
pub use relay::{FrameRelay, FrameSink, FrameSubscription, RelayStats, DEFAULT_QUEUE_DEPTH};
pub use session::{CaptureSession, SessionSettings, SessionState};
pub use synthetic::{SyntheticCamera, SyntheticPlatform, SyntheticStats, DEFAULT_SYNTHETIC_DEVICE};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Camera, V4l2Platform};
