use anyhow::Result;
use serde::Serialize;

use super::relay::FrameSink;

/// Camera access state as reported by the platform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    #[default]
    NotDetermined,
    Authorized,
    Denied,
    Restricted,
}

impl AuthorizationStatus {
    /// Denied and restricted access are final; no prompt will change them.
    pub fn is_refused(self) -> bool {
        matches!(self, Self::Denied | Self::Restricted)
    }
}

/// An enumerable capture device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
}

/// Requested capture format. Devices may negotiate something close to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl Default for CaptureFormat {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            target_fps: 30,
        }
    }
}

/// An opened camera: the session's input.
///
/// Devices deliver frames to their bound `FrameSink` from a capture thread they
/// own. All methods are called from the session command queue only.
pub trait CameraDevice: Send {
    fn info(&self) -> &DeviceInfo;

    /// Wire the session output. Fails when the device cannot feed it.
    fn bind_output(&mut self, sink: FrameSink) -> Result<()>;

    /// Begin frame delivery. Idempotent while running.
    fn start(&mut self) -> Result<()>;

    /// Halt frame delivery and wait for the capture thread to go quiet.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Platform capture API: permissions, enumeration, device opening.
pub trait CameraPlatform: Send {
    fn authorization_status(&self) -> AuthorizationStatus;

    /// Ask for camera access. Blocks until the prompt is answered.
    fn request_access(&mut self) -> bool;

    fn devices(&self) -> Vec<DeviceInfo>;

    fn open(&mut self, device_id: &str, format: &CaptureFormat) -> Result<Box<dyn CameraDevice>>;
}
