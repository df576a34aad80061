//! Synthetic camera platform for `stub://` devices.
//!
//! Produces patterned RGB frames at the requested rate from a real capture
//! thread, so sessions, relays and pipelines can be exercised without
//! hardware. Permission answers, open latency and failures are scriptable.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::platform::{
    AuthorizationStatus, CameraDevice, CameraPlatform, CaptureFormat, DeviceInfo,
};
use super::relay::FrameSink;
use crate::frame::Frame;

/// Device id of the default synthetic camera.
pub const DEFAULT_SYNTHETIC_DEVICE: &str = "stub://back_camera";

/// Counters shared between a platform, its cameras, and the test observing them.
#[derive(Debug, Default)]
pub struct SyntheticStats {
    opens: AtomicUsize,
    starts: AtomicUsize,
    stops: AtomicUsize,
    access_requests: AtomicUsize,
    frames: AtomicU64,
}

impl SyntheticStats {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn access_requests(&self) -> usize {
        self.access_requests.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }
}

pub struct SyntheticPlatform {
    authorization: AuthorizationStatus,
    grant_on_request: bool,
    devices: Vec<DeviceInfo>,
    open_delay: Duration,
    fail_open: bool,
    fail_output: bool,
    frame_limit: Option<u64>,
    stats: Arc<SyntheticStats>,
}

impl Default for SyntheticPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticPlatform {
    /// Authorized platform with one back camera.
    pub fn new() -> Self {
        Self {
            authorization: AuthorizationStatus::Authorized,
            grant_on_request: true,
            devices: vec![DeviceInfo {
                id: DEFAULT_SYNTHETIC_DEVICE.to_string(),
                name: "Synthetic back camera".to_string(),
            }],
            open_delay: Duration::ZERO,
            fail_open: false,
            fail_output: false,
            frame_limit: None,
            stats: Arc::new(SyntheticStats::default()),
        }
    }

    pub fn with_authorization(mut self, status: AuthorizationStatus) -> Self {
        self.authorization = status;
        self
    }

    /// Answer to the access prompt when status is `NotDetermined`.
    pub fn grant_on_request(mut self, grant: bool) -> Self {
        self.grant_on_request = grant;
        self
    }

    /// Add another enumerable device.
    pub fn with_device(mut self, id: &str, name: &str) -> Self {
        self.devices.push(DeviceInfo {
            id: id.to_string(),
            name: name.to_string(),
        });
        self
    }

    pub fn without_devices(mut self) -> Self {
        self.devices.clear();
        self
    }

    /// Block each `open` call, keeping a configuration in flight.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Devices open but refuse to feed the session output.
    pub fn failing_output(mut self) -> Self {
        self.fail_output = true;
        self
    }

    /// End each capture run by itself after `frames` frames, like a camera
    /// that goes away mid-stream.
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    pub fn stats(&self) -> Arc<SyntheticStats> {
        self.stats.clone()
    }
}

impl CameraPlatform for SyntheticPlatform {
    fn authorization_status(&self) -> AuthorizationStatus {
        self.authorization
    }

    fn request_access(&mut self) -> bool {
        self.stats.access_requests.fetch_add(1, Ordering::SeqCst);
        if self.authorization == AuthorizationStatus::NotDetermined {
            self.authorization = if self.grant_on_request {
                AuthorizationStatus::Authorized
            } else {
                AuthorizationStatus::Denied
            };
        }
        self.authorization == AuthorizationStatus::Authorized
    }

    fn devices(&self) -> Vec<DeviceInfo> {
        self.devices.clone()
    }

    fn open(&mut self, device_id: &str, format: &CaptureFormat) -> Result<Box<dyn CameraDevice>> {
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        if !self.open_delay.is_zero() {
            std::thread::sleep(self.open_delay);
        }
        if self.fail_open {
            return Err(anyhow!("synthetic device {} failed to open", device_id));
        }
        let info = self
            .devices
            .iter()
            .find(|info| info.id == device_id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown synthetic device {}", device_id))?;

        log::info!("SyntheticPlatform: opened {} (synthetic)", info.id);
        Ok(Box::new(SyntheticCamera {
            info,
            format: *format,
            sink: None,
            fail_output: self.fail_output,
            frame_limit: self.frame_limit,
            capture: None,
            stats: self.stats.clone(),
        }))
    }
}

struct CaptureThread {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct SyntheticCamera {
    info: DeviceInfo,
    format: CaptureFormat,
    sink: Option<FrameSink>,
    fail_output: bool,
    frame_limit: Option<u64>,
    capture: Option<CaptureThread>,
    stats: Arc<SyntheticStats>,
}

impl CameraDevice for SyntheticCamera {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn bind_output(&mut self, sink: FrameSink) -> Result<()> {
        if self.fail_output {
            return Err(anyhow!("{} cannot feed the session output", self.info.id));
        }
        self.sink = Some(sink);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        if let Some(ended) = self.capture.take() {
            if ended.handle.join().is_err() {
                log::error!("{} capture thread panicked", self.info.id);
            }
        }
        let sink = self
            .sink
            .clone()
            .ok_or_else(|| anyhow!("{} has no output bound", self.info.id))?;

        let stop = Arc::new(AtomicBool::new(false));
        let mut pattern = PatternGenerator::new(self.format);
        let interval = Duration::from_millis(1000 / u64::from(self.format.target_fps.max(1)));
        let thread_stop = stop.clone();
        let frame_limit = self.frame_limit;
        let stats = self.stats.clone();
        let handle = std::thread::Builder::new()
            .name("camera-capture".into())
            .spawn(move || {
                let mut delivered = 0u64;
                while !thread_stop.load(Ordering::Acquire) {
                    if frame_limit.is_some_and(|limit| delivered >= limit) {
                        log::warn!("synthetic capture ended after {} frames", delivered);
                        break;
                    }
                    match pattern.next_frame() {
                        Ok(frame) => {
                            delivered += 1;
                            stats.frames.fetch_add(1, Ordering::SeqCst);
                            sink.deliver(frame);
                        }
                        Err(err) => {
                            log::error!("synthetic capture failed: {:#}", err);
                            break;
                        }
                    }
                    std::thread::sleep(interval);
                }
            })
            .context("spawn camera capture thread")?;

        self.stats.starts.fetch_add(1, Ordering::SeqCst);
        self.capture = Some(CaptureThread { stop, handle });
        Ok(())
    }

    fn stop(&mut self) {
        let Some(capture) = self.capture.take() else {
            return;
        };
        capture.stop.store(true, Ordering::Release);
        if capture.handle.join().is_err() {
            log::error!("{} capture thread panicked", self.info.id);
        }
        self.stats.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.capture
            .as_ref()
            .is_some_and(|capture| !capture.handle.is_finished())
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Moving test pattern with an occasional scene change.
struct PatternGenerator {
    format: CaptureFormat,
    frame_count: u64,
    scene_state: u8,
}

impl PatternGenerator {
    fn new(format: CaptureFormat) -> Self {
        Self {
            format,
            frame_count: 0,
            scene_state: 0,
        }
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let pixel_count = (self.format.width * self.format.height * 3) as usize;
        let offset = self.frame_count + u64::from(self.scene_state);
        let pixels = (0..pixel_count)
            .map(|i| ((i as u64 + offset) % 256) as u8)
            .collect();
        Frame::from_rgb(pixels, self.format.width, self.format.height, self.frame_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::relay::FrameRelay;

    fn small_format() -> CaptureFormat {
        CaptureFormat {
            width: 16,
            height: 8,
            target_fps: 100,
        }
    }

    #[test]
    fn camera_delivers_frames_until_stopped() -> Result<()> {
        let mut platform = SyntheticPlatform::new();
        let stats = platform.stats();
        let relay = FrameRelay::new(8);
        let subscription = relay.subscribe();

        let mut camera = platform.open(DEFAULT_SYNTHETIC_DEVICE, &small_format())?;
        camera.bind_output(relay.sink())?;
        camera.start()?;
        assert!(camera.is_running());

        let frame = subscription
            .recv_timeout(Duration::from_secs(2))
            .expect("synthetic frame");
        assert_eq!((frame.width(), frame.height()), (16, 8));

        camera.stop();
        assert!(!camera.is_running());
        assert_eq!((stats.opens(), stats.starts(), stats.stops()), (1, 1, 1));
        Ok(())
    }

    #[test]
    fn frame_limit_ends_capture_and_restart_resumes() -> Result<()> {
        let mut platform = SyntheticPlatform::new().with_frame_limit(3);
        let stats = platform.stats();
        let relay = FrameRelay::new(8);

        let mut camera = platform.open(DEFAULT_SYNTHETIC_DEVICE, &small_format())?;
        camera.bind_output(relay.sink())?;
        camera.start()?;
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while camera.is_running() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!camera.is_running());
        assert_eq!(stats.frames(), 3);

        camera.start()?;
        assert_eq!(stats.starts(), 2);
        camera.stop();
        assert_eq!(stats.stops(), 1);
        Ok(())
    }

    #[test]
    fn start_without_output_fails() -> Result<()> {
        let mut platform = SyntheticPlatform::new();
        let mut camera = platform.open(DEFAULT_SYNTHETIC_DEVICE, &small_format())?;
        assert!(camera.start().is_err());
        Ok(())
    }

    #[test]
    fn unknown_device_fails_to_open() {
        let mut platform = SyntheticPlatform::new();
        assert!(platform.open("stub://front_camera", &small_format()).is_err());
    }

    #[test]
    fn access_prompt_follows_script() {
        let mut platform = SyntheticPlatform::new()
            .with_authorization(AuthorizationStatus::NotDetermined)
            .grant_on_request(false);
        assert!(!platform.request_access());
        assert_eq!(platform.authorization_status(), AuthorizationStatus::Denied);
        assert_eq!(platform.stats().access_requests(), 1);
    }

    #[test]
    fn pattern_changes_between_frames() -> Result<()> {
        let mut pattern = PatternGenerator::new(small_format());
        let first = pattern.next_frame()?;
        let second = pattern.next_frame()?;
        assert_eq!(second.sequence, first.sequence + 1);
        assert_ne!(first.image().as_raw(), second.image().as_raw());
        Ok(())
    }
}
