//! Capture session: a camera device, its output wiring, and the command
//! queue that serializes every mutation of them.
//!
//! `activate`, `request_configure`, `start` and `stop` are fire-and-forget.
//! Each decides against the `ConfigGate` on the calling thread and, when
//! there is work left, posts a command to the `camera-session` thread. That
//! thread is the only owner of the platform and device and runs commands in
//! submission order; it never re-reads the gate to defer a queued start.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::gate::ConfigGate;
use super::platform::{AuthorizationStatus, CameraDevice, CameraPlatform, CaptureFormat, DeviceInfo};
use super::relay::{FrameRelay, FrameSubscription, DEFAULT_QUEUE_DEPTH};
use crate::error::ScanError;
use crate::frame::Frame;
use crate::geometry::NormalizedRect;

/// Observable session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Not delivering frames. May or may not have a device bound.
    Idle,
    /// A configuration has been claimed and not yet committed or abandoned.
    Configuring,
    /// Device bound and delivering frames.
    Running,
    /// Command queue shut down. Terminal.
    Stopped,
}

/// Settings applied at each configuration.
#[derive(Clone, Debug)]
pub struct SessionSettings {
    /// Device to bind; `None` picks the first enumerated device.
    pub device_id: Option<String>,
    pub format: CaptureFormat,
    /// Subscriber queue depth for the frame relay.
    pub queue_depth: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            device_id: None,
            format: CaptureFormat::default(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

enum Command {
    Activate,
    Configure,
    Start,
    Stop,
    Sync(Sender<()>),
    Shutdown,
}

#[derive(Default)]
struct Observed {
    authorization: AuthorizationStatus,
    running: bool,
    shut_down: bool,
    device: Option<DeviceInfo>,
}

struct Shared {
    gate: ConfigGate,
    observed: Mutex<Observed>,
    changed: Condvar,
    configurations: AtomicU64,
}

impl Shared {
    fn observed(&self) -> MutexGuard<'_, Observed> {
        self.observed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, apply: impl FnOnce(&mut Observed)) {
        apply(&mut *self.observed());
        self.changed.notify_all();
    }

    fn state_of(&self, observed: &Observed) -> SessionState {
        if observed.shut_down {
            SessionState::Stopped
        } else if self.gate.is_configuring() {
            SessionState::Configuring
        } else if observed.running {
            SessionState::Running
        } else {
            SessionState::Idle
        }
    }
}

/// Handle to a camera capture session.
pub struct CaptureSession {
    commands: Sender<Command>,
    shared: Arc<Shared>,
    relay: Arc<FrameRelay>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CaptureSession {
    /// Spawn the session command queue. Nothing is configured until
    /// `activate` or `request_configure` is called.
    pub fn new<P: CameraPlatform + 'static>(platform: P, settings: SessionSettings) -> Result<Self> {
        let shared = Arc::new(Shared {
            gate: ConfigGate::new(),
            observed: Mutex::new(Observed {
                authorization: platform.authorization_status(),
                ..Observed::default()
            }),
            changed: Condvar::new(),
            configurations: AtomicU64::new(0),
        });
        let relay = FrameRelay::new(settings.queue_depth);
        let (tx, rx) = mpsc::channel();

        let worker = SessionWorker {
            platform: Box::new(platform),
            settings,
            device: None,
            shared: shared.clone(),
            relay: relay.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("camera-session".into())
            .spawn(move || worker.run(rx))
            .context("spawn camera session thread")?;

        Ok(Self {
            commands: tx,
            shared,
            relay,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Check camera permission, prompting if undetermined, then configure
    /// and start (or just start when a device is already bound).
    pub fn activate(&self) {
        self.dispatch(Command::Activate);
    }

    /// Rebuild the device and output wiring, optionally starting afterwards.
    ///
    /// When a configuration is already in flight this only folds
    /// `start_after` into its pending start and returns.
    pub fn request_configure(&self, start_after: bool) {
        if !self.shared.gate.try_acquire(start_after) {
            log::warn!(
                "configuration already in flight; start_after={} folded into pending start",
                start_after
            );
            return;
        }
        if !self.dispatch(Command::Configure) {
            self.shared.gate.abort();
        }
    }

    /// Start frame delivery. Deferred to the end of an in-flight configuration.
    pub fn start(&self) {
        if self.shared.gate.request_start() {
            log::debug!("start deferred until configuration completes");
            return;
        }
        self.dispatch(Command::Start);
    }

    /// Stop frame delivery.
    ///
    /// During a configuration this only clears the pending start; the
    /// configuration itself runs to completion and leaves the session idle.
    pub fn stop(&self) {
        if self.shared.gate.cancel_start() {
            log::debug!("stop during configuration: pending start cleared");
            return;
        }
        self.dispatch(Command::Stop);
    }

    /// Block until every command submitted before this call has executed.
    pub fn sync(&self) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        self.commands
            .send(Command::Sync(tx))
            .map_err(|_| anyhow!("capture session has shut down"))?;
        rx.recv()
            .map_err(|_| anyhow!("capture session stopped before sync completed"))
    }

    /// Stop the device and end the command queue. Idempotent.
    pub fn shutdown(&self) -> Result<()> {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return Ok(());
        };
        let _ = self.commands.send(Command::Shutdown);
        handle
            .join()
            .map_err(|_| anyhow!("camera session thread panicked"))
    }

    pub fn state(&self) -> SessionState {
        let observed = self.shared.observed();
        self.shared.state_of(&observed)
    }

    pub fn is_running(&self) -> bool {
        self.shared.observed().running
    }

    pub fn authorization_status(&self) -> AuthorizationStatus {
        self.shared.observed().authorization
    }

    /// Device bound by the last successful configuration.
    pub fn active_device(&self) -> Option<DeviceInfo> {
        self.shared.observed().device.clone()
    }

    /// Number of configurations that actually executed.
    pub fn configuration_count(&self) -> u64 {
        self.shared.configurations.load(Ordering::SeqCst)
    }

    /// Wait until the session reaches `target`. Returns false on timeout.
    pub fn wait_for_state(&self, target: SessionState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut observed = self.shared.observed();
        loop {
            if self.shared.state_of(&observed) == target {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            // Gate transitions do not signal the condvar; poll in short slices.
            let slice = (deadline - now).min(Duration::from_millis(10));
            observed = self
                .shared
                .changed
                .wait_timeout(observed, slice)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub fn relay(&self) -> &Arc<FrameRelay> {
        &self.relay
    }

    pub fn latest_frame(&self) -> Option<Frame> {
        self.relay.latest_frame()
    }

    /// Crop a region of the most recent frame (e.g. a selected live detection).
    pub fn crop_latest(&self, rect: &NormalizedRect) -> Option<RgbImage> {
        self.relay.crop_latest(rect)
    }

    pub fn subscribe(&self) -> FrameSubscription {
        self.relay.subscribe()
    }

    fn dispatch(&self, command: Command) -> bool {
        if self.commands.send(command).is_err() {
            log::warn!("capture session has shut down; command ignored");
            return false;
        }
        true
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("capture session shutdown failed: {}", err);
        }
    }
}

// ----------------------------------------------------------------------------
// Command queue worker
// ----------------------------------------------------------------------------

struct SessionWorker {
    platform: Box<dyn CameraPlatform>,
    settings: SessionSettings,
    device: Option<Box<dyn CameraDevice>>,
    shared: Arc<Shared>,
    relay: Arc<FrameRelay>,
}

impl SessionWorker {
    fn run(mut self, commands: Receiver<Command>) {
        for command in commands.iter() {
            self.refresh_running();
            match command {
                Command::Activate => self.activate(),
                Command::Configure => self.configure(),
                Command::Start => self.start(),
                Command::Stop => self.stop(),
                Command::Sync(done) => {
                    let _ = done.send(());
                }
                Command::Shutdown => break,
            }
        }

        self.teardown();
        self.relay.unsubscribe();
        self.shared.update(|observed| observed.shut_down = true);
        log::info!("capture session shut down");
    }

    fn activate(&mut self) {
        let status = self.platform.authorization_status();
        self.publish_authorization(status);

        match status {
            AuthorizationStatus::NotDetermined => {
                let granted = self.platform.request_access();
                let status = if granted {
                    AuthorizationStatus::Authorized
                } else {
                    AuthorizationStatus::Denied
                };
                self.publish_authorization(status);
                if granted {
                    log::info!("camera access granted");
                    self.configure_from_queue(true);
                } else {
                    log::warn!("{}; session stays idle", ScanError::PermissionDenied);
                }
            }
            AuthorizationStatus::Authorized => {
                if self.device.is_none() {
                    self.configure_from_queue(true);
                } else {
                    self.start();
                }
            }
            AuthorizationStatus::Denied | AuthorizationStatus::Restricted => {
                log::warn!("camera access {:?}; session stays idle", status);
            }
        }
    }

    fn configure_from_queue(&mut self, start_after: bool) {
        if self.shared.gate.try_acquire(start_after) {
            self.configure();
        } else {
            log::debug!("configuration already queued; pending start recorded");
        }
    }

    /// Runs with the gate held. Releases it exactly once.
    fn configure(&mut self) {
        debug_assert!(self.shared.gate.is_configuring());
        self.shared.configurations.fetch_add(1, Ordering::SeqCst);

        self.teardown();

        match self.bind() {
            Ok(device) => {
                let info = device.info().clone();
                let format = self.settings.format;
                log::info!(
                    "capture session configured: {} ({}x{} @ {}fps)",
                    info.id,
                    format.width,
                    format.height,
                    format.target_fps
                );
                self.device = Some(device);
                self.shared.update(|observed| observed.device = Some(info));

                // Capture the start decision and release in one step.
                if self.shared.gate.finish() {
                    self.start();
                }
            }
            Err(err) => {
                log::warn!("capture session configuration failed: {}", err);
                self.shared.gate.abort();
                self.shared.update(|observed| observed.device = None);
            }
        }
    }

    fn bind(&mut self) -> Result<Box<dyn CameraDevice>, ScanError> {
        let status = self.platform.authorization_status();
        self.publish_authorization(status);
        if status.is_refused() {
            return Err(ScanError::PermissionDenied);
        }

        let device_id = match &self.settings.device_id {
            Some(id) => id.clone(),
            None => self
                .platform
                .devices()
                .into_iter()
                .next()
                .map(|info| info.id)
                .ok_or_else(|| ScanError::DeviceUnavailable("no camera devices found".into()))?,
        };

        let mut device = self
            .platform
            .open(&device_id, &self.settings.format)
            .map_err(|err| ScanError::DeviceUnavailable(format!("{}: {:#}", device_id, err)))?;
        device.bind_output(self.relay.sink()).map_err(|err| {
            ScanError::DeviceUnavailable(format!("{} output: {:#}", device_id, err))
        })?;
        Ok(device)
    }

    /// Deferral already happened at submission. A gate held now belongs to
    /// a configuration queued after this start, so it is not consulted.
    fn start(&mut self) {
        let Some(device) = self.device.as_mut() else {
            log::warn!(
                "start ignored: {}",
                ScanError::DeviceUnavailable("no device bound".into())
            );
            return;
        };
        if device.is_running() {
            return;
        }
        match device.start() {
            Ok(()) => {
                log::info!("capture session started on {}", device.info().id);
                self.shared.update(|observed| observed.running = true);
            }
            Err(err) => {
                log::warn!("failed to start {}: {:#}", device.info().id, err);
            }
        }
    }

    fn stop(&mut self) {
        if let Some(device) = self.device.as_mut() {
            if device.is_running() {
                device.stop();
                log::info!("capture session stopped on {}", device.info().id);
            }
        }
        self.shared.update(|observed| observed.running = false);
    }

    /// A capture thread can end on its own (read error, unplugged device).
    fn refresh_running(&self) {
        let device_running = self.device.as_ref().is_some_and(|d| d.is_running());
        let published = self.shared.observed().running;
        if published && !device_running {
            if let Some(device) = self.device.as_ref() {
                log::warn!("capture on {} ended without a stop", device.info().id);
            }
            self.shared.update(|observed| observed.running = false);
        }
    }

    /// Stop and release the current device, removing input and output.
    fn teardown(&mut self) {
        if let Some(mut device) = self.device.take() {
            if device.is_running() {
                device.stop();
            }
            log::debug!("released device {}", device.info().id);
        }
        self.shared.update(|observed| {
            observed.running = false;
            observed.device = None;
        });
    }

    fn publish_authorization(&self, status: AuthorizationStatus) {
        self.shared
            .update(|observed| observed.authorization = status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::SyntheticPlatform;

    #[test]
    fn configure_is_visible_before_the_queue_runs_it() -> Result<()> {
        let platform = SyntheticPlatform::new().with_open_delay(Duration::from_millis(50));
        let session = CaptureSession::new(platform, SessionSettings::default())?;
        assert_eq!(session.state(), SessionState::Idle);

        session.request_configure(false);
        assert_eq!(session.state(), SessionState::Configuring);
        assert!(session.wait_for_state(SessionState::Idle, Duration::from_secs(5)));
        assert_eq!(session.configuration_count(), 1);
        Ok(())
    }

    #[test]
    fn dropping_the_session_stops_capture() -> Result<()> {
        let platform = SyntheticPlatform::new();
        let stats = platform.stats();
        let session = CaptureSession::new(platform, SessionSettings::default())?;
        session.request_configure(true);
        session.sync()?;
        assert!(session.is_running());

        drop(session);
        assert_eq!(stats.stops(), 1);
        Ok(())
    }
}
