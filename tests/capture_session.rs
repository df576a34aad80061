use anyhow::Result;
use std::sync::Barrier;
use std::time::Duration;

use scan_kernel::capture::{
    AuthorizationStatus, CaptureFormat, CaptureSession, SessionSettings, SessionState,
    SyntheticPlatform,
};
use scan_kernel::NormalizedRect;

const WAIT: Duration = Duration::from_secs(5);

fn settings() -> SessionSettings {
    SessionSettings {
        device_id: None,
        format: CaptureFormat {
            width: 32,
            height: 24,
            target_fps: 100,
        },
        queue_depth: 4,
    }
}

#[test]
fn start_during_configuration_is_honored() -> Result<()> {
    let platform = SyntheticPlatform::new().with_open_delay(Duration::from_millis(100));
    let stats = platform.stats();
    let session = CaptureSession::new(platform, settings())?;

    session.request_configure(false);
    assert_eq!(session.state(), SessionState::Configuring);
    session.start();
    session.sync()?;

    assert_eq!(session.state(), SessionState::Running);
    assert!(session.is_running());
    assert_eq!(session.configuration_count(), 1);
    assert_eq!(stats.starts(), 1);
    Ok(())
}

#[test]
fn concurrent_configure_requests_run_one_configuration() -> Result<()> {
    let platform = SyntheticPlatform::new().with_open_delay(Duration::from_millis(300));
    let stats = platform.stats();
    let session = CaptureSession::new(platform, settings())?;

    let barrier = Barrier::new(2);
    std::thread::scope(|scope| {
        for start_after in [false, true] {
            let session = &session;
            let barrier = &barrier;
            scope.spawn(move || {
                barrier.wait();
                session.request_configure(start_after);
            });
        }
    });
    session.sync()?;

    assert_eq!(session.configuration_count(), 1);
    assert_eq!(stats.opens(), 1);
    // Whichever call lost, its start intent was folded into the winner.
    assert_eq!(session.state(), SessionState::Running);
    Ok(())
}

#[test]
fn output_bind_failure_leaves_session_idle() -> Result<()> {
    let platform = SyntheticPlatform::new().failing_output();
    let stats = platform.stats();
    let session = CaptureSession::new(platform, settings())?;

    session.request_configure(true);
    session.sync()?;

    assert_eq!(session.state(), SessionState::Idle);
    assert!(!session.is_running());
    assert!(session.active_device().is_none());
    assert_eq!(stats.starts(), 0);
    Ok(())
}

#[test]
fn device_failures_leave_session_idle() -> Result<()> {
    for platform in [
        SyntheticPlatform::new().failing_open(),
        SyntheticPlatform::new().without_devices(),
    ] {
        let session = CaptureSession::new(platform, settings())?;
        session.request_configure(true);
        session.sync()?;
        assert_eq!(session.state(), SessionState::Idle);

        // The gate was released: a later configuration still runs.
        session.request_configure(false);
        session.sync()?;
        assert_eq!(session.configuration_count(), 2);
    }
    Ok(())
}

#[test]
fn failed_configuration_discards_pending_start() -> Result<()> {
    let platform = SyntheticPlatform::new()
        .failing_output()
        .with_open_delay(Duration::from_millis(50));
    let session = CaptureSession::new(platform, settings())?;

    session.request_configure(false);
    session.start();
    session.sync()?;

    assert_eq!(session.state(), SessionState::Idle);
    Ok(())
}

#[test]
fn denied_permission_is_observable_and_binds_nothing() -> Result<()> {
    let platform = SyntheticPlatform::new().with_authorization(AuthorizationStatus::Denied);
    let stats = platform.stats();
    let session = CaptureSession::new(platform, settings())?;

    session.activate();
    session.request_configure(true);
    session.sync()?;

    assert_eq!(session.authorization_status(), AuthorizationStatus::Denied);
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(stats.opens(), 0);
    assert_eq!(stats.access_requests(), 0);
    Ok(())
}

#[test]
fn undetermined_permission_prompts_then_starts_on_grant() -> Result<()> {
    let platform = SyntheticPlatform::new().with_authorization(AuthorizationStatus::NotDetermined);
    let stats = platform.stats();
    let session = CaptureSession::new(platform, settings())?;
    assert_eq!(
        session.authorization_status(),
        AuthorizationStatus::NotDetermined
    );

    session.activate();
    session.sync()?;

    assert_eq!(stats.access_requests(), 1);
    assert_eq!(session.authorization_status(), AuthorizationStatus::Authorized);
    assert_eq!(session.state(), SessionState::Running);
    Ok(())
}

#[test]
fn undetermined_permission_denied_at_prompt_stays_idle() -> Result<()> {
    let platform = SyntheticPlatform::new()
        .with_authorization(AuthorizationStatus::NotDetermined)
        .grant_on_request(false);
    let stats = platform.stats();
    let session = CaptureSession::new(platform, settings())?;

    session.activate();
    session.sync()?;

    assert_eq!(session.authorization_status(), AuthorizationStatus::Denied);
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(stats.opens(), 0);
    Ok(())
}

#[test]
fn stop_during_configuration_only_clears_pending_start() -> Result<()> {
    let platform = SyntheticPlatform::new().with_open_delay(Duration::from_millis(100));
    let stats = platform.stats();
    let session = CaptureSession::new(platform, settings())?;

    session.request_configure(true);
    session.stop();
    session.sync()?;

    assert_eq!(session.configuration_count(), 1);
    assert!(session.active_device().is_some());
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(stats.starts(), 0);
    Ok(())
}

#[test]
fn stop_and_restart_a_running_session() -> Result<()> {
    let platform = SyntheticPlatform::new();
    let stats = platform.stats();
    let session = CaptureSession::new(platform, settings())?;

    session.activate();
    assert!(session.wait_for_state(SessionState::Running, WAIT));

    session.stop();
    session.sync()?;
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(stats.stops(), 1);

    // Authorized with a bound device: activation just starts.
    session.activate();
    session.sync()?;
    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(session.configuration_count(), 1);
    assert_eq!(stats.starts(), 2);

    session.start();
    session.sync()?;
    assert_eq!(stats.starts(), 2);
    Ok(())
}

#[test]
fn reconfiguring_a_running_session_replaces_the_device() -> Result<()> {
    let platform = SyntheticPlatform::new();
    let stats = platform.stats();
    let session = CaptureSession::new(platform, settings())?;

    session.request_configure(true);
    session.sync()?;
    session.request_configure(true);
    session.sync()?;

    assert_eq!(session.configuration_count(), 2);
    assert_eq!(stats.opens(), 2);
    assert_eq!(stats.stops(), 1);
    assert_eq!(session.state(), SessionState::Running);
    Ok(())
}

#[test]
fn queued_commands_run_in_submission_order() -> Result<()> {
    let platform = SyntheticPlatform::new();
    let stats = platform.stats();
    let mut slow = settings();
    slow.format.target_fps = 1;
    let session = CaptureSession::new(platform, slow)?;

    session.request_configure(true);
    session.sync()?;
    assert_eq!(session.state(), SessionState::Running);

    // The configuration claimed last must not absorb the start before it.
    session.stop();
    session.start();
    session.request_configure(false);
    session.sync()?;

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.configuration_count(), 2);
    assert_eq!(stats.starts(), 2);
    assert!(session.active_device().is_some());
    Ok(())
}

#[test]
fn capture_ending_on_its_own_is_observed() -> Result<()> {
    let platform = SyntheticPlatform::new().with_frame_limit(2);
    let stats = platform.stats();
    let session = CaptureSession::new(platform, settings())?;

    session.request_configure(true);
    session.sync()?;
    assert!(session.is_running());

    let deadline = std::time::Instant::now() + WAIT;
    while session.is_running() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
        session.sync()?;
    }
    assert!(!session.is_running());
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(stats.frames(), 2);

    // The device stays bound, so a plain start resumes capture.
    session.start();
    session.sync()?;
    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(stats.starts(), 2);
    Ok(())
}

#[test]
fn start_without_a_device_is_ignored() -> Result<()> {
    let session = CaptureSession::new(SyntheticPlatform::new(), settings())?;
    session.start();
    session.sync()?;
    assert_eq!(session.state(), SessionState::Idle);
    Ok(())
}

#[test]
fn explicit_device_id_is_used() -> Result<()> {
    let platform = SyntheticPlatform::new().with_device("stub://front_camera", "Front");
    let mut settings = settings();
    settings.device_id = Some("stub://front_camera".to_string());
    let session = CaptureSession::new(platform, settings)?;

    session.request_configure(false);
    session.sync()?;

    let device = session.active_device().expect("device bound");
    assert_eq!(device.id, "stub://front_camera");
    assert_eq!(session.state(), SessionState::Idle);
    Ok(())
}

#[test]
fn latest_frame_and_crop_follow_capture() -> Result<()> {
    let session = CaptureSession::new(SyntheticPlatform::new(), settings())?;
    assert!(session.latest_frame().is_none());

    let frames = session.subscribe();
    session.activate();
    let first = frames.recv_timeout(WAIT).expect("frame delivered");
    assert_eq!((first.width(), first.height()), (32, 24));

    let latest = session.latest_frame().expect("cached frame");
    assert!(latest.sequence >= first.sequence);

    let crop = session
        .crop_latest(&NormalizedRect::new(0.0, 0.0, 0.5, 0.5))
        .expect("crop");
    assert_eq!(crop.dimensions(), (16, 12));
    assert!(session
        .crop_latest(&NormalizedRect::new(0.5, 0.5, 0.0, 0.0))
        .is_none());
    Ok(())
}

#[test]
fn shutdown_is_terminal_and_idempotent() -> Result<()> {
    let platform = SyntheticPlatform::new();
    let stats = platform.stats();
    let session = CaptureSession::new(platform, settings())?;

    session.activate();
    assert!(session.wait_for_state(SessionState::Running, WAIT));

    session.shutdown()?;
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(!session.is_running());
    assert_eq!(stats.stops(), 1);

    session.start();
    session.request_configure(true);
    assert!(session.sync().is_err());
    session.shutdown()?;
    assert_eq!(session.state(), SessionState::Stopped);
    Ok(())
}
