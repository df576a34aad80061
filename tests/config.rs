use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use scan_kernel::config::ScanConfig;
use scan_kernel::VerticalOrigin;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SCAN_CONFIG",
        "SCAN_CAMERA_DEVICE",
        "SCAN_TARGET_FPS",
        "SCAN_STILL_CONFIDENCE",
        "SCAN_LIVE_CONFIDENCE",
        "SCAN_IOU_THRESHOLD",
        "SCAN_MODEL_PATH",
        "SCAN_MODEL_ORIGIN",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "camera": {
            "device": "stub://front_camera",
            "target_fps": 15,
            "width": 1280,
            "height": 720,
            "queue_depth": 2
        },
        "detection": {
            "still_confidence": 0.1,
            "live_confidence": 0.6,
            "iou_threshold": 0.45,
            "model_origin": "top-left"
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("SCAN_CONFIG", file.path());
    std::env::set_var("SCAN_LIVE_CONFIDENCE", "0.7");
    std::env::set_var("SCAN_MODEL_PATH", "/models/detector.onnx");

    let cfg = ScanConfig::load().expect("load config");

    assert_eq!(cfg.camera.device, "stub://front_camera");
    assert_eq!(cfg.camera.target_fps, 15);
    assert_eq!((cfg.camera.width, cfg.camera.height), (1280, 720));
    assert_eq!(cfg.camera.queue_depth, 2);
    assert_eq!(cfg.detection.still_confidence, 0.1);
    assert_eq!(cfg.detection.live_confidence, 0.7);
    assert_eq!(cfg.detection.iou_threshold, 0.45);
    assert_eq!(cfg.detection.model_origin, VerticalOrigin::TopLeft);
    assert_eq!(
        cfg.detection.model_path,
        Some(PathBuf::from("/models/detector.onnx"))
    );

    clear_env();
}

#[test]
fn loads_toml_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
        [camera]
        device = "stub://back_camera"
        target_fps = 24

        [detection]
        iou_threshold = 0.3
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("SCAN_CONFIG", file.path());
    std::env::set_var("SCAN_MODEL_ORIGIN", "bottom_left");

    let cfg = ScanConfig::load().expect("load config");
    assert_eq!(cfg.camera.target_fps, 24);
    assert_eq!(cfg.detection.iou_threshold, 0.3);
    assert_eq!(cfg.detection.live_confidence, 0.5);
    assert_eq!(cfg.detection.model_origin, VerticalOrigin::BottomLeft);

    clear_env();
}

#[test]
fn defaults_apply_without_a_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ScanConfig::load().expect("load config");
    assert_eq!(cfg.camera.device, "stub://back_camera");
    assert_eq!(cfg.camera.target_fps, 30);
    assert_eq!(cfg.detection.still_confidence, 0.0);
    assert!(cfg.detection.model_path.is_none());

    clear_env();
}

#[test]
fn rejects_invalid_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SCAN_IOU_THRESHOLD", "1.2");
    assert!(ScanConfig::load().is_err());
    clear_env();

    std::env::set_var("SCAN_TARGET_FPS", "0");
    assert!(ScanConfig::load().is_err());
    clear_env();

    std::env::set_var("SCAN_LIVE_CONFIDENCE", "high");
    assert!(ScanConfig::load().is_err());
    clear_env();

    std::env::set_var("SCAN_MODEL_ORIGIN", "center");
    assert!(ScanConfig::load().is_err());
    clear_env();
}

#[test]
fn rejects_unreadable_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"{ not json").expect("write config");
    std::env::set_var("SCAN_CONFIG", file.path());
    assert!(ScanConfig::load().is_err());

    clear_env();
}
