use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use drivewatch::config::ServiceConfig;
use drivewatch::detect::RemapMode;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "DRIVEWATCH_CONFIG",
        "DRIVEWATCH_MODEL_PATH",
        "DRIVEWATCH_CLASS_NAMES",
        "DRIVEWATCH_CLASS_REMAP",
        "DRIVEWATCH_FONT_PATH",
        "DRIVEWATCH_UPLOAD_DIR",
        "DRIVEWATCH_OUTPUT_DIR",
        "DRIVEWATCH_ARTIFACT_MAX_AGE_SECS",
        "DRIVEWATCH_CONFIDENCE",
        "DRIVEWATCH_FRAME_SKIP",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ServiceConfig::load().expect("load defaults");
    assert_eq!(cfg.model.path.to_str(), Some("models/best.onnx"));
    assert_eq!(cfg.model.input_size, 640);
    assert_eq!(cfg.model.class_remap, RemapMode::Auto);
    assert!(cfg.model.class_names.is_none());
    assert_eq!(cfg.detection.confidence_threshold, 0.25);
    assert_eq!(cfg.detection.frame_skip, 1);
    assert_eq!(cfg.artifacts.upload_dir.to_str(), Some("uploads"));
    assert_eq!(cfg.artifacts.output_dir.to_str(), Some("outputs"));
    assert_eq!(cfg.artifacts.max_age, Duration::from_secs(7200));
    assert!(cfg.font_path.is_none());
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "model": {
            "path": "/opt/models/driver.onnx",
            "input_size": 320,
            "iou_threshold": 0.5,
            "class_names": ["Smoke", "Phone", "Drink"],
            "class_remap": "none"
        },
        "detection": { "confidence": 0.4, "frame_skip": 3 },
        "artifacts": { "upload_dir": "/tmp/up", "output_dir": "/tmp/out", "max_age_secs": 600 },
        "font_path": "/usr/share/fonts/DejaVuSans.ttf"
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("DRIVEWATCH_CONFIG", file.path());
    std::env::set_var("DRIVEWATCH_FRAME_SKIP", "5");
    std::env::set_var("DRIVEWATCH_OUTPUT_DIR", "/srv/annotated");

    let cfg = ServiceConfig::load().expect("load config");
    assert_eq!(cfg.model.path.to_str(), Some("/opt/models/driver.onnx"));
    assert_eq!(cfg.model.input_size, 320);
    assert_eq!(cfg.model.iou_threshold, 0.5);
    assert_eq!(cfg.model.class_remap, RemapMode::None);
    assert_eq!(cfg.model.class_names.as_ref().map(Vec::len), Some(3));
    assert_eq!(cfg.detection.confidence_threshold, 0.4);
    assert_eq!(cfg.detection.frame_skip, 5);
    assert_eq!(cfg.artifacts.upload_dir.to_str(), Some("/tmp/up"));
    assert_eq!(cfg.artifacts.output_dir.to_str(), Some("/srv/annotated"));
    assert_eq!(cfg.artifacts.max_age, Duration::from_secs(600));
    assert!(cfg.font_path.is_some());

    clear_env();
}

#[test]
fn loads_toml_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
font_path = "/fonts/label.otf"

[model]
path = "weights/coco.onnx"
class_remap = "auto"

[detection]
confidence = 0.6
"#;
    file.write_all(toml.as_bytes()).expect("write config");
    std::env::set_var("DRIVEWATCH_CONFIG", file.path());
    std::env::set_var("DRIVEWATCH_CLASS_NAMES", "person, cell phone ,cup");

    let cfg = ServiceConfig::load().expect("load toml config");
    assert_eq!(cfg.model.path.to_str(), Some("weights/coco.onnx"));
    assert_eq!(cfg.detection.confidence_threshold, 0.6);
    assert_eq!(cfg.detection.frame_skip, 1);
    assert_eq!(
        cfg.model.class_names,
        Some(vec![
            "person".to_string(),
            "cell phone".to_string(),
            "cup".to_string()
        ])
    );

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();

    for (key, value) in [
        ("DRIVEWATCH_FRAME_SKIP", "0"),
        ("DRIVEWATCH_FRAME_SKIP", "often"),
        ("DRIVEWATCH_CONFIDENCE", "1.5"),
        ("DRIVEWATCH_CONFIDENCE", "high"),
        ("DRIVEWATCH_ARTIFACT_MAX_AGE_SECS", "0"),
        ("DRIVEWATCH_CLASS_REMAP", "sometimes"),
    ] {
        clear_env();
        std::env::set_var(key, value);
        assert!(
            ServiceConfig::load().is_err(),
            "{}={} should be rejected",
            key,
            value
        );
    }
    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    std::env::set_var("DRIVEWATCH_CONFIG", "/nonexistent/drivewatch.json");
    assert!(ServiceConfig::load().is_err());
    clear_env();
}
