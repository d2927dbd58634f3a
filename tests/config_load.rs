use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use tripwire::config::CompressionBackend;
use tripwire::{CrossingPrecedence, TripwireConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "TRIPWIRE_CONFIG",
        "TRIPWIRE_SOURCES",
        "TRIPWIRE_BOUNDARY_Y",
        "TRIPWIRE_FPS",
        "TRIPWIRE_OUTPUT_DIR",
        "TRIPWIRE_COMPRESSED_DIR",
        "TRIPWIRE_MODEL_PATH",
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
        "cameras": {
            "sources": ["stub://front", "stub://rear"],
            "frame_width": 640,
            "target_fps": 15,
            "timeout_ms": 250
        },
        "boundary": { "row": 300, "color": [255, 0, 0], "precedence": "sequential" },
        "motion": { "min_area": 250, "threshold": 30, "gate": true },
        "buffer": { "seconds": 2, "post_crossing_frames": 10 },
        "storage": { "output_dir": "/var/clips/raw", "compressed_dir": "/var/clips/mp4" },
        "detection": { "confidence": 0.6, "labels": ["Person"] },
        "compression": { "backend": "none" }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("TRIPWIRE_CONFIG", file.path());
    std::env::set_var("TRIPWIRE_BOUNDARY_Y", "320");
    std::env::set_var("TRIPWIRE_OUTPUT_DIR", "/srv/clips");

    let cfg = TripwireConfig::load().expect("load config");

    assert_eq!(cfg.sources, vec!["stub://front", "stub://rear"]);
    assert_eq!(cfg.frame_width, 640);
    assert_eq!(cfg.target_fps, 15);
    assert_eq!(cfg.camera_timeout, Duration::from_millis(250));
    assert_eq!(cfg.runtime.boundary_y, 320);
    assert_eq!(cfg.runtime.boundary_color, [255, 0, 0]);
    assert_eq!(cfg.runtime.precedence, CrossingPrecedence::Sequential);
    assert_eq!(cfg.runtime.min_area, 250);
    assert_eq!(cfg.runtime.motion_threshold, 30);
    assert!(cfg.runtime.motion_gate);
    assert!((cfg.runtime.confidence_threshold - 0.6).abs() < f32::EPSILON);
    assert_eq!(cfg.buffer_capacity(), 30);
    assert_eq!(cfg.post_crossing_limit(), 10);
    assert_eq!(cfg.storage.output_dir, PathBuf::from("/srv/clips"));
    assert_eq!(cfg.storage.compressed_dir, PathBuf::from("/var/clips/mp4"));
    assert_eq!(cfg.detection.labels, vec!["Person"]);
    assert_eq!(cfg.compression.backend, CompressionBackend::None);

    clear_env();
}

#[test]
fn loads_toml_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
        [cameras]
        sources = ["stub://yard"]
        target_fps = 8

        [boundary]
        row = 200
    "#;
    file.write_all(toml.as_bytes()).expect("write config");

    let cfg = TripwireConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.sources, vec!["stub://yard"]);
    assert_eq!(cfg.target_fps, 8);
    assert_eq!(cfg.runtime.boundary_y, 200);
    assert_eq!(cfg.buffer_capacity(), 24);
    assert_eq!(cfg.post_crossing_limit(), 24);
}

#[test]
fn env_sources_replace_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("TRIPWIRE_SOURCES", "stub://a, stub://b");
    std::env::set_var("TRIPWIRE_FPS", "5");
    let cfg = TripwireConfig::load().expect("load config");
    assert_eq!(cfg.sources, vec!["stub://a", "stub://b"]);
    assert_eq!(cfg.target_fps, 5);
    assert_eq!(cfg.tick_interval(), Duration::from_millis(200));

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("TRIPWIRE_FPS", "fast");
    assert!(TripwireConfig::load().is_err());
    std::env::set_var("TRIPWIRE_FPS", "0");
    assert!(TripwireConfig::load().is_err());
    clear_env();

    std::env::set_var("TRIPWIRE_BOUNDARY_Y", "-4");
    assert!(TripwireConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(b"{ not json").expect("write config");
    assert!(TripwireConfig::load_from(Some(file.path())).is_err());
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    let dir = tempfile::tempdir().expect("tempdir");
    assert!(TripwireConfig::load_from(Some(&dir.path().join("absent.json"))).is_err());
}
