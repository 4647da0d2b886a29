use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use safedetect::config::SystemConfig;
use safedetect::zone::CameraZone;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SAFEDETECT_CONFIG",
        "SAFEDETECT_HUB_ADDR",
        "SAFEDETECT_MQTT_ADDR",
        "SAFEDETECT_MQTT_TOPIC",
        "SAFEDETECT_TARGET_FPS",
        "SAFEDETECT_CAMERA_REOPEN_SECS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "zones": {
            "left": {
                "device": "/dev/video0",
                "x_min": 0.0, "x_max": 0.25,
                "y_min": 0.2, "y_max": 0.8
            },
            "rear": {
                "device": "stub://rear",
                "x_min": 0.3, "x_max": 0.7,
                "y_min": 0.7, "y_max": 1.0
            }
        },
        "scale": { "x": 6.0, "y": 4.0 },
        "detection": {
            "confidence": 0.6,
            "classes": { "2": "car" }
        },
        "camera": { "width": 800, "height": 600, "target_fps": 10 },
        "hub": { "addr": "127.0.0.1:9100" },
        "mqtt": { "addr": "127.0.0.1:1884", "topic": "vehicle/detections" }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("SAFEDETECT_TARGET_FPS", "20");
    std::env::set_var("SAFEDETECT_CAMERA_REOPEN_SECS", "30");

    let cfg = SystemConfig::load_from(Some(file.path())).expect("load config");

    assert_eq!(cfg.zones.len(), 2);
    assert_eq!(cfg.zones[&CameraZone::Left].device, "/dev/video0");
    assert!((cfg.zones[&CameraZone::Left].rect.x_max - 0.25).abs() < f64::EPSILON);
    assert!(!cfg.zones.contains_key(&CameraZone::Right));
    assert!((cfg.scale.x - 6.0).abs() < f64::EPSILON);
    assert!((cfg.confidence - 0.6).abs() < f64::EPSILON);
    assert_eq!(cfg.object_classes.len(), 1);
    assert_eq!(cfg.frame_width, 800);
    assert_eq!(cfg.hub_addr, "127.0.0.1:9100");
    assert_eq!(cfg.mqtt_topic, "vehicle/detections");
    // Env wins over file.
    assert_eq!(cfg.target_fps, 20);
    assert_eq!(cfg.camera_reopen, Some(Duration::from_secs(30)));

    clear_env();
}

#[test]
fn missing_file_path_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let err = SystemConfig::load_from(Some(std::path::Path::new("/nonexistent/safedetect.json")))
        .expect_err("missing file must fail");
    assert!(err.to_string().contains("failed to read config file"));
}

#[test]
fn invalid_zone_rect_in_file_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "zones": {
            "left": { "x_min": 0.5, "x_max": 0.2, "y_min": 0.2, "y_max": 0.8 }
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    assert!(SystemConfig::load_from(Some(file.path())).is_err());
}

#[test]
fn defaults_without_file_match_the_shipped_profile() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = SystemConfig::load_from(None).expect("defaults load");
    assert_eq!(cfg.zones.len(), 3);
    assert_eq!(cfg.target_fps, 15);
    assert_eq!(cfg.frame_width, 640);
    assert_eq!(cfg.frame_height, 480);
    assert!((cfg.confidence - 0.5).abs() < f64::EPSILON);
    assert_eq!(cfg.hub_addr, "127.0.0.1:8765");
    assert_eq!(cfg.mqtt_topic, "safedetect/detections");
    assert_eq!(
        cfg.object_colors.get("motorcycle").map(String::as_str),
        Some("orange")
    );
}
