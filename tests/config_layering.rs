//! Configuration file loading.

use bench_logger::config::{Settings, TriggerPolicy};
use bench_logger::LoggerError;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempdir().unwrap();
    let settings = Settings::load_from(dir.path().join("absent.toml")).unwrap();

    assert_eq!(settings.serial.port, Settings::default().serial.port);
    assert_eq!(settings.markers.test_complete, "Test Complete");
}

#[test]
fn bench_file_overrides_sections() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bench_logger.toml");
    std::fs::write(
        &path,
        r#"
[serial]
port = "COM6"
baud_rate = 921600

[log]
path = "captures/run.txt"
timestamped = true
format = "json"

[markers]
setup_offset = 4
policy = "continuous"
load_cycle_delay = "250ms"

[meter]
enabled = false

[load]
host = "ngl201.lab"
channel = 2
current_limit = 1.5
"#,
    )
    .unwrap();

    let settings = Settings::load_from(&path).unwrap();

    assert_eq!(settings.serial.port, "COM6");
    assert_eq!(settings.serial.baud_rate, 921_600);
    assert!(settings.log.timestamped);
    assert_ne!(
        settings.log.resolved_path(),
        std::path::PathBuf::from("captures/run.txt")
    );
    assert_eq!(settings.markers.setup_offset, 4);
    assert_eq!(settings.markers.policy, TriggerPolicy::Continuous);
    assert_eq!(settings.markers.load_cycle_delay, Duration::from_millis(250));
    assert!(!settings.meter.enabled);
    assert_eq!(settings.load.endpoint.address(), "ngl201.lab:5025");
    assert_eq!(settings.load.channel, 2);
    assert_eq!(settings.load.current_limit, 1.5);
}

#[test]
fn invalid_values_are_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bench_logger.toml");
    std::fs::write(&path, "[meter]\ntimeout = \"0s\"\n").unwrap();

    let err = Settings::load_from(&path).unwrap_err();
    assert!(matches!(err, LoggerError::Configuration(_)));
}
