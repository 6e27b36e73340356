//! Integration tests for configuration loading

use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use visitor_counter::infra::{Config, SensorKind};

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[device]
id = "LOBBY_02"
location = "north entrance"

[sensor]
kind = "serial"
device = "/dev/ttyAMA0"
baud = 115200
min_distance_cm = 15

[detection]
zone_threshold_cm = 120
exit_threshold_cm = 140
required_consecutive_measurements = 4
confirm_samples = 2

[intervals]
measurement_ms = 100
send_ms = 30000

[server]
host = "10.0.0.5"
port = 8080
endpoint = "/api/visitor-count"

[time]
ntp_server = "time.example.net:123"
timezone_offset_hours = -5

[storage]
path = "/var/lib/visitor-counter/eeprom.bin"
count_save_delta = 5

[logging]
level = 1

[metrics]
interval_secs = 15
prometheus_port = 9091

[commands]
port = 7070
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.device_id(), "LOBBY_02");
    assert_eq!(config.location(), "north entrance");
    assert_eq!(config.sensor_kind(), SensorKind::Serial);
    assert_eq!(config.sensor_baud(), 115200);
    assert_eq!(config.zone_threshold_cm(), 120);
    assert_eq!(config.exit_threshold_cm(), 140);
    assert_eq!(config.required_consecutive(), 4);
    assert_eq!(config.confirm_samples(), 2);
    assert_eq!(config.measurement_interval(), Duration::from_millis(100));
    assert_eq!(config.send_interval(), Duration::from_secs(30));
    // Unset intervals keep their defaults
    assert_eq!(config.time_save_interval(), Duration::from_secs(60));
    assert_eq!(config.report_url(), "http://10.0.0.5:8080/api/visitor-count");
    assert_eq!(config.timezone_offset_hours(), -5);
    assert_eq!(config.count_save_delta(), 5);
    assert_eq!(config.log_filter(), "info");
    assert_eq!(config.prometheus_port(), 9091);
    assert_eq!(config.command_port(), 7070);
    assert!(config.validate().is_ok());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.device_id(), "ARDUINO_001");
    assert_eq!(config.sensor_kind(), SensorKind::Simulated);
    assert_eq!(config.report_url(), "http://172.20.10.4:1521/api/visitor-count");
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_unparsable_file_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[detection\nzone_threshold_cm = ").unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to parse config file"));
}

#[test]
fn test_invalid_values_fail_validation() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file
        .write_all(
            br#"
[detection]
zone_threshold_cm = 150
exit_threshold_cm = 150

[logging]
level = 3
"#,
        )
        .unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_zero_interval_fails_validation() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[intervals]\nsend_ms = 0\n").unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("send_ms"));
}

#[test]
fn test_storage_layout_beyond_capacity_fails_validation() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[storage]\nsize = 32\n").unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();
    let err = config.validate().unwrap_err();
    assert!(format!("{:#}", err).contains("invalid storage layout"));
}
