//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every section is optional; missing values fall back to the device's
//! factory constants.

use crate::domain::layout::StorageLayout;
use anyhow::{bail, ensure, Context};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// UART ultrasonic module
    Serial,
    /// Scripted walk-through pattern, no hardware needed
    Simulated,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub id: String,
    pub location: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { id: "ARDUINO_001".to_string(), location: "unknown".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub kind: SensorKind,
    pub device: String,
    pub baud: u32,
    /// Readings below this are noise, not "very close"
    pub min_distance_cm: u32,
    pub read_timeout_ms: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            kind: SensorKind::Simulated,
            device: "/dev/ttyUSB0".to_string(),
            baud: 9600,
            min_distance_cm: 10,
            read_timeout_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub zone_threshold_cm: u32,
    pub exit_threshold_cm: u32,
    pub required_consecutive_measurements: u32,
    /// Extra debounced in-zone observations before an entry is confirmed
    pub confirm_samples: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            zone_threshold_cm: 160,
            exit_threshold_cm: 150,
            required_consecutive_measurements: 3,
            confirm_samples: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntervalsConfig {
    pub measurement_ms: u64,
    pub send_ms: u64,
    pub ntp_sync_ms: u64,
    pub time_save_ms: u64,
    pub min_reset_ms: u64,
    /// Scheduler poll rate
    pub tick_ms: u64,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            measurement_ms: 200,
            send_ms: 10_000,
            ntp_sync_ms: 3_600_000,
            time_save_ms: 60_000,
            min_reset_ms: 43_200_000,
            tick_ms: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub endpoint: String,
    pub timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "172.20.10.4".to_string(),
            port: 1521,
            endpoint: "/api/visitor-count".to_string(),
            timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    pub ntp_server: String,
    pub timezone_offset_hours: i32,
    pub ntp_timeout_ms: u64,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            ntp_server: "pool.ntp.org:123".to_string(),
            timezone_offset_hours: 3,
            ntp_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// EEPROM image file
    pub path: String,
    pub size: usize,
    pub count_offset: usize,
    pub date_offset: usize,
    pub time_offset: usize,
    pub last_reset_offset: usize,
    /// Unsaved increments allowed before the count is written
    pub count_save_delta: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "eeprom.bin".to_string(),
            size: 512,
            count_offset: 0,
            date_offset: 10,
            time_offset: 20,
            last_reset_offset: 30,
            count_save_delta: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 1 = info, 2 = debug
    pub level: u8,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: 2 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 60, prometheus_port: 0 }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CommandsConfig {
    /// TCP port for RESET/STATUS commands (0 to disable)
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TomlConfig {
    pub device: DeviceConfig,
    pub sensor: SensorConfig,
    pub detection: DetectionConfig,
    pub intervals: IntervalsConfig,
    pub server: ServerConfig,
    pub time: TimeConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub commands: CommandsConfig,
}

/// Immutable configuration handed to every component at construction
#[derive(Debug, Clone)]
pub struct Config {
    device_id: String,
    location: String,
    sensor_kind: SensorKind,
    sensor_device: String,
    sensor_baud: u32,
    min_distance_cm: u32,
    sensor_read_timeout_ms: u64,
    zone_threshold_cm: u32,
    exit_threshold_cm: u32,
    required_consecutive: u32,
    confirm_samples: u32,
    measurement_interval_ms: u64,
    send_interval_ms: u64,
    ntp_sync_interval_ms: u64,
    time_save_interval_ms: u64,
    min_reset_interval_ms: u64,
    tick_ms: u64,
    server_host: String,
    server_port: u16,
    api_endpoint: String,
    server_timeout_ms: u64,
    ntp_server: String,
    timezone_offset_hours: i32,
    ntp_timeout_ms: u64,
    storage_path: String,
    storage_size: usize,
    storage_layout: StorageLayout,
    count_save_delta: u32,
    log_level: u8,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    command_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        let storage = toml_config.storage;
        Self {
            device_id: toml_config.device.id,
            location: toml_config.device.location,
            sensor_kind: toml_config.sensor.kind,
            sensor_device: toml_config.sensor.device,
            sensor_baud: toml_config.sensor.baud,
            min_distance_cm: toml_config.sensor.min_distance_cm,
            sensor_read_timeout_ms: toml_config.sensor.read_timeout_ms,
            zone_threshold_cm: toml_config.detection.zone_threshold_cm,
            exit_threshold_cm: toml_config.detection.exit_threshold_cm,
            required_consecutive: toml_config.detection.required_consecutive_measurements,
            confirm_samples: toml_config.detection.confirm_samples,
            measurement_interval_ms: toml_config.intervals.measurement_ms,
            send_interval_ms: toml_config.intervals.send_ms,
            ntp_sync_interval_ms: toml_config.intervals.ntp_sync_ms,
            time_save_interval_ms: toml_config.intervals.time_save_ms,
            min_reset_interval_ms: toml_config.intervals.min_reset_ms,
            tick_ms: toml_config.intervals.tick_ms,
            server_host: toml_config.server.host,
            server_port: toml_config.server.port,
            api_endpoint: toml_config.server.endpoint,
            server_timeout_ms: toml_config.server.timeout_ms,
            ntp_server: toml_config.time.ntp_server,
            timezone_offset_hours: toml_config.time.timezone_offset_hours,
            ntp_timeout_ms: toml_config.time.ntp_timeout_ms,
            storage_path: storage.path,
            storage_size: storage.size,
            storage_layout: StorageLayout::new(
                storage.count_offset,
                storage.date_offset,
                storage.time_offset,
                storage.last_reset_offset,
            ),
            count_save_delta: storage.count_save_delta,
            log_level: toml_config.logging.level,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            command_port: toml_config.commands.port,
            config_file,
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    /// Load from an explicit path, falling back to defaults on any error
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Reject configurations the detector cannot run correctly with
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.zone_threshold_cm != self.exit_threshold_cm,
            "zone_threshold_cm and exit_threshold_cm must differ (both {})",
            self.zone_threshold_cm
        );
        ensure!(
            self.min_distance_cm < self.zone_threshold_cm.min(self.exit_threshold_cm),
            "min_distance_cm ({}) must be below both thresholds",
            self.min_distance_cm
        );
        ensure!(
            self.required_consecutive >= 1,
            "required_consecutive_measurements must be at least 1"
        );

        for (name, value) in [
            ("measurement_ms", self.measurement_interval_ms),
            ("send_ms", self.send_interval_ms),
            ("ntp_sync_ms", self.ntp_sync_interval_ms),
            ("time_save_ms", self.time_save_interval_ms),
            ("tick_ms", self.tick_ms),
            ("server.timeout_ms", self.server_timeout_ms),
            ("time.ntp_timeout_ms", self.ntp_timeout_ms),
            ("metrics.interval_secs", self.metrics_interval_secs),
        ] {
            ensure!(value > 0, "{name} must be greater than zero");
        }

        if !(1..=2).contains(&self.log_level) {
            bail!("logging.level must be 1 (info) or 2 (debug), got {}", self.log_level);
        }
        ensure!(
            (-12..=14).contains(&self.timezone_offset_hours),
            "timezone_offset_hours {} out of range",
            self.timezone_offset_hours
        );
        ensure!(!self.device_id.is_empty(), "device.id must not be empty");
        ensure!(self.count_save_delta >= 1, "count_save_delta must be at least 1");

        self.storage_layout
            .validate(self.storage_size)
            .context("invalid storage layout")?;

        Ok(())
    }

    /// Base URL for reports, e.g. http://172.20.10.4:1521/api/visitor-count
    pub fn report_url(&self) -> String {
        format!("http://{}:{}{}", self.server_host, self.server_port, self.api_endpoint)
    }

    // Getters for all config fields
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn sensor_kind(&self) -> SensorKind {
        self.sensor_kind
    }

    pub fn sensor_device(&self) -> &str {
        &self.sensor_device
    }

    pub fn sensor_baud(&self) -> u32 {
        self.sensor_baud
    }

    pub fn min_distance_cm(&self) -> u32 {
        self.min_distance_cm
    }

    pub fn sensor_read_timeout(&self) -> Duration {
        Duration::from_millis(self.sensor_read_timeout_ms)
    }

    pub fn zone_threshold_cm(&self) -> u32 {
        self.zone_threshold_cm
    }

    pub fn exit_threshold_cm(&self) -> u32 {
        self.exit_threshold_cm
    }

    pub fn required_consecutive(&self) -> u32 {
        self.required_consecutive
    }

    pub fn confirm_samples(&self) -> u32 {
        self.confirm_samples
    }

    pub fn measurement_interval(&self) -> Duration {
        Duration::from_millis(self.measurement_interval_ms)
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn ntp_sync_interval(&self) -> Duration {
        Duration::from_millis(self.ntp_sync_interval_ms)
    }

    pub fn time_save_interval(&self) -> Duration {
        Duration::from_millis(self.time_save_interval_ms)
    }

    pub fn min_reset_interval(&self) -> Duration {
        Duration::from_millis(self.min_reset_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn server_host(&self) -> &str {
        &self.server_host
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn api_endpoint(&self) -> &str {
        &self.api_endpoint
    }

    pub fn server_timeout(&self) -> Duration {
        Duration::from_millis(self.server_timeout_ms)
    }

    pub fn ntp_server(&self) -> &str {
        &self.ntp_server
    }

    pub fn timezone_offset_hours(&self) -> i32 {
        self.timezone_offset_hours
    }

    pub fn ntp_timeout(&self) -> Duration {
        Duration::from_millis(self.ntp_timeout_ms)
    }

    pub fn storage_path(&self) -> &str {
        &self.storage_path
    }

    pub fn storage_size(&self) -> usize {
        self.storage_size
    }

    pub fn storage_layout(&self) -> StorageLayout {
        self.storage_layout
    }

    pub fn count_save_delta(&self) -> u32 {
        self.count_save_delta
    }

    pub fn log_level(&self) -> u8 {
        self.log_level
    }

    /// EnvFilter directive for the configured verbosity
    pub fn log_filter(&self) -> &'static str {
        match self.log_level {
            1 => "info",
            _ => "debug",
        }
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn command_port(&self) -> u16 {
        self.command_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set both thresholds
    #[cfg(test)]
    pub fn with_thresholds(mut self, zone_cm: u32, exit_cm: u32) -> Self {
        self.zone_threshold_cm = zone_cm;
        self.exit_threshold_cm = exit_cm;
        self
    }

    /// Builder method for tests to set the debounce run length
    #[cfg(test)]
    pub fn with_required_consecutive(mut self, n: u32) -> Self {
        self.required_consecutive = n;
        self
    }

    /// Builder method for tests to set the confirmation dwell
    #[cfg(test)]
    pub fn with_confirm_samples(mut self, n: u32) -> Self {
        self.confirm_samples = n;
        self
    }

    /// Builder method for tests to set the count write threshold
    #[cfg(test)]
    pub fn with_count_save_delta(mut self, delta: u32) -> Self {
        self.count_save_delta = delta;
        self
    }

    /// Builder method for tests to set the storage layout
    #[cfg(test)]
    pub fn with_storage_layout(mut self, layout: StorageLayout, size: usize) -> Self {
        self.storage_layout = layout;
        self.storage_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.device_id(), "ARDUINO_001");
        assert_eq!(config.zone_threshold_cm(), 160);
        assert_eq!(config.exit_threshold_cm(), 150);
        assert_eq!(config.required_consecutive(), 3);
        assert_eq!(config.min_distance_cm(), 10);
        assert_eq!(config.measurement_interval(), Duration::from_millis(200));
        assert_eq!(config.send_interval(), Duration::from_secs(10));
        assert_eq!(config.ntp_sync_interval(), Duration::from_secs(3600));
        assert_eq!(config.time_save_interval(), Duration::from_secs(60));
        assert_eq!(config.min_reset_interval(), Duration::from_secs(12 * 3600));
        assert_eq!(config.timezone_offset_hours(), 3);
        assert_eq!(config.log_level(), 2);
        assert_eq!(config.log_filter(), "debug");
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_report_url() {
        let config = Config::default();
        assert_eq!(config.report_url(), "http://172.20.10.4:1521/api/visitor-count");
    }

    #[test]
    fn test_equal_thresholds_rejected() {
        let config = Config::default().with_thresholds(160, 160);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn test_either_threshold_order_accepted() {
        assert!(Config::default().with_thresholds(160, 150).validate().is_ok());
        assert!(Config::default().with_thresholds(150, 170).validate().is_ok());
    }

    #[test]
    fn test_zero_debounce_rejected() {
        let config = Config::default().with_required_consecutive(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overlapping_layout_rejected() {
        let config =
            Config::default().with_storage_layout(StorageLayout::new(0, 2, 20, 30), 512);
        let err = config.validate().unwrap_err();
        assert!(format!("{:#}", err).contains("overlap"));
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> = vec![
            "visitor-counter".to_string(),
            "--config".to_string(),
            "config/door.toml".to_string(),
        ];
        assert_eq!(Config::resolve_config_path(&args), "config/door.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["visitor-counter".to_string(), "--config=config/lobby.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/lobby.toml");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[detection]
zone_threshold_cm = 120
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        assert_eq!(config.zone_threshold_cm(), 120);
        assert_eq!(config.exit_threshold_cm(), 150);
        assert_eq!(config.device_id(), "ARDUINO_001");
    }
}
