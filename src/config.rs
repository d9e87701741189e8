//! Configuration System using Figment
//!
//! Settings are layered, lowest precedence first:
//! 1. built-in defaults ([`Settings::default`])
//! 2. a TOML file (`config/bench_logger.toml` unless another path is given)
//! 3. environment variables prefixed with `BENCH_LOGGER_`, nested with `__`
//!
//! CLI overrides are applied by the binary on top of the extracted value.
//!
//! # Example
//! ```no_run
//! use bench_logger::config::Settings;
//!
//! let settings = Settings::load()?;
//! println!("DUT port: {}", settings.serial.port);
//! # Ok::<(), bench_logger::error::LoggerError>(())
//! ```

use crate::error::{LoggerError, LoggerResult};
use crate::hardware::scpi::DEFAULT_PORT;
use chrono::Local;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/bench_logger.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "BENCH_LOGGER_";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Device-under-test serial stream
    pub serial: SerialSettings,
    /// Correlated log file and console logging
    pub log: LogSettings,
    /// Sentinel strings and trigger offsets
    pub markers: MarkerSettings,
    /// Meter role instrument
    pub meter: MeterSettings,
    /// Load role instrument
    pub load: LoadSettings,
}

/// Serial stream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Port path (e.g. "/dev/ttyUSB0", "COM6")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Upper bound on a single blocking line read
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            read_timeout: Duration::from_secs(1),
        }
    }
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Correlated log file
    pub path: PathBuf,
    /// Insert a `_YYYYMMDD_HHMMSS` suffix before the extension
    pub timestamped: bool,
    /// Echo every DUT line to the console
    pub echo: bool,
    /// Console log level (trace, debug, info, warn, error)
    pub level: String,
    /// Console format (pretty, compact, json)
    pub format: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("log/serial_log.txt"),
            timestamped: false,
            echo: true,
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LogSettings {
    /// Resolve the log file path, applying the timestamp suffix if enabled.
    pub fn resolved_path(&self) -> PathBuf {
        if !self.timestamped {
            return self.path.clone();
        }
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        with_suffix(&self.path, &stamp)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}_{}", stem, suffix),
    };
    path.with_file_name(file_name)
}

/// Whether a serviced trigger stays armed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPolicy {
    /// Each armed trigger fires once, then is discarded
    OneShot,
    /// A trigger fires on every line once its threshold is passed
    Continuous,
}

/// Marker recognition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerSettings {
    /// Sentinel printed by the DUT when its setup phase is done
    pub setup_complete: String,
    /// Sentinel printed before the VI-curve test starts
    pub countdown: String,
    /// Sentinel ending the session
    pub test_complete: String,
    /// Lines between the setup marker and the post-setup poll
    pub setup_offset: u64,
    /// Lines between the countdown marker and the VI-curve poll
    pub vi_curve_offset: u64,
    /// Trigger servicing policy
    pub policy: TriggerPolicy,
    /// Pause between disabling and re-enabling the load on countdown
    #[serde(with = "humantime_serde")]
    pub load_cycle_delay: Duration,
    /// Sound acknowledgement tones on markers
    pub acknowledge: bool,
}

impl Default for MarkerSettings {
    fn default() -> Self {
        Self {
            setup_complete: "SETUP COMPLETE !!".to_string(),
            countdown: "The test will initiate in 5 seconds".to_string(),
            test_complete: "Test Complete".to_string(),
            setup_offset: 2,
            vi_curve_offset: 1,
            policy: TriggerPolicy::OneShot,
            load_cycle_delay: Duration::from_secs(1),
            acknowledge: true,
        }
    }
}

/// Network endpoint shared by both instrument roles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP address
    pub host: String,
    /// Raw SCPI socket port
    pub port: u16,
    /// Connect and query timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Endpoint {
    /// `host:port` string for diagnostics.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Meter role configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterSettings {
    /// Try to connect at startup
    pub enabled: bool,
    /// Network endpoint
    #[serde(flatten)]
    pub endpoint: Endpoint,
    /// Full-scale DC voltage range (V)
    pub voltage_range: f64,
    /// Full-scale DC current range (A)
    pub current_range: f64,
    /// Reading buffer for voltage measurements
    pub voltage_buffer: String,
    /// Reading buffer for current measurements
    pub current_buffer: String,
    /// Capacity of created buffers
    pub buffer_capacity: u32,
    /// Wait after arming
    #[serde(with = "humantime_serde")]
    pub settle: Duration,
}

impl Default for MeterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: Endpoint {
                host: "192.168.2.11".to_string(),
                port: DEFAULT_PORT,
                timeout: Duration::from_secs(2),
            },
            voltage_range: 20.0,
            current_range: 1.0,
            voltage_buffer: "voltMeasBuffer".to_string(),
            current_buffer: "currMeasBuffer".to_string(),
            buffer_capacity: 10_000,
            settle: Duration::from_millis(500),
        }
    }
}

/// Load role configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadSettings {
    /// Try to connect at startup
    pub enabled: bool,
    /// Network endpoint
    #[serde(flatten)]
    pub endpoint: Endpoint,
    /// Output channel
    pub channel: u8,
    /// Voltage limit (V)
    pub voltage_limit: f64,
    /// Current limit (A)
    pub current_limit: f64,
    /// Enable the output at the end of arming
    pub output_on_arm: bool,
    /// Wait after arming
    #[serde(with = "humantime_serde")]
    pub settle: Duration,
}

impl Default for LoadSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: Endpoint {
                host: "192.168.2.12".to_string(),
                port: DEFAULT_PORT,
                timeout: Duration::from_secs(2),
            },
            channel: 1,
            voltage_limit: 6.0,
            current_limit: 3.0,
            output_on_arm: false,
            settle: Duration::from_secs(1),
        }
    }
}

impl Settings {
    /// Load from the default config path and environment.
    pub fn load() -> LoggerResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific TOML file and environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> LoggerResult<Self> {
        Self::from_figment(Self::figment(path.as_ref()))
    }

    /// The layered provider stack used by [`Settings::load_from`].
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Extract and validate settings from a prepared figment.
    pub fn from_figment(figment: Figment) -> LoggerResult<Self> {
        let settings: Settings = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate semantic constraints that parsing cannot express.
    pub fn validate(&self) -> LoggerResult<()> {
        let invalid = |msg: String| Err(LoggerError::Configuration(msg));

        if self.serial.port.trim().is_empty() {
            return invalid("serial.port must not be empty".into());
        }
        if self.serial.baud_rate == 0 {
            return invalid("serial.baud_rate must be greater than zero".into());
        }
        if self.serial.read_timeout.is_zero() {
            return invalid("serial.read_timeout must be greater than zero".into());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log.level.to_lowercase().as_str()) {
            return invalid(format!(
                "Invalid log.level '{}'. Must be one of: {}",
                self.log.level,
                valid_levels.join(", ")
            ));
        }
        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.log.format.to_lowercase().as_str()) {
            return invalid(format!(
                "Invalid log.format '{}'. Must be one of: {}",
                self.log.format,
                valid_formats.join(", ")
            ));
        }

        let markers = [
            ("markers.setup_complete", self.markers.setup_complete.trim()),
            ("markers.countdown", self.markers.countdown.trim()),
            ("markers.test_complete", self.markers.test_complete.trim()),
        ];
        for (i, (name, text)) in markers.iter().enumerate() {
            if text.is_empty() {
                return invalid(format!("{} must not be empty", name));
            }
            if let Some((other, _)) = markers[..i].iter().find(|(_, t)| t == text) {
                return invalid(format!("{} duplicates {}", name, other));
            }
        }
        if self.markers.setup_offset == 0 || self.markers.vi_curve_offset == 0 {
            return invalid("marker offsets must be at least one line".into());
        }

        for (role, endpoint) in [("meter", &self.meter.endpoint), ("load", &self.load.endpoint)] {
            if endpoint.timeout.is_zero() {
                return invalid(format!("{}.timeout must be greater than zero", role));
            }
        }
        if self.meter.voltage_buffer.trim().is_empty() || self.meter.current_buffer.trim().is_empty()
        {
            return invalid("meter buffer names must not be empty".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> LoggerResult<Settings> {
        Settings::from_figment(
            Figment::from(Serialized::defaults(Settings::default())).merge(Toml::string(toml)),
        )
    }

    #[test]
    fn defaults_match_bench_setup() {
        let settings = Settings::default();
        assert_eq!(settings.serial.baud_rate, 115_200);
        assert_eq!(settings.markers.setup_offset, 2);
        assert_eq!(settings.markers.policy, TriggerPolicy::OneShot);
        assert_eq!(settings.meter.endpoint.address(), "192.168.2.11:5025");
        assert_eq!(settings.load.endpoint.address(), "192.168.2.12:5025");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn toml_overrides_defaults() {
        let settings = from_toml(
            r#"
            [serial]
            port = "/dev/ttyACM0"
            read_timeout = "250ms"

            [markers]
            setup_offset = 3
            policy = "continuous"

            [load]
            host = "10.0.0.5"
            timeout = "750ms"
            "#,
        )
        .unwrap();

        assert_eq!(settings.serial.port, "/dev/ttyACM0");
        assert_eq!(settings.serial.baud_rate, 115_200);
        assert_eq!(settings.serial.read_timeout, Duration::from_millis(250));
        assert_eq!(settings.markers.setup_offset, 3);
        assert_eq!(settings.markers.policy, TriggerPolicy::Continuous);
        assert_eq!(settings.load.endpoint.host, "10.0.0.5");
        assert_eq!(settings.load.endpoint.port, 5025);
        assert_eq!(settings.load.endpoint.timeout, Duration::from_millis(750));
    }

    #[test]
    fn rejects_duplicate_markers() {
        let err = from_toml(
            r#"
            [markers]
            countdown = "SETUP COMPLETE !!"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, LoggerError::Configuration(msg) if msg.contains("duplicates")));
    }

    #[test]
    fn rejects_zero_offset_and_bad_level() {
        assert!(from_toml("[markers]\nsetup_offset = 0\n").is_err());
        assert!(from_toml("[log]\nlevel = \"loud\"\n").is_err());
        assert!(from_toml("[serial]\nbaud_rate = 0\n").is_err());
    }

    #[test]
    fn timestamp_suffix_goes_before_extension() {
        assert_eq!(
            with_suffix(Path::new("log/serial_log.txt"), "20240101_120000"),
            PathBuf::from("log/serial_log_20240101_120000.txt")
        );
        assert_eq!(
            with_suffix(Path::new("capture"), "20240101_120000"),
            PathBuf::from("capture_20240101_120000")
        );
    }
}
