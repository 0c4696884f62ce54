//! Bench configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/bench.toml` (base configuration)
//! 2. Environment variables prefixed with `BENCH_`, nested keys separated
//!    by `__` (e.g. `BENCH_APPLICATION__LOG_LEVEL=debug`)
//!
//! # Example
//! ```no_run
//! use bench_console::config::BenchConfig;
//!
//! let config = BenchConfig::load()?;
//! config.validate()?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), bench_console::error::BenchError>(())
//! ```

use crate::capabilities::LoadStartPlan;
use crate::drivers::{chroma_load, cpx400dp, dmm6500, register_device, serial_link};
use crate::error::{BenchError, BenchResult};
use crate::logging::OutputFormat;
use crate::polling::{
    DEFAULT_ELECTRONIC_LOAD_PERIOD, DEFAULT_MULTIMETER_PERIOD, DEFAULT_POWER_SUPPLY_PERIOD,
};
use crate::readings::MeasureMode;
use crate::transport::{Endpoint, DEFAULT_BAUD_RATE};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/bench.toml";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Poll periods
    #[serde(default)]
    pub polling: PollingConfig,
    /// Instrument definitions
    #[serde(default)]
    pub instruments: Vec<InstrumentDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
        }
    }
}

/// Poll period per instrument class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Power supply readback period
    #[serde(default = "default_power_supply_period", with = "humantime_serde")]
    pub power_supply: Duration,
    /// Multimeter measurement period
    #[serde(default = "default_multimeter_period", with = "humantime_serde")]
    pub multimeter: Duration,
    /// Electronic load status period
    #[serde(default = "default_electronic_load_period", with = "humantime_serde")]
    pub electronic_load: Duration,
    /// Initial multimeter mode
    #[serde(default)]
    pub multimeter_mode: MeasureMode,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            power_supply: DEFAULT_POWER_SUPPLY_PERIOD,
            multimeter: DEFAULT_MULTIMETER_PERIOD,
            electronic_load: DEFAULT_ELECTRONIC_LOAD_PERIOD,
            multimeter_mode: MeasureMode::default(),
        }
    }
}

/// Instrument class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    /// Dual-channel power supply (TCP)
    PowerSupply,
    /// Bench multimeter (TCP)
    Multimeter,
    /// Electronic load (TCP)
    ElectronicLoad,
    /// Microcontroller telemetry link (serial)
    SerialLink,
    /// Register-mapped controller (serial, framed)
    RegisterDevice,
}

impl InstrumentKind {
    /// Configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentKind::PowerSupply => "power_supply",
            InstrumentKind::Multimeter => "multimeter",
            InstrumentKind::ElectronicLoad => "electronic_load",
            InstrumentKind::SerialLink => "serial_link",
            InstrumentKind::RegisterDevice => "register_device",
        }
    }

    /// Factory port for TCP instruments.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            InstrumentKind::PowerSupply => Some(cpx400dp::DEFAULT_PORT),
            InstrumentKind::Multimeter => Some(dmm6500::DEFAULT_PORT),
            InstrumentKind::ElectronicLoad => Some(chroma_load::DEFAULT_PORT),
            InstrumentKind::SerialLink | InstrumentKind::RegisterDevice => None,
        }
    }

    /// Reply bound when none is configured.
    pub fn default_read_timeout(&self) -> Duration {
        match self {
            InstrumentKind::PowerSupply => cpx400dp::DEFAULT_READ_TIMEOUT,
            InstrumentKind::Multimeter => dmm6500::DEFAULT_READ_TIMEOUT,
            InstrumentKind::ElectronicLoad => chroma_load::DEFAULT_READ_TIMEOUT,
            InstrumentKind::SerialLink => serial_link::DEFAULT_READ_TIMEOUT,
            InstrumentKind::RegisterDevice => register_device::DEFAULT_READ_TIMEOUT,
        }
    }

    fn uses_tcp(&self) -> bool {
        self.default_port().is_some()
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Endpoint as written in the file; the TCP port may be left to the kind's default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum EndpointConfig {
    /// `{ transport = "tcp", host = "...", port = 9221 }`
    Tcp {
        /// Hostname or IP address
        host: String,
        /// TCP port; the kind's factory port when omitted
        #[serde(default)]
        port: Option<u16>,
    },
    /// `{ transport = "serial", path = "/dev/ttyUSB0", baud_rate = 115200 }`
    Serial {
        /// Device path
        path: String,
        /// Baud rate
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
}

/// Instrument definition in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentDefinition {
    /// Unique instrument identifier
    pub id: String,
    /// Display name; the id when omitted
    #[serde(default)]
    pub name: Option<String>,
    /// Instrument class
    pub kind: InstrumentKind,
    /// Where the instrument lives
    pub endpoint: EndpointConfig,
    /// Whether this instrument is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Reply bound override
    #[serde(default, with = "humantime_serde")]
    pub read_timeout: Option<Duration>,
    /// Register descriptor (register devices)
    #[serde(default)]
    pub descriptor: Option<PathBuf>,
    /// Start-up sequence parameters (electronic loads)
    #[serde(default)]
    pub load: Option<LoadStartPlan>,
    /// Reset pulse hold time (serial links)
    #[serde(default, with = "humantime_serde")]
    pub reset_pulse: Option<Duration>,
}

impl InstrumentDefinition {
    /// Display name.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Endpoint with the kind's default port filled in.
    pub fn resolved_endpoint(&self) -> BenchResult<Endpoint> {
        match &self.endpoint {
            EndpointConfig::Tcp { host, port } => {
                let port = port.or(self.kind.default_port()).ok_or_else(|| {
                    BenchError::Configuration(format!(
                        "instrument '{}' needs an explicit TCP port",
                        self.id
                    ))
                })?;
                Ok(Endpoint::tcp(host.clone(), port))
            }
            EndpointConfig::Serial { path, baud_rate } => {
                Ok(Endpoint::serial(path.clone(), *baud_rate))
            }
        }
    }

    /// Reply bound, configured or per-kind default.
    pub fn effective_read_timeout(&self) -> Duration {
        self.read_timeout
            .unwrap_or_else(|| self.kind.default_read_timeout())
    }
}

fn default_name() -> String {
    "Bench Console".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_power_supply_period() -> Duration {
    DEFAULT_POWER_SUPPLY_PERIOD
}

fn default_multimeter_period() -> Duration {
    DEFAULT_MULTIMETER_PERIOD
}

fn default_electronic_load_period() -> Duration {
    DEFAULT_ELECTRONIC_LOAD_PERIOD
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_enabled() -> bool {
    true
}

impl BenchConfig {
    /// Load configuration from `config/bench.toml` and environment variables
    pub fn load() -> BenchResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> BenchResult<Self> {
        let config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("BENCH_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (no environment overrides)
    pub fn from_toml_str(text: &str) -> BenchResult<Self> {
        let config = Figment::new().merge(Toml::string(text)).extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> BenchResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(BenchError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        for (name, period) in [
            ("power_supply", self.polling.power_supply),
            ("multimeter", self.polling.multimeter),
            ("electronic_load", self.polling.electronic_load),
        ] {
            if period.is_zero() {
                return Err(BenchError::Configuration(format!(
                    "polling.{} must be greater than zero",
                    name
                )));
            }
        }

        let mut ids = HashSet::new();
        for instrument in &self.instruments {
            if !ids.insert(&instrument.id) {
                return Err(BenchError::Configuration(format!(
                    "Duplicate instrument ID: {}",
                    instrument.id
                )));
            }

            let is_tcp = matches!(instrument.endpoint, EndpointConfig::Tcp { .. });
            if is_tcp != instrument.kind.uses_tcp() {
                return Err(BenchError::Configuration(format!(
                    "Instrument '{}' ({}) needs a {} endpoint",
                    instrument.id,
                    instrument.kind,
                    if instrument.kind.uses_tcp() { "tcp" } else { "serial" }
                )));
            }

            if instrument.kind == InstrumentKind::RegisterDevice && instrument.descriptor.is_none() {
                return Err(BenchError::Configuration(format!(
                    "Register device '{}' has no descriptor",
                    instrument.id
                )));
            }

            if instrument.read_timeout.is_some_and(|timeout| timeout.is_zero()) {
                return Err(BenchError::Configuration(format!(
                    "Instrument '{}' has a zero read_timeout",
                    instrument.id
                )));
            }
        }

        Ok(())
    }

    /// Get all enabled instruments
    pub fn enabled_instruments(&self) -> Vec<&InstrumentDefinition> {
        self.instruments
            .iter()
            .filter(|inst| inst.enabled)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[application]
name = "Test Bench"
log_level = "debug"

[polling]
power_supply = "3s"
electronic_load = "250ms"

[[instruments]]
id = "psu"
kind = "power_supply"
endpoint = { transport = "tcp", host = "192.168.0.50" }

[[instruments]]
id = "dmm"
name = "Keithley"
kind = "multimeter"
read_timeout = "3s"
endpoint = { transport = "tcp", host = "192.168.0.51", port = 5025 }

[[instruments]]
id = "mcu"
kind = "serial_link"
enabled = false
reset_pulse = "200ms"
endpoint = { transport = "serial", path = "/dev/ttyACM0", baud_rate = 115200 }
"#;

    #[test]
    fn parses_sample() {
        let config = BenchConfig::from_toml_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.application.name, "Test Bench");
        assert_eq!(config.polling.power_supply, Duration::from_secs(3));
        assert_eq!(config.polling.multimeter, DEFAULT_MULTIMETER_PERIOD);
        assert_eq!(config.polling.electronic_load, Duration::from_millis(250));

        let psu = &config.instruments[0];
        assert_eq!(psu.resolved_endpoint().unwrap(), Endpoint::tcp("192.168.0.50", 9221));
        assert_eq!(psu.effective_read_timeout(), Duration::from_secs(1));
        assert_eq!(psu.display_name(), "psu");

        let dmm = &config.instruments[1];
        assert_eq!(dmm.display_name(), "Keithley");
        assert_eq!(dmm.effective_read_timeout(), Duration::from_secs(3));

        assert_eq!(config.enabled_instruments().len(), 2);
        assert_eq!(config.instruments[2].reset_pulse, Some(Duration::from_millis(200)));
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = BenchConfig::from_toml_str("").unwrap();
        assert_eq!(config.application.log_level, "info");
        assert!(config.instruments.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = BenchConfig::from_toml_str("").unwrap();
        config.application.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_instrument_ids() {
        let text = r#"
[[instruments]]
id = "psu"
kind = "power_supply"
endpoint = { transport = "tcp", host = "a" }

[[instruments]]
id = "psu"
kind = "power_supply"
endpoint = { transport = "tcp", host = "b" }
"#;
        let config = BenchConfig::from_toml_str(text).unwrap();
        assert!(matches!(config.validate(), Err(BenchError::Configuration(_))));
    }

    #[test]
    fn rejects_transport_mismatch() {
        let text = r#"
[[instruments]]
id = "psu"
kind = "power_supply"
endpoint = { transport = "serial", path = "/dev/ttyUSB0" }
"#;
        let config = BenchConfig::from_toml_str(text).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn register_device_needs_descriptor() {
        let text = r#"
[[instruments]]
id = "boiler"
kind = "register_device"
endpoint = { transport = "serial", path = "/dev/ttyUSB1" }
"#;
        let config = BenchConfig::from_toml_str(text).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_poll_period() {
        let config = BenchConfig::from_toml_str("[polling]\nmultimeter = \"0s\"").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_file_with_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("BENCH_APPLICATION__NAME", "Overridden");
            let config = BenchConfig::load_from(&path).map_err(|e| e.to_string())?;
            assert_eq!(config.application.name, "Overridden");
            assert_eq!(config.instruments.len(), 3);
            Ok(())
        });
    }
}
