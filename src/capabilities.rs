//! Instrument capability traits.
//!
//! Each bench instrument family is described by one async trait layered on
//! top of [`Instrument`], which carries the connection lifecycle shared by
//! every driver:
//!
//! - [`PowerSupply`]: per-channel set points, output switching, readback
//! - [`Multimeter`]: single-shot DC voltage, DC current and resistance
//! - [`ElectronicLoad`]: remote control, mode/current/slew programming, the
//!   start-up sequence and measurement
//! - [`RegisterDevice`]: named values on a register-mapped controller
//!
//! Every trait is `Send + Sync` and object safe so the registry and the
//! polling scheduler can hold instruments as `Arc<dyn Trait>`.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn bring_up(psu: &dyn PowerSupply) -> BenchResult<f64> {
//!     psu.connect().await?;
//!     psu.set_voltage(1, 5.0).await?;
//!     psu.output_on(1).await?;
//!     psu.read_voltage(1).await
//! }
//! ```

use crate::codec::electronic_load::LoadMode;
use crate::error::{BenchError, BenchResult};
use crate::transport::Endpoint;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Connection lifecycle shared by all instruments.
#[async_trait]
pub trait Instrument: Send + Sync {
    /// Human-readable name used in logs and errors.
    fn name(&self) -> &str;

    /// Where the instrument lives.
    fn endpoint(&self) -> &Endpoint;

    /// Whether a session is currently open.
    fn is_connected(&self) -> bool;

    /// Open the session. Reconnecting replaces any existing session.
    async fn connect(&self) -> BenchResult<()>;

    /// Close the session. Idempotent.
    async fn disconnect(&self);
}

/// Dual-channel programmable power supply.
#[async_trait]
pub trait PowerSupply: Instrument {
    /// Channels this supply accepts.
    fn channels(&self) -> &'static [u8];

    /// Identification string.
    async fn identify(&self) -> BenchResult<String>;

    /// Program the voltage set point.
    async fn set_voltage(&self, channel: u8, volts: f64) -> BenchResult<()>;

    /// Program the current limit.
    async fn set_current(&self, channel: u8, amps: f64) -> BenchResult<()>;

    /// Enable the channel output.
    async fn output_on(&self, channel: u8) -> BenchResult<()>;

    /// Disable the channel output.
    async fn output_off(&self, channel: u8) -> BenchResult<()>;

    /// Read back the voltage set point.
    async fn read_voltage(&self, channel: u8) -> BenchResult<f64>;

    /// Read back the current set point.
    async fn read_current(&self, channel: u8) -> BenchResult<f64>;
}

/// Bench multimeter taking one reading per call.
#[async_trait]
pub trait Multimeter: Instrument {
    /// DC voltage in volts.
    async fn read_voltage(&self) -> BenchResult<f64>;

    /// DC current in amperes.
    async fn read_current(&self) -> BenchResult<f64>;

    /// Resistance in ohms.
    async fn read_resistance(&self) -> BenchResult<f64>;

    /// Resistance reading used for continuity checks.
    async fn read_continuity(&self) -> BenchResult<f64> {
        self.read_resistance().await
    }
}

/// Default load channel.
pub const DEFAULT_LOAD_CHANNEL: u8 = 3;

fn default_load_channel() -> u8 {
    DEFAULT_LOAD_CHANNEL
}

fn default_load_mode() -> LoadMode {
    LoadMode::Cch
}

fn default_static_current() -> f64 {
    1.0
}

fn default_slew() -> f64 {
    0.1
}

/// Parameters of the electronic load's start-up sequence.
///
/// Slew rates are in A/µs, the static current in amperes and is written to
/// both L1 and L2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadStartPlan {
    /// Channel to select.
    #[serde(default = "default_load_channel")]
    pub channel: u8,
    /// Operating mode.
    #[serde(default = "default_load_mode")]
    pub mode: LoadMode,
    /// Static current for L1 and L2.
    #[serde(default = "default_static_current")]
    pub static_current: f64,
    /// Rising slew rate.
    #[serde(default = "default_slew")]
    pub slew_rise: f64,
    /// Falling slew rate.
    #[serde(default = "default_slew")]
    pub slew_fall: f64,
}

impl Default for LoadStartPlan {
    fn default() -> Self {
        Self {
            channel: default_load_channel(),
            mode: default_load_mode(),
            static_current: default_static_current(),
            slew_rise: default_slew(),
            slew_fall: default_slew(),
        }
    }
}

/// Steps of [`ElectronicLoad::start_sequence`], in execution order.
pub const START_SEQUENCE_STEPS: [&str; 6] = [
    "remote_on",
    "select_channel",
    "set_mode",
    "set_static_current",
    "set_slew_rate",
    "load_on",
];

/// Programmable DC electronic load.
#[async_trait]
pub trait ElectronicLoad: Instrument {
    /// Take remote control.
    async fn remote_on(&self) -> BenchResult<()>;

    /// Return to front-panel control.
    async fn remote_off(&self) -> BenchResult<()>;

    /// Select the active channel.
    async fn select_channel(&self, channel: u8) -> BenchResult<()>;

    /// Set the operating mode.
    async fn set_mode(&self, mode: LoadMode) -> BenchResult<()>;

    /// Write the static current to both L1 and L2.
    async fn set_static_current(&self, amps: f64) -> BenchResult<()>;

    /// Write the rising and falling slew rates.
    async fn set_slew_rate(&self, rise: f64, fall: f64) -> BenchResult<()>;

    /// Switch to the high voltage range.
    async fn set_voltage_range_high(&self) -> BenchResult<()>;

    /// Start the programmed run.
    async fn run(&self) -> BenchResult<()>;

    /// Enable the load input.
    async fn load_on(&self) -> BenchResult<()>;

    /// Disable the load input.
    async fn load_off(&self) -> BenchResult<()>;

    /// Measured input voltage.
    async fn measure_voltage(&self) -> BenchResult<f64>;

    /// Measured input current.
    async fn measure_current(&self) -> BenchResult<f64>;

    /// Whether the load input is enabled.
    async fn check_load_status(&self) -> BenchResult<bool>;

    /// Run the start-up sequence.
    ///
    /// Stops at the first failing step and reports it as
    /// [`BenchError::SequenceStep`]. Steps already executed are not undone.
    async fn start_sequence(&self, plan: &LoadStartPlan) -> BenchResult<()> {
        let [remote, select, mode, current, slew, on] = START_SEQUENCE_STEPS;
        self.remote_on().await.map_err(|err| err.at_step(remote))?;
        self.select_channel(plan.channel)
            .await
            .map_err(|err| err.at_step(select))?;
        self.set_mode(plan.mode).await.map_err(|err| err.at_step(mode))?;
        self.set_static_current(plan.static_current)
            .await
            .map_err(|err| err.at_step(current))?;
        self.set_slew_rate(plan.slew_rise, plan.slew_fall)
            .await
            .map_err(|err| err.at_step(slew))?;
        self.load_on().await.map_err(|err| err.at_step(on))?;
        tracing::info!(instrument = %self.name(), channel = plan.channel, mode = %plan.mode, "Load sequence complete");
        Ok(())
    }
}

/// Value held by one named register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegisterValue {
    /// Flag register.
    Bool(bool),
    /// Integer register (u8, u16 or i16 on the wire).
    Integer(i32),
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterValue::Bool(value) => write!(f, "{}", value),
            RegisterValue::Integer(value) => write!(f, "{}", value),
        }
    }
}

impl From<bool> for RegisterValue {
    fn from(value: bool) -> Self {
        RegisterValue::Bool(value)
    }
}

impl From<i32> for RegisterValue {
    fn from(value: i32) -> Self {
        RegisterValue::Integer(value)
    }
}

impl FromStr for RegisterValue {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "true" | "on" => Ok(RegisterValue::Bool(true)),
            "false" | "off" => Ok(RegisterValue::Bool(false)),
            other => other
                .parse::<i32>()
                .map(RegisterValue::Integer)
                .map_err(|_| BenchError::RegisterValue {
                    name: s.to_string(),
                    reason: "expected true/false/on/off or an integer".to_string(),
                }),
        }
    }
}

/// Controller exposing named values through a register descriptor.
#[async_trait]
pub trait RegisterDevice: Instrument {
    /// Read one named value.
    async fn read_named_value(&self, name: &str) -> BenchResult<RegisterValue>;

    /// Write one named value.
    async fn write_named_value(&self, name: &str, value: RegisterValue) -> BenchResult<()>;

    /// Identification reported by the device at sign-on.
    async fn device_info(&self) -> BenchResult<String>;

    /// Names known to the loaded descriptor.
    fn register_names(&self) -> Vec<String>;
}
