//! Readings and their display text.

use crate::capabilities::Multimeter;
use crate::error::BenchResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Below this resistance a continuity check reads as closed.
pub const CONTINUITY_THRESHOLD_OHMS: f64 = 10.0;

/// What the multimeter measures on each poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasureMode {
    /// DC volts.
    #[default]
    Voltage,
    /// DC amperes.
    Current,
    /// Ohms.
    Resistance,
    /// Ohms, classified as open or closed.
    Continuity,
}

impl MeasureMode {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasureMode::Voltage => "voltage",
            MeasureMode::Current => "current",
            MeasureMode::Resistance => "resistance",
            MeasureMode::Continuity => "continuity",
        }
    }

    /// Format a raw value the way the operator sees it.
    pub fn display(&self, value: f64) -> String {
        match self {
            MeasureMode::Voltage => format!("{:.5} V", value),
            MeasureMode::Current => format!("{:.6} A", value),
            MeasureMode::Resistance => format!("{:.2} Ω", value),
            MeasureMode::Continuity => ContinuityReading::classify(value).to_string(),
        }
    }

    fn quantity(&self) -> Quantity {
        match self {
            MeasureMode::Voltage => Quantity::Voltage,
            MeasureMode::Current => Quantity::Current,
            MeasureMode::Resistance | MeasureMode::Continuity => Quantity::Resistance,
        }
    }
}

impl fmt::Display for MeasureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeasureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "voltage" | "v" => Ok(MeasureMode::Voltage),
            "current" | "i" => Ok(MeasureMode::Current),
            "resistance" | "r" => Ok(MeasureMode::Resistance),
            "continuity" => Ok(MeasureMode::Continuity),
            other => Err(format!("unknown measure mode '{}'", other)),
        }
    }
}

/// Continuity verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Continuity {
    /// Resistance below the threshold.
    Closed,
    /// Resistance at or above the threshold.
    Open,
}

/// Continuity verdict together with the measured resistance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContinuityReading {
    /// Verdict.
    pub state: Continuity,
    /// Measured ohms.
    pub ohms: f64,
}

impl ContinuityReading {
    /// Classify a resistance. Exactly the threshold reads as open.
    pub fn classify(ohms: f64) -> Self {
        let state = if ohms < CONTINUITY_THRESHOLD_OHMS {
            Continuity::Closed
        } else {
            Continuity::Open
        };
        Self { state, ohms }
    }
}

impl fmt::Display for ContinuityReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            Continuity::Closed => "Closed",
            Continuity::Open => "Open",
        };
        write!(f, "{} ({:.2} Ω)", state, self.ohms)
    }
}

/// Physical quantity of a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    /// Volts.
    Voltage,
    /// Amperes.
    Current,
    /// Ohms.
    Resistance,
    /// Load input on (1) or off (0).
    LoadState,
}

/// One value read from an instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    /// What was read, e.g. `CH1 voltage`.
    pub label: String,
    /// Physical quantity.
    pub quantity: Quantity,
    /// Raw value.
    pub value: f64,
    /// Operator-facing text.
    pub display: String,
}

impl Reading {
    /// Volts with three decimals.
    pub fn volts(label: impl Into<String>, value: f64) -> Self {
        Self {
            label: label.into(),
            quantity: Quantity::Voltage,
            value,
            display: format!("{:.3} V", value),
        }
    }

    /// Amperes with three decimals.
    pub fn amps(label: impl Into<String>, value: f64) -> Self {
        Self {
            label: label.into(),
            quantity: Quantity::Current,
            value,
            display: format!("{:.3} A", value),
        }
    }

    /// Load input state.
    pub fn load_state(label: impl Into<String>, on: bool) -> Self {
        Self {
            label: label.into(),
            quantity: Quantity::LoadState,
            value: if on { 1.0 } else { 0.0 },
            display: if on { "ON" } else { "OFF" }.to_string(),
        }
    }

    /// Multimeter value formatted for `mode`.
    pub fn measured(mode: MeasureMode, value: f64) -> Self {
        Self {
            label: mode.as_str().to_string(),
            quantity: mode.quantity(),
            value,
            display: mode.display(value),
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.display)
    }
}

/// Take one multimeter reading in `mode`.
pub async fn measure(dmm: &dyn Multimeter, mode: MeasureMode) -> BenchResult<Reading> {
    let value = match mode {
        MeasureMode::Voltage => dmm.read_voltage().await?,
        MeasureMode::Current => dmm.read_current().await?,
        MeasureMode::Resistance => dmm.read_resistance().await?,
        MeasureMode::Continuity => dmm.read_continuity().await?,
    };
    Ok(Reading::measured(mode, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuity_threshold_is_exclusive() {
        assert_eq!(ContinuityReading::classify(3.2).state, Continuity::Closed);
        assert_eq!(ContinuityReading::classify(9.999).state, Continuity::Closed);
        assert_eq!(ContinuityReading::classify(10.0).state, Continuity::Open);
        assert_eq!(ContinuityReading::classify(f64::NAN).state, Continuity::Open);
    }

    #[test]
    fn continuity_display() {
        assert_eq!(ContinuityReading::classify(3.2).to_string(), "Closed (3.20 Ω)");
        assert_eq!(ContinuityReading::classify(15.0).to_string(), "Open (15.00 Ω)");
    }

    #[test]
    fn mode_display_precision() {
        assert_eq!(MeasureMode::Voltage.display(1.5), "1.50000 V");
        assert_eq!(MeasureMode::Current.display(0.0123), "0.012300 A");
        assert_eq!(MeasureMode::Resistance.display(100.0), "100.00 Ω");
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("Continuity".parse::<MeasureMode>().unwrap(), MeasureMode::Continuity);
        assert!("power".parse::<MeasureMode>().is_err());
    }

    #[test]
    fn load_state_reading() {
        let reading = Reading::load_state("load", true);
        assert_eq!(reading.value, 1.0);
        assert_eq!(reading.to_string(), "load: ON");
    }
}
