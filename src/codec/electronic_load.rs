//! Programmable electronic load grammar (Chroma 6310-style).
//!
//! Commands are verb style (`CONF:REM ON`, `CHAN 3`, `MODE CCH`,
//! `CURR:STAT:L1 2.5`, `LOAD:STATe ON`). Only measurements and the load-state
//! query produce a reply.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operating mode of a load channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoadMode {
    /// Constant current, low range.
    Ccl,
    /// Constant current, high range.
    Cch,
    /// Dynamic constant current, low range.
    Ccdl,
    /// Dynamic constant current, high range.
    Ccdh,
    /// Constant resistance, low range.
    Crl,
    /// Constant resistance, high range.
    Crh,
    /// Constant voltage.
    Cv,
}

impl LoadMode {
    /// Wire form of the mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadMode::Ccl => "CCL",
            LoadMode::Cch => "CCH",
            LoadMode::Ccdl => "CCDL",
            LoadMode::Ccdh => "CCDH",
            LoadMode::Crl => "CRL",
            LoadMode::Crh => "CRH",
            LoadMode::Cv => "CV",
        }
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CCL" => Ok(LoadMode::Ccl),
            "CCH" => Ok(LoadMode::Cch),
            "CCDL" => Ok(LoadMode::Ccdl),
            "CCDH" => Ok(LoadMode::Ccdh),
            "CRL" => Ok(LoadMode::Crl),
            "CRH" => Ok(LoadMode::Crh),
            "CV" => Ok(LoadMode::Cv),
            other => Err(format!("unknown load mode '{}'", other)),
        }
    }
}

/// Static current level register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentLevel {
    /// `L1`
    L1,
    /// `L2`
    L2,
}

/// One electronic load command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadCommand {
    /// `CONF:REM ON|OFF`
    Remote(bool),
    /// `CHAN n`
    SelectChannel(u8),
    /// `MODE <mode>`
    Mode(LoadMode),
    /// `CURR:STAT:L1|L2 <amps>`
    StaticCurrent(CurrentLevel, f64),
    /// `CURR:STAT:RISE <rate>`
    SlewRise(f64),
    /// `CURR:STAT:FALL <rate>`
    SlewFall(f64),
    /// `CONF:VOLT:RANG H`
    VoltageRangeHigh,
    /// `RUN`
    Run,
    /// `LOAD:STATe ON|OFF`
    Load(bool),
    /// `MEAS:VOLT?`
    MeasureVoltage,
    /// `MEAS:CURR?`
    MeasureCurrent,
    /// `LOAD:STATe?`
    LoadState,
}

impl LoadCommand {
    /// Whether the load answers this command with one line.
    pub fn expects_reply(&self) -> bool {
        matches!(
            self,
            LoadCommand::MeasureVoltage | LoadCommand::MeasureCurrent | LoadCommand::LoadState
        )
    }
}

fn on_off(state: bool) -> &'static str {
    if state {
        "ON"
    } else {
        "OFF"
    }
}

impl fmt::Display for LoadCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadCommand::Remote(on) => write!(f, "CONF:REM {}", on_off(*on)),
            LoadCommand::SelectChannel(ch) => write!(f, "CHAN {}", ch),
            LoadCommand::Mode(mode) => write!(f, "MODE {}", mode.as_str()),
            LoadCommand::StaticCurrent(CurrentLevel::L1, amps) => {
                write!(f, "CURR:STAT:L1 {}", amps)
            }
            LoadCommand::StaticCurrent(CurrentLevel::L2, amps) => {
                write!(f, "CURR:STAT:L2 {}", amps)
            }
            LoadCommand::SlewRise(rate) => write!(f, "CURR:STAT:RISE {}", rate),
            LoadCommand::SlewFall(rate) => write!(f, "CURR:STAT:FALL {}", rate),
            LoadCommand::VoltageRangeHigh => f.write_str("CONF:VOLT:RANG H"),
            LoadCommand::Run => f.write_str("RUN"),
            LoadCommand::Load(on) => write!(f, "LOAD:STATe {}", on_off(*on)),
            LoadCommand::MeasureVoltage => f.write_str("MEAS:VOLT?"),
            LoadCommand::MeasureCurrent => f.write_str("MEAS:CURR?"),
            LoadCommand::LoadState => f.write_str("LOAD:STATe?"),
        }
    }
}
