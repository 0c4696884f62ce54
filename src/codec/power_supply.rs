//! Dual-channel power supply grammar (CPX400DP-style).
//!
//! | Operation        | Command      | Reply          |
//! |------------------|--------------|----------------|
//! | set voltage      | `V1 5.000`   | none           |
//! | set current      | `I2 0.500`   | none           |
//! | output on / off  | `OP1 1`      | none           |
//! | voltage readback | `V1?`        | `V1 5.000`     |
//! | current readback | `I1?`        | `I1 0.500`     |
//! | identify         | `*IDN?`      | free text      |
//!
//! Numeric arguments carry three decimal digits.

use crate::error::{BenchError, BenchResult};
use std::fmt;

/// Channels the physical unit exposes.
pub const CHANNELS: &[u8] = &[1, 2];

/// One power supply command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PsuCommand {
    /// Program the channel's voltage set-point.
    SetVoltage {
        /// Output channel.
        channel: u8,
        /// Volts.
        volts: f64,
    },
    /// Program the channel's current limit.
    SetCurrent {
        /// Output channel.
        channel: u8,
        /// Amps.
        amps: f64,
    },
    /// Enable or disable the channel output.
    Output {
        /// Output channel.
        channel: u8,
        /// Requested state.
        enabled: bool,
    },
    /// Read back the voltage set-point.
    QueryVoltage {
        /// Output channel.
        channel: u8,
    },
    /// Read back the current limit.
    QueryCurrent {
        /// Output channel.
        channel: u8,
    },
    /// `*IDN?` identification.
    Identify,
}

impl PsuCommand {
    /// Whether the instrument answers this command with one line.
    pub fn expects_reply(&self) -> bool {
        matches!(
            self,
            PsuCommand::QueryVoltage { .. } | PsuCommand::QueryCurrent { .. } | PsuCommand::Identify
        )
    }
}

impl fmt::Display for PsuCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PsuCommand::SetVoltage { channel, volts } => write!(f, "V{} {:.3}", channel, volts),
            PsuCommand::SetCurrent { channel, amps } => write!(f, "I{} {:.3}", channel, amps),
            PsuCommand::Output { channel, enabled } => {
                write!(f, "OP{} {}", channel, u8::from(*enabled))
            }
            PsuCommand::QueryVoltage { channel } => write!(f, "V{}?", channel),
            PsuCommand::QueryCurrent { channel } => write!(f, "I{}?", channel),
            PsuCommand::Identify => f.write_str("*IDN?"),
        }
    }
}

/// Reject channels the unit does not have.
pub fn check_channel(channel: u8) -> BenchResult<u8> {
    if CHANNELS.contains(&channel) {
        Ok(channel)
    } else {
        Err(BenchError::InvalidChannel {
            channel,
            supported: CHANNELS,
        })
    }
}

/// Parse a voltage/current readback.
///
/// The supply may echo the header (`V1 5.000`) and may append a unit
/// (`5.000V`); both are accepted along with a bare number.
pub fn parse_readback(command: &str, reply: &str) -> BenchResult<f64> {
    let token = reply.split_whitespace().last().unwrap_or("");
    let number = token.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    number.parse::<f64>().map_err(|_| BenchError::Parse {
        command: command.to_string(),
        reply: reply.to_string(),
        expected: "f64",
    })
}
