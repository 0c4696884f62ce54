//! Custom error types for the bench console.
//!
//! This module defines the primary error type, `BenchError`, shared by every
//! layer of the instrument core. Using the `thiserror` crate, it provides a
//! consistent way to report transport, codec, driver and configuration faults.
//!
//! ## Error Hierarchy
//!
//! - **Transport**: `Connection`, `ConnectionClosed`, `Timeout`, `Io`, `Serial`.
//!   Raised by the session layer and propagated unchanged through the drivers.
//! - **Codec**: `Parse`, `Frame`, `DeviceStatus`. A reply arrived but did not
//!   match the grammar the command expects.
//! - **Driver validation**: `InvalidChannel`, `NotFinite`, `UnknownRegister`,
//!   `ReadOnlyRegister`, `RegisterValue`. Rejected before any byte is sent.
//! - **Sequences**: `SequenceStep` wraps the failure of one step of a fixed
//!   command script together with the step name.
//! - **Configuration**: `Config`, `Configuration`, `Descriptor`,
//!   `UnknownInstrument`, `WrongKind`.
//!
//! None of these errors are retried automatically. The only retry loop in the
//! crate is the serial telemetry pump, which swallows read timeouts.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the bench error type.
pub type BenchResult<T> = std::result::Result<T, BenchError>;

/// Primary error type for the instrument core.
#[derive(Error, Debug)]
pub enum BenchError {
    /// The transport could not be established.
    #[error("Failed to connect to {endpoint}: {source}")]
    Connection {
        /// Endpoint that was being opened (`host:port` or device path).
        endpoint: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// An operation was attempted on a session that is not open, or the peer
    /// closed it mid-exchange.
    #[error("Connection to '{instrument}' is closed")]
    ConnectionClosed {
        /// Instrument whose session is closed.
        instrument: String,
    },

    /// No complete reply line arrived within the read timeout.
    #[error("Timeout after {after:?} waiting for '{instrument}' to answer {command:?}")]
    Timeout {
        /// Instrument that was queried.
        instrument: String,
        /// Command whose reply was awaited.
        command: String,
        /// Bound that elapsed.
        after: Duration,
    },

    /// A reply did not match the numeric/boolean grammar of its command.
    #[error("Could not parse reply {reply:?} to {command:?} as {expected}")]
    Parse {
        /// Command that produced the reply.
        command: String,
        /// Raw reply text.
        reply: String,
        /// What the codec expected (e.g. "f64").
        expected: &'static str,
    },

    /// The requested channel does not exist on this instrument.
    #[error("Channel {channel} is not supported (available: {supported:?})")]
    InvalidChannel {
        /// Requested channel number.
        channel: u8,
        /// Channels the physical unit exposes.
        supported: &'static [u8],
    },

    /// A numeric set point is NaN or infinite.
    #[error("{quantity} must be a finite number, got {value}")]
    NotFinite {
        /// What the number sets (e.g. "voltage").
        quantity: &'static str,
        /// Rejected value.
        value: f64,
    },

    /// The named register is not present in the device descriptor.
    #[error("Unknown register '{name}'")]
    UnknownRegister {
        /// Symbolic register name.
        name: String,
    },

    /// A write was attempted on a read-only register.
    #[error("Register '{name}' is read-only")]
    ReadOnlyRegister {
        /// Symbolic register name.
        name: String,
    },

    /// A value does not fit the register's declared kind.
    #[error("Invalid value for register '{name}': {reason}")]
    RegisterValue {
        /// Symbolic register name.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The framed sub-protocol received a malformed frame.
    #[error("Frame error: {0}")]
    Frame(String),

    /// The device answered a framed command with a failure status.
    #[error("Device rejected command 0x{command:02X} with status 0x{status:02X}")]
    DeviceStatus {
        /// Command byte.
        command: u8,
        /// Status byte returned by the device.
        status: u8,
    },

    /// One step of a fixed command sequence failed; later steps were not run.
    #[error("Sequence aborted at step '{step}': {source}")]
    SequenceStep {
        /// Name of the failing step.
        step: &'static str,
        /// Failure reported by that step.
        #[source]
        source: Box<BenchError>,
    },

    /// The register descriptor file could not be loaded.
    #[error("Descriptor error: {0}")]
    Descriptor(String),

    /// Configuration file parsing failed.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration values parsed but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// No instrument with this id is registered.
    #[error("Unknown instrument '{0}'")]
    UnknownInstrument(String),

    /// The instrument exists but is not of the requested kind.
    #[error("Instrument '{instrument}' is not a {expected}")]
    WrongKind {
        /// Instrument id.
        instrument: String,
        /// Kind the caller asked for.
        expected: &'static str,
    },

    /// Standard I/O failure on an open session.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port driver failure.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl BenchError {
    /// Whether the error means the session is gone and the instrument must be
    /// reconnected before further use.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, BenchError::ConnectionClosed { .. })
            || matches!(self, BenchError::Io(err) if matches!(
                err.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::UnexpectedEof
            ))
    }

    /// Wrap this error as the failure of a named sequence step.
    pub fn at_step(self, step: &'static str) -> Self {
        BenchError::SequenceStep {
            step,
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_step_names_the_step() {
        let err = BenchError::ConnectionClosed {
            instrument: "load".into(),
        }
        .at_step("select_channel");
        let text = err.to_string();
        assert!(text.contains("select_channel"));
        assert!(text.contains("load"));
    }

    #[test]
    fn broken_pipe_counts_as_connection_lost() {
        let err = BenchError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(err.is_connection_lost());

        let err = BenchError::Parse {
            command: "V1?".into(),
            reply: "x".into(),
            expected: "f64",
        };
        assert!(!err.is_connection_lost());
    }

    #[test]
    fn invalid_channel_lists_supported() {
        let err = BenchError::InvalidChannel {
            channel: 3,
            supported: &[1, 2],
        };
        assert_eq!(
            err.to_string(),
            "Channel 3 is not supported (available: [1, 2])"
        );
    }
}
