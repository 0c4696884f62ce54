//! Transport drivers.
//!
//! Byte-level connection management for the bench instruments:
//!
//! - [`LineSession`]: a line-delimited session over any async byte stream
//!   (TCP socket, async serial port, or an in-memory duplex in tests).
//! - [`tcp`]: TCP connect with a bounded connect timeout.
//! - [`serial`]: serial port opening (async and blocking) and enumeration.
//! - [`InstrumentLink`]: an instrument's owned session slot with connect/disconnect
//!   and request/reply helpers shared by every driver.
//!
//! Every blocking read carries an explicit timeout. No partial line is ever
//! returned above this layer: bytes are accumulated until a `\n` terminator
//! or the timeout elapses.

pub mod link;
pub mod serial;
pub mod session;
pub mod tcp;

#[cfg(test)]
pub(crate) mod stub;

pub use link::InstrumentLink;
pub use session::{DynSession, LineSession, SessionIo};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default baud rate for serial endpoints.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

/// Address of one instrument: a network socket or a serial device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum Endpoint {
    /// Network instrument reached over TCP.
    Tcp {
        /// Hostname or IP address.
        host: String,
        /// TCP port.
        port: u16,
    },
    /// Instrument reached over a serial port.
    Serial {
        /// Device path (e.g. "/dev/ttyUSB0", "COM3").
        path: String,
        /// Baud rate (9600 and 115200 are typical).
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
}

impl Endpoint {
    /// TCP endpoint shorthand.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Serial endpoint shorthand.
    pub fn serial(path: impl Into<String>, baud_rate: u32) -> Self {
        Endpoint::Serial {
            path: path.into(),
            baud_rate,
        }
    }

    /// Whether this endpoint is a TCP socket.
    pub fn is_tcp(&self) -> bool {
        matches!(self, Endpoint::Tcp { .. })
    }

    /// Device path and baud rate of a serial endpoint.
    pub fn serial_port(&self) -> Option<(&str, u32)> {
        match self {
            Endpoint::Serial { path, baud_rate } => Some((path, *baud_rate)),
            Endpoint::Tcp { .. } => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "{}:{}", host, port),
            Endpoint::Serial { path, baud_rate } => write!(f, "{}@{}", path, baud_rate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_display() {
        assert_eq!(Endpoint::tcp("192.168.0.103", 9221).to_string(), "192.168.0.103:9221");
        assert_eq!(
            Endpoint::serial("/dev/ttyACM0", 115200).to_string(),
            "/dev/ttyACM0@115200"
        );
    }

    #[test]
    fn endpoint_deserializes_tagged() {
        let tcp: Endpoint = toml::from_str(
            r#"
            transport = "tcp"
            host = "10.0.0.2"
            port = 5025
            "#,
        )
        .unwrap();
        assert_eq!(tcp, Endpoint::tcp("10.0.0.2", 5025));

        let serial: Endpoint = toml::from_str(
            r#"
            transport = "serial"
            path = "/dev/ttyUSB0"
            "#,
        )
        .unwrap();
        assert_eq!(serial, Endpoint::serial("/dev/ttyUSB0", DEFAULT_BAUD_RATE));
    }
}
