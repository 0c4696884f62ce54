//! Dual-channel bench power supply driver (CPX400DP-style)
//!
//! Protocol Overview:
//! - Transport: TCP, port 9221 by default
//! - Terminator: LF (\n) on commands and replies
//! - Set points: `V1 5.000`, `I2 0.250` (no reply)
//! - Output: `OP1 1` / `OP1 0` (no reply)
//! - Readback: `V1?` / `I1?`, answered with `V1 5.000`
//!
//! # Example Usage
//!
//! ```no_run
//! use bench_console::capabilities::{Instrument, PowerSupply};
//! use bench_console::drivers::cpx400dp::Cpx400dp;
//! use bench_console::transport::Endpoint;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let psu = Cpx400dp::new("bench psu", Endpoint::tcp("192.168.0.50", 9221));
//!     psu.connect().await?;
//!     psu.set_voltage(1, 5.0).await?;
//!     psu.output_on(1).await?;
//!     println!("CH1 = {:.3} V", psu.read_voltage(1).await?);
//!     Ok(())
//! }
//! ```

use crate::capabilities::{Instrument, PowerSupply};
use crate::codec::check_finite;
use crate::codec::power_supply::{check_channel, parse_readback, PsuCommand, CHANNELS};
use crate::error::BenchResult;
use crate::transport::{Endpoint, InstrumentLink};
use async_trait::async_trait;
use std::time::Duration;

/// Factory TCP port.
pub const DEFAULT_PORT: u16 = 9221;

/// Reply bound for readback queries.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Driver for a dual-channel programmable supply.
pub struct Cpx400dp {
    link: InstrumentLink,
}

impl Cpx400dp {
    /// Create an unconnected driver with the default reply bound.
    pub fn new(name: impl Into<String>, endpoint: Endpoint) -> Self {
        Self::with_timeout(name, endpoint, DEFAULT_READ_TIMEOUT)
    }

    /// Create an unconnected driver with a custom reply bound.
    pub fn with_timeout(name: impl Into<String>, endpoint: Endpoint, read_timeout: Duration) -> Self {
        Self {
            link: InstrumentLink::new(name, endpoint, read_timeout),
        }
    }

    /// Underlying session slot.
    pub fn link(&self) -> &InstrumentLink {
        &self.link
    }

    async fn send(&self, command: PsuCommand) -> BenchResult<()> {
        self.link.send(&command.to_string()).await
    }

    async fn readback(&self, command: PsuCommand) -> BenchResult<f64> {
        let text = command.to_string();
        let reply = self.link.query(&text).await?;
        parse_readback(&text, &reply)
    }
}

#[async_trait]
impl Instrument for Cpx400dp {
    fn name(&self) -> &str {
        self.link.name()
    }

    fn endpoint(&self) -> &Endpoint {
        self.link.endpoint()
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    async fn connect(&self) -> BenchResult<()> {
        self.link.connect().await
    }

    async fn disconnect(&self) {
        self.link.disconnect().await
    }
}

#[async_trait]
impl PowerSupply for Cpx400dp {
    fn channels(&self) -> &'static [u8] {
        CHANNELS
    }

    async fn identify(&self) -> BenchResult<String> {
        self.link.query(&PsuCommand::Identify.to_string()).await
    }

    async fn set_voltage(&self, channel: u8, volts: f64) -> BenchResult<()> {
        let channel = check_channel(channel)?;
        let volts = check_finite("voltage", volts)?;
        tracing::debug!(instrument = %self.name(), channel, volts, "Set voltage");
        self.send(PsuCommand::SetVoltage { channel, volts }).await
    }

    async fn set_current(&self, channel: u8, amps: f64) -> BenchResult<()> {
        let channel = check_channel(channel)?;
        let amps = check_finite("current", amps)?;
        tracing::debug!(instrument = %self.name(), channel, amps, "Set current");
        self.send(PsuCommand::SetCurrent { channel, amps }).await
    }

    async fn output_on(&self, channel: u8) -> BenchResult<()> {
        let channel = check_channel(channel)?;
        self.send(PsuCommand::Output {
            channel,
            enabled: true,
        })
        .await
    }

    async fn output_off(&self, channel: u8) -> BenchResult<()> {
        let channel = check_channel(channel)?;
        self.send(PsuCommand::Output {
            channel,
            enabled: false,
        })
        .await
    }

    async fn read_voltage(&self, channel: u8) -> BenchResult<f64> {
        let channel = check_channel(channel)?;
        self.readback(PsuCommand::QueryVoltage { channel }).await
    }

    async fn read_current(&self, channel: u8) -> BenchResult<f64> {
        let channel = check_channel(channel)?;
        self.readback(PsuCommand::QueryCurrent { channel }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BenchError;
    use crate::transport::stub::line_stub;
    use std::collections::HashMap;

    /// Supply that remembers set points and echoes them on readback.
    async fn simulated() -> (Cpx400dp, crate::transport::stub::CommandLog) {
        let psu = Cpx400dp::new("psu", Endpoint::tcp("127.0.0.1", DEFAULT_PORT));
        let mut set_points: HashMap<String, String> = HashMap::new();
        let (session, log) = line_stub("psu", Duration::from_millis(200), move |line| {
            if let Some(header) = line.strip_suffix('?') {
                if header == "*IDN" {
                    return Some("THURLBY THANDAR, CPX400DP, 0, 1.0".to_string());
                }
                let value = set_points.get(header).cloned().unwrap_or_else(|| "0.000".into());
                return Some(format!("{} {}", header, value));
            }
            if let Some((header, value)) = line.split_once(' ') {
                set_points.insert(header.to_string(), value.to_string());
            }
            None
        });
        psu.link().attach(session).await;
        (psu, log)
    }

    #[tokio::test]
    async fn set_then_read_voltage() {
        let (psu, log) = simulated().await;

        psu.set_voltage(1, 5.0).await.unwrap();
        let volts = psu.read_voltage(1).await.unwrap();

        assert_eq!(volts, 5.0);
        assert_eq!(log.lock().as_slice(), ["V1 5.000", "V1?"]);
    }

    #[tokio::test]
    async fn every_channel_reads_back_rounded_set_point() {
        let (psu, log) = simulated().await;
        let cases = [(0.0, 0.0), (5.0, 5.0), (3.3, 3.3), (12.3456, 12.346), (29.9994, 29.999), (1.23449, 1.234)];

        for channel in [1, 2] {
            for (volts, expected) in cases {
                psu.set_voltage(channel, volts).await.unwrap();
                assert_eq!(psu.read_voltage(channel).await.unwrap(), expected, "CH{channel} {volts}");
            }
        }
        assert_eq!(log.lock()[6..8], ["V1 12.346", "V1?"]);
        assert_eq!(log.lock().len(), 24);
    }

    #[tokio::test]
    async fn rejects_non_finite_set_points_without_io() {
        let (psu, log) = simulated().await;

        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                psu.set_voltage(1, value).await.unwrap_err(),
                BenchError::NotFinite { quantity: "voltage", .. }
            ));
            assert!(matches!(
                psu.set_current(2, value).await.unwrap_err(),
                BenchError::NotFinite { quantity: "current", .. }
            ));
        }

        psu.read_voltage(1).await.unwrap();
        assert_eq!(log.lock().as_slice(), ["V1?"]);
    }

    #[tokio::test]
    async fn set_point_readback_is_three_decimals() {
        let (psu, _log) = simulated().await;

        psu.set_current(2, 0.12345).await.unwrap();
        assert_eq!(psu.read_current(2).await.unwrap(), 0.123);
    }

    #[tokio::test]
    async fn output_commands_use_one_and_zero() {
        let (psu, log) = simulated().await;

        psu.output_on(2).await.unwrap();
        psu.output_off(2).await.unwrap();

        // Round trip so both writes have been seen by the stub.
        psu.read_voltage(2).await.unwrap();
        assert_eq!(log.lock()[..2], ["OP2 1", "OP2 0"]);
    }

    #[tokio::test]
    async fn rejects_unknown_channel_without_io() {
        let (psu, log) = simulated().await;

        let err = psu.set_voltage(3, 1.0).await.unwrap_err();
        assert!(matches!(err, BenchError::InvalidChannel { channel: 3, .. }));

        psu.read_voltage(1).await.unwrap();
        assert_eq!(log.lock().as_slice(), ["V1?"]);
    }

    #[tokio::test]
    async fn identify_returns_reply_text() {
        let (psu, _log) = simulated().await;
        assert!(psu.identify().await.unwrap().contains("CPX400DP"));
    }

    #[tokio::test]
    async fn commands_fail_when_disconnected() {
        let psu = Cpx400dp::new("psu", Endpoint::tcp("127.0.0.1", DEFAULT_PORT));
        let err = psu.output_on(1).await.unwrap_err();
        assert!(matches!(err, BenchError::ConnectionClosed { .. }));
    }
}
