//! Operator-facing power supply panel.
//!
//! Mirrors the bench tool's supply tab: connect/disconnect with a status
//! line, apply per-channel set points, read back, and per-channel output
//! toggle buttons whose caption shows the action the next press performs.

use crate::capabilities::PowerSupply;
use crate::error::BenchResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Requested set points of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelSetting {
    /// Output channel.
    pub channel: u8,
    /// Voltage set point.
    pub volts: f64,
    /// Current limit.
    pub amps: f64,
}

/// Read-back values of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelValues {
    /// Output channel.
    pub channel: u8,
    /// Voltage read back.
    pub volts: f64,
    /// Current read back.
    pub amps: f64,
}

/// Panel state for one power supply.
pub struct PowerSupplyPanel {
    psu: Arc<dyn PowerSupply>,
    outputs: Mutex<BTreeMap<u8, bool>>,
    status: Mutex<String>,
}

impl PowerSupplyPanel {
    /// Panel over `psu`; every output starts as off.
    pub fn new(psu: Arc<dyn PowerSupply>) -> Self {
        let outputs = psu.channels().iter().map(|&ch| (ch, false)).collect();
        Self {
            psu,
            outputs: Mutex::new(outputs),
            status: Mutex::new("Disconnected".to_string()),
        }
    }

    /// Supply behind the panel.
    pub fn power_supply(&self) -> &Arc<dyn PowerSupply> {
        &self.psu
    }

    /// Connect and update the status line.
    pub async fn connect(&self) -> BenchResult<()> {
        match self.psu.connect().await {
            Ok(()) => {
                self.set_status("Connected");
                Ok(())
            }
            Err(err) => {
                self.set_status(format!("Failed to connect: {}", err));
                Err(err)
            }
        }
    }

    /// Disconnect and update the status line.
    pub async fn disconnect(&self) {
        self.psu.disconnect().await;
        self.set_status("Disconnected");
    }

    /// Write voltage and current set points channel by channel.
    ///
    /// Stops at the first failure; channels before it keep their new values.
    pub async fn apply_settings(&self, settings: &[ChannelSetting]) -> BenchResult<()> {
        for setting in settings {
            let result = async {
                self.psu.set_voltage(setting.channel, setting.volts).await?;
                self.psu.set_current(setting.channel, setting.amps).await
            }
            .await;
            if let Err(err) = result {
                self.set_status(format!("Failed to apply CH{}: {}", setting.channel, err));
                return Err(err);
            }
        }
        self.set_status("Settings applied");
        Ok(())
    }

    /// Read voltage and current of every channel.
    pub async fn read_values(&self) -> BenchResult<Vec<ChannelValues>> {
        let mut values = Vec::with_capacity(self.psu.channels().len());
        for &channel in self.psu.channels() {
            values.push(ChannelValues {
                channel,
                volts: self.psu.read_voltage(channel).await?,
                amps: self.psu.read_current(channel).await?,
            });
        }
        Ok(values)
    }

    /// Flip the channel output and return the new requested state.
    ///
    /// The panel only records the new state once the supply accepted the
    /// command.
    pub async fn toggle_output(&self, channel: u8) -> BenchResult<bool> {
        let enable = !self.output_requested(channel);
        let result = if enable {
            self.psu.output_on(channel).await
        } else {
            self.psu.output_off(channel).await
        };
        match result {
            Ok(()) => {
                self.outputs.lock().insert(channel, enable);
                self.set_status(format!(
                    "CH{} output {}",
                    channel,
                    if enable { "on" } else { "off" }
                ));
                Ok(enable)
            }
            Err(err) => {
                self.set_status(format!("Failed to switch CH{}: {}", channel, err));
                Err(err)
            }
        }
    }

    /// Last requested output state of a channel.
    pub fn output_requested(&self, channel: u8) -> bool {
        self.outputs.lock().get(&channel).copied().unwrap_or(false)
    }

    /// Caption of the channel's toggle button.
    pub fn output_label(&self, channel: u8) -> String {
        if self.output_requested(channel) {
            format!("Turn CH{} OFF", channel)
        } else {
            format!("Turn CH{} ON", channel)
        }
    }

    /// Status line text.
    pub fn status(&self) -> String {
        self.status.lock().clone()
    }

    fn set_status(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::debug!(instrument = %self.psu.name(), status = %text, "Panel status");
        *self.status.lock() = text;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::cpx400dp::Cpx400dp;
    use crate::error::BenchError;
    use crate::transport::stub::{line_stub, CommandLog};
    use crate::transport::Endpoint;
    use std::time::Duration;

    async fn panel() -> (PowerSupplyPanel, CommandLog) {
        let psu = Cpx400dp::new("psu", Endpoint::tcp("127.0.0.1", 9221));
        let (session, log) = line_stub("psu", Duration::from_millis(200), |line| {
            line.ends_with('?').then(|| format!("{} 1.500", line.trim_end_matches('?')))
        });
        psu.link().attach(session).await;
        (PowerSupplyPanel::new(Arc::new(psu)), log)
    }

    #[tokio::test]
    async fn toggle_flips_label_and_state() {
        let (panel, log) = panel().await;
        assert_eq!(panel.output_label(1), "Turn CH1 ON");

        assert!(panel.toggle_output(1).await.unwrap());
        assert_eq!(panel.output_label(1), "Turn CH1 OFF");
        assert_eq!(panel.output_label(2), "Turn CH2 ON");

        assert!(!panel.toggle_output(1).await.unwrap());
        assert_eq!(panel.output_label(1), "Turn CH1 ON");

        panel.read_values().await.unwrap();
        assert_eq!(log.lock()[..2], ["OP1 1", "OP1 0"]);
    }

    #[tokio::test]
    async fn failed_toggle_keeps_label() {
        let panel = PowerSupplyPanel::new(Arc::new(Cpx400dp::new(
            "psu",
            Endpoint::tcp("127.0.0.1", 9221),
        )));

        let err = panel.toggle_output(2).await.unwrap_err();

        assert!(matches!(err, BenchError::ConnectionClosed { .. }));
        assert_eq!(panel.output_label(2), "Turn CH2 ON");
        assert!(panel.status().starts_with("Failed to switch CH2"));
    }

    #[tokio::test]
    async fn apply_then_read_values() {
        let (panel, log) = panel().await;

        panel
            .apply_settings(&[
                ChannelSetting { channel: 1, volts: 5.0, amps: 0.5 },
                ChannelSetting { channel: 2, volts: 12.0, amps: 1.0 },
            ])
            .await
            .unwrap();
        let values = panel.read_values().await.unwrap();

        assert_eq!(values.len(), 2);
        assert_eq!(values[1], ChannelValues { channel: 2, volts: 1.5, amps: 1.5 });
        assert_eq!(log.lock()[..4], ["V1 5.000", "I1 0.500", "V2 12.000", "I2 1.000"]);
        assert_eq!(panel.status(), "Settings applied");
    }

    #[tokio::test]
    async fn apply_rejects_bad_channel() {
        let (panel, _log) = panel().await;
        let err = panel
            .apply_settings(&[ChannelSetting { channel: 4, volts: 1.0, amps: 0.1 }])
            .await
            .unwrap_err();
        assert!(matches!(err, BenchError::InvalidChannel { channel: 4, .. }));
    }

    #[tokio::test]
    async fn connect_failure_sets_status() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let panel = PowerSupplyPanel::new(Arc::new(Cpx400dp::new(
            "psu",
            Endpoint::tcp("127.0.0.1", port),
        )));

        assert!(panel.connect().await.is_err());
        assert!(panel.status().starts_with("Failed to connect"));
    }
}
