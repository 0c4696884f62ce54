//! Programmable DC electronic load driver (Chroma 6310-style)
//!
//! Protocol Overview:
//! - Transport: TCP, port 5000 by default
//! - Terminator: LF (\n)
//! - Configuration commands (`CONF:REM ON`, `CHAN 3`, `MODE CCH`, ...) get no reply
//! - `MEAS:VOLT?`, `MEAS:CURR?` answer one float; `LOAD:STATe?` answers `0`/`1`
//!
//! The load keeps the last selected channel, so callers that drive more
//! than one channel must re-select before each group of commands.

use crate::capabilities::{ElectronicLoad, Instrument};
use crate::codec::electronic_load::{CurrentLevel, LoadCommand, LoadMode};
use crate::codec::{check_finite, parse_f64, parse_flag};
use crate::error::BenchResult;
use crate::transport::{Endpoint, InstrumentLink};
use async_trait::async_trait;
use std::time::Duration;

/// Factory TCP port.
pub const DEFAULT_PORT: u16 = 5000;

/// Reply bound for measurement and status queries.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Driver for a multi-channel electronic load mainframe.
pub struct ChromaLoad {
    link: InstrumentLink,
}

impl ChromaLoad {
    /// Create an unconnected driver.
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

    async fn command(&self, command: LoadCommand) -> BenchResult<()> {
        self.link.send(&command.to_string()).await
    }

    async fn query(&self, command: LoadCommand) -> BenchResult<String> {
        self.link.query(&command.to_string()).await
    }

    async fn measure(&self, command: LoadCommand) -> BenchResult<f64> {
        let text = command.to_string();
        let reply = self.link.query(&text).await?;
        parse_f64(&text, &reply)
    }
}

#[async_trait]
impl Instrument for ChromaLoad {
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
impl ElectronicLoad for ChromaLoad {
    async fn remote_on(&self) -> BenchResult<()> {
        self.command(LoadCommand::Remote(true)).await
    }

    async fn remote_off(&self) -> BenchResult<()> {
        self.command(LoadCommand::Remote(false)).await
    }

    async fn select_channel(&self, channel: u8) -> BenchResult<()> {
        self.command(LoadCommand::SelectChannel(channel)).await
    }

    async fn set_mode(&self, mode: LoadMode) -> BenchResult<()> {
        self.command(LoadCommand::Mode(mode)).await
    }

    async fn set_static_current(&self, amps: f64) -> BenchResult<()> {
        let amps = check_finite("static current", amps)?;
        self.command(LoadCommand::StaticCurrent(CurrentLevel::L1, amps))
            .await?;
        self.command(LoadCommand::StaticCurrent(CurrentLevel::L2, amps))
            .await
    }

    async fn set_slew_rate(&self, rise: f64, fall: f64) -> BenchResult<()> {
        let rise = check_finite("rise slew rate", rise)?;
        let fall = check_finite("fall slew rate", fall)?;
        self.command(LoadCommand::SlewRise(rise)).await?;
        self.command(LoadCommand::SlewFall(fall)).await
    }

    async fn set_voltage_range_high(&self) -> BenchResult<()> {
        self.command(LoadCommand::VoltageRangeHigh).await
    }

    async fn run(&self) -> BenchResult<()> {
        self.command(LoadCommand::Run).await
    }

    async fn load_on(&self) -> BenchResult<()> {
        self.command(LoadCommand::Load(true)).await
    }

    async fn load_off(&self) -> BenchResult<()> {
        self.command(LoadCommand::Load(false)).await
    }

    async fn measure_voltage(&self) -> BenchResult<f64> {
        self.measure(LoadCommand::MeasureVoltage).await
    }

    async fn measure_current(&self) -> BenchResult<f64> {
        self.measure(LoadCommand::MeasureCurrent).await
    }

    async fn check_load_status(&self) -> BenchResult<bool> {
        let reply = self.query(LoadCommand::LoadState).await?;
        Ok(parse_flag(&reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::LoadStartPlan;
    use crate::error::BenchError;
    use crate::transport::stub::{line_stub, CommandLog};

    async fn load_with<F>(respond: F) -> (ChromaLoad, CommandLog)
    where
        F: FnMut(&str) -> Option<String> + Send + 'static,
    {
        let load = ChromaLoad::new("load", Endpoint::tcp("127.0.0.1", DEFAULT_PORT));
        let (session, log) = line_stub("load", Duration::from_millis(200), respond);
        load.link().attach(session).await;
        (load, log)
    }

    #[tokio::test]
    async fn load_status_reads_zero_and_one() {
        let mut replies = vec!["1", "0"];
        let (load, _log) = load_with(move |_| replies.pop().map(str::to_string)).await;

        assert!(!load.check_load_status().await.unwrap());
        assert!(load.check_load_status().await.unwrap());
    }

    #[tokio::test]
    async fn unexpected_state_reply_reads_as_off() {
        let (load, _log) = load_with(|_| Some("ON".to_string())).await;
        assert!(!load.check_load_status().await.unwrap());
    }

    #[tokio::test]
    async fn start_sequence_issues_commands_in_order() {
        let (load, log) = load_with(|line| (line == "LOAD:STATe?").then(|| "1".to_string())).await;
        let plan = LoadStartPlan {
            channel: 3,
            mode: LoadMode::Cch,
            static_current: 2.5,
            slew_rise: 0.25,
            slew_fall: 0.5,
        };

        load.start_sequence(&plan).await.unwrap();
        assert!(load.check_load_status().await.unwrap());

        assert_eq!(
            log.lock().as_slice(),
            [
                "CONF:REM ON",
                "CHAN 3",
                "MODE CCH",
                "CURR:STAT:L1 2.5",
                "CURR:STAT:L2 2.5",
                "CURR:STAT:RISE 0.25",
                "CURR:STAT:FALL 0.5",
                "LOAD:STATe ON",
                "LOAD:STATe?",
            ]
        );
    }

    #[tokio::test]
    async fn start_sequence_names_failing_step() {
        let load = ChromaLoad::new("load", Endpoint::tcp("127.0.0.1", DEFAULT_PORT));

        let err = load.start_sequence(&LoadStartPlan::default()).await.unwrap_err();

        match err {
            BenchError::SequenceStep { step, source } => {
                assert_eq!(step, "remote_on");
                assert!(matches!(*source, BenchError::ConnectionClosed { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn non_finite_current_stops_sequence_before_sending() {
        let (load, log) = load_with(|_| None).await;
        let plan = LoadStartPlan {
            static_current: f64::NAN,
            ..LoadStartPlan::default()
        };

        let err = load.start_sequence(&plan).await.unwrap_err();

        match err {
            BenchError::SequenceStep { step, source } => {
                assert_eq!(step, "set_static_current");
                assert!(matches!(*source, BenchError::NotFinite { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            load.set_slew_rate(1.0, f64::INFINITY).await.unwrap_err(),
            BenchError::NotFinite { quantity: "fall slew rate", .. }
        ));
        load.measure_voltage().await.unwrap_err();
        assert_eq!(log.lock().len(), 4);
        assert!(log.lock().iter().all(|line| !line.starts_with("CURR:")));
    }

    #[tokio::test]
    async fn measurements_parse_floats() {
        let (load, _log) = load_with(|line| match line {
            "MEAS:VOLT?" => Some("12.05".to_string()),
            "MEAS:CURR?" => Some("1.5".to_string()),
            _ => None,
        })
        .await;

        assert_eq!(load.measure_voltage().await.unwrap(), 12.05);
        assert_eq!(load.measure_current().await.unwrap(), 1.5);
    }
}
