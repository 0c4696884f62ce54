//! Precision bench multimeter driver (DMM6500-style)
//!
//! Protocol Overview:
//! - Transport: TCP, port 5025 by default
//! - Terminator: LF (\n)
//! - Queries: `MEAS:VOLT:DC?`, `MEAS:CURR:DC?`, `MEAS:RES?`
//! - Each query is answered with one ASCII float (e.g. `1.234567E+00`)
//!
//! A single measurement can take a noticeable fraction of a second while the
//! meter auto-ranges, so the default reply bound is two seconds.

use crate::capabilities::{Instrument, Multimeter};
use crate::codec::multimeter::DmmQuery;
use crate::codec::parse_f64;
use crate::error::BenchResult;
use crate::transport::{Endpoint, InstrumentLink};
use async_trait::async_trait;
use std::time::Duration;

/// Factory SCPI raw-socket port.
pub const DEFAULT_PORT: u16 = 5025;

/// Reply bound for one measurement.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Driver for a single-shot SCPI multimeter.
pub struct Dmm6500 {
    link: InstrumentLink,
}

impl Dmm6500 {
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

    /// Create the driver and connect immediately.
    ///
    /// The meter is usable as soon as this returns.
    ///
    /// # Errors
    /// Returns [`crate::error::BenchError::Connection`] when the endpoint is
    /// unreachable.
    pub async fn open(
        name: impl Into<String>,
        endpoint: Endpoint,
        read_timeout: Duration,
    ) -> BenchResult<Self> {
        let dmm = Self::with_timeout(name, endpoint, read_timeout);
        dmm.link.connect().await?;
        Ok(dmm)
    }

    /// Underlying session slot.
    pub fn link(&self) -> &InstrumentLink {
        &self.link
    }

    /// Run one measurement query.
    pub async fn measure(&self, query: DmmQuery) -> BenchResult<f64> {
        let reply = self.link.query(query.as_str()).await?;
        parse_f64(query.as_str(), &reply)
    }

    /// Close the session. Idempotent.
    pub async fn close(&self) {
        self.link.disconnect().await
    }
}

#[async_trait]
impl Instrument for Dmm6500 {
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
        self.close().await
    }
}

#[async_trait]
impl Multimeter for Dmm6500 {
    async fn read_voltage(&self) -> BenchResult<f64> {
        self.measure(DmmQuery::DcVoltage).await
    }

    async fn read_current(&self) -> BenchResult<f64> {
        self.measure(DmmQuery::DcCurrent).await
    }

    async fn read_resistance(&self) -> BenchResult<f64> {
        self.measure(DmmQuery::Resistance).await
    }
}
