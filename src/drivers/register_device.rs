//! Register-mapped controller driver.
//!
//! Talks the framed request/reply sub-protocol from [`crate::codec::frame`]
//! over a serial line and exposes the controller's registers by symbolic
//! name. The name-to-address table comes from a descriptor file that is
//! loaded each time the device connects.
//!
//! [`BoilerController`] layers the bench tool's boiler operations (manual
//! mode, heater and pump requests) on top of any [`RegisterDevice`].

use super::register_map::RegisterMap;
use crate::capabilities::{Instrument, RegisterDevice, RegisterValue};
use crate::codec::frame::{self, RegisterRequest, HEADER_LEN};
use crate::error::{BenchError, BenchResult};
use crate::transport::{Endpoint, InstrumentLink};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Reply bound for one framed exchange.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Driver for a controller reached through the framed register protocol.
pub struct FramedRegisterDevice {
    link: InstrumentLink,
    descriptor_path: Option<PathBuf>,
    registers: RwLock<Arc<RegisterMap>>,
    seq: AtomicU8,
}

impl FramedRegisterDevice {
    /// Create an unconnected device whose descriptor is read from
    /// `descriptor_path` on connect.
    pub fn new(
        name: impl Into<String>,
        endpoint: Endpoint,
        descriptor_path: impl Into<PathBuf>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            link: InstrumentLink::new(name, endpoint, read_timeout),
            descriptor_path: Some(descriptor_path.into()),
            registers: RwLock::new(Arc::new(RegisterMap::default())),
            seq: AtomicU8::new(0),
        }
    }

    /// Create an unconnected device with an already loaded register map.
    pub fn with_registers(
        name: impl Into<String>,
        endpoint: Endpoint,
        registers: RegisterMap,
        read_timeout: Duration,
    ) -> Self {
        Self {
            link: InstrumentLink::new(name, endpoint, read_timeout),
            descriptor_path: None,
            registers: RwLock::new(Arc::new(registers)),
            seq: AtomicU8::new(0),
        }
    }

    /// Underlying session slot.
    pub fn link(&self) -> &InstrumentLink {
        &self.link
    }

    /// Currently loaded register map.
    pub fn registers(&self) -> Arc<RegisterMap> {
        self.registers.read().clone()
    }

    async fn reload_descriptor(&self) -> BenchResult<()> {
        let Some(path) = &self.descriptor_path else {
            return Ok(());
        };
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| BenchError::Descriptor(format!("{}: {}", path.display(), err)))?;
        let map = RegisterMap::from_toml_str(&text)?;
        tracing::debug!(instrument = %self.link.name(), registers = map.len(), path = %path.display(), "Loaded descriptor");
        *self.registers.write() = Arc::new(map);
        Ok(())
    }

    /// Run one request and return the reply payload.
    async fn transact(&self, request: RegisterRequest) -> BenchResult<Vec<u8>> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let outgoing = frame::encode(seq, &request.body())?;
        let label = format!("0x{:02X}", request.command());

        let body = self
            .link
            .exchange(move |session| {
                Box::pin(async move {
                    session.discard_stale().await?;
                    session.write_bytes(&outgoing).await?;

                    let after = session.read_timeout();
                    let header = session.read_exact_within(HEADER_LEN, &label, after).await?;
                    let parsed = frame::decode_header(&header)?;
                    let rest = session
                        .read_exact_within(parsed.body_len + 1, &label, after)
                        .await?;
                    frame::verify(&header, &rest)?;
                    if parsed.seq != seq {
                        return Err(BenchError::Frame(format!(
                            "reply sequence {} does not match request {}",
                            parsed.seq, seq
                        )));
                    }
                    Ok(rest[..parsed.body_len].to_vec())
                })
            })
            .await?;

        frame::reply_payload(&request, &body)
    }
}

#[async_trait]
impl Instrument for FramedRegisterDevice {
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
        self.reload_descriptor().await?;
        self.link.connect().await
    }

    async fn disconnect(&self) {
        self.link.disconnect().await
    }
}

#[async_trait]
impl RegisterDevice for FramedRegisterDevice {
    async fn read_named_value(&self, name: &str) -> BenchResult<RegisterValue> {
        let spec = self.registers().lookup(name)?.clone();
        let payload = self
            .transact(RegisterRequest::ReadValue {
                address: spec.address,
            })
            .await?;
        let value = spec.decode(frame::word(&payload)?);
        tracing::debug!(instrument = %self.name(), register = name, %value, "Read register");
        Ok(value)
    }

    async fn write_named_value(&self, name: &str, value: RegisterValue) -> BenchResult<()> {
        let spec = self.registers().lookup(name)?.clone();
        if !spec.is_writable() {
            return Err(BenchError::ReadOnlyRegister {
                name: name.to_string(),
            });
        }
        let raw = spec.encode(value)?;
        self.transact(RegisterRequest::WriteValue {
            address: spec.address,
            value: raw,
        })
        .await?;
        tracing::debug!(instrument = %self.name(), register = name, %value, "Wrote register");
        Ok(())
    }

    async fn device_info(&self) -> BenchResult<String> {
        let payload = self.transact(RegisterRequest::SignOn).await?;
        Ok(String::from_utf8_lossy(&payload).trim().to_string())
    }

    fn register_names(&self) -> Vec<String> {
        self.registers().names()
    }
}

/// Boiler-controller operations expressed as named register writes.
pub struct BoilerController {
    device: Arc<dyn RegisterDevice>,
}

impl BoilerController {
    /// Control-state register; non-zero selects manual control.
    pub const MANUAL_MODE: &'static str = "o_control_state";
    /// Electric heater manual request.
    pub const HEATER: &'static str = "ElecHeater_manual_request";
    /// Domestic hot water pump manual request.
    pub const DHW_PUMP: &'static str = "Pump_dhw_manual_request";
    /// Central heating pump manual request.
    pub const CH_PUMP: &'static str = "Pump_water_manual_request";
    /// Auxiliary (floor) pump manual request.
    pub const AUX_PUMP: &'static str = "Pump_floor_manual_request";

    /// Wrap a register device.
    pub fn new(device: Arc<dyn RegisterDevice>) -> Self {
        Self { device }
    }

    /// Underlying device.
    pub fn device(&self) -> &Arc<dyn RegisterDevice> {
        &self.device
    }

    /// Sign-on identification.
    pub async fn device_info(&self) -> BenchResult<String> {
        self.device.device_info().await
    }

    /// Switch between automatic and manual control.
    pub async fn manual_mode(&self, value: impl Into<RegisterValue>) -> BenchResult<()> {
        self.device
            .write_named_value(Self::MANUAL_MODE, value.into())
            .await
    }

    /// Request the electric heater.
    pub async fn activate_heater(&self, value: impl Into<RegisterValue>) -> BenchResult<()> {
        self.device.write_named_value(Self::HEATER, value.into()).await
    }

    /// Request the domestic hot water pump.
    pub async fn activate_dhw_pump(&self, value: impl Into<RegisterValue>) -> BenchResult<()> {
        self.device.write_named_value(Self::DHW_PUMP, value.into()).await
    }

    /// Request the central heating pump.
    pub async fn activate_ch_pump(&self, value: impl Into<RegisterValue>) -> BenchResult<()> {
        self.device.write_named_value(Self::CH_PUMP, value.into()).await
    }

    /// Request the auxiliary pump.
    pub async fn activate_aux_pump(&self, value: impl Into<RegisterValue>) -> BenchResult<()> {
        self.device.write_named_value(Self::AUX_PUMP, value.into()).await
    }
}
