//! Instrument registry
//!
//! Builds one driver per enabled instrument definition and hands them out
//! by logical id and capability:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  InstrumentRegistry                      │
//! │   "psu" ─ Cpx400dp   "dmm" ─ Dmm6500   "load" ─ Chroma   │
//! │   "mcu" ─ SerialLink "boiler" ─ FramedRegisterDevice     │
//! ├──────────────────────────────────────────────────────────┤
//! │  PowerSupply | Multimeter | ElectronicLoad | Register... │
//! ├──────────────────────────────────────────────────────────┤
//! │            InstrumentLink / TelemetryPump                │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Drivers are created unconnected, except multimeters which connect while
//! the registry is opened. A multimeter that cannot be reached is still
//! registered; its failure is kept as the instrument's status.

use crate::capabilities::{ElectronicLoad, LoadStartPlan, Multimeter, PowerSupply, RegisterDevice};
use crate::config::{BenchConfig, InstrumentDefinition, InstrumentKind, PollingConfig};
use crate::drivers::chroma_load::ChromaLoad;
use crate::drivers::cpx400dp::Cpx400dp;
use crate::drivers::dmm6500::Dmm6500;
use crate::drivers::register_device::FramedRegisterDevice;
use crate::drivers::serial_link::{SerialLink, DEFAULT_RESET_PULSE};
use crate::error::{BenchError, BenchResult};
use crate::polling::{ElectronicLoadPoll, ModeSelector, MultimeterPoll, PollSource, PowerSupplyPoll};
use crate::transport::Endpoint;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Driver behind a registered instrument.
#[derive(Clone)]
pub enum InstrumentHandle {
    /// Power supply driver
    PowerSupply(Arc<dyn PowerSupply>),
    /// Multimeter driver
    Multimeter(Arc<dyn Multimeter>),
    /// Electronic load driver
    ElectronicLoad(Arc<dyn ElectronicLoad>),
    /// Microcontroller serial link
    SerialLink(Arc<SerialLink>),
    /// Register-mapped controller
    RegisterDevice(Arc<dyn RegisterDevice>),
}

impl InstrumentHandle {
    /// Whether the instrument currently has an open session.
    pub fn is_connected(&self) -> bool {
        match self {
            InstrumentHandle::PowerSupply(psu) => psu.is_connected(),
            InstrumentHandle::Multimeter(dmm) => dmm.is_connected(),
            InstrumentHandle::ElectronicLoad(load) => load.is_connected(),
            InstrumentHandle::SerialLink(link) => link.is_connected(),
            InstrumentHandle::RegisterDevice(device) => device.is_connected(),
        }
    }

    /// Open the instrument's session.
    pub async fn connect(&self) -> BenchResult<()> {
        match self {
            InstrumentHandle::PowerSupply(psu) => psu.connect().await,
            InstrumentHandle::Multimeter(dmm) => dmm.connect().await,
            InstrumentHandle::ElectronicLoad(load) => load.connect().await,
            InstrumentHandle::SerialLink(link) => {
                let link = link.clone();
                tokio::task::spawn_blocking(move || link.connect())
                    .await
                    .map_err(|err| BenchError::Io(std::io::Error::other(err)))?
            }
            InstrumentHandle::RegisterDevice(device) => device.connect().await,
        }
    }

    /// Close the instrument's session. Idempotent.
    pub async fn disconnect(&self) {
        match self {
            InstrumentHandle::PowerSupply(psu) => psu.disconnect().await,
            InstrumentHandle::Multimeter(dmm) => dmm.disconnect().await,
            InstrumentHandle::ElectronicLoad(load) => load.disconnect().await,
            InstrumentHandle::SerialLink(link) => {
                let link = link.clone();
                if let Err(err) = tokio::task::spawn_blocking(move || link.disconnect()).await {
                    tracing::warn!(error = %err, "Serial link disconnect task failed");
                }
            }
            InstrumentHandle::RegisterDevice(device) => device.disconnect().await,
        }
    }
}

/// One registry entry.
#[derive(Clone)]
pub struct RegisteredInstrument {
    /// Logical id
    pub id: String,
    /// Display name
    pub name: String,
    /// Instrument class
    pub kind: InstrumentKind,
    /// Resolved endpoint
    pub endpoint: Endpoint,
    /// Driver
    pub handle: InstrumentHandle,
    /// Load start-up parameters (electronic loads)
    pub load_plan: Option<LoadStartPlan>,
    /// Reset pulse hold time (serial links)
    pub reset_pulse: Duration,
}

/// Summary row for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentInfo {
    /// Logical id
    pub id: String,
    /// Display name
    pub name: String,
    /// Instrument class
    pub kind: InstrumentKind,
    /// Endpoint text
    pub endpoint: String,
    /// Open session
    pub connected: bool,
    /// Last connection failure
    pub status: Option<String>,
}

/// Instruments by logical id.
#[derive(Default)]
pub struct InstrumentRegistry {
    instruments: BTreeMap<String, RegisteredInstrument>,
    failures: Mutex<HashMap<String, String>>,
}

impl InstrumentRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create drivers for every enabled definition without connecting.
    pub fn from_config(config: &BenchConfig) -> BenchResult<Self> {
        config.validate()?;
        let mut registry = Self::new();
        for definition in config.enabled_instruments() {
            registry.register(build(definition)?)?;
        }
        Ok(registry)
    }

    /// Create drivers and connect the multimeters.
    pub async fn open(config: &BenchConfig) -> BenchResult<Self> {
        let registry = Self::from_config(config)?;
        for entry in registry.instruments.values() {
            if entry.kind != InstrumentKind::Multimeter {
                continue;
            }
            if let Err(err) = entry.handle.connect().await {
                tracing::warn!(instrument = %entry.id, error = %err, "Multimeter unavailable");
                registry.record_failure(&entry.id, err.to_string());
            }
        }
        tracing::info!(instruments = registry.len(), "Instrument registry ready");
        Ok(registry)
    }

    /// Add an instrument. Ids must be unique.
    pub fn register(&mut self, instrument: RegisteredInstrument) -> BenchResult<()> {
        if self.instruments.contains_key(&instrument.id) {
            return Err(BenchError::Configuration(format!(
                "Duplicate instrument ID: {}",
                instrument.id
            )));
        }
        self.instruments.insert(instrument.id.clone(), instrument);
        Ok(())
    }

    /// Connect one instrument, recording or clearing its failure status.
    pub async fn connect(&self, id: &str) -> BenchResult<()> {
        let entry = self.get(id)?;
        match entry.handle.connect().await {
            Ok(()) => {
                self.failures.lock().remove(id);
                Ok(())
            }
            Err(err) => {
                self.record_failure(id, err.to_string());
                Err(err)
            }
        }
    }

    /// Disconnect every instrument.
    pub async fn disconnect_all(&self) {
        for entry in self.instruments.values() {
            entry.handle.disconnect().await;
        }
    }

    /// Entry by id.
    pub fn get(&self, id: &str) -> BenchResult<&RegisteredInstrument> {
        self.instruments
            .get(id)
            .ok_or_else(|| BenchError::UnknownInstrument(id.to_string()))
    }

    /// Power supply by id.
    pub fn power_supply(&self, id: &str) -> BenchResult<Arc<dyn PowerSupply>> {
        match &self.get(id)?.handle {
            InstrumentHandle::PowerSupply(psu) => Ok(psu.clone()),
            _ => Err(wrong_kind(id, "power supply")),
        }
    }

    /// Multimeter by id.
    pub fn multimeter(&self, id: &str) -> BenchResult<Arc<dyn Multimeter>> {
        match &self.get(id)?.handle {
            InstrumentHandle::Multimeter(dmm) => Ok(dmm.clone()),
            _ => Err(wrong_kind(id, "multimeter")),
        }
    }

    /// Electronic load by id.
    pub fn electronic_load(&self, id: &str) -> BenchResult<Arc<dyn ElectronicLoad>> {
        match &self.get(id)?.handle {
            InstrumentHandle::ElectronicLoad(load) => Ok(load.clone()),
            _ => Err(wrong_kind(id, "electronic load")),
        }
    }

    /// Serial link by id.
    pub fn serial_link(&self, id: &str) -> BenchResult<Arc<SerialLink>> {
        match &self.get(id)?.handle {
            InstrumentHandle::SerialLink(link) => Ok(link.clone()),
            _ => Err(wrong_kind(id, "serial link")),
        }
    }

    /// Register device by id.
    pub fn register_device(&self, id: &str) -> BenchResult<Arc<dyn RegisterDevice>> {
        match &self.get(id)?.handle {
            InstrumentHandle::RegisterDevice(device) => Ok(device.clone()),
            _ => Err(wrong_kind(id, "register device")),
        }
    }

    /// First instrument of `kind`, for commands that omit an id.
    pub fn first_of(&self, kind: InstrumentKind) -> Option<&RegisteredInstrument> {
        self.instruments.values().find(|entry| entry.kind == kind)
    }

    /// Poll sources for every power supply, multimeter and load.
    pub fn poll_sources(&self, polling: &PollingConfig, mode: &ModeSelector) -> Vec<Arc<dyn PollSource>> {
        self.instruments
            .values()
            .filter_map(|entry| -> Option<Arc<dyn PollSource>> {
                match &entry.handle {
                    InstrumentHandle::PowerSupply(psu) => Some(Arc::new(PowerSupplyPoll::new(
                        entry.id.clone(),
                        psu.clone(),
                        polling.power_supply,
                    ))),
                    InstrumentHandle::Multimeter(dmm) => Some(Arc::new(MultimeterPoll::new(
                        entry.id.clone(),
                        dmm.clone(),
                        mode.clone(),
                        polling.multimeter,
                    ))),
                    InstrumentHandle::ElectronicLoad(load) => Some(Arc::new(ElectronicLoadPoll::new(
                        entry.id.clone(),
                        load.clone(),
                        polling.electronic_load,
                    ))),
                    InstrumentHandle::SerialLink(_) | InstrumentHandle::RegisterDevice(_) => None,
                }
            })
            .collect()
    }

    /// Summary of every instrument.
    pub fn list(&self) -> Vec<InstrumentInfo> {
        let failures = self.failures.lock();
        self.instruments
            .values()
            .map(|entry| InstrumentInfo {
                id: entry.id.clone(),
                name: entry.name.clone(),
                kind: entry.kind,
                endpoint: entry.endpoint.to_string(),
                connected: entry.handle.is_connected(),
                status: failures.get(&entry.id).cloned(),
            })
            .collect()
    }

    /// Last connection failure of an instrument.
    pub fn failure(&self, id: &str) -> Option<String> {
        self.failures.lock().get(id).cloned()
    }

    /// Number of instruments.
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    fn record_failure(&self, id: &str, message: String) {
        self.failures.lock().insert(id.to_string(), message);
    }
}

fn wrong_kind(id: &str, expected: &'static str) -> BenchError {
    BenchError::WrongKind {
        instrument: id.to_string(),
        expected,
    }
}

/// Driver for one definition.
fn build(definition: &InstrumentDefinition) -> BenchResult<RegisteredInstrument> {
    let endpoint = definition.resolved_endpoint()?;
    let name = definition.display_name().to_string();
    let timeout = definition.effective_read_timeout();

    let handle = match definition.kind {
        InstrumentKind::PowerSupply => InstrumentHandle::PowerSupply(Arc::new(
            Cpx400dp::with_timeout(name.clone(), endpoint.clone(), timeout),
        )),
        InstrumentKind::Multimeter => InstrumentHandle::Multimeter(Arc::new(
            Dmm6500::with_timeout(name.clone(), endpoint.clone(), timeout),
        )),
        InstrumentKind::ElectronicLoad => InstrumentHandle::ElectronicLoad(Arc::new(
            ChromaLoad::with_timeout(name.clone(), endpoint.clone(), timeout),
        )),
        InstrumentKind::SerialLink => {
            let (path, baud_rate) = endpoint.serial_port().ok_or_else(|| {
                BenchError::Configuration(format!("Serial link '{}' needs a serial endpoint", definition.id))
            })?;
            InstrumentHandle::SerialLink(Arc::new(SerialLink::new(
                name.clone(),
                path,
                baud_rate,
                timeout,
            )))
        }
        InstrumentKind::RegisterDevice => {
            let descriptor = definition.descriptor.clone().ok_or_else(|| {
                BenchError::Configuration(format!("Register device '{}' has no descriptor", definition.id))
            })?;
            InstrumentHandle::RegisterDevice(Arc::new(FramedRegisterDevice::new(
                name.clone(),
                endpoint.clone(),
                descriptor,
                timeout,
            )))
        }
    };

    Ok(RegisteredInstrument {
        id: definition.id.clone(),
        name,
        kind: definition.kind,
        endpoint,
        handle,
        load_plan: definition.load.clone(),
        reset_pulse: definition.reset_pulse.unwrap_or(DEFAULT_RESET_PULSE),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[[instruments]]
id = "psu"
kind = "power_supply"
endpoint = { transport = "tcp", host = "127.0.0.1" }

[[instruments]]
id = "load"
kind = "electronic_load"
endpoint = { transport = "tcp", host = "127.0.0.1" }
load = { static_current = 2.0 }

[[instruments]]
id = "mcu"
kind = "serial_link"
reset_pulse = "250ms"
endpoint = { transport = "serial", path = "/dev/ttyACM0", baud_rate = 115200 }

[[instruments]]
id = "spare"
kind = "power_supply"
enabled = false
endpoint = { transport = "tcp", host = "127.0.0.1" }
"#;

    #[test]
    fn builds_enabled_instruments() {
        let config = BenchConfig::from_toml_str(CONFIG).unwrap();
        let registry = InstrumentRegistry::from_config(&config).unwrap();

        assert_eq!(registry.len(), 3);
        assert!(registry.get("spare").is_err());

        let psu = registry.get("psu").unwrap();
        assert_eq!(psu.endpoint, Endpoint::tcp("127.0.0.1", 9221));
        assert!(!psu.handle.is_connected());

        let load = registry.get("load").unwrap();
        assert_eq!(load.endpoint, Endpoint::tcp("127.0.0.1", 5000));
        assert_eq!(load.load_plan.as_ref().unwrap().static_current, 2.0);

        assert_eq!(registry.get("mcu").unwrap().reset_pulse, Duration::from_millis(250));
    }

    #[test]
    fn typed_lookup_checks_kind() {
        let config = BenchConfig::from_toml_str(CONFIG).unwrap();
        let registry = InstrumentRegistry::from_config(&config).unwrap();

        assert!(registry.power_supply("psu").is_ok());
        assert!(matches!(
            registry.multimeter("psu"),
            Err(BenchError::WrongKind { expected: "multimeter", .. })
        ));
        assert!(matches!(
            registry.electronic_load("nope"),
            Err(BenchError::UnknownInstrument(_))
        ));
        assert!(registry.serial_link("mcu").is_ok());
    }

    #[test]
    fn poll_sources_skip_serial_instruments() {
        let config = BenchConfig::from_toml_str(CONFIG).unwrap();
        let registry = InstrumentRegistry::from_config(&config).unwrap();

        let sources = registry.poll_sources(&config.polling, &ModeSelector::default());
        let ids: Vec<&str> = sources.iter().map(|source| source.instrument()).collect();
        assert_eq!(ids, ["load", "psu"]);
        assert_eq!(sources[0].period(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn unreachable_multimeter_is_recorded_not_fatal() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let text = format!(
            r#"
[[instruments]]
id = "dmm"
kind = "multimeter"
endpoint = {{ transport = "tcp", host = "127.0.0.1", port = {port} }}

[[instruments]]
id = "psu"
kind = "power_supply"
endpoint = {{ transport = "tcp", host = "127.0.0.1" }}
"#
        );
        let config = BenchConfig::from_toml_str(&text).unwrap();

        let registry = InstrumentRegistry::open(&config).await.unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.failure("dmm").is_some());
        let listing = registry.list();
        assert!(!listing[0].connected);
        assert!(listing[0].status.is_some());
    }
}
