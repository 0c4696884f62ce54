//! Periodic instrument polling.
//!
//! The [`PollingScheduler`] reads every connected instrument on its own
//! period from a single task. Each poll result lands on the shared
//! [`ReadingBoard`] (latest value and status per instrument) and is also
//! emitted as a [`PollEvent`] for subscribers.
//!
//! # Failure isolation
//!
//! A failed poll is recorded as that instrument's status text and logged at
//! `warn`; the remaining instruments of the same tick are still polled.
//!
//! # Overlap
//!
//! Ticks run one after another on one task. A read that runs past the next
//! tick delays it, and ticks missed in the meantime are skipped rather than
//! replayed, so no instrument is ever polled twice concurrently.

use crate::capabilities::{ElectronicLoad, Multimeter, PowerSupply};
use crate::error::BenchResult;
use crate::readings::{measure, MeasureMode, Reading};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Default power supply period.
pub const DEFAULT_POWER_SUPPLY_PERIOD: Duration = Duration::from_secs(2);
/// Default multimeter period.
pub const DEFAULT_MULTIMETER_PERIOD: Duration = Duration::from_secs(1);
/// Default electronic load period.
pub const DEFAULT_ELECTRONIC_LOAD_PERIOD: Duration = Duration::from_millis(500);

/// Finest scheduler granularity.
const MIN_TICK: Duration = Duration::from_millis(10);

/// Something the scheduler can poll.
#[async_trait]
pub trait PollSource: Send + Sync {
    /// Instrument id used on the board.
    fn instrument(&self) -> &str;

    /// Time between polls.
    fn period(&self) -> Duration;

    /// Whether the instrument should be polled now.
    fn is_live(&self) -> bool;

    /// Read the instrument once.
    async fn poll(&self) -> BenchResult<Vec<Reading>>;
}

/// Voltage and current readback of every supply channel.
pub struct PowerSupplyPoll {
    id: String,
    psu: Arc<dyn PowerSupply>,
    period: Duration,
}

impl PowerSupplyPoll {
    /// Poll `psu` every `period`.
    pub fn new(id: impl Into<String>, psu: Arc<dyn PowerSupply>, period: Duration) -> Self {
        Self {
            id: id.into(),
            psu,
            period,
        }
    }
}

#[async_trait]
impl PollSource for PowerSupplyPoll {
    fn instrument(&self) -> &str {
        &self.id
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn is_live(&self) -> bool {
        self.psu.is_connected()
    }

    async fn poll(&self) -> BenchResult<Vec<Reading>> {
        let mut readings = Vec::new();
        for &channel in self.psu.channels() {
            let volts = self.psu.read_voltage(channel).await?;
            let amps = self.psu.read_current(channel).await?;
            readings.push(Reading::volts(format!("CH{} voltage", channel), volts));
            readings.push(Reading::amps(format!("CH{} current", channel), amps));
        }
        Ok(readings)
    }
}

/// Shared, runtime-changeable multimeter mode.
#[derive(Debug, Clone, Default)]
pub struct ModeSelector(Arc<RwLock<MeasureMode>>);

impl ModeSelector {
    /// Selector starting at `mode`.
    pub fn new(mode: MeasureMode) -> Self {
        Self(Arc::new(RwLock::new(mode)))
    }

    /// Current mode.
    pub fn get(&self) -> MeasureMode {
        *self.0.read()
    }

    /// Change the mode; the next poll uses it.
    pub fn set(&self, mode: MeasureMode) {
        *self.0.write() = mode;
    }
}

/// One multimeter reading in the selected mode.
pub struct MultimeterPoll {
    id: String,
    dmm: Arc<dyn Multimeter>,
    mode: ModeSelector,
    period: Duration,
}

impl MultimeterPoll {
    /// Poll `dmm` every `period` in whatever mode `mode` holds.
    pub fn new(
        id: impl Into<String>,
        dmm: Arc<dyn Multimeter>,
        mode: ModeSelector,
        period: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            dmm,
            mode,
            period,
        }
    }
}

#[async_trait]
impl PollSource for MultimeterPoll {
    fn instrument(&self) -> &str {
        &self.id
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn is_live(&self) -> bool {
        self.dmm.is_connected()
    }

    async fn poll(&self) -> BenchResult<Vec<Reading>> {
        Ok(vec![measure(self.dmm.as_ref(), self.mode.get()).await?])
    }
}

/// Load state, voltage and current.
pub struct ElectronicLoadPoll {
    id: String,
    load: Arc<dyn ElectronicLoad>,
    period: Duration,
}

impl ElectronicLoadPoll {
    /// Poll `load` every `period`.
    pub fn new(id: impl Into<String>, load: Arc<dyn ElectronicLoad>, period: Duration) -> Self {
        Self {
            id: id.into(),
            load,
            period,
        }
    }
}

#[async_trait]
impl PollSource for ElectronicLoadPoll {
    fn instrument(&self) -> &str {
        &self.id
    }

    fn period(&self) -> Duration {
        self.period
    }

    fn is_live(&self) -> bool {
        self.load.is_connected()
    }

    async fn poll(&self) -> BenchResult<Vec<Reading>> {
        let on = self.load.check_load_status().await?;
        let volts = self.load.measure_voltage().await?;
        let amps = self.load.measure_current().await?;
        Ok(vec![
            Reading::load_state("load", on),
            Reading::volts("voltage", volts),
            Reading::amps("current", amps),
        ])
    }
}

/// Latest state of one instrument.
#[derive(Debug, Clone, Serialize)]
pub struct InstrumentSnapshot {
    /// Instrument id.
    pub instrument: String,
    /// Readings of the last successful poll.
    pub readings: Vec<Reading>,
    /// Failure of the last poll, if it failed.
    pub error: Option<String>,
    /// When the last poll finished.
    pub updated_at: DateTime<Utc>,
}

/// What one poll produced.
#[derive(Debug, Clone)]
pub enum PollEvent {
    /// The poll succeeded.
    Readings {
        /// Instrument id.
        instrument: String,
        /// Values read.
        readings: Vec<Reading>,
    },
    /// The poll failed.
    Failed {
        /// Instrument id.
        instrument: String,
        /// Displayable failure text.
        message: String,
    },
}

impl PollEvent {
    /// Instrument the event belongs to.
    pub fn instrument(&self) -> &str {
        match self {
            PollEvent::Readings { instrument, .. } | PollEvent::Failed { instrument, .. } => {
                instrument
            }
        }
    }
}

/// Latest reading and status per instrument.
///
/// Cheap to clone; all clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct ReadingBoard {
    inner: Arc<RwLock<BTreeMap<String, InstrumentSnapshot>>>,
}

impl ReadingBoard {
    /// Empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful poll and clear any previous error.
    pub fn record_readings(&self, instrument: &str, readings: Vec<Reading>) {
        self.inner.write().insert(
            instrument.to_string(),
            InstrumentSnapshot {
                instrument: instrument.to_string(),
                readings,
                error: None,
                updated_at: Utc::now(),
            },
        );
    }

    /// Record a failed poll, keeping the last good readings.
    pub fn record_error(&self, instrument: &str, message: impl Into<String>) {
        let mut table = self.inner.write();
        let snapshot = table
            .entry(instrument.to_string())
            .or_insert_with(|| InstrumentSnapshot {
                instrument: instrument.to_string(),
                readings: Vec::new(),
                error: None,
                updated_at: Utc::now(),
            });
        snapshot.error = Some(message.into());
        snapshot.updated_at = Utc::now();
    }

    /// Latest snapshot of one instrument.
    pub fn latest(&self, instrument: &str) -> Option<InstrumentSnapshot> {
        self.inner.read().get(instrument).cloned()
    }

    /// All snapshots ordered by instrument id.
    pub fn snapshot(&self) -> Vec<InstrumentSnapshot> {
        self.inner.read().values().cloned().collect()
    }
}

struct Scheduled {
    source: Arc<dyn PollSource>,
    next_due: Option<Instant>,
}

/// Polls a set of sources on their periods.
pub struct PollingScheduler {
    sources: Vec<Scheduled>,
    board: ReadingBoard,
    subscribers: Vec<mpsc::UnboundedSender<PollEvent>>,
}

impl PollingScheduler {
    /// Scheduler publishing to `board`.
    pub fn new(board: ReadingBoard) -> Self {
        Self {
            sources: Vec::new(),
            board,
            subscribers: Vec::new(),
        }
    }

    /// Add a source. It is first polled on the next tick.
    pub fn add(&mut self, source: Arc<dyn PollSource>) {
        self.sources.push(Scheduled {
            source,
            next_due: None,
        });
    }

    /// Receive every [`PollEvent`] from now on.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<PollEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Board this scheduler publishes to.
    pub fn board(&self) -> &ReadingBoard {
        &self.board
    }

    /// Granularity of the loop: the greatest common divisor of all periods.
    pub fn tick_period(&self) -> Duration {
        let millis = self
            .sources
            .iter()
            .map(|entry| entry.source.period().as_millis().max(1))
            .fold(0u128, gcd);
        let millis = u64::try_from(millis).unwrap_or(u64::MAX);
        Duration::from_millis(millis).max(MIN_TICK)
    }

    /// Poll every live source that is due at `now`.
    ///
    /// Sources run sequentially; a failure is recorded for its instrument
    /// only.
    pub async fn tick(&mut self, now: Instant) -> Vec<PollEvent> {
        let mut events = Vec::new();
        for entry in &mut self.sources {
            if entry.next_due.is_some_and(|due| now < due) {
                continue;
            }
            entry.next_due = Some(now + entry.source.period());

            let source = &entry.source;
            if !source.is_live() {
                continue;
            }

            let instrument = source.instrument().to_string();
            let event = match source.poll().await {
                Ok(readings) => {
                    tracing::debug!(instrument = %instrument, count = readings.len(), "Polled");
                    self.board.record_readings(&instrument, readings.clone());
                    PollEvent::Readings {
                        instrument,
                        readings,
                    }
                }
                Err(err) => {
                    tracing::warn!(instrument = %instrument, error = %err, "Poll failed");
                    let message = err.to_string();
                    self.board.record_error(&instrument, message.clone());
                    PollEvent::Failed {
                        instrument,
                        message,
                    }
                }
            };
            events.push(event);
        }

        self.subscribers
            .retain(|tx| events.iter().all(|event| tx.send(event.clone()).is_ok()));
        events
    }

    /// Run until `shutdown` fires or its sender is dropped.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let period = self.tick_period();
        let mut ticker = interval_at(Instant::now(), period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(sources = self.sources.len(), tick_ms = period.as_millis() as u64, "Polling started");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                now = ticker.tick() => {
                    self.tick(now).await;
                }
            }
        }
        tracing::info!("Polling stopped");
    }

    /// Run on a background task.
    pub fn spawn(self) -> PollerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(shutdown_rx));
        PollerHandle {
            shutdown_tx: Some(shutdown_tx),
            task,
        }
    }
}

fn gcd(a: u128, b: u128) -> u128 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Handle to a spawned scheduler.
pub struct PollerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Stop polling and wait for the loop to exit.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "Polling task ended abnormally");
        }
    }
}
