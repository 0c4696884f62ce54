//! Owned session slot for one instrument.

use super::session::LineSession;
use super::{tcp, Endpoint};
use crate::error::{BenchError, BenchResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// The live/closed connection of one instrument.
///
/// Holds the instrument's endpoint and, while connected, its [`LineSession`].
/// The session sits behind an async mutex so that each command/reply
/// exchange runs to completion before another caller may touch the stream.
/// When an exchange reports that the session was lost, the slot is emptied
/// and the instrument reads as disconnected.
pub struct InstrumentLink {
    name: String,
    endpoint: Endpoint,
    connect_timeout: Duration,
    read_timeout: Duration,
    session: Mutex<Option<LineSession>>,
    connected: AtomicBool,
}

impl InstrumentLink {
    /// Create a closed link.
    pub fn new(name: impl Into<String>, endpoint: Endpoint, read_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            endpoint,
            connect_timeout: tcp::DEFAULT_CONNECT_TIMEOUT,
            read_timeout,
            session: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Override the connect bound.
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Human-readable instrument name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Bound applied to every reply.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Whether a session is currently open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Open the session. An existing session is closed first.
    pub async fn connect(&self) -> BenchResult<()> {
        let session = match &self.endpoint {
            Endpoint::Tcp { host, port } => {
                tcp::connect(
                    &self.name,
                    host,
                    *port,
                    self.connect_timeout,
                    self.read_timeout,
                )
                .await?
            }
            Endpoint::Serial { path, baud_rate } => {
                let stream = super::serial::open_async(path, *baud_rate).await?;
                tracing::info!(instrument = %self.name, endpoint = %self.endpoint, "Connected");
                LineSession::new(self.name.clone(), Box::new(stream), self.read_timeout)
            }
        };
        self.attach(session).await;
        Ok(())
    }

    /// Install an already opened session (used by tests and by callers that
    /// open the stream themselves).
    pub async fn attach(&self, session: LineSession) {
        let mut slot = self.session.lock().await;
        if let Some(mut old) = slot.take() {
            old.close().await;
        }
        *slot = Some(session);
        self.connected.store(true, Ordering::Release);
    }

    /// Close the session. Safe to call when already disconnected.
    pub async fn disconnect(&self) {
        let mut slot = self.session.lock().await;
        if let Some(mut session) = slot.take() {
            session.close().await;
            tracing::info!(instrument = %self.name, "Disconnected");
        }
        self.connected.store(false, Ordering::Release);
    }

    /// Send a command that has no reply.
    pub async fn send(&self, command: &str) -> BenchResult<()> {
        let mut slot = self.session.lock().await;
        let result = match slot.as_mut() {
            Some(session) => session.write_line(command).await,
            None => Err(self.closed()),
        };
        self.settle(&mut slot, result).await
    }

    /// Send a command and return its single reply line.
    pub async fn query(&self, command: &str) -> BenchResult<String> {
        let mut slot = self.session.lock().await;
        let result = match slot.as_mut() {
            Some(session) => session.query(command).await,
            None => Err(self.closed()),
        };
        self.settle(&mut slot, result).await
    }

    /// Run a custom exchange with exclusive access to the session.
    pub async fn exchange<T, F>(&self, op: F) -> BenchResult<T>
    where
        F: for<'a> FnOnce(
            &'a mut LineSession,
        ) -> futures::future::BoxFuture<'a, BenchResult<T>>,
    {
        let mut slot = self.session.lock().await;
        let result = match slot.as_mut() {
            Some(session) => op(session).await,
            None => Err(self.closed()),
        };
        self.settle(&mut slot, result).await
    }

    fn closed(&self) -> BenchError {
        BenchError::ConnectionClosed {
            instrument: self.name.clone(),
        }
    }

    /// Tear the session down if the exchange reported it lost.
    async fn settle<T>(
        &self,
        slot: &mut Option<LineSession>,
        result: BenchResult<T>,
    ) -> BenchResult<T> {
        let lost = match (&result, slot.as_ref()) {
            (Err(err), Some(session)) => err.is_connection_lost() || !session.is_open(),
            _ => false,
        };
        if lost {
            if let Some(mut session) = slot.take() {
                session.close().await;
            }
            self.connected.store(false, Ordering::Release);
            tracing::warn!(instrument = %self.name, "Connection lost; session closed");
        }
        result
    }
}
