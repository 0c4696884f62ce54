//! Microcontroller serial link
//!
//! Protocol Overview:
//! - Serial, 8N1, no flow control; 9600 or 115200 baud are typical
//! - Newline-terminated ASCII lines in both directions
//! - A break condition on TX doubles as the board's reset signal
//!
//! Incoming lines are read by a [`TelemetryPump`] started on connect and
//! stopped (and joined) on disconnect. Writes and break control go through
//! the same port handle from the caller's task.

use crate::error::{BenchError, BenchResult};
use crate::telemetry::{PumpState, TelemetryPump};
use crate::transport::serial::open_blocking;
use parking_lot::Mutex;
use std::fmt;
use std::io::{Read, Write};
use std::time::Duration;

/// Read timeout used by the telemetry thread between stop checks.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Hold time of [`SerialLink::reset_pulse`] when none is configured.
pub const DEFAULT_RESET_PULSE: Duration = Duration::from_millis(100);

/// Port operations the link needs.
///
/// Implemented for real serial ports; tests supply an in-memory port.
pub trait LinkPort: Write + Send {
    /// Independent read handle for the telemetry thread.
    fn reader(&self) -> BenchResult<Box<dyn Read + Send>>;

    /// Start transmitting a break.
    fn set_break(&self) -> BenchResult<()>;

    /// Stop transmitting a break.
    fn clear_break(&self) -> BenchResult<()>;
}

impl LinkPort for Box<dyn serialport::SerialPort> {
    fn reader(&self) -> BenchResult<Box<dyn Read + Send>> {
        let clone = self.try_clone()?;
        Ok(Box::new(clone))
    }

    fn set_break(&self) -> BenchResult<()> {
        serialport::SerialPort::set_break(self.as_ref())?;
        Ok(())
    }

    fn clear_break(&self) -> BenchResult<()> {
        serialport::SerialPort::clear_break(self.as_ref())?;
        Ok(())
    }
}

struct Connected {
    port: Box<dyn LinkPort>,
    pump: TelemetryPump,
}

/// Serial link to a microcontroller.
pub struct SerialLink {
    name: String,
    path: String,
    baud_rate: u32,
    read_timeout: Duration,
    state: Mutex<Option<Connected>>,
}

impl SerialLink {
    /// Create a closed link.
    pub fn new(name: impl Into<String>, path: impl Into<String>, baud_rate: u32, read_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            baud_rate,
            read_timeout,
            state: Mutex::new(None),
        }
    }

    /// Link name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device path and baud rate.
    pub fn port_settings(&self) -> (&str, u32) {
        (&self.path, self.baud_rate)
    }

    /// Open the configured port and start the telemetry reader.
    ///
    /// An open link is closed first, so every connect starts with an empty
    /// line queue.
    pub fn connect(&self) -> BenchResult<()> {
        let port = open_blocking(&self.path, self.baud_rate, self.read_timeout)?;
        self.attach(Box::new(port))?;
        tracing::info!(link = %self.name, path = %self.path, baud = self.baud_rate, "Serial link connected");
        Ok(())
    }

    /// Take over an already opened port and start the telemetry reader.
    pub fn attach(&self, port: Box<dyn LinkPort>) -> BenchResult<()> {
        self.disconnect();
        let pump = TelemetryPump::spawn(self.name.clone(), port.reader()?)?;
        *self.state.lock() = Some(Connected { port, pump });
        Ok(())
    }

    /// Stop the reader, wait for it, and close the port. Idempotent.
    pub fn disconnect(&self) {
        let taken = self.state.lock().take();
        if let Some(mut connected) = taken {
            connected.pump.shutdown();
            drop(connected.port);
            tracing::info!(link = %self.name, "Serial link disconnected");
        }
    }

    /// Whether the port is open and its reader is still running.
    ///
    /// Turns false as soon as the reader stops on a closed port, even
    /// though lines it queued stay available until the next connect.
    pub fn is_connected(&self) -> bool {
        self.state
            .lock()
            .as_ref()
            .is_some_and(|connected| connected.pump.state() == PumpState::Running)
    }

    /// State of the telemetry reader.
    pub fn pump_state(&self) -> PumpState {
        self.state
            .lock()
            .as_ref()
            .map_or(PumpState::Idle, |connected| connected.pump.state())
    }

    /// Write one line. A `\n` terminator is appended unless present.
    pub fn send(&self, text: &str) -> BenchResult<()> {
        let mut state = self.state.lock();
        let connected = state.as_mut().ok_or_else(|| self.closed())?;
        if connected.pump.state() == PumpState::Idle {
            return Err(self.lose(&mut state, "telemetry reader stopped"));
        }

        let mut line = text.as_bytes().to_vec();
        if !text.ends_with('\n') {
            line.push(b'\n');
        }
        let written = connected
            .port
            .write_all(&line)
            .and_then(|()| connected.port.flush());
        match written.map_err(BenchError::Io) {
            Ok(()) => {
                tracing::debug!(link = %self.name, ">> {}", text.trim_end());
                Ok(())
            }
            Err(err) if err.is_connection_lost() => Err(self.lose(&mut state, err)),
            Err(err) => Err(err),
        }
    }

    /// Tear down a link whose port has gone away.
    fn lose(&self, state: &mut Option<Connected>, reason: impl fmt::Display) -> BenchError {
        if let Some(mut connected) = state.take() {
            connected.pump.shutdown();
            drop(connected.port);
            tracing::warn!(link = %self.name, %reason, "Serial link lost");
        }
        self.closed()
    }

    /// Oldest received line, if any. Never blocks.
    pub fn next_line(&self) -> Option<String> {
        self.state
            .lock()
            .as_mut()
            .and_then(|connected| connected.pump.try_next())
    }

    /// Every received line not yet taken, oldest first.
    pub fn drain_lines(&self) -> Vec<String> {
        self.state
            .lock()
            .as_mut()
            .map(|connected| connected.pump.drain())
            .unwrap_or_default()
    }

    /// Hold the board in reset.
    pub fn assert_reset(&self) -> BenchResult<()> {
        let state = self.state.lock();
        let connected = state.as_ref().ok_or_else(|| self.closed())?;
        connected.port.set_break()?;
        tracing::debug!(link = %self.name, "Reset asserted");
        Ok(())
    }

    /// Let the board run.
    pub fn release_reset(&self) -> BenchResult<()> {
        let state = self.state.lock();
        let connected = state.as_ref().ok_or_else(|| self.closed())?;
        connected.port.clear_break()?;
        tracing::debug!(link = %self.name, "Reset released");
        Ok(())
    }

    /// Assert reset, wait `hold`, release.
    ///
    /// The break is released on every exit, including when the returned
    /// future is dropped mid-hold.
    pub async fn reset_pulse(&self, hold: Duration) -> BenchResult<()> {
        self.assert_reset()?;
        let held = HeldReset { link: self, armed: true };
        tokio::time::sleep(hold).await;
        held.release()?;
        tracing::info!(link = %self.name, hold_ms = hold.as_millis() as u64, "Reset pulse sent");
        Ok(())
    }

    fn closed(&self) -> BenchError {
        BenchError::ConnectionClosed {
            instrument: self.name.clone(),
        }
    }
}

/// Releases an asserted reset when dropped.
struct HeldReset<'a> {
    link: &'a SerialLink,
    armed: bool,
}

impl HeldReset<'_> {
    fn release(mut self) -> BenchResult<()> {
        let released = self.link.release_reset();
        // A failed release stays armed so drop tries once more.
        self.armed = released.is_err();
        released
    }
}

impl Drop for HeldReset<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(err) = self.link.release_reset() {
                tracing::warn!(link = %self.link.name, error = %err, "Reset left asserted");
            }
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.disconnect();
    }
}
