//! Background line reader for serial telemetry.

use crate::error::{BenchError, BenchResult};
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

/// Pause after an unexpected read error before trying again.
const RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Observable state of a pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    /// No reader thread is running.
    Idle,
    /// The reader thread is inside its loop.
    Running,
}

/// One reader thread feeding a FIFO of decoded lines.
///
/// The thread owns the byte source. It reads newline-terminated lines,
/// decodes them lossily, trims surrounding whitespace and pushes them onto
/// an unbounded channel in arrival order. Consumers drain the queue with
/// [`TelemetryPump::try_next`], which never blocks.
///
/// Read timeouts are retried. End of stream or a closed-port error ends
/// the loop and the pump turns [`PumpState::Idle`].
pub struct TelemetryPump {
    label: String,
    lines: UnboundedReceiver<String>,
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TelemetryPump {
    /// Start a reader thread over `source`.
    ///
    /// `source` should time out its reads (as a serial port opened with a
    /// read timeout does) so the thread can observe [`TelemetryPump::shutdown`].
    pub fn spawn<R>(label: impl Into<String>, source: R) -> BenchResult<Self>
    where
        R: Read + Send + 'static,
    {
        let label = label.into();
        let (tx, lines) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let label = label.clone();
            let stop = stop.clone();
            let running = running.clone();
            thread::Builder::new()
                .name(format!("telemetry-{}", label))
                .spawn(move || {
                    pump_lines(&label, source, &tx, &stop);
                    running.store(false, Ordering::Release);
                    tracing::debug!(link = %label, "Telemetry reader stopped");
                })
                .map_err(BenchError::Io)?
        };

        tracing::debug!(link = %label, "Telemetry reader started");
        Ok(Self {
            label,
            lines,
            stop,
            running,
            handle: Some(handle),
        })
    }

    /// Link label this pump reads for.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current state.
    pub fn state(&self) -> PumpState {
        if self.running.load(Ordering::Acquire) {
            PumpState::Running
        } else {
            PumpState::Idle
        }
    }

    /// Oldest undelivered line, if any.
    pub fn try_next(&mut self) -> Option<String> {
        match self.lines.try_recv() {
            Ok(line) => Some(line),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Every undelivered line, oldest first.
    pub fn drain(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Signal the reader to stop and wait until it has left its loop.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!(link = %self.label, "Telemetry reader panicked");
            }
        }
        self.running.store(false, Ordering::Release);
    }
}

impl Drop for TelemetryPump {
    fn drop(&mut self) {
        // Detach rather than join; the reader exits on its next read.
        self.stop.store(true, Ordering::Release);
    }
}

fn pump_lines<R: Read>(label: &str, source: R, tx: &UnboundedSender<String>, stop: &AtomicBool) {
    let mut reader = BufReader::new(source);
    let mut pending = Vec::new();

    while !stop.load(Ordering::Acquire) {
        match reader.read_until(b'\n', &mut pending) {
            Ok(0) => {
                tracing::debug!(link = %label, "Telemetry source closed");
                break;
            }
            Ok(_) => {
                if pending.last() != Some(&b'\n') {
                    // End of stream mid-line; the next read returns 0.
                    continue;
                }
                let line = String::from_utf8_lossy(&pending).trim().to_string();
                pending.clear();
                tracing::trace!(link = %label, "<< {}", line);
                if tx.send(line).is_err() {
                    break;
                }
            }
            // Bytes read before the timeout stay in `pending`.
            Err(err) if matches!(
                err.kind(),
                ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
            ) => {}
            Err(err) if is_closed(err.kind()) => {
                tracing::debug!(link = %label, error = %err, "Telemetry port closed");
                break;
            }
            Err(err) => {
                tracing::debug!(link = %label, error = %err, "Telemetry read failed; retrying");
                thread::sleep(RETRY_BACKOFF);
            }
        }
    }
}

fn is_closed(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::time::Instant;

    enum Step {
        Data(&'static [u8]),
        Fail(ErrorKind),
    }

    /// Byte source that plays `steps`, then either ends or times out forever.
    struct Scripted {
        steps: VecDeque<Step>,
        then_eof: bool,
    }

    impl Scripted {
        fn new(steps: Vec<Step>, then_eof: bool) -> Self {
            Self {
                steps: steps.into(),
                then_eof,
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.steps.pop_front() {
                Some(Step::Data(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(bytes);
                    Ok(bytes.len())
                }
                Some(Step::Fail(kind)) => Err(io::Error::from(kind)),
                None if self.then_eof => Ok(0),
                None => {
                    thread::sleep(Duration::from_millis(2));
                    Err(io::Error::from(ErrorKind::TimedOut))
                }
            }
        }
    }

    fn wait_idle(pump: &TelemetryPump) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while pump.state() == PumpState::Running && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn delivers_lines_in_arrival_order() {
        let source = Scripted::new(
            vec![
                Step::Data(b"temp=21.5\r\n"),
                Step::Data(b"temp="),
                Step::Fail(ErrorKind::TimedOut),
                Step::Data(b"21.7\nstate=ok\n"),
            ],
            true,
        );
        let mut pump = TelemetryPump::spawn("mcu", source).unwrap();
        wait_idle(&pump);

        assert_eq!(pump.drain(), ["temp=21.5", "temp=21.7", "state=ok"]);
        assert_eq!(pump.try_next(), None);
    }

    #[test]
    fn undecodable_bytes_are_replaced() {
        let source = Scripted::new(vec![Step::Data(b"ok \xFF\xFE end\n")], true);
        let mut pump = TelemetryPump::spawn("mcu", source).unwrap();
        wait_idle(&pump);

        let line = pump.try_next().unwrap();
        assert!(line.starts_with("ok "));
        assert!(line.ends_with(" end"));
        assert!(line.contains('\u{FFFD}'));
    }

    #[test]
    fn closed_port_stops_reader_without_panic() {
        let source = Scripted::new(
            vec![Step::Data(b"last\n"), Step::Fail(ErrorKind::BrokenPipe)],
            false,
        );
        let mut pump = TelemetryPump::spawn("mcu", source).unwrap();
        wait_idle(&pump);

        assert_eq!(pump.state(), PumpState::Idle);
        assert_eq!(pump.try_next().as_deref(), Some("last"));
        pump.shutdown();
    }

    #[test]
    fn shutdown_joins_reader_blocked_on_timeouts() {
        let mut pump = TelemetryPump::spawn("mcu", Scripted::new(vec![], false)).unwrap();
        assert_eq!(pump.state(), PumpState::Running);

        pump.shutdown();

        assert_eq!(pump.state(), PumpState::Idle);
        assert_eq!(pump.try_next(), None);
    }

    #[test]
    fn transient_errors_are_retried() {
        let source = Scripted::new(
            vec![
                Step::Fail(ErrorKind::Other),
                Step::Fail(ErrorKind::Interrupted),
                Step::Data(b"alive\n"),
            ],
            true,
        );
        let mut pump = TelemetryPump::spawn("mcu", source).unwrap();
        wait_idle(&pump);

        assert_eq!(pump.drain(), ["alive"]);
    }

    #[test]
    fn fresh_pump_starts_with_empty_queue() {
        let mut first = TelemetryPump::spawn("mcu", Scripted::new(vec![Step::Data(b"old\n")], false)).unwrap();
        first.shutdown();

        let mut second = TelemetryPump::spawn("mcu", Scripted::new(vec![], false)).unwrap();
        assert_eq!(second.try_next(), None);
        second.shutdown();
    }
}
