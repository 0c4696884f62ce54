//! Serial port helpers.
//!
//! Two flavours are used by the core:
//!
//! - [`open_async`] yields a `tokio_serial::SerialStream` for request/reply
//!   protocols driven from the async loop (register-mapped devices).
//! - [`open_blocking`] yields a `serialport::SerialPort` configured with a
//!   read timeout, for the telemetry pump's dedicated reader thread.

use crate::error::{BenchError, BenchResult};
use std::time::Duration;
use tokio::task::spawn_blocking;
use tokio_serial::SerialPortBuilderExt;

/// Open a serial port for async I/O (8N1, no flow control).
///
/// Port opening runs on the blocking pool so the async loop is not stalled.
pub async fn open_async(path: &str, baud_rate: u32) -> BenchResult<tokio_serial::SerialStream> {
    let owned = path.to_string();
    spawn_blocking(move || {
        tokio_serial::new(&owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|err| BenchError::Connection {
                endpoint: format!("{}@{}", owned, baud_rate),
                source: err.into(),
            })
    })
    .await
    .map_err(|err| BenchError::Io(std::io::Error::other(err)))?
}

/// Open a serial port in blocking mode with a read timeout.
///
/// Reads on the returned port fail with `ErrorKind::TimedOut` when no byte
/// arrives within `read_timeout`, which lets a reader loop check its stop
/// signal between attempts.
pub fn open_blocking(
    path: &str,
    baud_rate: u32,
    read_timeout: Duration,
) -> BenchResult<Box<dyn serialport::SerialPort>> {
    serialport::new(path, baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(read_timeout)
        .open()
        .map_err(|err| BenchError::Connection {
            endpoint: format!("{}@{}", path, baud_rate),
            source: err.into(),
        })
}

/// Names of the serial ports currently present on this machine.
pub fn list_ports() -> BenchResult<Vec<String>> {
    Ok(serialport::available_ports()?
        .into_iter()
        .map(|info| info.port_name)
        .collect())
}
