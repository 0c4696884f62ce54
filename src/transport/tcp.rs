//! TCP transport for network instruments.

use super::session::LineSession;
use crate::error::{BenchError, BenchResult};
use std::io::ErrorKind;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Default bound for establishing a TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a TCP session to `host:port`.
///
/// # Errors
/// [`BenchError::Connection`] if the connect fails or does not complete
/// within `connect_timeout`.
pub async fn connect(
    label: &str,
    host: &str,
    port: u16,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> BenchResult<LineSession> {
    let endpoint = format!("{}:{}", host, port);

    let stream = match timeout(connect_timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(BenchError::Connection { endpoint, source }),
        Err(_) => {
            return Err(BenchError::Connection {
                endpoint,
                source: std::io::Error::new(
                    ErrorKind::TimedOut,
                    format!("no answer within {:?}", connect_timeout),
                ),
            })
        }
    };

    // Disable Nagle's algorithm for low latency
    stream.set_nodelay(true)?;

    tracing::info!(instrument = %label, %endpoint, "Connected");
    Ok(LineSession::new(label, Box::new(stream), read_timeout))
}
