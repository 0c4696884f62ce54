//! Line-delimited session over an async byte stream.

use crate::error::{BenchError, BenchResult};
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::time::timeout;

/// Trait alias for the byte streams a session can run over.
///
/// Implemented by `tokio::net::TcpStream`, `tokio_serial::SerialStream` and
/// `tokio::io::DuplexStream` (tests).
pub trait SessionIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SessionIo for T {}

/// Type-erased boxed session stream.
pub type DynSession = Box<dyn SessionIo>;

/// Window used to decide that no stale bytes are pending.
const STALE_DRAIN_WINDOW: Duration = Duration::from_millis(5);

/// An open, line-oriented connection to one instrument.
///
/// Commands are written as ASCII terminated by `\n`. Replies are read one
/// line at a time with a bounded timeout. Once the peer closes the stream or
/// an unrecoverable I/O error occurs, the session transitions to closed and
/// every further operation fails with [`BenchError::ConnectionClosed`].
pub struct LineSession {
    label: String,
    stream: Option<BufReader<DynSession>>,
    read_timeout: Duration,
}

impl LineSession {
    /// Wrap an already connected stream.
    pub fn new(label: impl Into<String>, stream: DynSession, read_timeout: Duration) -> Self {
        Self {
            label: label.into(),
            stream: Some(BufReader::new(stream)),
            read_timeout,
        }
    }

    /// Instrument label used in logs and errors.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Default bound for [`read_line`](Self::read_line).
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Change the default read bound.
    pub fn set_read_timeout(&mut self, read_timeout: Duration) {
        self.read_timeout = read_timeout;
    }

    /// Whether the underlying stream is still attached.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn stream_mut(&mut self) -> BenchResult<&mut BufReader<DynSession>> {
        self.stream
            .as_mut()
            .ok_or_else(|| BenchError::ConnectionClosed {
                instrument: self.label.clone(),
            })
    }

    fn closed(&mut self) -> BenchError {
        self.stream = None;
        BenchError::ConnectionClosed {
            instrument: self.label.clone(),
        }
    }

    fn fail_io(&mut self, err: std::io::Error) -> BenchError {
        if matches!(
            err.kind(),
            ErrorKind::BrokenPipe
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::NotConnected
                | ErrorKind::UnexpectedEof
        ) {
            tracing::warn!(instrument = %self.label, error = %err, "Session lost");
            return self.closed();
        }
        BenchError::Io(err)
    }

    /// Write one command line. The `\n` terminator is appended here.
    pub async fn write_line(&mut self, line: &str) -> BenchResult<()> {
        tracing::debug!(instrument = %self.label, ">> {}", line);
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.write_bytes(&bytes).await
    }

    /// Write raw bytes and flush.
    pub async fn write_bytes(&mut self, bytes: &[u8]) -> BenchResult<()> {
        let stream = self.stream_mut()?;
        let result = match stream.get_mut().write_all(bytes).await {
            Ok(()) => stream.get_mut().flush().await,
            Err(err) => Err(err),
        };
        result.map_err(|err| self.fail_io(err))
    }

    /// Read one reply line using the session's default timeout.
    ///
    /// `command` only labels the error if the bound elapses.
    pub async fn read_line(&mut self, command: &str) -> BenchResult<String> {
        let after = self.read_timeout;
        self.read_line_within(command, after).await
    }

    /// Read one reply line, failing with [`BenchError::Timeout`] after `after`.
    ///
    /// The line is returned without its terminator and surrounding
    /// whitespace. Undecodable bytes are replaced rather than rejected.
    pub async fn read_line_within(&mut self, command: &str, after: Duration) -> BenchResult<String> {
        let stream = self.stream_mut()?;
        let mut buf = Vec::new();
        match timeout(after, stream.read_until(b'\n', &mut buf)).await {
            Err(_) => Err(BenchError::Timeout {
                instrument: self.label.clone(),
                command: command.to_string(),
                after,
            }),
            Ok(Ok(0)) => Err(self.closed()),
            Ok(Ok(_)) if buf.last() != Some(&b'\n') => {
                // Peer hung up in the middle of a line.
                Err(self.closed())
            }
            Ok(Ok(_)) => {
                let line = String::from_utf8_lossy(&buf).trim().to_string();
                tracing::debug!(instrument = %self.label, "<< {}", line);
                Ok(line)
            }
            Ok(Err(err)) => Err(self.fail_io(err)),
        }
    }

    /// Read exactly `len` bytes, failing with [`BenchError::Timeout`] after `after`.
    pub async fn read_exact_within(
        &mut self,
        len: usize,
        command: &str,
        after: Duration,
    ) -> BenchResult<Vec<u8>> {
        let stream = self.stream_mut()?;
        let mut buf = vec![0u8; len];
        match timeout(after, stream.read_exact(&mut buf)).await {
            Err(_) => Err(BenchError::Timeout {
                instrument: self.label.clone(),
                command: command.to_string(),
                after,
            }),
            Ok(Ok(_)) => Ok(buf),
            Ok(Err(err)) => Err(self.fail_io(err)),
        }
    }

    /// Drop any bytes already waiting on the stream.
    ///
    /// Called before each query so that a late reply to an earlier, timed-out
    /// query is never taken as the answer to a new one.
    pub async fn discard_stale(&mut self) -> BenchResult<usize> {
        let stream = self.stream_mut()?;

        let mut discarded = stream.buffer().len();
        stream.consume(discarded);

        let mut scratch = [0u8; 256];
        loop {
            match timeout(STALE_DRAIN_WINDOW, stream.get_mut().read(&mut scratch)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => discarded += n,
                Ok(Err(err)) => return Err(self.fail_io(err)),
            }
        }

        if discarded > 0 {
            tracing::debug!(instrument = %self.label, discarded, "Discarded stale bytes");
        }
        Ok(discarded)
    }

    /// Send a command that expects exactly one reply line and return it.
    pub async fn query(&mut self, command: &str) -> BenchResult<String> {
        self.discard_stale().await?;
        self.write_line(command).await?;
        self.read_line(command).await
    }

    /// Close the stream. Safe to call on an already closed session.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.get_mut().shutdown().await {
                tracing::debug!(instrument = %self.label, error = %err, "Shutdown failed");
            }
            tracing::debug!(instrument = %self.label, "Session closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};
    use tokio::task::JoinHandle;

    fn session(device: DuplexStream) -> LineSession {
        LineSession::new("stub", Box::new(device), Duration::from_millis(200))
    }

    /// Reads one command line on the host side and answers with `reply`.
    fn answer_once(host: DuplexStream, reply: &'static str) -> JoinHandle<String> {
        tokio::spawn(async move {
            let mut reader = BufReader::new(host);
            let mut command = String::new();
            reader.read_line(&mut command).await.unwrap();
            reader.get_mut().write_all(reply.as_bytes()).await.unwrap();
            // Keep the stream alive until the reply is consumed.
            tokio::time::sleep(Duration::from_millis(50)).await;
            command
        })
    }

    #[tokio::test]
    async fn query_returns_trimmed_reply() {
        let (host, device) = duplex(256);
        let mut session = session(device);
        let responder = answer_once(host, "5.000\r\n");

        let reply = session.query("V1?").await.unwrap();

        assert_eq!(reply, "5.000");
        assert_eq!(responder.await.unwrap(), "V1?\n");
    }

    #[tokio::test]
    async fn read_times_out_without_reply() {
        let (_host, device) = duplex(256);
        let mut session = session(device);

        let err = session
            .read_line_within("MEAS:VOLT?", Duration::from_millis(20))
            .await
            .unwrap_err();

        assert!(matches!(err, BenchError::Timeout { .. }));
        assert!(session.is_open());
    }

    #[tokio::test]
    async fn peer_hangup_closes_session() {
        let (host, device) = duplex(256);
        let mut session = session(device);
        drop(host);

        let err = session.read_line("V1?").await.unwrap_err();
        assert!(matches!(err, BenchError::ConnectionClosed { .. }));
        assert!(!session.is_open());

        let err = session.write_line("V1 1.000").await.unwrap_err();
        assert!(matches!(err, BenchError::ConnectionClosed { .. }));
    }

    #[tokio::test]
    async fn stale_bytes_are_dropped_before_query() {
        let (mut host, device) = duplex(256);
        let mut session = session(device);
        host.write_all(b"late reply\n").await.unwrap();

        let responder = answer_once(host, "1\n");
        let reply = session.query("LOAD:STATe?").await.unwrap();

        assert_eq!(reply, "1");
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (_host, device) = duplex(64);
        let mut session = session(device);

        session.close().await;
        session.close().await;

        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn undecodable_bytes_are_replaced() {
        let (mut host, device) = duplex(64);
        let mut session = session(device);
        host.write_all(&[b'o', b'k', 0xFF, b'\n']).await.unwrap();

        let line = session.read_line("?").await.unwrap();
        assert_eq!(line, "ok\u{FFFD}");
    }
}
