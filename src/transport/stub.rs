//! In-memory instrument stand-ins for driver tests.

use super::LineSession;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Every line the stub received, in order.
pub(crate) type CommandLog = Arc<Mutex<Vec<String>>>;

/// Session wired to a task that answers each received line with `respond`.
///
/// `respond` returning `None` means the command gets no reply.
pub(crate) fn line_stub<F>(label: &str, read_timeout: Duration, mut respond: F) -> (LineSession, CommandLog)
where
    F: FnMut(&str) -> Option<String> + Send + 'static,
{
    let (host, device) = duplex(4096);
    let log: CommandLog = Arc::new(Mutex::new(Vec::new()));
    let seen = log.clone();

    tokio::spawn(async move {
        let mut reader = BufReader::new(host);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let command = line.trim().to_string();
            seen.lock().push(command.clone());
            if let Some(reply) = respond(&command) {
                let framed = format!("{}\n", reply);
                if reader.get_mut().write_all(framed.as_bytes()).await.is_err() {
                    break;
                }
            }
        }
    });

    (LineSession::new(label, Box::new(device), read_timeout), log)
}
