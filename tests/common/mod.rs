//! Simulated TCP instruments for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// Commands received by a simulated instrument, in order.
pub type Received = Arc<Mutex<Vec<String>>>;

/// Line-protocol instrument listening on a loopback port.
pub struct SimulatedInstrument {
    pub port: u16,
    pub received: Received,
}

impl SimulatedInstrument {
    /// Serve every connection with `respond`; `None` sends no reply.
    pub async fn start<F>(respond: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received: Received = Arc::default();
        let respond = Arc::new(respond);

        let log = received.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let log = log.clone();
                let respond = respond.clone();
                tokio::spawn(async move {
                    let (read, mut write) = stream.into_split();
                    let mut lines = BufReader::new(read).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let line = line.trim().to_string();
                        log.lock().unwrap().push(line.clone());
                        if let Some(reply) = respond(&line) {
                            if write.write_all(format!("{}\n", reply).as_bytes()).await.is_err() {
                                break;
                            }
                        }
                    }
                });
            }
        });

        Self { port, received }
    }

    /// Dual-channel supply that remembers its set points.
    pub async fn power_supply() -> Self {
        let state: Mutex<HashMap<String, String>> = Mutex::default();
        Self::start(move |line| {
            let mut state = state.lock().unwrap();
            if line == "*IDN?" {
                return Some("THURLBY THANDAR, CPX400DP, 000001, 1.00".to_string());
            }
            if let Some((command, value)) = line.split_once(' ') {
                state.insert(command.to_string(), value.to_string());
                return None;
            }
            let key = line.strip_suffix('?')?;
            let value = state.get(key).cloned().unwrap_or_else(|| "0.000".to_string());
            Some(format!("{} {}", key, value))
        })
        .await
    }

    /// Multimeter that accepts connections but never answers.
    pub async fn silent() -> Self {
        Self::start(|_| None).await
    }

    /// Commands received so far.
    pub fn commands(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}
