//! Stdio feed: newline-delimited payloads from stdin.
//!
//! Stdin is read on a dedicated thread. A blocking read cannot be cancelled,
//! so the thread only hands lines to the async side; aborting the feed task
//! drops the feed sender and shutdown proceeds without waiting for input.

use std::io::BufRead;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::types::{parse_payload, ServerError, ServerResult};

/// Lines buffered between the reader thread and the feed task.
const LINE_BUFFER: usize = 16;

type Line = std::io::Result<String>;

/// Reads one JSON payload per line and forwards it to the feed.
pub struct StdioFeed {
    feed: mpsc::Sender<Value>,
}

impl StdioFeed {
    pub fn new(feed: mpsc::Sender<Value>) -> Self {
        Self { feed }
    }

    /// Run until EOF on stdin. Returns the number of payloads forwarded.
    pub async fn run(&self) -> ServerResult<usize> {
        let (lines_tx, lines_rx) = mpsc::channel(LINE_BUFFER);
        std::thread::Builder::new()
            .name("sensorcast-stdin".to_string())
            .spawn(move || read_lines(std::io::stdin().lock(), lines_tx))?;

        tracing::info!("Stdio feed started");
        let forwarded = self.forward(lines_rx).await?;
        tracing::info!(forwarded, "EOF on stdin, feed ended");
        Ok(forwarded)
    }

    /// Forward every well-formed line until `lines` closes. Malformed lines are skipped.
    pub async fn forward(&self, mut lines: mpsc::Receiver<Line>) -> ServerResult<usize> {
        let mut forwarded = 0;

        while let Some(line) = lines.recv().await {
            let line = line.map_err(ServerError::Io)?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match parse_payload(trimmed) {
                Ok(payload) => {
                    self.feed
                        .send(payload)
                        .await
                        .map_err(|_| ServerError::Transport("feed consumer stopped".to_string()))?;
                    forwarded += 1;
                }
                Err(e) => tracing::warn!("Parse error: {e}"),
            }
        }

        Ok(forwarded)
    }
}

/// Blocking side: push each line of `reader` until EOF, a read error, or a
/// closed receiver.
fn read_lines<R: BufRead>(reader: R, lines: mpsc::Sender<Line>) {
    for line in reader.lines() {
        let failed = line.is_err();
        if lines.blocking_send(line).is_err() || failed {
            break;
        }
    }
}
