//! Connection to the master and the reconnect loop.

use crate::config::WorkerConfig;
use crate::error::{Result, WorkerError};
use crate::handler::handle_frame;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use tickets_dispatch::Fetcher;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// A worker process's session with its master.
pub struct Worker {
    config: WorkerConfig,
    fetcher: Arc<dyn Fetcher>,
}

impl Worker {
    /// Create a worker that fetches with `fetcher`.
    pub fn new(config: WorkerConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { config, fetcher }
    }

    /// Connect to the master and serve tasks, reconnecting after every
    /// disconnect until the reconnect policy gives up.
    pub async fn run(&self) -> Result<()> {
        let url = self.config.register_url();
        let policy = &self.config.reconnect;
        let mut attempt: u32 = 0;

        loop {
            match connect_async(url.as_str()).await {
                Ok((socket, _)) => {
                    info!(master = %url, "Registered with master");
                    attempt = 0;
                    let (sink, stream) = socket.split();
                    self.serve(sink, stream).await;
                    warn!(master = %url, "Disconnected from master");
                }
                Err(e) => {
                    warn!(master = %url, attempt, error = %e, "Failed to connect to master");
                }
            }

            attempt += 1;
            if policy.exhausted(attempt) {
                return Err(WorkerError::RetriesExhausted {
                    attempts: attempt - 1,
                });
            }

            let delay = policy.delay_for_attempt(attempt);
            debug!(delay_ms = delay.as_millis() as u64, attempt, "Reconnecting");
            tokio::time::sleep(delay).await;
        }
    }

    /// Serve one connection until the master closes it or it fails.
    ///
    /// Each task request is fetched on its own task, so a slow upstream
    /// never holds up other requests on the same connection.
    pub async fn serve<S, R>(&self, mut sink: S, mut stream: R)
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: std::fmt::Display,
        R: Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        let (replies_tx, mut replies_rx) = mpsc::unbounded_channel::<Bytes>();

        let writer = tokio::spawn(async move {
            while let Some(frame) = replies_rx.recv().await {
                if let Err(e) = sink.send(Message::Binary(frame)).await {
                    warn!(error = %e, "Failed to send task result");
                    break;
                }
            }
        });

        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Binary(frame)) => {
                    let fetcher = self.fetcher.clone();
                    let replies = replies_tx.clone();
                    let max_frame_bytes = self.config.max_frame_bytes;
                    tokio::spawn(async move {
                        if let Some(reply) =
                            handle_frame(fetcher.as_ref(), &frame, max_frame_bytes).await
                        {
                            let _ = replies.send(reply);
                        }
                    });
                }
                Ok(Message::Text(_)) => debug!("Text message ignored"),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Connection to master failed");
                    break;
                }
            }
        }

        writer.abort();
    }
}
