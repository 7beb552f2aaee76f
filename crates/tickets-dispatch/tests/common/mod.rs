//! Shared helpers: in-memory worker transports.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tickets_dispatch::{ConnectionConfig, Coordinator, FetchError, Fetcher, WorkerConnection};
use tickets_protocol::{Envelope, Payload, TaskResult};

pub type Replies = mpsc::UnboundedSender<Result<Bytes, std::io::Error>>;

/// The worker's end of an in-memory connection.
pub struct FakeWorker {
    pub connection: Arc<WorkerConnection>,
    pub requests: mpsc::UnboundedReceiver<Bytes>,
    pub replies: Replies,
}

impl FakeWorker {
    /// Read the next task request sent by the master.
    pub async fn next_request(&mut self) -> Envelope {
        let frame = self.requests.next().await.expect("master closed connection");
        Envelope::decode(&frame).expect("master sent malformed frame")
    }

    /// Answer a transaction.
    pub fn reply(&self, transaction_id: u64, result: TaskResult) {
        let frame = Envelope::new(transaction_id, Payload::TaskResult(result)).encode();
        self.replies.unbounded_send(Ok(frame)).expect("connection gone");
    }
}

/// Open a connection to a fake worker at `address`.
pub fn attach(coordinator: &Coordinator, address: &str, call_timeout: Duration) -> FakeWorker {
    let (to_worker, requests) = mpsc::unbounded::<Bytes>();
    let (replies, from_worker) = mpsc::unbounded();
    let connection = WorkerConnection::open(
        address,
        to_worker,
        from_worker,
        ConnectionConfig {
            call_timeout,
            ..Default::default()
        },
        coordinator,
    );
    FakeWorker {
        connection,
        requests,
        replies,
    }
}

/// Attach a worker that answers every request with `respond(url)`.
pub fn spawn_worker<F>(
    coordinator: &Coordinator,
    address: &str,
    respond: F,
) -> Arc<WorkerConnection>
where
    F: Fn(&str) -> TaskResult + Send + 'static,
{
    let mut worker = attach(coordinator, address, Duration::from_secs(10));
    let connection = worker.connection.clone();
    tokio::spawn(async move {
        while let Some(frame) = worker.requests.next().await {
            let Ok(envelope) = Envelope::decode(&frame) else {
                continue;
            };
            if let Payload::TaskRequest(request) = envelope.payload {
                worker.reply(envelope.transaction_id, respond(&request.target_url));
            }
        }
    });
    connection
}

/// Wait until the coordinator holds exactly `expected` workers.
pub async fn wait_for_workers(coordinator: &Coordinator, expected: usize) {
    for _ in 0..200 {
        if coordinator.len().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("coordinator never reached {} workers", expected);
}

/// Local fetcher that counts calls.
pub struct CountingFetcher {
    pub calls: AtomicUsize,
    pub body: Bytes,
}

impl CountingFetcher {
    pub fn new(body: &'static [u8]) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            body: Bytes::from_static(body),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for CountingFetcher {
    async fn fetch(&self, _url: &str) -> Result<Bytes, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.body.clone())
    }
}
