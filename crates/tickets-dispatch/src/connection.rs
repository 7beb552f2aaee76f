//! Multiplexed request/response channel over one worker connection.
//!
//! Each [`WorkerConnection`] runs three tasks that talk only through
//! channels:
//!
//! - the dispatch loop owns the pending-request map and the health counters,
//!   assigns transaction IDs and routes inbound results back to their callers
//! - the send loop writes encoded frames to the transport in order
//! - the receive loop decodes inbound frames and tears the connection down
//!   when the transport fails or closes
//!
//! The transport is any `Sink<Bytes>` plus `Stream<Item = Result<Bytes, E>>`
//! pair carrying one envelope per item, so the same engine runs over an
//! axum WebSocket or an in-memory channel.

use crate::coordinator::Coordinator;
use crate::error::{DispatchError, Result};
use crate::health::HealthTracker;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tickets_protocol::{Envelope, MessageKind, Payload, TaskRequest, TransactionId, MAX_FRAME_SIZE};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a worker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Per-connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Ceiling on how long a caller waits for a task result.
    pub call_timeout: Duration,
    /// Inbound frames larger than this are dropped.
    pub max_frame_bytes: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            max_frame_bytes: MAX_FRAME_SIZE,
        }
    }
}

enum Command {
    Submit {
        payload: Payload,
        accepted: oneshot::Sender<PendingCall>,
    },
    Evict {
        transaction_id: TransactionId,
        reason: Eviction,
        done: Option<oneshot::Sender<()>>,
    },
}

/// Why a pending request left the map without a response.
#[derive(Debug, Clone, Copy)]
enum Eviction {
    TimedOut,
    Abandoned,
}

struct PendingCall {
    transaction_id: TransactionId,
    response: oneshot::Receiver<Envelope>,
}

struct InFlightRequest {
    kind: MessageKind,
    reply: oneshot::Sender<Envelope>,
    issued_at: Instant,
}

/// A registered worker and the handle used to send it work.
pub struct WorkerConnection {
    id: ConnectionId,
    address: String,
    commands: mpsc::UnboundedSender<Command>,
    health: Arc<HealthTracker>,
    exit: CancellationToken,
    call_timeout: Duration,
}

impl WorkerConnection {
    /// Start the connection loops over a transport and register the
    /// connection with `coordinator`.
    ///
    /// The connection unregisters itself when the transport fails or closes,
    /// or after [`WorkerConnection::shutdown`].
    pub fn open<S, R, E>(
        address: impl Into<String>,
        sink: S,
        stream: R,
        config: ConnectionConfig,
        coordinator: &Coordinator,
    ) -> Arc<Self>
    where
        S: Sink<Bytes> + Send + 'static,
        S::Error: fmt::Display + Send,
        R: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let exit = CancellationToken::new();

        let connection = Arc::new(Self {
            id: ConnectionId::next(),
            address: address.into(),
            commands: commands_tx,
            health: Arc::new(HealthTracker::new()),
            exit: exit.clone(),
            call_timeout: config.call_timeout,
        });

        // Registration is queued before the receive loop exists, so the
        // coordinator always sees register before unregister.
        coordinator.register(connection.clone());

        let dispatch = DispatchLoop {
            address: connection.address.clone(),
            next_transaction_id: 1,
            pending: HashMap::new(),
            frames: frames_tx,
            health: connection.health.clone(),
        };
        tokio::spawn(dispatch.run(commands_rx, inbound_rx, exit.clone()));
        tokio::spawn(send_loop(
            connection.address.clone(),
            sink,
            frames_rx,
            exit.clone(),
        ));
        tokio::spawn(receive_loop(
            connection.id,
            connection.address.clone(),
            stream,
            inbound_tx,
            config.max_frame_bytes,
            coordinator.clone(),
            exit,
        ));

        info!(worker = %connection.address, connection_id = %connection.id, "Worker connected");
        connection
    }

    /// The connection's identity.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The worker's remote address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The connection's request statistics.
    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    /// Returns false once teardown has started.
    pub fn is_alive(&self) -> bool {
        !self.exit.is_cancelled()
    }

    /// Close the connection. In-flight calls fail with
    /// [`DispatchError::ConnectionClosed`].
    pub fn shutdown(&self) {
        self.exit.cancel();
    }

    /// Ask the worker to fetch `url` and wait for the fetched bytes.
    ///
    /// Waits at most the configured call timeout. The dispatch loop has
    /// settled the health counters before any result is returned. Dropping
    /// the future mid-call evicts the request and counts it as failed.
    pub async fn execute_remote_task(&self, url: &str) -> Result<Bytes> {
        let started = Instant::now();
        let call = self.submit(Payload::TaskRequest(TaskRequest::new(url))).await?;
        let mut guard = EvictOnDrop {
            commands: &self.commands,
            transaction_id: call.transaction_id,
            armed: true,
        };

        let outcome = tokio::time::timeout(self.call_timeout, call.response).await;
        guard.armed = false;

        let envelope = match outcome {
            Ok(Ok(envelope)) => envelope,
            Ok(Err(_)) => return Err(DispatchError::ConnectionClosed),
            Err(_) => {
                let (done_tx, done_rx) = oneshot::channel();
                let evicted = self.commands.send(Command::Evict {
                    transaction_id: call.transaction_id,
                    reason: Eviction::TimedOut,
                    done: Some(done_tx),
                });
                if evicted.is_ok() {
                    let _ = done_rx.await;
                }
                warn!(
                    worker = %self.address,
                    transaction_id = call.transaction_id,
                    "Remote task timed out"
                );
                return Err(DispatchError::Timeout {
                    transaction_id: call.transaction_id,
                    waited: started.elapsed(),
                });
            }
        };

        match envelope.payload {
            Payload::TaskResult(result) => result.outcome.map_err(DispatchError::Remote),
            other => Err(DispatchError::ProtocolMismatch {
                expected: MessageKind::TaskResult,
                actual: other.kind(),
            }),
        }
    }

    async fn submit(&self, payload: Payload) -> Result<PendingCall> {
        let (accepted_tx, accepted_rx) = oneshot::channel();
        self.commands
            .send(Command::Submit {
                payload,
                accepted: accepted_tx,
            })
            .map_err(|_| DispatchError::ConnectionClosed)?;
        accepted_rx
            .await
            .map_err(|_| DispatchError::ConnectionClosed)
    }

    /// A connection with no running loops, for registry tests.
    #[cfg(test)]
    pub(crate) fn detached(address: &str) -> Arc<Self> {
        let (commands, _) = mpsc::unbounded_channel();
        Arc::new(Self {
            id: ConnectionId::next(),
            address: address.to_string(),
            commands,
            health: Arc::new(HealthTracker::new()),
            exit: CancellationToken::new(),
            call_timeout: Duration::from_secs(10),
        })
    }
}

impl fmt::Debug for WorkerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerConnection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Evicts a submitted request if the caller stops waiting before the
/// response or the timeout arrives.
struct EvictOnDrop<'a> {
    commands: &'a mpsc::UnboundedSender<Command>,
    transaction_id: TransactionId,
    armed: bool,
}

impl Drop for EvictOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.commands.send(Command::Evict {
                transaction_id: self.transaction_id,
                reason: Eviction::Abandoned,
                done: None,
            });
        }
    }
}

/// Sole owner of the pending-request map and sole writer of the health
/// counters.
struct DispatchLoop {
    address: String,
    next_transaction_id: TransactionId,
    pending: HashMap<TransactionId, InFlightRequest>,
    frames: mpsc::UnboundedSender<Bytes>,
    health: Arc<HealthTracker>,
}

impl DispatchLoop {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut inbound: mpsc::UnboundedReceiver<Envelope>,
        exit: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = exit.cancelled() => break,
                Some(command) = commands.recv() => match command {
                    Command::Submit { payload, accepted } => self.submit(payload, accepted),
                    Command::Evict { transaction_id, reason, done } => {
                        self.evict(transaction_id, reason);
                        if let Some(done) = done {
                            let _ = done.send(());
                        }
                    }
                },
                Some(envelope) = inbound.recv() => self.deliver(envelope),
            }
        }

        debug!(
            worker = %self.address,
            abandoned = self.pending.len(),
            "Dispatch loop stopped"
        );
        // Dropping each reply channel fails its waiting caller.
        for (_, request) in self.pending.drain() {
            self.health.record_failure();
            drop(request);
        }
        exit.cancel();
    }

    fn submit(&mut self, payload: Payload, accepted: oneshot::Sender<PendingCall>) {
        let transaction_id = self.next_transaction_id;
        self.next_transaction_id += 1;

        let (reply, response) = oneshot::channel();
        let kind = payload.kind();
        let frame = Envelope::new(transaction_id, payload).encode();

        self.health.record_issued();
        if self.frames.send(frame).is_err() {
            // Send loop is gone; dropping `accepted` reports the closed connection.
            self.health.record_failure();
            return;
        }
        self.pending.insert(
            transaction_id,
            InFlightRequest {
                kind,
                reply,
                issued_at: Instant::now(),
            },
        );

        if accepted
            .send(PendingCall {
                transaction_id,
                response,
            })
            .is_err()
        {
            self.evict(transaction_id, Eviction::Abandoned);
        }
    }

    fn deliver(&mut self, envelope: Envelope) {
        let transaction_id = envelope.transaction_id;
        match self.pending.remove(&transaction_id) {
            Some(request) => {
                let elapsed = request.issued_at.elapsed();
                match &envelope.payload {
                    Payload::TaskResult(result) if result.is_success() => {
                        self.health.record_success(elapsed)
                    }
                    _ => self.health.record_failure(),
                }
                debug!(
                    worker = %self.address,
                    transaction_id,
                    request = %request.kind,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Response matched"
                );
                let _ = request.reply.send(envelope);
            }
            None => {
                debug!(
                    worker = %self.address,
                    transaction_id,
                    kind = %envelope.kind(),
                    "Dropping response with no pending request"
                );
            }
        }
    }

    fn evict(&mut self, transaction_id: TransactionId, reason: Eviction) {
        let Some(request) = self.pending.remove(&transaction_id) else {
            return;
        };
        match reason {
            Eviction::TimedOut => self.health.record_timeout(),
            Eviction::Abandoned => self.health.record_failure(),
        }
        debug!(
            worker = %self.address,
            transaction_id,
            ?reason,
            age_ms = request.issued_at.elapsed().as_millis() as u64,
            "Evicted pending request"
        );
    }
}

async fn send_loop<S>(
    address: String,
    sink: S,
    mut frames: mpsc::UnboundedReceiver<Bytes>,
    exit: CancellationToken,
) where
    S: Sink<Bytes> + Send + 'static,
    S::Error: fmt::Display + Send,
{
    let mut sink = Box::pin(sink);

    loop {
        tokio::select! {
            _ = exit.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        warn!(worker = %address, error = %e, "Failed to write frame");
                    }
                }
                None => break,
            },
        }
    }

    if let Err(e) = sink.close().await {
        debug!(worker = %address, error = %e, "Error closing transport");
    }
    exit.cancel();
}

async fn receive_loop<R, E>(
    id: ConnectionId,
    address: String,
    stream: R,
    inbound: mpsc::UnboundedSender<Envelope>,
    max_frame_bytes: usize,
    coordinator: Coordinator,
    exit: CancellationToken,
) where
    R: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let mut stream = Box::pin(stream);

    loop {
        tokio::select! {
            _ = exit.cancelled() => break,
            frame = stream.next() => match frame {
                Some(Ok(data)) => match Envelope::decode_with_limit(&data, max_frame_bytes) {
                    Ok(envelope) => {
                        if inbound.send(envelope).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(worker = %address, error = %e, "Skipping malformed frame");
                    }
                },
                Some(Err(e)) => {
                    warn!(worker = %address, error = %e, "Worker connection failed");
                    break;
                }
                None => {
                    info!(worker = %address, "Worker closed connection");
                    break;
                }
            },
        }
    }

    coordinator.unregister(id);
    exit.cancel();
    info!(worker = %address, connection_id = %id, "Worker disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::CoordinatorConfig;
    use futures::channel::mpsc as duplex;
    use tickets_protocol::TaskResult;

    type Inbound = duplex::UnboundedSender<std::result::Result<Bytes, std::io::Error>>;

    fn open_test_connection(
        call_timeout: Duration,
    ) -> (
        Arc<WorkerConnection>,
        Coordinator,
        duplex::UnboundedReceiver<Bytes>,
        Inbound,
    ) {
        let coordinator = Coordinator::spawn(CoordinatorConfig::default());
        let (to_worker, from_master) = duplex::unbounded::<Bytes>();
        let (to_master, from_worker) = duplex::unbounded();
        let connection = WorkerConnection::open(
            "10.0.0.1:40000",
            to_worker,
            from_worker,
            ConnectionConfig {
                call_timeout,
                ..Default::default()
            },
            &coordinator,
        );
        (connection, coordinator, from_master, to_master)
    }

    fn reply(to_master: &Inbound, transaction_id: TransactionId, result: TaskResult) {
        let frame = Envelope::new(transaction_id, Payload::TaskResult(result)).encode();
        to_master.unbounded_send(Ok(frame)).unwrap();
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (connection, _coordinator, mut from_master, to_master) =
            open_test_connection(Duration::from_secs(10));

        let call = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.execute_remote_task("https://a.test/q").await })
        };

        let frame = from_master.next().await.unwrap();
        let request = Envelope::decode(&frame).unwrap();
        assert_eq!(
            request.payload,
            Payload::TaskRequest(TaskRequest::new("https://a.test/q"))
        );
        reply(&to_master, request.transaction_id, TaskResult::success(&b"[]"[..]));

        let body = call.await.unwrap().unwrap();
        assert_eq!(body, Bytes::from_static(b"[]"));

        let health = connection.health().snapshot();
        assert_eq!(health.total_requests, 1);
        assert_eq!(health.failed_requests, 0);
        assert!(health.average_latency_ms.is_some());
    }

    #[tokio::test]
    async fn test_remote_failure_counts_as_failed() {
        let (connection, _coordinator, mut from_master, to_master) =
            open_test_connection(Duration::from_secs(10));

        let call = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.execute_remote_task("https://a.test/q").await })
        };

        let request = Envelope::decode(&from_master.next().await.unwrap()).unwrap();
        reply(&to_master, request.transaction_id, TaskResult::failure("connection refused"));

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, DispatchError::Remote(ref reason) if reason == "connection refused"));
        assert_eq!(connection.health().failed_requests(), 1);
        assert_eq!(connection.health().average_latency(), None);
    }

    #[tokio::test]
    async fn test_wrong_kind_is_protocol_mismatch() {
        let (connection, _coordinator, mut from_master, to_master) =
            open_test_connection(Duration::from_secs(10));

        let call = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.execute_remote_task("https://a.test/q").await })
        };

        let request = Envelope::decode(&from_master.next().await.unwrap()).unwrap();
        let echoed = Envelope::new(
            request.transaction_id,
            Payload::TaskRequest(TaskRequest::new("https://a.test/q")),
        );
        to_master.unbounded_send(Ok(echoed.encode())).unwrap();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            DispatchError::ProtocolMismatch {
                expected: MessageKind::TaskResult,
                actual: MessageKind::TaskRequest,
            }
        ));
        assert_eq!(connection.health().failed_requests(), 1);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_skipped() {
        let (connection, _coordinator, mut from_master, to_master) =
            open_test_connection(Duration::from_secs(10));

        let call = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.execute_remote_task("https://a.test/q").await })
        };

        let request = Envelope::decode(&from_master.next().await.unwrap()).unwrap();
        to_master
            .unbounded_send(Ok(Bytes::from_static(b"garbage")))
            .unwrap();
        reply(&to_master, request.transaction_id, TaskResult::success(&b"ok"[..]));

        assert_eq!(call.await.unwrap().unwrap(), Bytes::from_static(b"ok"));
        assert!(connection.is_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_after_timeout_is_dropped() {
        let (connection, _coordinator, mut from_master, to_master) =
            open_test_connection(Duration::from_secs(10));

        let first = connection.execute_remote_task("https://a.test/slow").await;
        assert!(matches!(first, Err(DispatchError::Timeout { transaction_id: 1, .. })));

        let stale = Envelope::decode(&from_master.next().await.unwrap()).unwrap();
        reply(&to_master, stale.transaction_id, TaskResult::success(&b"stale"[..]));

        let call = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.execute_remote_task("https://a.test/fast").await })
        };
        let fresh = Envelope::decode(&from_master.next().await.unwrap()).unwrap();
        assert_eq!(fresh.transaction_id, 2);
        reply(&to_master, fresh.transaction_id, TaskResult::success(&b"fresh"[..]));

        assert_eq!(call.await.unwrap().unwrap(), Bytes::from_static(b"fresh"));
    }

    async fn settle<F: Fn(&HealthTracker) -> bool>(connection: &WorkerConnection, done: F) {
        for _ in 0..100 {
            if done(connection.health()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("health counters never settled");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_call_is_evicted_and_counted() {
        let (connection, _coordinator, mut from_master, to_master) =
            open_test_connection(Duration::from_secs(10));

        // The caller gives up long before the call timeout.
        let gave_up = tokio::time::timeout(
            Duration::from_millis(50),
            connection.execute_remote_task("https://a.test/slow"),
        )
        .await;
        assert!(gave_up.is_err());
        settle(&connection, |h| h.failed_requests() == 1).await;

        let health = connection.health();
        assert_eq!(health.total_requests(), 1);
        assert_eq!(health.timed_out_requests(), 0);

        let stale = Envelope::decode(&from_master.next().await.unwrap()).unwrap();
        let call = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.execute_remote_task("https://a.test/fast").await })
        };
        let fresh = Envelope::decode(&from_master.next().await.unwrap()).unwrap();

        // The abandoned request's answer finds nothing to complete.
        reply(&to_master, stale.transaction_id, TaskResult::success(&b"stale"[..]));
        tokio::time::sleep(Duration::from_millis(100)).await;
        reply(&to_master, fresh.transaction_id, TaskResult::success(&b"fresh"[..]));

        assert_eq!(call.await.unwrap().unwrap(), Bytes::from_static(b"fresh"));
        assert_eq!(health.total_requests(), 2);
        assert_eq!(health.succeeded_requests(), 1);
        assert_eq!(health.failed_requests(), 1);
        let average = health.average_latency().unwrap();
        assert!(average >= Duration::from_millis(100));
        assert!(average < Duration::from_millis(110));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_call_does_not_skew_average() {
        let (connection, _coordinator, mut from_master, to_master) =
            open_test_connection(Duration::from_secs(10));

        let slow = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.execute_remote_task("https://a.test/A").await })
        };
        let _ = from_master.next().await.unwrap();

        let fast = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.execute_remote_task("https://a.test/B").await })
        };
        let b = Envelope::decode(&from_master.next().await.unwrap()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        reply(&to_master, b.transaction_id, TaskResult::success(&b"B"[..]));
        fast.await.unwrap().unwrap();

        let health = connection.health();
        assert_eq!(health.total_requests(), 2);
        let average = health.average_latency().unwrap();
        assert!(average >= Duration::from_millis(100));
        assert!(average < Duration::from_millis(110));

        connection.shutdown();
        assert!(matches!(
            slow.await.unwrap(),
            Err(DispatchError::ConnectionClosed)
        ));
        assert_eq!(health.failed_requests(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_fails_in_flight_calls() {
        let (connection, coordinator, mut from_master, _to_master) =
            open_test_connection(Duration::from_secs(60));

        let call = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.execute_remote_task("https://a.test/q").await })
        };
        let _ = from_master.next().await.unwrap();

        connection.shutdown();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, DispatchError::ConnectionClosed));
        assert!(!connection.is_alive());

        for _ in 0..100 {
            if coordinator.len().await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("connection still registered after shutdown");
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("conn-"));
    }
}
