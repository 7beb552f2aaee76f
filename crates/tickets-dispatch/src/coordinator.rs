//! Registry of live worker connections and worker selection.

use crate::connection::{ConnectionId, WorkerConnection};
use crate::health::HealthSnapshot;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Coordinator settings.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Whether the master itself takes a share of the requests.
    pub master_participates: bool,
    /// How long `pick_one` waits for the coordinator before giving up.
    pub selection_timeout: Duration,
    /// Fixed RNG seed for reproducible selection.
    pub seed: Option<u64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            master_participates: true,
            selection_timeout: Duration::from_secs(3),
            seed: None,
        }
    }
}

/// Status of one registered worker, as reported by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    /// The worker's remote address.
    pub address: String,
    /// Request statistics.
    #[serde(flatten)]
    pub health: HealthSnapshot,
}

enum Command {
    Register(Arc<WorkerConnection>),
    Unregister(ConnectionId),
    PickOne(oneshot::Sender<Option<Arc<WorkerConnection>>>),
    Status(oneshot::Sender<Vec<WorkerStatus>>),
    Len(oneshot::Sender<usize>),
}

/// Handle to the coordinator task.
///
/// Cloning is cheap; every clone talks to the same task, which serializes
/// all registry changes and selections.
#[derive(Debug, Clone)]
pub struct Coordinator {
    commands: mpsc::UnboundedSender<Command>,
    master_participates: bool,
    selection_timeout: Duration,
}

impl Coordinator {
    /// Spawn the coordinator task.
    pub fn spawn(config: CoordinatorConfig) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let task = CoordinatorTask {
            registry: Registry::default(),
            rng,
            master_participates: config.master_participates,
        };
        tokio::spawn(task.run(receiver));

        Self {
            commands,
            master_participates: config.master_participates,
            selection_timeout: config.selection_timeout,
        }
    }

    /// Whether the master takes a share of the requests.
    pub fn master_participates(&self) -> bool {
        self.master_participates
    }

    /// Add a connection. Registering a member twice is logged and ignored.
    pub fn register(&self, connection: Arc<WorkerConnection>) {
        let _ = self.commands.send(Command::Register(connection));
    }

    /// Remove a connection. Unknown IDs are ignored.
    pub fn unregister(&self, id: ConnectionId) {
        let _ = self.commands.send(Command::Unregister(id));
    }

    /// Choose a worker for the next request.
    ///
    /// `None` means the caller should handle the request itself. This is also
    /// the answer when the coordinator does not reply within the selection
    /// timeout.
    pub async fn pick_one(&self) -> Option<Arc<WorkerConnection>> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::PickOne(tx)).ok()?;

        match tokio::time::timeout(self.selection_timeout, rx).await {
            Ok(choice) => choice.ok().flatten(),
            Err(_) => {
                warn!(
                    timeout_ms = self.selection_timeout.as_millis() as u64,
                    "Worker selection timed out, handling locally"
                );
                None
            }
        }
    }

    /// Health of every registered worker, in registry order.
    pub async fn status(&self) -> Vec<WorkerStatus> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Status(tx)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Number of registered workers.
    pub async fn len(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Len(tx)).is_err() {
            return 0;
        }
        rx.await.unwrap_or_default()
    }

    /// Returns true if no workers are registered.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Pick an index into a sequence of `workers` connections.
///
/// With master participation the draw is uniform over `0..=workers` and a
/// draw of `workers` means "handle locally", so each worker and the master
/// get an equal share. Without it the draw is uniform over the workers and
/// `None` only comes back when there are none.
///
/// The policy ignores load and health: a slow worker gets the same share as
/// a fast one.
pub fn select_index<R: Rng + ?Sized>(
    workers: usize,
    master_participates: bool,
    rng: &mut R,
) -> Option<usize> {
    if master_participates {
        let draw = rng.gen_range(0..=workers);
        (draw < workers).then_some(draw)
    } else if workers == 0 {
        None
    } else {
        Some(rng.gen_range(0..workers))
    }
}

/// Live connections, indexed for membership and ordered for iteration.
///
/// `ordered` holds the same connections as `members`, sorted by
/// (address, total requests).
#[derive(Default)]
struct Registry {
    members: HashMap<ConnectionId, Arc<WorkerConnection>>,
    ordered: Vec<Arc<WorkerConnection>>,
}

impl Registry {
    fn register(&mut self, connection: Arc<WorkerConnection>) -> bool {
        if self.members.contains_key(&connection.id()) {
            return false;
        }
        self.members.insert(connection.id(), connection.clone());
        self.ordered.push(connection);
        self.sort();
        true
    }

    fn unregister(&mut self, id: ConnectionId) -> Option<Arc<WorkerConnection>> {
        let removed = self.members.remove(&id)?;
        self.ordered = self.members.values().cloned().collect();
        self.sort();
        Some(removed)
    }

    fn sort(&mut self) {
        self.ordered.sort_by(|a, b| {
            a.address()
                .cmp(b.address())
                .then_with(|| a.health().total_requests().cmp(&b.health().total_requests()))
        });
    }

    fn len(&self) -> usize {
        self.ordered.len()
    }
}

struct CoordinatorTask {
    registry: Registry,
    rng: StdRng,
    master_participates: bool,
}

impl CoordinatorTask {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Register(connection) => {
                    let id = connection.id();
                    let address = connection.address().to_string();
                    if self.registry.register(connection) {
                        info!(
                            worker = %address,
                            connection_id = %id,
                            workers = self.registry.len(),
                            "Worker registered"
                        );
                    } else {
                        error!(worker = %address, connection_id = %id, "Worker already registered");
                    }
                }
                Command::Unregister(id) => {
                    if let Some(connection) = self.registry.unregister(id) {
                        info!(
                            worker = %connection.address(),
                            connection_id = %id,
                            workers = self.registry.len(),
                            "Worker unregistered"
                        );
                    }
                }
                Command::PickOne(reply) => {
                    let choice = select_index(
                        self.registry.len(),
                        self.master_participates,
                        &mut self.rng,
                    )
                    .map(|i| self.registry.ordered[i].clone());
                    debug!(
                        worker = choice.as_ref().map(|c| c.address()).unwrap_or("local"),
                        "Selected worker"
                    );
                    let _ = reply.send(choice);
                }
                Command::Status(reply) => {
                    let status = self
                        .registry
                        .ordered
                        .iter()
                        .map(|c| WorkerStatus {
                            address: c.address().to_string(),
                            health: c.health().snapshot(),
                        })
                        .collect();
                    let _ = reply.send(status);
                }
                Command::Len(reply) => {
                    let _ = reply.send(self.registry.len());
                }
            }
        }
        debug!("Coordinator stopped");
    }
}
