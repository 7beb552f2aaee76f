//! # Tickets Dispatch
//!
//! Delegation of upstream fetches from the ticket cache master to remote
//! workers.
//!
//! ## Components
//!
//! - [`Coordinator`]: registry of live worker connections and the
//!   load-balancing policy, run as a single actor task
//! - [`WorkerConnection`]: one multiplexed duplex connection to a worker,
//!   driven by a dispatch loop, a send loop and a receive loop
//! - [`HealthTracker`]: lock-free per-connection counters
//! - [`Dispatcher`]: entry point that picks between local fetch and
//!   delegation
//! - [`Fetcher`]: the HTTP GET used by the master and by workers
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tickets_dispatch::{Coordinator, CoordinatorConfig, Dispatcher, HttpFetcher};
//!
//! # async fn run() -> tickets_dispatch::Result<()> {
//! let coordinator = Coordinator::spawn(CoordinatorConfig::default());
//! let fetcher = Arc::new(HttpFetcher::new(std::time::Duration::from_secs(10))?);
//! let dispatcher = Dispatcher::new(coordinator, fetcher);
//!
//! let body = dispatcher
//!     .dispatch("https://kyfw.12306.cn/otn/leftTicket/query")
//!     .await?;
//! println!("{} bytes", body.len());
//! # Ok(())
//! # }
//! ```

mod connection;
mod coordinator;
mod dispatcher;
mod error;
mod fetch;
mod health;

pub use connection::{ConnectionConfig, ConnectionId, WorkerConnection};
pub use coordinator::{select_index, Coordinator, CoordinatorConfig, WorkerStatus};
pub use dispatcher::Dispatcher;
pub use error::{DispatchError, FetchError, Result};
pub use fetch::{Fetcher, HttpFetcher};
pub use health::{HealthSnapshot, HealthTracker};
