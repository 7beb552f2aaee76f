//! # Tickets Worker
//!
//! Remote fetch worker for the ticket cache.
//!
//! A worker dials the master's `/ws/register` endpoint and keeps the
//! WebSocket open. For every task request it receives it fetches the target
//! URL and answers with a task result carrying the same transaction ID.
//! When the connection drops it reconnects with exponential backoff.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tickets_dispatch::HttpFetcher;
//! use tickets_worker::{Worker, WorkerConfig};
//!
//! # async fn run() -> tickets_worker::Result<()> {
//! let config = WorkerConfig {
//!     master_url: "10.0.0.1:8086".to_string(),
//!     ..Default::default()
//! };
//! let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout)?);
//! Worker::new(config, fetcher).run().await
//! # }
//! ```

mod client;
mod config;
mod error;
mod handler;
mod retry;

pub use client::Worker;
pub use config::WorkerConfig;
pub use error::{Result, WorkerError};
pub use handler::handle_frame;
pub use retry::ReconnectPolicy;
