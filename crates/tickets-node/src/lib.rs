//! # Tickets Node
//!
//! Caching front-end for the 12306 ticket API.
//!
//! Every query is forwarded upstream, either by this process or by a
//! connected worker. Good answers are written through to the cache; when the
//! upstream fails, times out or answers with garbage, the last good answer is
//! served instead.
//!
//! ## Architecture
//!
//! ```text
//! HTTP client ──> api (axum) ──> Dispatcher ──┬──> HttpFetcher ──> upstream
//!                  │                          └──> WorkerConnection ──> worker ──> upstream
//!                  └──> CacheStore (memory | rocksdb)
//!
//! worker ──ws──> worker_api ──> Coordinator (registry)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cargo run --bin tickets-node -- -p 8086 -s
//! ```
//!
//! ## Modules
//!
//! - [`api`] - Query endpoints and application state
//! - [`worker_api`] - Worker registration and status over WebSocket
//! - [`config`] - Layered configuration
//! - [`observability`] - Logging setup
//! - [`payload`] - Checks applied to upstream answers before caching

pub mod api;
pub mod config;
pub mod observability;
pub mod payload;
pub mod worker_api;
