//! Tickets Worker - fetches upstream pages on behalf of a tickets node.

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tickets_dispatch::HttpFetcher;
use tickets_worker::{ReconnectPolicy, Worker, WorkerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use validator::Validate;

/// Tickets Worker - remote fetcher for the ticket cache
#[derive(Parser, Debug)]
#[command(name = "tickets-worker")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Master address (host:port) or ws:// registration URL
    #[arg(short, long, default_value = "127.0.0.1:8086")]
    master: String,

    /// Upstream fetch timeout in milliseconds
    #[arg(long, default_value_t = 10_000)]
    fetch_timeout_ms: u64,

    /// Give up after this many consecutive failed reconnects
    #[arg(long)]
    max_reconnects: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tickets={}", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig {
        master_url: args.master,
        fetch_timeout: Duration::from_millis(args.fetch_timeout_ms),
        reconnect: ReconnectPolicy {
            max_attempts: args.max_reconnects,
            ..Default::default()
        },
        ..Default::default()
    };
    config.validate()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        master = %config.register_url(),
        "Starting tickets worker"
    );

    let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout)?);
    let worker = Worker::new(config, fetcher);

    tokio::select! {
        result = worker.run() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutdown requested"),
    }

    Ok(())
}
