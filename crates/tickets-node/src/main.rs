//! Tickets Node - caching front-end for the ticket API.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tickets_node::api::{create_router, AppState};
use tickets_node::config::{CliOverrides, NodeConfig};
use tickets_node::observability::init_logging;

/// Tickets Node - cached proxy for ticket queries
#[derive(Parser, Debug)]
#[command(name = "tickets-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: CliOverrides,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = NodeConfig::load(args.config.as_deref())?;
    config.apply(&args.overrides);
    config.check()?;

    init_logging(&config.log_level, config.log_format, config.log_file.as_deref())
        .context("failed to open log file")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting tickets node");
    tracing::info!(
        port = config.port,
        worker_support = config.worker_support,
        master_participates = config.master_participates,
        store = ?config.store,
        upstream = %config.upstream_base,
        "Node configuration"
    );

    let state = AppState::from_config(&config)?;
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tracing::info!(addr = %addr, "Cached Proxy Server is serving");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
