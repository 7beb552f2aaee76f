//! Structured logging initialization.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable pretty format (for development).
    #[default]
    Pretty,
    /// JSON format (for production log aggregation).
    Json,
}

/// Initialize the logging system.
///
/// `RUST_LOG` takes precedence over `level`. When `log_file` is given, logs
/// are appended to it (created if missing) without ANSI colors.
///
/// # Example
///
/// ```rust,no_run
/// use tickets_node::observability::{init_logging, LogFormat};
///
/// init_logging("info", LogFormat::Json, None).unwrap();
/// ```
pub fn init_logging(
    level: &str,
    format: LogFormat,
    log_file: Option<&Path>,
) -> std::io::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("tickets={level},tower_http=debug").into());

    let writer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };
    let ansi = log_file.is_none();

    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .with_writer(writer),
            )
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_ansi(ansi).with_writer(writer))
            .init(),
    }

    tracing::info!(
        level = %level,
        format = ?format,
        file = ?log_file,
        "Logging initialized"
    );
    Ok(())
}
