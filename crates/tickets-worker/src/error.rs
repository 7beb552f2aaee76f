//! Worker error types.

use thiserror::Error;

/// Errors that end a worker run.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The configured number of reconnects was used up.
    #[error("gave up after {attempts} reconnect attempts")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
    },

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(#[from] validator::ValidationErrors),

    /// The HTTP client could not be built.
    #[error(transparent)]
    Fetch(#[from] tickets_dispatch::FetchError),
}

/// Result type for worker operations.
pub type Result<T> = std::result::Result<T, WorkerError>;
