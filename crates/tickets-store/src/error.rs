//! Store error types.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend rejected the operation.
    #[error("backend error: {0}")]
    Backend(String),

    /// A stored record could not be decoded.
    #[error("corruption detected: {0}")]
    Corruption(String),
}
