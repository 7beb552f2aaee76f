//! Error types for dispatch operations.

use std::time::Duration;
use thiserror::Error;
use tickets_protocol::{MessageKind, TransactionId};

/// Errors returned by a delegated or local fetch.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The worker did not answer within the call timeout.
    #[error("transaction {transaction_id} timed out after {waited:?}")]
    Timeout {
        /// The abandoned transaction.
        transaction_id: TransactionId,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The worker answered with the wrong message kind.
    #[error("protocol mismatch: expected {expected}, got {actual}")]
    ProtocolMismatch {
        /// The kind the caller was waiting for.
        expected: MessageKind,
        /// The kind that arrived.
        actual: MessageKind,
    },

    /// The worker reported that its fetch failed.
    #[error("remote fetch failed: {0}")]
    Remote(String),

    /// The connection closed while the call was in flight.
    #[error("worker connection closed")]
    ConnectionClosed,

    /// The local fetch failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl DispatchError {
    /// Returns true if retrying the same request elsewhere may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Timeout { .. }
            | DispatchError::ConnectionClosed
            | DispatchError::Remote(_) => true,
            DispatchError::Fetch(e) => e.is_retryable(),
            DispatchError::ProtocolMismatch { .. } => false,
        }
    }
}

/// Errors from the HTTP fetcher.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The HTTP client could not be built.
    #[error("http client error: {0}")]
    Client(String),

    /// The request failed before a response arrived.
    #[error("network error: {0}")]
    Network(String),

    /// The upstream answered with a non-success status.
    #[error("upstream returned status {0}")]
    Status(u16),

    /// The fetch exceeded its timeout.
    #[error("fetch timed out")]
    Timeout,
}

impl FetchError {
    /// Returns true if the failure may be transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout => true,
            FetchError::Status(code) => *code >= 500 || *code == 429,
            FetchError::Client(_) => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = e.status() {
            FetchError::Status(status.as_u16())
        } else if e.is_builder() {
            FetchError::Client(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(DispatchError::Timeout {
            transaction_id: 1,
            waited: Duration::from_secs(10),
        }
        .is_retryable());
        assert!(DispatchError::ConnectionClosed.is_retryable());
        assert!(!DispatchError::ProtocolMismatch {
            expected: MessageKind::TaskResult,
            actual: MessageKind::TaskRequest,
        }
        .is_retryable());
        assert!(DispatchError::Remote("dns error".to_string()).is_retryable());
    }

    #[test]
    fn test_fetch_status_retryable() {
        assert!(FetchError::Status(502).is_retryable());
        assert!(FetchError::Status(429).is_retryable());
        assert!(!FetchError::Status(404).is_retryable());
        assert!(DispatchError::from(FetchError::Timeout).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = DispatchError::ProtocolMismatch {
            expected: MessageKind::TaskResult,
            actual: MessageKind::TaskRequest,
        };
        assert_eq!(
            err.to_string(),
            "protocol mismatch: expected task_result, got task_request"
        );
    }
}
