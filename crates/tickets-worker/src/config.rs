//! Worker configuration.

use crate::retry::ReconnectPolicy;
use std::time::Duration;
use tickets_protocol::MAX_FRAME_SIZE;
use validator::{Validate, ValidationError};

/// Configuration for a worker process.
#[derive(Debug, Clone, Validate)]
pub struct WorkerConfig {
    /// Master address (`host:port`) or full `ws://` registration URL.
    #[validate(length(min = 1))]
    pub master_url: String,
    /// Ceiling on one upstream fetch.
    #[validate(custom(function = "validate_timeout"))]
    pub fetch_timeout: Duration,
    /// Backoff between reconnects.
    pub reconnect: ReconnectPolicy,
    /// Largest accepted frame from the master.
    pub max_frame_bytes: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            master_url: "127.0.0.1:8086".to_string(),
            fetch_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
            max_frame_bytes: MAX_FRAME_SIZE,
        }
    }
}

fn validate_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    if timeout.is_zero() {
        return Err(ValidationError::new("fetch_timeout"));
    }
    Ok(())
}

impl WorkerConfig {
    /// The WebSocket URL of the master's registration endpoint.
    pub fn register_url(&self) -> String {
        if self.master_url.starts_with("ws://") || self.master_url.starts_with("wss://") {
            self.master_url.clone()
        } else {
            format!("ws://{}/ws/register", self.master_url.trim_end_matches('/'))
        }
    }
}
