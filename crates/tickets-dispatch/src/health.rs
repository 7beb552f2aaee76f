//! Per-connection health counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Sentinel stored in `average_micros` while no request has succeeded.
const NO_AVERAGE: u64 = u64::MAX;

/// Lock-free request statistics for one worker connection.
///
/// Only the connection's dispatch loop writes these counters; everyone else
/// reads. A timed-out request is also counted as failed, so
/// `timed_out <= failed <= total` and `succeeded + failed <= total` hold.
/// Requests still in flight are in `total` but in neither outcome.
#[derive(Debug)]
pub struct HealthTracker {
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cumulative_micros: AtomicU64,
    average_micros: AtomicU64,
}

impl HealthTracker {
    /// Create a tracker with all counters at zero.
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            cumulative_micros: AtomicU64::new(0),
            average_micros: AtomicU64::new(NO_AVERAGE),
        }
    }

    /// Count a newly issued request.
    pub(crate) fn record_issued(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed request.
    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a timed-out request.
    pub(crate) fn record_timeout(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
        self.record_failure();
    }

    /// Record a successful request and recompute the average latency.
    pub(crate) fn record_success(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        let cumulative = self
            .cumulative_micros
            .fetch_add(micros, Ordering::Relaxed)
            .saturating_add(micros);

        let succeeded = self.succeeded.fetch_add(1, Ordering::Relaxed) + 1;
        self.average_micros
            .store(cumulative / succeeded, Ordering::Relaxed);
    }

    /// Total requests issued.
    pub fn total_requests(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Requests that completed successfully.
    pub fn succeeded_requests(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    /// Requests that failed, including timeouts.
    pub fn failed_requests(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Requests that timed out.
    pub fn timed_out_requests(&self) -> u64 {
        self.timed_out.load(Ordering::Relaxed)
    }

    /// Average latency of successful requests, if any succeeded.
    pub fn average_latency(&self) -> Option<Duration> {
        match self.average_micros.load(Ordering::Relaxed) {
            NO_AVERAGE => None,
            micros => Some(Duration::from_micros(micros)),
        }
    }

    /// Take a consistent-enough copy of the counters for reporting.
    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            total_requests: self.total_requests(),
            succeeded_requests: self.succeeded_requests(),
            failed_requests: self.failed_requests(),
            timed_out_requests: self.timed_out_requests(),
            cumulative_latency_ms: self.cumulative_micros.load(Ordering::Relaxed) as f64
                / 1000.0,
            average_latency_ms: self
                .average_latency()
                .map(|d| d.as_micros() as f64 / 1000.0),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of a [`HealthTracker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Total requests issued.
    pub total_requests: u64,
    /// Successful requests.
    pub succeeded_requests: u64,
    /// Failed requests, including timeouts.
    pub failed_requests: u64,
    /// Timed-out requests.
    pub timed_out_requests: u64,
    /// Sum of successful request latencies.
    pub cumulative_latency_ms: f64,
    /// Average successful latency; absent until a request succeeds.
    pub average_latency_ms: Option<f64>,
}
