//! Entry point for fetching a URL through a worker or locally.

use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::fetch::Fetcher;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// Routes each fetch to a worker or to the local [`Fetcher`].
#[derive(Clone)]
pub struct Dispatcher {
    coordinator: Coordinator,
    fetcher: Arc<dyn Fetcher>,
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(coordinator: Coordinator, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            coordinator,
            fetcher,
        }
    }

    /// The coordinator this dispatcher selects workers from.
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Fetch `url`, delegating to a worker when the coordinator picks one.
    ///
    /// If the worker fails with a retryable error and the master
    /// participates, the local fetch is tried once. Returns the first success
    /// or the last error.
    pub async fn dispatch(&self, url: &str) -> Result<Bytes> {
        let Some(worker) = self.coordinator.pick_one().await else {
            debug!(url = %url, "Fetching locally");
            return Ok(self.fetcher.fetch(url).await?);
        };

        match worker.execute_remote_task(url).await {
            Ok(body) => Ok(body),
            Err(e) if e.is_retryable() && self.coordinator.master_participates() => {
                warn!(
                    worker = %worker.address(),
                    error = %e,
                    "Delegated fetch failed, retrying locally"
                );
                Ok(self.fetcher.fetch(url).await?)
            }
            Err(e) => {
                warn!(worker = %worker.address(), error = %e, "Delegated fetch failed");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::CoordinatorConfig;
    use crate::error::{DispatchError, FetchError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetcher {
        calls: AtomicUsize,
        result: std::result::Result<Bytes, FetchError>,
    }

    #[async_trait]
    impl Fetcher for CountingFetcher {
        async fn fetch(&self, _url: &str) -> std::result::Result<Bytes, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    #[tokio::test]
    async fn test_no_workers_fetches_locally() {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            result: Ok(Bytes::from_static(b"local")),
        });
        let dispatcher = Dispatcher::new(
            Coordinator::spawn(CoordinatorConfig::default()),
            fetcher.clone(),
        );

        let body = dispatcher.dispatch("https://a.test/q").await.unwrap();
        assert_eq!(body, Bytes::from_static(b"local"));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_local_error_is_returned() {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            result: Err(FetchError::Status(503)),
        });
        let dispatcher = Dispatcher::new(
            Coordinator::spawn(CoordinatorConfig::default()),
            fetcher,
        );

        let err = dispatcher.dispatch("https://a.test/q").await.unwrap_err();
        assert!(matches!(err, DispatchError::Fetch(FetchError::Status(503))));
    }
}
