//! HTTP API for the ticket cache.
//!
//! - `GET /` liveness text
//! - `GET /health` status, version and connected workers
//! - `GET /query` seat availability, cached
//! - `GET /queryTicketPrice` fares, cached
//! - `GET|POST /update_cache` acknowledgement
//!
//! With worker support enabled the routes of [`crate::worker_api`] are
//! mounted as well.

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tickets_dispatch::{
    ConnectionConfig, Coordinator, DispatchError, Dispatcher, Fetcher, HttpFetcher,
};
use tickets_store::{CacheStore, MemoryStore};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::{NodeConfig, StoreBackend};
use crate::payload::{self, PriceVerdict};
use crate::worker_api::worker_routes;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Routes upstream fetches to workers or the local fetcher.
    pub dispatcher: Dispatcher,
    /// Last good upstream answers.
    pub cache: Arc<dyn CacheStore>,
    /// Base URL of the upstream API, ending in `/`.
    pub upstream_base: String,
    /// Ceiling on one upstream fetch.
    pub request_timeout: Duration,
    /// Settings for newly registered worker connections.
    pub connection: ConnectionConfig,
    /// Mount the worker registration routes.
    pub worker_support: bool,
}

/// Errors raised while building the node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The HTTP client could not be built.
    #[error(transparent)]
    Fetch(#[from] tickets_dispatch::FetchError),

    /// The cache store could not be opened.
    #[error(transparent)]
    Store(#[from] tickets_store::StoreError),

    /// The configuration is unusable.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

impl AppState {
    /// Build the state for `config`, spawning the coordinator task.
    pub fn from_config(config: &NodeConfig) -> Result<Self, NodeError> {
        let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(config.request_timeout())?);
        let cache = open_store(config)?;
        Ok(Self::with_parts(config, fetcher, cache))
    }

    /// Build the state from explicit collaborators.
    pub fn with_parts(
        config: &NodeConfig,
        fetcher: Arc<dyn Fetcher>,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        let coordinator = Coordinator::spawn(config.coordinator());
        Self {
            dispatcher: Dispatcher::new(coordinator, fetcher),
            cache,
            upstream_base: config.upstream_base.clone(),
            request_timeout: config.request_timeout(),
            connection: config.connection(),
            worker_support: config.worker_support,
        }
    }
}

fn open_store(config: &NodeConfig) -> Result<Arc<dyn CacheStore>, NodeError> {
    match config.store {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "rocksdb")]
        StoreBackend::Rocksdb => {
            std::fs::create_dir_all(&config.store_path)
                .map_err(tickets_store::StoreError::from)?;
            Ok(Arc::new(tickets_store::RocksDbStore::open_default(
                &config.store_path,
            )?))
        }
        #[cfg(not(feature = "rocksdb"))]
        StoreBackend::Rocksdb => Err(crate::config::ConfigError::Unsupported(
            "store = rocksdb needs a build with the `rocksdb` feature".to_string(),
        )
        .into()),
    }
}

/// Creates the API router.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(show_working))
        .route("/health", get(health_check))
        .route("/query", get(query_tickets))
        .route("/queryTicketPrice", get(query_ticket_price))
        .route("/update_cache", get(update_cache).post(update_cache));

    if state.worker_support {
        router = router.merge(worker_routes());
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

async fn show_working() -> &'static str {
    "Cached Proxy Server is running!"
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let cache = state.cache.stats();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "workers": state.dispatcher.coordinator().len().await,
        "cache": {
            "hits": cache.hits,
            "misses": cache.misses,
            "writes": cache.writes,
            "hit_ratio": cache.hit_ratio(),
        },
    }))
}

async fn update_cache() -> impl IntoResponse {
    info!("Cache update requested");
    Json(serde_json::json!({ "status": "ok" }))
}

/// Parameters of `/query`, named as the upstream names them.
#[derive(Debug, Deserialize)]
struct TicketQuery {
    #[serde(rename = "leftTicketDTO.train_date")]
    train_date: Option<String>,
    #[serde(rename = "leftTicketDTO.from_station")]
    from_station: Option<String>,
    #[serde(rename = "leftTicketDTO.to_station")]
    to_station: Option<String>,
    purpose_codes: Option<String>,
}

/// Parameters of `/queryTicketPrice`.
#[derive(Debug, Deserialize)]
struct PriceQuery {
    train_no: Option<String>,
    from_station_no: Option<String>,
    to_station_no: Option<String>,
    seat_types: Option<String>,
    train_date: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Outcome of one bounded upstream fetch.
enum Upstream {
    Body(Bytes),
    Failed(DispatchError),
    TimedOut,
}

async fn fetch_upstream(state: &AppState, url: &str) -> Upstream {
    debug!(url = %url, "Requesting upstream");
    match tokio::time::timeout(state.request_timeout, state.dispatcher.dispatch(url)).await {
        Ok(Ok(body)) => Upstream::Body(body),
        Ok(Err(e)) => Upstream::Failed(e),
        Err(_) => Upstream::TimedOut,
    }
}

async fn query_tickets(
    State(state): State<AppState>,
    Query(params): Query<TicketQuery>,
) -> Response {
    let (Some(date), Some(from), Some(to), Some(codes)) = (
        present(&params.train_date),
        present(&params.from_station),
        present(&params.to_station),
        present(&params.purpose_codes),
    ) else {
        warn!("Ticket query without enough params");
        return json(Bytes::from_static(b"Error, no enough params"));
    };

    let key = format!("tickets:{}:{}:{}", from, to, date);
    let query = format!(
        "?leftTicketDTO.train_date={}&leftTicketDTO.from_station={}&leftTicketDTO.to_station={}&purpose_codes={}",
        date, from, to, codes
    );

    let url = format!("{}{}{}", state.upstream_base, payload::QUERY_ENTRY, query);
    let mut outcome = fetch_upstream(&state, &url).await;

    if let Upstream::Body(body) = &outcome {
        if let Some(entry) = payload::moved_entry(body) {
            info!(entry = %entry, "Upstream query entry moved");
            let url = format!("{}{}{}", state.upstream_base, entry, query);
            outcome = fetch_upstream(&state, &url).await;
        }
    }

    match outcome {
        Upstream::Body(body) => match payload::accept_tickets(&body) {
            Some(stamped) => {
                save(&state, &key, stamped);
                json(body)
            }
            None => {
                debug!(key = %key, "Upstream answer rejected");
                cached_or(&state, &key, payload::EMPTY_BODY)
            }
        },
        Upstream::Failed(e) => {
            warn!(key = %key, error = %e, "Upstream fetch failed");
            cached_or(&state, &key, payload::EMPTY_BODY)
        }
        Upstream::TimedOut => {
            warn!(key = %key, "Upstream fetch timed out");
            cached_or(&state, &key, payload::EMPTY_BODY)
        }
    }
}

async fn query_ticket_price(
    State(state): State<AppState>,
    Query(params): Query<PriceQuery>,
) -> Response {
    let (Some(train_no), Some(from), Some(to), Some(seat_types), Some(date)) = (
        present(&params.train_no),
        present(&params.from_station_no),
        present(&params.to_station_no),
        present(&params.seat_types),
        present(&params.train_date),
    ) else {
        warn!("Price query without enough params");
        return json(Bytes::from_static(b"{}"));
    };

    let key = format!("price:{}:{}:{}:{}", train_no, from, to, seat_types);
    let url = format!(
        "{}{}?train_no={}&from_station_no={}&to_station_no={}&seat_types={}&train_date={}",
        state.upstream_base,
        payload::PRICE_ENTRY,
        train_no,
        from,
        to,
        seat_types,
        date
    );

    match fetch_upstream(&state, &url).await {
        Upstream::Body(body) => match payload::inspect_price(&body) {
            PriceVerdict::Accepted(stamped) => {
                save(&state, &key, stamped);
                json(body)
            }
            PriceVerdict::Empty => json(body),
            PriceVerdict::Rejected => cached_or(&state, &key, payload::EMPTY_BODY),
        },
        Upstream::Failed(e) => {
            warn!(key = %key, error = %e, "Upstream fetch failed");
            cached_or(&state, &key, payload::EMPTY_BODY)
        }
        Upstream::TimedOut => {
            warn!(key = %key, "Upstream fetch timed out");
            cached_or(&state, &key, payload::TIMEOUT_BODY)
        }
    }
}

fn save(state: &AppState, key: &str, body: Bytes) {
    if let Err(e) = state.cache.put(key, body) {
        warn!(key = %key, error = %e, "Failed to write cache");
    }
}

fn cached_or(state: &AppState, key: &str, fallback: &'static str) -> Response {
    match state.cache.get(key) {
        Ok(Some(entry)) => json(entry.content),
        Ok(None) => json(Bytes::from_static(fallback.as_bytes())),
        Err(e) => {
            warn!(key = %key, error = %e, "Failed to read cache");
            json(Bytes::from_static(fallback.as_bytes()))
        }
    }
}

fn json(body: Bytes) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}
