//! Node configuration.
//!
//! Values are layered, later layers winning:
//!
//! 1. built-in defaults
//! 2. an optional YAML/TOML/JSON file (`--config`)
//! 3. environment variables prefixed `TICKETS_` (e.g. `TICKETS_PORT=9000`)
//! 4. command-line flags

use crate::observability::LogFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tickets_dispatch::{ConnectionConfig, CoordinatorConfig};
use validator::{Validate, ValidationError};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "TICKETS";

/// Errors raised while assembling the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or parsed.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    /// Values that are valid alone but contradict each other.
    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),

    /// The binary was built without support for a configured feature.
    #[error("unsupported configuration: {0}")]
    Unsupported(String),
}

/// Cache store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local map.
    #[default]
    Memory,
    /// RocksDB at `store_path` (requires the `rocksdb` feature).
    Rocksdb,
}

/// Configuration for the ticket cache node.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct NodeConfig {
    /// HTTP listen port.
    #[validate(range(min = 1))]
    pub port: u16,
    /// Append logs to this file instead of stdout.
    pub log_file: Option<PathBuf>,
    /// Log level.
    #[validate(length(min = 1))]
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// Accept worker registrations on `/ws/register`.
    pub worker_support: bool,
    /// Let the master take a share of the fetches.
    pub master_participates: bool,
    /// Ceiling on waiting for a worker to be picked.
    #[validate(range(min = 1))]
    pub selection_timeout_ms: u64,
    /// Ceiling on waiting for a worker's result.
    #[validate(range(min = 1))]
    pub call_timeout_ms: u64,
    /// Ceiling on an upstream fetch made on behalf of an HTTP request.
    /// Must exceed `selection_timeout_ms + call_timeout_ms`.
    #[validate(range(min = 1))]
    pub request_timeout_ms: u64,
    /// Base URL of the upstream ticket API, ending in `/`.
    #[validate(custom(function = "validate_upstream_base"))]
    pub upstream_base: String,
    /// Cache store backend.
    pub store: StoreBackend,
    /// Directory for the persistent store.
    pub store_path: PathBuf,
    /// Largest accepted worker frame.
    #[validate(range(min = 1024))]
    pub max_frame_bytes: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: 8086,
            log_file: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            worker_support: false,
            master_participates: true,
            selection_timeout_ms: 3_000,
            call_timeout_ms: 10_000,
            request_timeout_ms: 15_000,
            upstream_base: "https://kyfw.12306.cn/otn/".to_string(),
            store: StoreBackend::Memory,
            store_path: PathBuf::from("./data/cache"),
            max_frame_bytes: ConnectionConfig::default().max_frame_bytes,
        }
    }
}

fn validate_upstream_base(base: &str) -> Result<(), ValidationError> {
    let has_scheme = base.starts_with("http://") || base.starts_with("https://");
    if !has_scheme || !base.ends_with('/') {
        return Err(ValidationError::new("upstream_base"));
    }
    Ok(())
}

impl NodeConfig {
    /// Load defaults, then `file` if given, then `TICKETS_*` variables.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder =
            builder.add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let config: NodeConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Apply command-line overrides on top of the loaded values.
    pub fn apply(&mut self, overrides: &CliOverrides) {
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(path) = &overrides.log_file {
            self.log_file = Some(path.clone());
        }
        if let Some(level) = &overrides.log_level {
            self.log_level = level.clone();
        }
        if let Some(format) = overrides.log_format {
            self.log_format = format;
        }
        if overrides.worker_support {
            self.worker_support = true;
        }
        if overrides.workers_only {
            self.master_participates = false;
        }
        if let Some(base) = &overrides.upstream_base {
            self.upstream_base = base.clone();
        }
        if let Some(store) = overrides.store {
            self.store = store;
        }
        if let Some(path) = &overrides.store_path {
            self.store_path = path.clone();
        }
    }

    /// Check ranges, formats and the ordering of the timeouts.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()?;
        let delegated = self.selection_timeout_ms.saturating_add(self.call_timeout_ms);
        if self.request_timeout_ms <= delegated {
            return Err(ConfigError::Inconsistent(format!(
                "request_timeout_ms ({}) must exceed selection_timeout_ms + call_timeout_ms ({})",
                self.request_timeout_ms, delegated
            )));
        }
        if self.store == StoreBackend::Rocksdb && !cfg!(feature = "rocksdb") {
            return Err(ConfigError::Unsupported(
                "store = rocksdb needs a build with the `rocksdb` feature".to_string(),
            ));
        }
        Ok(())
    }

    /// Coordinator settings derived from this configuration.
    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            master_participates: self.master_participates,
            selection_timeout: Duration::from_millis(self.selection_timeout_ms),
            seed: None,
        }
    }

    /// Per-worker connection settings.
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            max_frame_bytes: self.max_frame_bytes,
        }
    }

    /// Ceiling on one upstream fetch for an HTTP request.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Command-line flags that override file and environment values.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct CliOverrides {
    /// Port to serve on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log file path
    #[arg(short = 'f', long)]
    pub log_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Accept worker registrations
    #[arg(short = 's', long)]
    pub worker_support: bool,

    /// Never fetch on the master while workers are connected
    #[arg(long)]
    pub workers_only: bool,

    /// Base URL of the upstream ticket API
    #[arg(long)]
    pub upstream_base: Option<String>,

    /// Cache store backend
    #[arg(long, value_enum)]
    pub store: Option<StoreBackend>,

    /// Directory for the persistent store
    #[arg(long)]
    pub store_path: Option<PathBuf>,
}
