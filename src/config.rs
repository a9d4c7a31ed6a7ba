//! Configuration: TOML file + env var overrides + defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrailError};

/// Default config file, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "activity-trail.toml";

/// Prefix for every env override.
pub const ENV_PREFIX: &str = "ACTIVITY_API_";

/// Full service configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub query: QueryConfig,
    pub retention: RetentionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3001".to_string(),
        }
    }
}

/// Which storage backend serves the process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Bounded ring buffer, lost on restart.
    #[default]
    Memory,
    /// SQLite file, survives restarts.
    Sqlite,
}

impl std::str::FromStr for BackendKind {
    type Err = TrailError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(TrailError::InvalidConfig {
                details: format!("unknown storage backend {other:?} (expected memory|sqlite)"),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: BackendKind,
    /// Ring buffer size; oldest activity is evicted past this.
    pub ring_capacity: usize,
    pub sqlite_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            ring_capacity: 1000,
            sqlite_path: PathBuf::from("data/activity-trail.db"),
        }
    }
}

/// Result caps for the query endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryConfig {
    pub default_activity_limit: usize,
    pub default_session_limit: usize,
    /// Hard ceiling on any caller-supplied limit.
    pub max_limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_activity_limit: 5000,
            default_session_limit: 1000,
            max_limit: 10_000,
        }
    }
}

impl QueryConfig {
    /// Caller limit clamped to `max_limit`, or the default when absent.
    pub fn effective_limit(&self, requested: Option<usize>, default: usize) -> usize {
        requested.unwrap_or(default).min(self.max_limit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetentionConfig {
    /// Activities older than this are pruned; 0 disables pruning.
    pub max_age_days: u32,
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_days: 30,
            sweep_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// A missing file at the default path is not an error; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    /// Same as [`Config::load`] with an injectable env lookup.
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let path_buf = path.map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), Path::to_path_buf);

        let mut cfg: Self = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| TrailError::Io {
                path: path_buf.clone(),
                source,
            })?;
            toml::from_str(&raw)?
        } else if path.is_some() {
            return Err(TrailError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.apply_env_overrides_from(lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut var = |suffix: &str| {
            lookup(&format!("{ENV_PREFIX}{suffix}")).filter(|raw| !raw.trim().is_empty())
        };

        if let Some(raw) = var("BIND") {
            self.server.bind = raw;
        }
        if let Some(raw) = var("STORAGE_BACKEND") {
            self.storage.backend = raw.parse()?;
        }
        if let Some(raw) = var("RING_CAPACITY") {
            self.storage.ring_capacity = parse_env("RING_CAPACITY", &raw)?;
        }
        if let Some(raw) = var("SQLITE_PATH") {
            self.storage.sqlite_path = PathBuf::from(raw);
        }
        if let Some(raw) = var("DEFAULT_ACTIVITY_LIMIT") {
            self.query.default_activity_limit = parse_env("DEFAULT_ACTIVITY_LIMIT", &raw)?;
        }
        if let Some(raw) = var("DEFAULT_SESSION_LIMIT") {
            self.query.default_session_limit = parse_env("DEFAULT_SESSION_LIMIT", &raw)?;
        }
        if let Some(raw) = var("MAX_LIMIT") {
            self.query.max_limit = parse_env("MAX_LIMIT", &raw)?;
        }
        if let Some(raw) = var("RETENTION_DAYS") {
            self.retention.max_age_days = parse_env("RETENTION_DAYS", &raw)?;
        }
        if let Some(raw) = var("SWEEP_INTERVAL_SECS") {
            self.retention.sweep_interval_secs = parse_env("SWEEP_INTERVAL_SECS", &raw)?;
        }
        if let Some(raw) = var("LOG_LEVEL") {
            self.logging.level = raw;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(TrailError::InvalidConfig {
                details: format!("server.bind {:?} is not a socket address", self.server.bind),
            });
        }
        if self.storage.ring_capacity == 0 {
            return Err(TrailError::InvalidConfig {
                details: "storage.ring_capacity must be at least 1".to_string(),
            });
        }
        if self.storage.backend == BackendKind::Sqlite
            && self.storage.sqlite_path.as_os_str().is_empty()
        {
            return Err(TrailError::InvalidConfig {
                details: "storage.sqlite_path is required for the sqlite backend".to_string(),
            });
        }
        if self.query.max_limit == 0 {
            return Err(TrailError::InvalidConfig {
                details: "query.max_limit must be at least 1".to_string(),
            });
        }
        if self.retention.max_age_days > 0 && self.retention.sweep_interval_secs == 0 {
            return Err(TrailError::InvalidConfig {
                details: "retention.sweep_interval_secs must be positive when retention is on"
                    .to_string(),
            });
        }
        Ok(())
    }
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| TrailError::ConfigParse {
        context: "env",
        details: format!("{ENV_PREFIX}{name}={raw:?}: {error}"),
    })
}
