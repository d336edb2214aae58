//! Configuration module for the FIM monitor.
//!
//! This module handles parsing configuration from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `FIM_WATCH_DIR` | No | `~/.fim/watched` | Directory tree to monitor |
//! | `FIM_DB_PATH` | No | `~/.fim/fim.db` | SQLite event store |
//! | `FIM_ENDPOINT_NAME` | No | `local_agent` | Endpoint name stamped on every event |
//! | `FIM_AGENT_ID` | No | hostname | Agent identifier sent to the replica |
//! | `FIM_CHUNK_SIZE` | No | 65536 | Bytes read per digest chunk |
//! | `FIM_CHANNEL_CAPACITY` | No | 1024 | Notification channel capacity |
//! | `FIM_APPEND_RETRY_LIMIT` | No | 3 | Attempts per event append (1-10) |
//! | `FIM_SEED_FROM_STORE` | No | true | Seed known hashes from the store at startup |
//! | `FIM_REPLICA_URL` | No | - | Replica base URL (enables replication) |
//! | `FIM_REPLICA_BATCH_INTERVAL_SECS` | No | 30 | Seconds between replication cycles |
//! | `FIM_REPLICA_RETRY_LIMIT` | No | 3 | Attempts per replication cycle (1-10) |
//!
//! # Example
//!
//! ```no_run
//! use fim_monitor::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Watching: {}", config.watch_dir.display());
//! ```

use std::env;
use std::path::PathBuf;

use directories::BaseDirs;
use thiserror::Error;

use crate::digest::DEFAULT_CHUNK_SIZE;
use crate::types::current_hostname;

/// Default data directory name relative to home.
const DEFAULT_DATA_DIR: &str = ".fim";

/// Default watched directory name inside the data directory.
const DEFAULT_WATCH_DIR: &str = "watched";

/// Default database file name inside the data directory.
const DEFAULT_DB_FILE: &str = "fim.db";

/// Default endpoint name.
const DEFAULT_ENDPOINT_NAME: &str = "local_agent";

/// Default notification channel capacity.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default seconds between replication cycles.
const DEFAULT_BATCH_INTERVAL_SECS: u64 = 30;

/// Default attempts for appends and replication cycles.
const DEFAULT_RETRY_LIMIT: u8 = 3;

/// Minimum allowed retry limit.
const MIN_RETRY_LIMIT: u8 = 1;

/// Maximum allowed retry limit.
const MAX_RETRY_LIMIT: u8 = 10;

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to determine home directory.
    #[error("failed to determine home directory")]
    NoHomeDirectory,
}

/// Configuration for optional replication to a secondary store.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Replica base URL. Batches are posted to `<url>/events`.
    pub url: String,

    /// Seconds between replication cycles.
    pub batch_interval_secs: u64,

    /// Attempts per cycle before giving up until the next tick.
    /// Must be between 1 and 10 (inclusive).
    pub retry_limit: u8,
}

/// Configuration for the FIM monitor.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the monitored directory tree.
    pub watch_dir: PathBuf,

    /// True when `watch_dir` came from the default rather than the environment.
    /// The default directory is created on startup; an explicit one must exist.
    pub watch_dir_is_default: bool,

    /// Path to the SQLite event store.
    pub db_path: PathBuf,

    /// Endpoint name recorded on every event.
    pub endpoint_name: String,

    /// Agent identifier, sent with replicated documents.
    pub agent_id: String,

    /// Bytes read per digest chunk.
    pub chunk_size: usize,

    /// Capacity of the notification channel.
    pub channel_capacity: usize,

    /// Attempts per event append before the event is dropped.
    pub append_retry_limit: u8,

    /// Whether to seed the state table from the store at startup.
    pub seed_from_store: bool,

    /// Optional replication configuration.
    /// If `None`, events are only recorded locally.
    pub replication: Option<ReplicationConfig>,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - a numeric variable is set but cannot be parsed, or is out of range
    /// - `FIM_SEED_FROM_STORE` is not a boolean
    /// - The home directory cannot be determined (needed for default paths)
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_dirs = BaseDirs::new().ok_or(ConfigError::NoHomeDirectory)?;
        let data_dir = base_dirs.home_dir().join(DEFAULT_DATA_DIR);

        let (watch_dir, watch_dir_is_default) = match env::var("FIM_WATCH_DIR") {
            Ok(dir) if !dir.trim().is_empty() => (PathBuf::from(dir), false),
            _ => (data_dir.join(DEFAULT_WATCH_DIR), true),
        };

        let db_path = env::var("FIM_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join(DEFAULT_DB_FILE));

        let endpoint_name =
            env::var("FIM_ENDPOINT_NAME").unwrap_or_else(|_| DEFAULT_ENDPOINT_NAME.to_string());

        let agent_id = env::var("FIM_AGENT_ID").unwrap_or_else(|_| current_hostname());

        let chunk_size = parse_positive("FIM_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?;
        let channel_capacity = parse_positive("FIM_CHANNEL_CAPACITY", DEFAULT_CHANNEL_CAPACITY)?;
        let append_retry_limit = parse_retry_limit("FIM_APPEND_RETRY_LIMIT")?;

        let seed_from_store = match env::var("FIM_SEED_FROM_STORE") {
            Ok(val) => parse_bool(&val).ok_or_else(|| ConfigError::InvalidValue {
                key: "FIM_SEED_FROM_STORE".to_string(),
                message: format!("expected true or false, got '{val}'"),
            })?,
            Err(_) => true,
        };

        // Replication is enabled only when FIM_REPLICA_URL is set
        let replication = match env::var("FIM_REPLICA_URL") {
            Ok(url) if !url.trim().is_empty() => {
                let batch_interval_secs = match env::var("FIM_REPLICA_BATCH_INTERVAL_SECS") {
                    Ok(val) => {
                        let secs = val.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                            key: "FIM_REPLICA_BATCH_INTERVAL_SECS".to_string(),
                            message: format!("expected positive integer, got '{val}'"),
                        })?;
                        if secs == 0 {
                            return Err(ConfigError::InvalidValue {
                                key: "FIM_REPLICA_BATCH_INTERVAL_SECS".to_string(),
                                message: "batch interval must be at least 1 second".to_string(),
                            });
                        }
                        secs
                    }
                    Err(_) => DEFAULT_BATCH_INTERVAL_SECS,
                };

                Some(ReplicationConfig {
                    url: url.trim_end_matches('/').to_string(),
                    batch_interval_secs,
                    retry_limit: parse_retry_limit("FIM_REPLICA_RETRY_LIMIT")?,
                })
            }
            _ => None,
        };

        Ok(Self {
            watch_dir,
            watch_dir_is_default,
            db_path,
            endpoint_name,
            agent_id,
            chunk_size,
            channel_capacity,
            append_retry_limit,
            seed_from_store,
            replication,
        })
    }
}

/// Parses an optional integer that must be greater than zero.
fn parse_positive(key: &str, default: usize) -> Result<usize, ConfigError> {
    let Ok(val) = env::var(key) else {
        return Ok(default);
    };
    let n = val.parse::<usize>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected positive integer, got '{val}'"),
    })?;
    if n == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "value must be greater than 0".to_string(),
        });
    }
    Ok(n)
}

/// Parses an optional retry limit in `1..=10`.
fn parse_retry_limit(key: &str) -> Result<u8, ConfigError> {
    let Ok(val) = env::var(key) else {
        return Ok(DEFAULT_RETRY_LIMIT);
    };
    let limit = val.parse::<u8>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected integer 1-10, got '{val}'"),
    })?;
    if !(MIN_RETRY_LIMIT..=MAX_RETRY_LIMIT).contains(&limit) {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!(
                "retry limit must be between {MIN_RETRY_LIMIT} and {MAX_RETRY_LIMIT}, got {limit}"
            ),
        });
    }
    Ok(limit)
}

fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
