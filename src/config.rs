//! Environment-based Configuration
//!
//! Configuration loading from environment variables. Every value has a
//! default; set variables to override.
//!
//! # Environment Variables
//!
//! - `VEILCHAIN_DB_PATH` - SQLite database path (unset: in-memory stores)
//! - `VEILCHAIN_BLOB_PATH` - blob store directory (unset: in-memory blobs)
//! - `VEILCHAIN_LOG_LEVEL` - logging level (debug, info, warn, error)
//! - `VEILCHAIN_LOG_JSON` - "1" for JSON log output
//! - `VEILCHAIN_BLOB_THRESHOLD` - payload bytes at/above which entries are
//!   offloaded to the blob store (default 1 MiB)
//! - `VEILCHAIN_BLOB_MULTIPART_THRESHOLD` - bytes at/above which blob
//!   writes stream in parts (default 5 MiB)
//! - `VEILCHAIN_IDEMPOTENCY_TTL_SECS` - idempotency record lifetime
//!   (default 86400)
//! - `VEILCHAIN_TREE_CACHE_CAPACITY` - max in-memory trees (default 1024)
//! - `VEILCHAIN_PUBLISH_MIN_ENTRIES` - entries between root snapshots
//!   (default 100)
//! - `VEILCHAIN_PUBLISH_MAX_INTERVAL_MS` - max time between root snapshots
//!   (default 3600000)
//! - `VEILCHAIN_SIGNING_KEY` - hex key for published-root integrity tags

use std::env;
use thiserror::Error;

use crate::idempotency::DEFAULT_TTL_SECS;
use crate::storage::tiered_defaults;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct VeilChainConfig {
    /// SQLite database path; `None` selects the in-memory stores.
    pub db_path: Option<String>,

    /// Blob store directory; `None` selects the in-memory blob store.
    pub blob_path: Option<String>,

    /// Logging level
    pub log_level: String,

    /// JSON log output
    pub log_json: bool,

    /// Offload threshold in bytes
    pub blob_threshold: u64,

    /// Multipart write threshold in bytes
    pub blob_multipart_threshold: u64,

    /// Idempotency record TTL in seconds
    pub idempotency_ttl_secs: u64,

    /// Bound on cached in-memory trees
    pub tree_cache_capacity: usize,

    /// Entries between root snapshots
    pub publish_min_entries: u64,

    /// Max milliseconds between root snapshots
    pub publish_max_interval_ms: i64,

    /// Hex signing key for published roots
    pub signing_key: Option<Vec<u8>>,
}

impl Default for VeilChainConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            blob_path: None,
            log_level: "info".to_string(),
            log_json: false,
            blob_threshold: tiered_defaults::SIZE_THRESHOLD,
            blob_multipart_threshold: tiered_defaults::MULTIPART_THRESHOLD,
            idempotency_ttl_secs: DEFAULT_TTL_SECS,
            tree_cache_capacity: 1024,
            publish_min_entries: 100,
            publish_max_interval_ms: 60 * 60 * 1000,
            signing_key: None,
        }
    }
}

impl VeilChainConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let signing_key = match env::var("VEILCHAIN_SIGNING_KEY") {
            Ok(hex_key) => Some(hex::decode(&hex_key).map_err(|e| {
                ConfigError::InvalidValue("VEILCHAIN_SIGNING_KEY".to_string(), e.to_string())
            })?),
            Err(_) => None,
        };

        Ok(Self {
            db_path: env::var("VEILCHAIN_DB_PATH").ok(),
            blob_path: env::var("VEILCHAIN_BLOB_PATH").ok(),
            log_level: env::var("VEILCHAIN_LOG_LEVEL").unwrap_or(defaults.log_level),
            log_json: env::var("VEILCHAIN_LOG_JSON").map(|v| v == "1").unwrap_or(false),
            blob_threshold: parse_env("VEILCHAIN_BLOB_THRESHOLD", defaults.blob_threshold)?,
            blob_multipart_threshold: parse_env(
                "VEILCHAIN_BLOB_MULTIPART_THRESHOLD",
                defaults.blob_multipart_threshold,
            )?,
            idempotency_ttl_secs: parse_env(
                "VEILCHAIN_IDEMPOTENCY_TTL_SECS",
                defaults.idempotency_ttl_secs,
            )?,
            tree_cache_capacity: parse_env(
                "VEILCHAIN_TREE_CACHE_CAPACITY",
                defaults.tree_cache_capacity,
            )?,
            publish_min_entries: parse_env(
                "VEILCHAIN_PUBLISH_MIN_ENTRIES",
                defaults.publish_min_entries,
            )?,
            publish_max_interval_ms: parse_env(
                "VEILCHAIN_PUBLISH_MAX_INTERVAL_MS",
                defaults.publish_max_interval_ms,
            )?,
            signing_key,
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}
