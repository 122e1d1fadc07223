//! Typed configuration sections and their defaults.

use std::time::Duration;

use mirage_common::LogFormat;
use serde::{Deserialize, Serialize};

/// Default table holding redirect rules
pub const DEFAULT_TABLE: &str = "RedirectorConfigProd";
/// Default partition key attribute of the redirect table
pub const DEFAULT_KEY: &str = "Hostname";
/// Default table holding certificate artifacts
pub const DEFAULT_STORAGE_TABLE: &str = "MirageServerCertificatesProd";

// ============================================================================
// Redirect backend
// ============================================================================

/// Redirect rule table settings (`mirage { ... }` block)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_table")]
    pub table: String,

    /// Partition key attribute the hostname is stored under
    #[serde(default = "default_key")]
    pub key: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            table: default_table(),
            key: default_key(),
        }
    }
}

pub fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

pub fn default_key() -> String {
    DEFAULT_KEY.to_string()
}

// ============================================================================
// Certificate storage
// ============================================================================

/// Certificate storage and lease settings (`storage "dynamodb" { ... }` block)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_table")]
    pub table: String,

    /// Table for lock documents; the storage table when unset
    #[serde(default)]
    pub lock_table: Option<String>,

    #[serde(default = "default_lease_duration_secs")]
    pub lease_duration_secs: u64,

    #[serde(default = "default_heartbeat_period_secs")]
    pub heartbeat_period_secs: u64,

    /// How often a blocked `lock` re-reads the lock document
    #[serde(default = "default_refresh_period_ms")]
    pub refresh_period_ms: u64,
}

impl StorageConfig {
    /// Table the lock documents are written to
    pub fn lock_table(&self) -> &str {
        self.lock_table.as_deref().unwrap_or(&self.table)
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_secs(self.heartbeat_period_secs)
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_millis(self.refresh_period_ms)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            table: default_storage_table(),
            lock_table: None,
            lease_duration_secs: default_lease_duration_secs(),
            heartbeat_period_secs: default_heartbeat_period_secs(),
            refresh_period_ms: default_refresh_period_ms(),
        }
    }
}

pub fn default_storage_table() -> String {
    DEFAULT_STORAGE_TABLE.to_string()
}

pub fn default_lease_duration_secs() -> u64 {
    15
}

pub fn default_heartbeat_period_secs() -> u64 {
    5
}

pub fn default_refresh_period_ms() -> u64 {
    1000
}

// ============================================================================
// Redirect cache
// ============================================================================

/// Redirect cache sizing (`cache { ... }` block)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    /// Interval of the background sweep that drops expired entries
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

pub fn default_cache_capacity() -> usize {
    10_000
}

pub fn default_cache_ttl_secs() -> u64 {
    3600
}

pub fn default_sweep_interval_secs() -> u64 {
    60
}

// ============================================================================
// Logging
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

pub fn default_log_level() -> String {
    "info".to_string()
}
