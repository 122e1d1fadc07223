//! Parsing of the top-level configuration blocks.

use mirage_common::LogFormat;
use tracing::trace;

use crate::settings::{AppConfig, CacheConfig, LoggingConfig, StorageConfig};
use crate::ConfigError;

use super::helpers::{child_nodes, ensure_no_args, get_first_arg_string, single_string, single_u64};

/// Storage module name accepted after `storage`
pub const STORAGE_MODULE: &str = "dynamodb";

fn unknown(block: &str, node: &kdl::KdlNode) -> ConfigError {
    ConfigError::UnknownParameter {
        block: block.to_string(),
        key: node.name().value().to_string(),
    }
}

/// Parse the `mirage { ... }` block
pub fn parse_app_block(node: &kdl::KdlNode) -> Result<AppConfig, ConfigError> {
    trace!("Parsing mirage configuration block");
    ensure_no_args(node)?;

    let mut config = AppConfig::default();
    for child in child_nodes(node) {
        match child.name().value() {
            "table" => config.table = single_string(child, "mirage")?,
            "key" => config.key = single_string(child, "mirage")?,
            _ => return Err(unknown("mirage", child)),
        }
    }

    trace!(
        table = %config.table,
        key = %config.key,
        "Parsed mirage configuration"
    );
    Ok(config)
}

/// Parse the `storage "dynamodb" { ... }` block
pub fn parse_storage_block(node: &kdl::KdlNode) -> Result<StorageConfig, ConfigError> {
    trace!("Parsing storage configuration block");

    match get_first_arg_string(node) {
        Some(module) if module == STORAGE_MODULE && node.entries().len() == 1 => {}
        _ => {
            return Err(ConfigError::InvalidValue {
                block: "storage".to_string(),
                key: "module".to_string(),
                reason: format!("expected `storage \"{STORAGE_MODULE}\"`"),
            })
        }
    }

    let mut config = StorageConfig::default();
    for child in child_nodes(node) {
        match child.name().value() {
            "table" => config.table = single_string(child, "storage")?,
            "lock-table" => config.lock_table = Some(single_string(child, "storage")?),
            "lease-duration-secs" => config.lease_duration_secs = single_u64(child, "storage")?,
            "heartbeat-period-secs" => {
                config.heartbeat_period_secs = single_u64(child, "storage")?
            }
            "refresh-period-ms" => config.refresh_period_ms = single_u64(child, "storage")?,
            _ => return Err(unknown("storage", child)),
        }
    }

    trace!(
        table = %config.table,
        lock_table = %config.lock_table(),
        lease_duration_secs = config.lease_duration_secs,
        "Parsed storage configuration"
    );
    Ok(config)
}

/// Parse the `cache { ... }` block
pub fn parse_cache_block(node: &kdl::KdlNode) -> Result<CacheConfig, ConfigError> {
    ensure_no_args(node)?;

    let mut config = CacheConfig::default();
    for child in child_nodes(node) {
        match child.name().value() {
            "capacity" => {
                let capacity = single_u64(child, "cache")?;
                config.capacity = usize::try_from(capacity).map_err(|_| {
                    ConfigError::InvalidValue {
                        block: "cache".to_string(),
                        key: "capacity".to_string(),
                        reason: "value too large".to_string(),
                    }
                })?;
            }
            "ttl-secs" => config.ttl_secs = single_u64(child, "cache")?,
            "sweep-interval-secs" => config.sweep_interval_secs = single_u64(child, "cache")?,
            _ => return Err(unknown("cache", child)),
        }
    }

    trace!(
        capacity = config.capacity,
        ttl_secs = config.ttl_secs,
        "Parsed cache configuration"
    );
    Ok(config)
}

/// Parse the `logging { ... }` block
pub fn parse_logging_block(node: &kdl::KdlNode) -> Result<LoggingConfig, ConfigError> {
    ensure_no_args(node)?;

    let mut config = LoggingConfig::default();
    for child in child_nodes(node) {
        match child.name().value() {
            "level" => config.level = single_string(child, "logging")?,
            "format" => config.format = LogFormat::from_str_loose(&single_string(child, "logging")?),
            _ => return Err(unknown("logging", child)),
        }
    }
    Ok(config)
}
