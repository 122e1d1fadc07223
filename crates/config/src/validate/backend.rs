//! Backing store settings validation
//!
//! Checks table names, key attributes, lease timings and cache bounds.

use super::{ErrorCategory, ValidationError, ValidationResult};
use crate::MirageConfig;

/// Validate backend, storage and cache settings
pub fn validate_backend(config: &MirageConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    let app = &config.app;
    for (name, value) in [("table", &app.table), ("key", &app.key)] {
        if value.trim().is_empty() {
            result.add_error(ValidationError::new(
                ErrorCategory::Backend,
                format!("'{}' must not be empty", name),
            ));
        }
    }

    let storage = &config.storage;
    if storage.table.trim().is_empty() {
        result.add_error(ValidationError::new(
            ErrorCategory::Storage,
            "Storage table must not be empty",
        ));
    }
    if storage.lock_table.as_deref().is_some_and(|t| t.trim().is_empty()) {
        result.add_error(ValidationError::new(
            ErrorCategory::Storage,
            "Lock table must not be empty when set",
        ));
    }
    if storage.lease_duration_secs == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Storage,
            "Lease duration must be positive",
        ));
    }
    if storage.heartbeat_period_secs == 0
        || storage.heartbeat_period_secs >= storage.lease_duration_secs
    {
        result.add_error(ValidationError::new(
            ErrorCategory::Storage,
            format!(
                "Heartbeat period ({}s) must be positive and shorter than the lease duration ({}s)",
                storage.heartbeat_period_secs, storage.lease_duration_secs
            ),
        ));
    }
    if storage.refresh_period_ms == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Storage,
            "Lock refresh period must be positive",
        ));
    }

    let cache = &config.cache;
    if cache.capacity == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Cache,
            "Cache capacity must be positive",
        ));
    }
    if cache.ttl_secs == 0 {
        result.add_error(ValidationError::new(ErrorCategory::Cache, "Cache TTL must be positive"));
    }
    if cache.sweep_interval_secs == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Cache,
            "Cache sweep interval must be positive",
        ));
    }

    result
}
