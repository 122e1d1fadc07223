//! Configuration linting
//!
//! Flags settings that are valid but unlikely to be intended.

use super::{ValidationResult, ValidationWarning};
use crate::MirageConfig;

/// Lint configuration
pub fn lint_config(config: &MirageConfig) -> ValidationResult {
    let mut result = ValidationResult::new();
    let storage = &config.storage;

    // A single missed heartbeat should not cost the lease
    if storage.heartbeat_period_secs.saturating_mul(3) > storage.lease_duration_secs {
        result.add_warning(ValidationWarning::new(format!(
            "Heartbeat period ({}s) is more than a third of the lease duration ({}s); \
             one slow heartbeat may let another instance take the lock",
            storage.heartbeat_period_secs, storage.lease_duration_secs
        )));
    }

    if storage.lock_table.is_none() {
        result.add_warning(ValidationWarning::new(format!(
            "Lock documents share the storage table '{}'",
            storage.table
        )));
    }

    if config.app.table == storage.table {
        result.add_warning(ValidationWarning::new(format!(
            "Redirect rules and certificates share table '{}'",
            storage.table
        )));
    }

    if config.cache.sweep_interval_secs > config.cache.ttl_secs {
        result.add_warning(ValidationWarning::new(format!(
            "Cache sweep interval ({}s) exceeds the TTL ({}s); expired entries linger until swept",
            config.cache.sweep_interval_secs, config.cache.ttl_secs
        )));
    }

    if !matches!(
        config.logging.level.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        result.add_warning(ValidationWarning::new(format!(
            "Log level '{}' is not a plain level; it is passed to the filter as a directive",
            config.logging.level
        )));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_lock_table_warns() {
        let result = lint_config(&MirageConfig::default());
        assert!(result
            .warnings
            .iter()
            .any(|w| w.message.contains("share the storage table")));
    }

    #[test]
    fn test_slow_heartbeat_warns() {
        let mut config = MirageConfig::default();
        config.storage.lease_duration_secs = 10;
        config.storage.heartbeat_period_secs = 5;

        let result = lint_config(&config);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.message.contains("Heartbeat period")));
    }

    #[test]
    fn test_defaults_have_no_heartbeat_warning() {
        let result = lint_config(&MirageConfig::default());
        assert!(!result
            .warnings
            .iter()
            .any(|w| w.message.contains("Heartbeat period")));
    }
}
