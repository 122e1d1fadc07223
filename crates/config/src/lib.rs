//! Configuration for the Mirage redirect server.
//!
//! Configuration is written in KDL and covers four blocks: the redirect rule
//! backend (`mirage`), certificate storage and locking (`storage`), the
//! redirect cache (`cache`) and logging (`logging`).

use std::path::Path;

use anyhow::Context;
use mirage_common::MirageError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub mod kdl;
pub mod settings;
pub mod validate;

pub use settings::{AppConfig, CacheConfig, LoggingConfig, StorageConfig};
pub use validate::{validate_config, ValidationError, ValidationResult, ValidationWarning};

/// Errors raised while loading configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to parse KDL: {0}")]
    Parse(String),

    #[error("unknown configuration block '{0}'")]
    UnknownBlock(String),

    #[error("unknown parameter '{key}' in '{block}' block")]
    UnknownParameter { block: String, key: String },

    #[error("'{block}' block takes no arguments")]
    UnexpectedArgument { block: String },

    #[error("invalid value for '{key}' in '{block}' block: {reason}")]
    InvalidValue {
        block: String,
        key: String,
        reason: String,
    },

    #[error("configuration is invalid: {0}")]
    Validation(String),

    #[error("failed to read configuration: {0}")]
    Io(String),
}

impl From<ConfigError> for MirageError {
    fn from(err: ConfigError) -> Self {
        MirageError::Config(err.to_string())
    }
}

/// Complete server configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirageConfig {
    #[serde(default)]
    pub app: AppConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MirageConfig {
    /// Parse and validate a KDL document
    pub fn from_kdl_str(source: &str) -> Result<Self, ConfigError> {
        let config = crate::kdl::parse_document(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load, parse and validate a KDL file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(e.to_string()))
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config = Self::from_kdl_str(&source)
            .with_context(|| format!("Failed to load config file {}", path.display()))?;

        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Check the configuration, logging warnings and failing on the first error
    pub fn validate(&self) -> Result<(), ConfigError> {
        let result = validate_config(self);
        for warning in &result.warnings {
            warn!(warning = %warning.message, "Configuration warning");
        }

        match result.errors.first() {
            None => Ok(()),
            Some(error) => Err(ConfigError::Validation(error.to_string())),
        }
    }
}
