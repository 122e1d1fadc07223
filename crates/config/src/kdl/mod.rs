//! KDL configuration format.
//!
//! ```kdl
//! mirage {
//!     table "RedirectorConfigProd"
//!     key "Hostname"
//! }
//! storage "dynamodb" {
//!     table "MirageServerCertificatesProd"
//! }
//! ```
//!
//! Every block is optional; omitted blocks and keys take their defaults.

mod blocks;
mod helpers;

pub use blocks::{
    parse_app_block, parse_cache_block, parse_logging_block, parse_storage_block, STORAGE_MODULE,
};

use tracing::debug;

use crate::{ConfigError, MirageConfig};

/// Parse a whole configuration document
pub fn parse_document(source: &str) -> Result<MirageConfig, ConfigError> {
    let doc: kdl::KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| ConfigError::Parse(e.to_string()))?;

    let mut config = MirageConfig::default();
    for node in doc.nodes() {
        match node.name().value() {
            "mirage" => config.app = parse_app_block(node)?,
            "storage" => config.storage = parse_storage_block(node)?,
            "cache" => config.cache = parse_cache_block(node)?,
            "logging" => config.logging = parse_logging_block(node)?,
            other => return Err(ConfigError::UnknownBlock(other.to_string())),
        }
    }

    debug!(
        table = %config.app.table,
        storage_table = %config.storage.table,
        "Parsed KDL configuration"
    );
    Ok(config)
}
