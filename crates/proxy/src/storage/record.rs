//! Object record wire format
//!
//! ```text
//! {
//!   "Key": "certificates/acme/example.com/example.com.crt",
//!   "Contents": "<base64>",
//!   "Modified": "2024-05-01T12:00:00Z",
//!   "Size": 1234
//! }
//! ```
//!
//! `Contents` and `Modified` may be missing from stored items. A missing
//! `Contents` reads as an empty payload.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use mirage_common::MirageError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::kv::Document;

/// Partition key attribute of the object table
pub const KEY_ATTRIBUTE: &str = "Key";

/// Errors decoding or building a record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("key must not be empty")]
    EmptyKey,

    #[error("malformed record: {0}")]
    Malformed(String),

    #[error("record '{key}' has invalid contents: {reason}")]
    InvalidContents { key: String, reason: String },

    #[error("record '{0}' has no modification time")]
    MissingModified(String),
}

impl From<StorageError> for MirageError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::EmptyKey => MirageError::InvalidArgument(err.to_string()),
            other => MirageError::Decode(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireRecord {
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    contents: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    modified: Option<DateTime<Utc>>,
    #[serde(default)]
    size: Option<u64>,
}

/// A stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    pub key: String,
    pub contents: Vec<u8>,
    pub modified: Option<DateTime<Utc>>,
    pub size: u64,
}

impl ObjectRecord {
    /// Build a record for a write, stamping size and modification time
    pub fn new(key: &str, contents: &[u8]) -> Result<Self, StorageError> {
        if key.is_empty() {
            return Err(StorageError::EmptyKey);
        }
        Ok(Self {
            key: key.to_string(),
            contents: contents.to_vec(),
            modified: Some(Utc::now()),
            size: contents.len() as u64,
        })
    }

    pub fn to_document(&self) -> Document {
        let wire = WireRecord {
            key: self.key.clone(),
            contents: (!self.contents.is_empty()).then(|| STANDARD.encode(&self.contents)),
            modified: self.modified,
            size: Some(self.size),
        };

        match serde_json::to_value(wire) {
            Ok(Value::Object(map)) => map,
            // A struct of strings and integers always serializes to an object
            _ => Document::new(),
        }
    }

    pub fn from_document(document: Document) -> Result<Self, StorageError> {
        let wire: WireRecord = serde_json::from_value(Value::Object(document))
            .map_err(|e| StorageError::Malformed(e.to_string()))?;

        let contents = match wire.contents {
            Some(encoded) => {
                STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| StorageError::InvalidContents {
                        key: wire.key.clone(),
                        reason: e.to_string(),
                    })?
            }
            None => Vec::new(),
        };
        let size = wire.size.unwrap_or(contents.len() as u64);

        Ok(Self {
            key: wire.key,
            contents,
            modified: wire.modified,
            size,
        })
    }
}

/// Metadata returned by `stat`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    pub key: String,
    pub modified: DateTime<Utc>,
    pub size: u64,
    /// Always true; the store only ever describes leaf records
    pub is_terminal: bool,
}

impl TryFrom<ObjectRecord> for KeyInfo {
    type Error = StorageError;

    fn try_from(record: ObjectRecord) -> Result<Self, Self::Error> {
        let modified = record
            .modified
            .ok_or_else(|| StorageError::MissingModified(record.key.clone()))?;
        Ok(Self {
            key: record.key,
            modified,
            size: record.size,
            is_terminal: true,
        })
    }
}
