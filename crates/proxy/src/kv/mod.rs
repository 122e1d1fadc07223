//! Key-value backend seam
//!
//! Every persistent component (object storage, lease locks, redirect rules)
//! talks to the backing store through [`KvBackend`]. The store is a set of
//! tables of JSON documents addressed by a single string partition key, with
//! single-key conditional writes and a paginated prefix scan.
//!
//! [`MemoryBackend`] is the in-process implementation.

mod memory;

pub use memory::{MemoryBackend, DEFAULT_PAGE_SIZE};

use async_trait::async_trait;
use mirage_common::MirageError;
use serde_json::{Map, Value};
use thiserror::Error;

/// A stored item
pub type Document = Map<String, Value>;

/// Errors reported by a backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KvError {
    /// A write or delete condition did not hold
    #[error("conditional check failed")]
    ConditionFailed,

    /// The request was rejected before reaching any item (e.g. empty key)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The backend could not be reached or failed mid-request
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl From<KvError> for MirageError {
    fn from(err: KvError) -> Self {
        match err {
            KvError::InvalidRequest(msg) => MirageError::InvalidArgument(msg),
            other => MirageError::Transport(other.to_string()),
        }
    }
}

/// Read consistency of a point read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Consistency {
    /// May be served by a lagging replica
    #[default]
    Eventual,
    /// Reflects every acknowledged write
    Strong,
}

/// Precondition on the current state of the item being written
///
/// A write carries a list of conditions; all of them must hold.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// The item must exist
    Exists,
    /// The item must not exist
    NotExists,
    /// The item must exist and `name` must equal `value`
    AttributeEquals { name: String, value: Value },
}

impl Condition {
    pub fn attribute_equals(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::AttributeEquals {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Whether the condition holds for the item currently stored
    pub fn holds(&self, current: Option<&Document>) -> bool {
        match self {
            Self::Exists => current.is_some(),
            Self::NotExists => current.is_none(),
            Self::AttributeEquals { name, value } => {
                current.and_then(|doc| doc.get(name)) == Some(value)
            }
        }
    }
}

/// One page of a prefix scan
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub items: Vec<Document>,
    /// Key to resume after; `None` on the last page
    pub last_evaluated_key: Option<String>,
}

/// Backing key-value store
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Point read of the item stored under `key`
    async fn get_item(
        &self,
        table: &str,
        key: &str,
        consistency: Consistency,
    ) -> Result<Option<Document>, KvError>;

    /// Replace the whole item under `key` if every condition holds
    async fn put_item(
        &self,
        table: &str,
        key: &str,
        document: Document,
        conditions: &[Condition],
    ) -> Result<(), KvError>;

    /// Remove the item under `key` if every condition holds
    ///
    /// Deleting an absent item without conditions succeeds.
    async fn delete_item(
        &self,
        table: &str,
        key: &str,
        conditions: &[Condition],
    ) -> Result<(), KvError>;

    /// Scan items whose key begins with `prefix`, resuming after
    /// `exclusive_start_key`
    ///
    /// `limit` caps the number of items examined for this page; a page may
    /// hold fewer matches than that and still not be the last one.
    async fn scan(
        &self,
        table: &str,
        prefix: &str,
        exclusive_start_key: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ScanPage, KvError>;
}
