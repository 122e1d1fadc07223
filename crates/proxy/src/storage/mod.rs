//! Certificate object storage
//!
//! Persists certificates, keys and ACME metadata as records in a flat
//! key-value table, presenting them as a `/`-separated hierarchy.
//!
//! # Key Layout
//!
//! ```text
//! certificates/
//! └── acme-v02.api.letsencrypt.org-directory/
//!     └── example.com/
//!         ├── example.com.crt
//!         ├── example.com.key
//!         └── example.com.json
//! ```
//!
//! Directories are never stored. A "directory" exists only while some key
//! starts with `prefix + "/"`, and listing always treats its prefix as a
//! branch: a record whose key equals the prefix is not part of its own
//! listing.

mod record;

pub use record::{KeyInfo, ObjectRecord, StorageError, KEY_ATTRIBUTE};

use std::sync::Arc;

use mirage_common::{run_cancellable, CancellationToken, MirageError, MirageResult};
use tracing::{debug, info, trace, warn};

use crate::kv::{Condition, Consistency, KvBackend, KvError};

/// Hierarchical object store over a [`KvBackend`] table
///
/// Holds no mutable state; clones share the backend and are safe to use from
/// any number of tasks.
#[derive(Clone)]
pub struct ObjectStore {
    backend: Arc<dyn KvBackend>,
    table: String,
}

impl ObjectStore {
    pub fn new(backend: Arc<dyn KvBackend>, table: impl Into<String>) -> Self {
        let table = table.into();
        info!(table = %table, "Initialized object storage");
        Self { backend, table }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn require_key(key: &str) -> MirageResult<()> {
        if key.is_empty() {
            Err(StorageError::EmptyKey.into())
        } else {
            Ok(())
        }
    }

    async fn read_record(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> MirageResult<ObjectRecord> {
        Self::require_key(key)?;

        let item = run_cancellable(
            cancel,
            self.backend.get_item(&self.table, key, Consistency::Strong),
        )
        .await?
        .ok_or_else(|| MirageError::NotFound(key.to_string()))?;

        Ok(ObjectRecord::from_document(item)?)
    }

    // =========================================================================
    // Record Operations
    // =========================================================================

    /// Create or replace the record under `key`
    pub async fn store(
        &self,
        key: &str,
        contents: &[u8],
        cancel: &CancellationToken,
    ) -> MirageResult<()> {
        let record = ObjectRecord::new(key, contents)?;

        run_cancellable(
            cancel,
            self.backend
                .put_item(&self.table, key, record.to_document(), &[]),
        )
        .await?;

        debug!(key = %key, size = record.size, "Stored object");
        Ok(())
    }

    /// Read the payload under `key`
    pub async fn load(&self, key: &str, cancel: &CancellationToken) -> MirageResult<Vec<u8>> {
        let record = self.read_record(key, cancel).await?;
        trace!(key = %key, size = record.contents.len(), "Loaded object");
        Ok(record.contents)
    }

    /// Remove the record under `key`
    ///
    /// # Errors
    ///
    /// [`MirageError::NotFound`] if there was no record to remove.
    pub async fn delete(&self, key: &str, cancel: &CancellationToken) -> MirageResult<()> {
        Self::require_key(key)?;

        let result = run_cancellable(cancel, async {
            self.backend
                .delete_item(&self.table, key, &[Condition::Exists])
                .await
                .map_err(|e| match e {
                    KvError::ConditionFailed => MirageError::NotFound(key.to_string()),
                    other => other.into(),
                })
        })
        .await;

        match result {
            Ok(()) => {
                debug!(key = %key, "Deleted object");
                Ok(())
            }
            Err(e) => {
                if e.is_not_found() {
                    debug!(key = %key, "Object to delete not found");
                }
                Err(e)
            }
        }
    }

    /// Whether a record exists under `key`
    ///
    /// Any failure, including cancellation, reads as `false`.
    pub async fn exists(&self, key: &str, cancel: &CancellationToken) -> bool {
        match self.read_record(key, cancel).await {
            Ok(_) => true,
            Err(MirageError::NotFound(_)) => false,
            Err(e) => {
                debug!(key = %key, error = %e, "Existence check failed");
                false
            }
        }
    }

    /// Size and modification time of the record under `key`
    pub async fn stat(&self, key: &str, cancel: &CancellationToken) -> MirageResult<KeyInfo> {
        let record = self.read_record(key, cancel).await?;
        Ok(KeyInfo::try_from(record)?)
    }

    // =========================================================================
    // Listing
    // =========================================================================

    /// Keys under the branch `prefix`
    ///
    /// Only keys starting with `prefix + "/"` are considered. Without
    /// `recursive`, keys with a further `/` after the prefix are dropped,
    /// so a branch whose children are all branches lists as empty.
    ///
    /// # Errors
    ///
    /// [`MirageError::NotFound`] when nothing is listed. A failed page or an
    /// undecodable record aborts the listing with that error.
    pub async fn list(
        &self,
        prefix: &str,
        recursive: bool,
        cancel: &CancellationToken,
    ) -> MirageResult<Vec<String>> {
        let branch = format!("{}/", prefix);
        let mut keys = Vec::new();
        let mut start_key: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = run_cancellable(
                cancel,
                self.backend
                    .scan(&self.table, &branch, start_key.as_deref(), None),
            )
            .await
            .inspect_err(|e| {
                warn!(prefix = %prefix, page = pages, error = %e, "Listing aborted");
            })?;
            pages += 1;

            for item in page.items {
                let record = ObjectRecord::from_document(item)?;
                let Some(rest) = record.key.strip_prefix(&branch) else {
                    continue;
                };
                if recursive || !rest.contains('/') {
                    keys.push(record.key);
                }
            }

            match page.last_evaluated_key {
                Some(next) => start_key = Some(next),
                None => break,
            }
        }

        trace!(
            prefix = %prefix,
            recursive = recursive,
            pages = pages,
            count = keys.len(),
            "Listed objects"
        );

        if keys.is_empty() {
            return Err(MirageError::NotFound(format!("no keys under '{}'", prefix)));
        }
        Ok(keys)
    }
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}
