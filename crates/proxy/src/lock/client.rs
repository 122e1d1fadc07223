//! Lease locks over backend conditional writes
//!
//! A lock is a document in the lock table:
//!
//! ```text
//! { "Key": "LOCK-<name>", "Owner": "<uuid>", "RecordVersionNumber": "<uuid>", "LeaseDurationMs": 15000 }
//! ```
//!
//! The holder rewrites `RecordVersionNumber` on every heartbeat. A waiting
//! client never compares clocks: it considers the lease expired once it has
//! seen the same version for a full lease duration, and then takes the lock
//! with a write conditioned on that version.

use std::sync::Arc;
use std::time::Duration;

use mirage_common::{
    run_cancellable, CancellationToken, MirageError, MirageResult, OwnerId, RecordVersion,
};
use mirage_config::StorageConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::kv::{Condition, Consistency, Document, KvBackend, KvError};

/// Prefix of lock document keys
pub const LOCK_KEY_PREFIX: &str = "LOCK-";

const OWNER_ATTRIBUTE: &str = "Owner";
const VERSION_ATTRIBUTE: &str = "RecordVersionNumber";

/// Key of the lock document for `name`
pub fn lock_key(name: &str) -> String {
    format!("{}{}", LOCK_KEY_PREFIX, name)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockDocument {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Owner")]
    owner: String,
    #[serde(rename = "RecordVersionNumber")]
    version: String,
    #[serde(rename = "LeaseDurationMs")]
    lease_duration_ms: u64,
}

impl LockDocument {
    fn into_document(self) -> Document {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Document::new(),
        }
    }

    fn from_document(key: &str, document: Document) -> MirageResult<Self> {
        serde_json::from_value(Value::Object(document))
            .map_err(|e| MirageError::Decode(format!("lock document '{}': {}", key, e)))
    }
}

/// Timing of a [`LockClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseSettings {
    pub table: String,
    pub lease_duration: Duration,
    pub heartbeat_period: Duration,
    /// Pause between attempts while the lock is held elsewhere
    pub refresh_period: Duration,
}

impl From<&StorageConfig> for LeaseSettings {
    fn from(config: &StorageConfig) -> Self {
        Self {
            table: config.lock_table().to_string(),
            lease_duration: config.lease_duration(),
            heartbeat_period: config.heartbeat_period(),
            refresh_period: config.refresh_period(),
        }
    }
}

#[derive(Debug)]
struct LeaseState {
    version: RecordVersion,
    /// Last time the backend accepted a write of `version`
    renewed_at: Instant,
    lost: bool,
    released: bool,
}

#[derive(Debug)]
struct Heartbeat {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// A held lease
///
/// Keeps the lease alive with a background heartbeat until released.
/// Dropping the handle stops the heartbeat without deleting the lock
/// document, so the lease lapses after one lease duration.
#[derive(Debug)]
pub struct LeaseHandle {
    name: String,
    key: String,
    owner: OwnerId,
    lease_duration: Duration,
    state: Arc<Mutex<LeaseState>>,
    heartbeat: Mutex<Option<Heartbeat>>,
}

impl LeaseHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// Version last written by this holder
    pub fn version(&self) -> RecordVersion {
        self.state.lock().version.clone()
    }

    /// True once the lease was taken over or could not be renewed within
    /// one lease duration; the lease can no longer be trusted
    pub fn is_lost(&self) -> bool {
        self.state.lock().lost
    }

    /// Whether this handle still guarantees exclusive ownership
    ///
    /// False once the lease is lost, released, or its heartbeat task died.
    pub fn is_held(&self) -> bool {
        {
            let state = self.state.lock();
            if state.lost || state.released {
                return false;
            }
        }
        // No heartbeat while a release is in flight
        self.heartbeat
            .lock()
            .as_ref()
            .is_none_or(|heartbeat| !heartbeat.task.is_finished())
    }

    async fn stop_heartbeat(&self) {
        let heartbeat = self.heartbeat.lock().take();
        let Some(heartbeat) = heartbeat else {
            return;
        };

        heartbeat.stop.cancel();
        // Wait out an in-flight heartbeat so the version read afterwards is final
        if let Err(e) = heartbeat.task.await {
            warn!(lock = %self.name, error = %e, "Lease heartbeat task failed");
        }
    }
}

impl Drop for LeaseHandle {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.get_mut().take() {
            heartbeat.task.abort();
        }
    }
}

/// Lease lock client for one process
pub struct LockClient {
    backend: Arc<dyn KvBackend>,
    settings: LeaseSettings,
    owner: OwnerId,
}

impl LockClient {
    pub fn new(backend: Arc<dyn KvBackend>, settings: LeaseSettings) -> Self {
        let owner = OwnerId::new();
        info!(
            owner = %owner,
            table = %settings.table,
            lease_ms = settings.lease_duration.as_millis() as u64,
            "Created lock client"
        );
        Self {
            backend,
            settings,
            owner,
        }
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn settings(&self) -> &LeaseSettings {
        &self.settings
    }

    /// Acquire the lock `name`, waiting while another owner holds it
    ///
    /// # Errors
    ///
    /// - [`MirageError::LockUnavailable`] if `cancel` fires before the lock
    ///   is acquired
    /// - transport and decode errors from reading the lock document
    pub async fn acquire(&self, name: &str, cancel: &CancellationToken) -> MirageResult<LeaseHandle> {
        let key = lock_key(name);
        let unavailable = |e: MirageError| match e {
            MirageError::Cancelled => MirageError::LockUnavailable(name.to_string()),
            other => other,
        };

        // Version of the foreign lease being watched and when it was first seen
        let mut watched: Option<(String, Instant)> = None;

        loop {
            let current = run_cancellable(
                cancel,
                self.backend
                    .get_item(&self.settings.table, &key, Consistency::Strong),
            )
            .await
            .map_err(unavailable)?;

            let attempt = match current {
                None => Some(Vec::from([Condition::NotExists])),
                Some(document) => {
                    let holder = LockDocument::from_document(&key, document)?;
                    let lease = Duration::from_millis(holder.lease_duration_ms);
                    match watched {
                        Some((ref version, since)) if *version == holder.version => {
                            if since.elapsed() >= lease {
                                debug!(
                                    lock = %name,
                                    holder = %holder.owner,
                                    "Lease expired, taking over lock"
                                );
                                Some(vec![Condition::attribute_equals(
                                    VERSION_ATTRIBUTE,
                                    holder.version.clone(),
                                )])
                            } else {
                                None
                            }
                        }
                        _ => {
                            trace!(lock = %name, holder = %holder.owner, "Lock is held, watching lease");
                            watched = Some((holder.version, Instant::now()));
                            None
                        }
                    }
                }
            };

            if let Some(conditions) = attempt {
                let claimed = self
                    .try_claim(name, &key, &conditions, cancel)
                    .await
                    .map_err(unavailable)?;
                if let Some(handle) = claimed {
                    return Ok(handle);
                }
                watched = None;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(lock = %name, "Lock acquisition cancelled");
                    return Err(MirageError::LockUnavailable(name.to_string()));
                }
                _ = tokio::time::sleep(self.settings.refresh_period) => {}
            }
        }
    }

    /// One conditional write claiming the lock; `None` if someone else won
    async fn try_claim(
        &self,
        name: &str,
        key: &str,
        conditions: &[Condition],
        cancel: &CancellationToken,
    ) -> MirageResult<Option<LeaseHandle>> {
        let version = RecordVersion::new();
        let document = self.document(key, &version);

        let result = run_cancellable(cancel, async {
            match self
                .backend
                .put_item(&self.settings.table, key, document, conditions)
                .await
            {
                Ok(()) => Ok(true),
                Err(KvError::ConditionFailed) => Ok(false),
                Err(e) => Err(MirageError::from(e)),
            }
        })
        .await;

        match result {
            Ok(true) => {
                info!(lock = %name, owner = %self.owner, "Acquired lock");
                Ok(Some(self.spawn_lease(name, key, version)))
            }
            Ok(false) => {
                trace!(lock = %name, "Lost race for lock");
                Ok(None)
            }
            Err(MirageError::Cancelled) => Err(MirageError::LockUnavailable(name.to_string())),
            Err(e) => Err(e),
        }
    }

    fn document(&self, key: &str, version: &RecordVersion) -> Document {
        LockDocument {
            key: key.to_string(),
            owner: self.owner.as_str().to_string(),
            version: version.as_str().to_string(),
            lease_duration_ms: self.settings.lease_duration.as_millis() as u64,
        }
        .into_document()
    }

    fn spawn_lease(&self, name: &str, key: &str, version: RecordVersion) -> LeaseHandle {
        let state = Arc::new(Mutex::new(LeaseState {
            version,
            renewed_at: Instant::now(),
            lost: false,
            released: false,
        }));
        let heartbeat = self.start_heartbeat(name, key, &state);

        LeaseHandle {
            name: name.to_string(),
            key: key.to_string(),
            owner: self.owner.clone(),
            lease_duration: self.settings.lease_duration,
            state,
            heartbeat: Mutex::new(Some(heartbeat)),
        }
    }

    fn start_heartbeat(&self, name: &str, key: &str, state: &Arc<Mutex<LeaseState>>) -> Heartbeat {
        let stop = CancellationToken::new();
        let task = tokio::spawn(run_heartbeat(
            Arc::clone(&self.backend),
            self.settings.clone(),
            self.owner.clone(),
            name.to_string(),
            key.to_string(),
            Arc::clone(state),
            stop.clone(),
        ));
        Heartbeat { stop, task }
    }

    /// Release a held lease by deleting its lock document
    ///
    /// If the delete fails for any other reason than a lost lease, the
    /// heartbeat is restarted and the lease stays held.
    ///
    /// # Errors
    ///
    /// - [`MirageError::LeaseLost`] if the lease already lapsed, or the
    ///   document was removed or taken over since the last heartbeat
    /// - transport errors and [`MirageError::Cancelled`] from the delete
    pub async fn release(&self, handle: &LeaseHandle, cancel: &CancellationToken) -> MirageResult<()> {
        handle.stop_heartbeat().await;
        if handle.is_lost() {
            return Err(MirageError::LeaseLost(handle.name.clone()));
        }

        let version = handle.version();
        let conditions = [
            Condition::attribute_equals(OWNER_ATTRIBUTE, handle.owner.as_str()),
            Condition::attribute_equals(VERSION_ATTRIBUTE, version.as_str()),
        ];

        let result = run_cancellable(cancel, async {
            self.backend
                .delete_item(&self.settings.table, &handle.key, &conditions)
                .await
                .map_err(|e| match e {
                    KvError::ConditionFailed => MirageError::LeaseLost(handle.name.clone()),
                    other => other.into(),
                })
        })
        .await;

        match result {
            Ok(()) => {
                handle.state.lock().released = true;
                info!(lock = %handle.name, "Released lock");
                Ok(())
            }
            Err(MirageError::LeaseLost(name)) => {
                handle.state.lock().lost = true;
                warn!(lock = %name, "Lease was lost before release");
                Err(MirageError::LeaseLost(name))
            }
            Err(e) => {
                warn!(lock = %handle.name, error = %e, "Release failed, keeping lease alive");
                let heartbeat = self.start_heartbeat(&handle.name, &handle.key, &handle.state);
                *handle.heartbeat.lock() = Some(heartbeat);
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for LockClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockClient")
            .field("owner", &self.owner)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

async fn run_heartbeat(
    backend: Arc<dyn KvBackend>,
    settings: LeaseSettings,
    owner: OwnerId,
    name: String,
    key: String,
    state: Arc<Mutex<LeaseState>>,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(settings.heartbeat_period) => {}
        }

        let (current, renewed_at) = {
            let state = state.lock();
            (state.version.clone(), state.renewed_at)
        };
        let next = RecordVersion::new();
        let document = LockDocument {
            key: key.clone(),
            owner: owner.as_str().to_string(),
            version: next.as_str().to_string(),
            lease_duration_ms: settings.lease_duration.as_millis() as u64,
        }
        .into_document();
        let conditions = [
            Condition::attribute_equals(OWNER_ATTRIBUTE, owner.as_str()),
            Condition::attribute_equals(VERSION_ATTRIBUTE, current.as_str()),
        ];

        match backend
            .put_item(&settings.table, &key, document, &conditions)
            .await
        {
            Ok(()) => {
                trace!(lock = %name, "Lease heartbeat");
                let mut state = state.lock();
                state.version = next;
                state.renewed_at = Instant::now();
            }
            Err(KvError::ConditionFailed) => {
                warn!(lock = %name, "Lease taken over, stopping heartbeat");
                state.lock().lost = true;
                return;
            }
            Err(e) if renewed_at.elapsed() >= settings.lease_duration => {
                warn!(lock = %name, error = %e, "Lease could not be renewed in time, giving up");
                state.lock().lost = true;
                return;
            }
            Err(e) => {
                warn!(lock = %name, error = %e, "Lease heartbeat failed, retrying");
            }
        }
    }
}
