//! Per-process lock bookkeeping
//!
//! The backend lock document decides who holds a lock across processes; the
//! map here only records which locks this process believes it holds. An
//! entry whose lease has lapsed no longer counts as held and is dropped the
//! next time it is looked up.
//!
//! Tasks of one process share ownership: concurrent `lock` calls for the
//! same name are serialized on a per-name gate, so the first acquires from
//! the backend and the rest find the entry and return at once.

use std::collections::HashMap;
use std::sync::Arc;

use mirage_common::{CancellationToken, MirageError, MirageResult};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::client::{LeaseHandle, LockClient};

/// Named locks held by this process
#[derive(Debug)]
pub struct LockManager {
    client: LockClient,
    locks: RwLock<HashMap<String, Arc<LeaseHandle>>>,
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockManager {
    pub fn new(client: LockClient) -> Self {
        Self {
            client,
            locks: RwLock::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    fn gate(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.gates.lock().entry(name.to_string()).or_default())
    }

    /// Remove `handle` from the map if it is still the entry for `name`
    fn evict(&self, name: &str, handle: &Arc<LeaseHandle>) {
        let mut locks = self.locks.write();
        if locks
            .get(name)
            .is_some_and(|current| Arc::ptr_eq(current, handle))
        {
            locks.remove(name);
        }
    }

    pub fn client(&self) -> &LockClient {
        &self.client
    }

    /// Take the lock `name`, waiting until it is free
    ///
    /// Returns immediately if this process already holds it. A lapsed entry
    /// is dropped and the lock acquired again.
    pub async fn lock(&self, name: &str, cancel: &CancellationToken) -> MirageResult<()> {
        if self.get_lock(name).is_some() {
            debug!(lock = %name, "Lock already held by this process");
            return Ok(());
        }

        let gate = self.gate(name);
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MirageError::LockUnavailable(name.to_string())),
            guard = gate.lock() => guard,
        };

        // Another task of this process may have acquired it meanwhile
        if self.get_lock(name).is_some() {
            debug!(lock = %name, "Lock acquired by another task of this process");
            return Ok(());
        }

        let handle = self.client.acquire(name, cancel).await?;
        self.locks
            .write()
            .insert(name.to_string(), Arc::new(handle));
        Ok(())
    }

    /// Release the lock `name`
    ///
    /// # Errors
    ///
    /// - [`MirageError::NotHeld`] if this process does not hold `name`
    /// - [`MirageError::LeaseLost`] if the lease lapsed; the entry is dropped
    /// - other release errors; the lease is kept alive and stays recorded
    pub async fn unlock(&self, name: &str, cancel: &CancellationToken) -> MirageResult<()> {
        let handle = self
            .locks
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| MirageError::NotHeld(name.to_string()))?;

        match self.client.release(&handle, cancel).await {
            Ok(()) => {
                self.evict(name, &handle);
                Ok(())
            }
            Err(MirageError::LeaseLost(lost)) => {
                self.evict(name, &handle);
                Err(MirageError::LeaseLost(lost))
            }
            Err(e) => Err(e),
        }
    }

    /// Handle of a lock this process still holds
    ///
    /// A lapsed entry reads as `None` and is dropped from the map.
    pub fn get_lock(&self, name: &str) -> Option<Arc<LeaseHandle>> {
        let handle = self.locks.read().get(name).cloned()?;
        if handle.is_held() {
            return Some(handle);
        }

        warn!(lock = %name, "Lease lapsed, dropping lock");
        self.evict(name, &handle);
        None
    }

    /// Names of every lock this process holds
    pub fn held_locks(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .locks
            .read()
            .iter()
            .filter(|(_, handle)| handle.is_held())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Release every held lock, returning how many were released
    ///
    /// Failures are logged and the affected locks stay recorded.
    pub async fn release_all(&self, cancel: &CancellationToken) -> usize {
        let held: Vec<(String, Arc<LeaseHandle>)> = self
            .locks
            .read()
            .iter()
            .map(|(name, handle)| (name.clone(), Arc::clone(handle)))
            .collect();

        let mut released = 0;
        for (name, handle) in held {
            match self.client.release(&handle, cancel).await {
                Ok(()) => {
                    self.evict(&name, &handle);
                    released += 1;
                }
                Err(MirageError::LeaseLost(_)) => {
                    warn!(lock = %name, "Lease lapsed before shutdown");
                    self.evict(&name, &handle);
                }
                Err(e) => warn!(lock = %name, error = %e, "Failed to release lock"),
            }
        }

        if released > 0 {
            info!(released = released, "Released held locks");
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvBackend, MemoryBackend};
    use crate::lock::LeaseSettings;
    use std::time::Duration;

    fn manager(backend: &Arc<MemoryBackend>) -> LockManager {
        let settings = LeaseSettings {
            table: "locks".to_string(),
            lease_duration: Duration::from_millis(500),
            heartbeat_period: Duration::from_millis(100),
            refresh_period: Duration::from_millis(10),
        };
        LockManager::new(LockClient::new(backend.clone(), settings))
    }

    #[tokio::test]
    async fn test_lock_unlock() {
        let backend = Arc::new(MemoryBackend::new());
        let manager = manager(&backend);
        let cancel = CancellationToken::new();

        manager.lock("a", &cancel).await.unwrap();
        assert!(manager.get_lock("a").is_some());
        assert_eq!(manager.held_locks(), vec!["a"]);

        manager.unlock("a", &cancel).await.unwrap();
        assert!(manager.get_lock("a").is_none());
        assert!(backend.is_empty("locks"));
    }

    #[tokio::test]
    async fn test_lock_is_reentrant() {
        let backend = Arc::new(MemoryBackend::new());
        let manager = manager(&backend);
        let cancel = CancellationToken::new();

        manager.lock("a", &cancel).await.unwrap();
        let first = manager.get_lock("a").unwrap();
        manager.lock("a", &cancel).await.unwrap();

        assert!(Arc::ptr_eq(&first, &manager.get_lock("a").unwrap()));
        manager.unlock("a", &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_unlock_without_lock() {
        let backend = Arc::new(MemoryBackend::new());
        let manager = manager(&backend);
        let cancel = CancellationToken::new();

        assert_eq!(
            manager.unlock("x", &cancel).await,
            Err(MirageError::NotHeld("x".to_string()))
        );
    }

    #[tokio::test]
    async fn test_failed_unlock_keeps_entry() {
        let backend = Arc::new(MemoryBackend::new());
        let manager = manager(&backend);
        let cancel = CancellationToken::new();

        manager.lock("a", &cancel).await.unwrap();
        backend.set_offline(true);

        assert!(matches!(
            manager.unlock("a", &cancel).await,
            Err(MirageError::Transport(_))
        ));
        assert!(manager.get_lock("a").is_some());
    }

    #[tokio::test]
    async fn test_release_all() {
        let backend = Arc::new(MemoryBackend::new());
        let manager = manager(&backend);
        let cancel = CancellationToken::new();

        manager.lock("a", &cancel).await.unwrap();
        manager.lock("b", &cancel).await.unwrap();

        assert_eq!(manager.release_all(&cancel).await, 2);
        assert!(manager.held_locks().is_empty());
        assert!(backend.is_empty("locks"));
    }

    #[tokio::test]
    async fn test_cancelled_lock() {
        let backend = Arc::new(MemoryBackend::new());
        let holder = manager(&backend);
        let waiter = manager(&backend);
        let cancel = CancellationToken::new();

        holder.lock("a", &cancel).await.unwrap();

        let waiter_cancel = CancellationToken::new();
        waiter_cancel.cancel();
        assert_eq!(
            waiter.lock("a", &waiter_cancel).await,
            Err(MirageError::LockUnavailable("a".to_string()))
        );
        assert!(waiter.get_lock("a").is_none());

        holder.unlock("a", &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_unlock_keeps_lock_exclusive() {
        let backend = Arc::new(MemoryBackend::new());
        let first = manager(&backend);
        let second = manager(&backend);
        let cancel = CancellationToken::new();

        first.lock("x", &cancel).await.unwrap();
        backend.set_offline(true);
        assert!(first.unlock("x", &cancel).await.is_err());
        backend.set_offline(false);

        first.lock("x", &cancel).await.unwrap();
        let waiter_cancel = CancellationToken::new();
        let trigger = waiter_cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            trigger.cancel();
        });
        assert_eq!(
            second.lock("x", &waiter_cancel).await,
            Err(MirageError::LockUnavailable("x".to_string()))
        );
        assert!(first.get_lock("x").is_some());

        first.unlock("x", &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_lapsed_lease_is_dropped_and_reacquired() {
        let backend = Arc::new(MemoryBackend::new());
        let manager = manager(&backend);
        let cancel = CancellationToken::new();

        manager.lock("a", &cancel).await.unwrap();
        let lapsed = manager.get_lock("a").unwrap();
        backend.set_offline(true);
        tokio::time::sleep(Duration::from_millis(800)).await;
        backend.set_offline(false);

        assert!(lapsed.is_lost());
        assert!(manager.get_lock("a").is_none());
        assert!(manager.held_locks().is_empty());

        // The stale document must expire before this owner can take it again
        manager.lock("a", &cancel).await.unwrap();
        let fresh = manager.get_lock("a").unwrap();
        assert!(!Arc::ptr_eq(&lapsed, &fresh));
        manager.unlock("a", &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_unlock_of_lapsed_lease() {
        let backend = Arc::new(MemoryBackend::new());
        let manager = manager(&backend);
        let cancel = CancellationToken::new();

        manager.lock("a", &cancel).await.unwrap();
        backend.delete_item("locks", "LOCK-a", &[]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(
            manager.unlock("a", &cancel).await,
            Err(MirageError::LeaseLost("a".to_string()))
        );
        assert_eq!(
            manager.unlock("a", &cancel).await,
            Err(MirageError::NotHeld("a".to_string()))
        );
    }

    #[tokio::test]
    async fn test_concurrent_lock_in_one_process() {
        let backend = Arc::new(MemoryBackend::new());
        let manager = Arc::new(manager(&backend));
        let cancel = CancellationToken::new();

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let started = tokio::time::Instant::now();
                    manager.lock("a", &cancel).await.unwrap();
                    started.elapsed()
                })
            })
            .collect();

        for task in tasks {
            // Neither task waits out a lease
            assert!(task.await.unwrap() < Duration::from_millis(250));
        }
        assert_eq!(manager.held_locks(), vec!["a"]);
        assert_eq!(backend.len("locks"), 1);

        manager.unlock("a", &cancel).await.unwrap();
        assert!(backend.is_empty("locks"));
    }
}
