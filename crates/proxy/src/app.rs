//! Application wiring
//!
//! Builds every component from one configuration and one backend, sharing a
//! single redirect cache between the resolver and the handler.

use std::sync::Arc;

use mirage_common::{CancellationToken, MirageResult};
use mirage_config::MirageConfig;
use tracing::info;

use crate::kv::KvBackend;
use crate::lock::{LeaseSettings, LockClient, LockManager};
use crate::permission::CertificatePermission;
use crate::redirect::{MirageHandler, RedirectCache, RedirectResolver};
use crate::storage::ObjectStore;

/// Running Mirage components
#[derive(Debug)]
pub struct MirageApp {
    config: MirageConfig,
    cache: Arc<RedirectCache>,
    storage: ObjectStore,
    locks: Arc<LockManager>,
    resolver: Arc<RedirectResolver>,
    handler: MirageHandler,
    permission: CertificatePermission,
}

impl MirageApp {
    /// Validate `config` and build the components over `backend`
    pub fn new(config: MirageConfig, backend: Arc<dyn KvBackend>) -> MirageResult<Self> {
        config.validate()?;

        let cache = Arc::new(RedirectCache::from_config(&config.cache));
        let storage = ObjectStore::new(Arc::clone(&backend), config.storage.table.clone());
        let locks = Arc::new(LockManager::new(LockClient::new(
            Arc::clone(&backend),
            LeaseSettings::from(&config.storage),
        )));
        let resolver = Arc::new(RedirectResolver::new(
            Arc::clone(&backend),
            config.app.table.clone(),
            config.app.key.clone(),
            Arc::clone(&cache),
        ));
        let handler = MirageHandler::new(Arc::clone(&resolver));
        let permission = CertificatePermission::new(backend, config.app.table.clone());

        info!(
            table = %config.app.table,
            storage_table = %config.storage.table,
            "Mirage initialized"
        );

        Ok(Self {
            config,
            cache,
            storage,
            locks,
            resolver,
            handler,
            permission,
        })
    }

    pub fn config(&self) -> &MirageConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<RedirectCache> {
        &self.cache
    }

    pub fn storage(&self) -> &ObjectStore {
        &self.storage
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn resolver(&self) -> &Arc<RedirectResolver> {
        &self.resolver
    }

    pub fn handler(&self) -> &MirageHandler {
        &self.handler
    }

    pub fn permission(&self) -> &CertificatePermission {
        &self.permission
    }

    /// Start background work (the cache sweeper)
    pub fn start(&self) {
        self.cache.start();
    }

    /// Stop background work and release every held lock
    pub async fn stop(&self, cancel: &CancellationToken) -> usize {
        self.cache.stop();
        let released = self.locks.release_all(cancel).await;
        info!(released_locks = released, "Mirage stopped");
        released
    }
}
