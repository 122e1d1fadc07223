//! Per-hostname redirect rule lookup
//!
//! Serves rules from the [`RedirectCache`] and falls back to a point read of
//! the redirect table on a miss. Lookup failures of any kind resolve to "no
//! rule" so the caller passes the request on.

use std::sync::Arc;

use mirage_common::{run_cancellable, CancellationToken, MirageError, MirageResult};
use tracing::{debug, trace, warn};

use super::cache::RedirectCache;
use super::rule::RedirectRule;
use crate::kv::{Consistency, KvBackend};

/// Resolves hostnames to redirect rules
pub struct RedirectResolver {
    backend: Arc<dyn KvBackend>,
    table: String,
    /// Attribute holding the hostname in stored rules
    key_attribute: String,
    cache: Arc<RedirectCache>,
}

impl RedirectResolver {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        table: impl Into<String>,
        key_attribute: impl Into<String>,
        cache: Arc<RedirectCache>,
    ) -> Self {
        Self {
            backend,
            table: table.into(),
            key_attribute: key_attribute.into(),
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<RedirectCache> {
        &self.cache
    }

    /// Rule for `hostname`, or `None` if there is none or it cannot be read
    ///
    /// `force_refresh` drops any cached rule before looking it up.
    pub async fn resolve(
        &self,
        hostname: &str,
        force_refresh: bool,
        cancel: &CancellationToken,
    ) -> Option<RedirectRule> {
        if force_refresh {
            debug!(hostname = %hostname, "Purging cached redirect");
            self.cache.delete(hostname);
        } else if let Some(rule) = self.cache.get(hostname) {
            trace!(hostname = %hostname, "Redirect cache hit");
            return Some(rule);
        }

        match self.fetch(hostname, cancel).await {
            Ok(rule) => {
                self.cache.set(hostname, rule.clone());
                Some(rule)
            }
            Err(MirageError::NotFound(_)) => {
                trace!(hostname = %hostname, "No redirect configured");
                None
            }
            Err(e) => {
                warn!(
                    hostname = %hostname,
                    error = %e,
                    kind = e.kind(),
                    "Redirect lookup failed"
                );
                None
            }
        }
    }

    /// Read and decode the stored rule, bypassing the cache
    pub async fn fetch(&self, hostname: &str, cancel: &CancellationToken) -> MirageResult<RedirectRule> {
        if hostname.is_empty() {
            return Err(MirageError::InvalidArgument("hostname must not be empty".to_string()));
        }

        let item = run_cancellable(
            cancel,
            self.backend
                .get_item(&self.table, hostname, Consistency::Eventual),
        )
        .await?
        .ok_or_else(|| MirageError::NotFound(hostname.to_string()))?;

        let stored_hostname = item
            .get(&self.key_attribute)
            .and_then(|value| value.as_str())
            .map(str::to_string);

        let mut rule = RedirectRule::from_document(item)?;
        if rule.hostname.is_empty() {
            rule.hostname = stored_hostname.unwrap_or_else(|| hostname.to_string());
        }

        debug!(
            hostname = %hostname,
            kind = %rule.kind,
            rewrites = rule.rewrites.len(),
            "Loaded redirect"
        );
        Ok(rule)
    }
}

impl std::fmt::Debug for RedirectResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectResolver")
            .field("table", &self.table)
            .field("key_attribute", &self.key_attribute)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryBackend;
    use serde_json::{json, Value};
    use std::time::Duration;

    const TABLE: &str = "redirects";

    fn setup() -> (Arc<MemoryBackend>, RedirectResolver) {
        let backend = Arc::new(MemoryBackend::new());
        let cache = Arc::new(RedirectCache::new(100, Duration::from_secs(60)));
        let resolver = RedirectResolver::new(backend.clone(), TABLE, "Hostname", cache);
        (backend, resolver)
    }

    async fn put_rule(backend: &MemoryBackend, rule: &RedirectRule) {
        backend
            .put_item(TABLE, &rule.hostname, rule.to_document(), &[])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_miss_reads_backend_and_caches() {
        let (backend, resolver) = setup();
        let cancel = CancellationToken::new();
        let rule = RedirectRule::new("www.example.com", "example.com");
        put_rule(&backend, &rule).await;

        assert_eq!(resolver.resolve("www.example.com", false, &cancel).await, Some(rule.clone()));
        assert_eq!(resolver.cache().get("www.example.com"), Some(rule));
    }

    #[tokio::test]
    async fn test_hit_is_served_from_cache() {
        let (backend, resolver) = setup();
        let cancel = CancellationToken::new();
        put_rule(&backend, &RedirectRule::new("a.com", "old.com")).await;
        resolver.resolve("a.com", false, &cancel).await.unwrap();

        put_rule(&backend, &RedirectRule::new("a.com", "new.com")).await;
        let cached = resolver.resolve("a.com", false, &cancel).await.unwrap();
        assert_eq!(cached.location, "old.com");

        let refreshed = resolver.resolve("a.com", true, &cancel).await.unwrap();
        assert_eq!(refreshed.location, "new.com");
        assert_eq!(resolver.cache().get("a.com").unwrap().location, "new.com");
    }

    #[tokio::test]
    async fn test_force_refresh_of_removed_rule() {
        let (backend, resolver) = setup();
        let cancel = CancellationToken::new();
        put_rule(&backend, &RedirectRule::new("a.com", "old.com")).await;
        resolver.resolve("a.com", false, &cancel).await.unwrap();

        backend.delete_item(TABLE, "a.com", &[]).await.unwrap();
        assert!(resolver.resolve("a.com", true, &cancel).await.is_none());
        assert!(resolver.cache().get("a.com").is_none());
    }

    #[tokio::test]
    async fn test_failures_resolve_to_none() {
        let (backend, resolver) = setup();
        let cancel = CancellationToken::new();

        assert!(resolver.resolve("missing.com", false, &cancel).await.is_none());
        assert!(resolver.resolve("", false, &cancel).await.is_none());

        let Value::Object(item) = json!({ "Hostname": "bad.com", "Rewrites": "nope" }) else {
            unreachable!()
        };
        backend.put_item(TABLE, "bad.com", item, &[]).await.unwrap();
        assert!(resolver.resolve("bad.com", false, &cancel).await.is_none());
        assert!(matches!(
            resolver.fetch("bad.com", &cancel).await,
            Err(MirageError::Decode(_))
        ));

        put_rule(&backend, &RedirectRule::new("a.com", "b.com")).await;
        backend.set_offline(true);
        assert!(resolver.resolve("a.com", false, &cancel).await.is_none());

        backend.set_offline(false);
        cancel.cancel();
        assert!(resolver.resolve("a.com", false, &cancel).await.is_none());
        assert_eq!(
            resolver.fetch("a.com", &cancel).await,
            Err(MirageError::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_hostname_taken_from_key_attribute() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = Arc::new(RedirectCache::new(100, Duration::from_secs(60)));
        let resolver = RedirectResolver::new(backend.clone(), TABLE, "Host", cache);
        let cancel = CancellationToken::new();

        let Value::Object(item) = json!({ "Host": "a.com", "Location": "b.com" }) else {
            unreachable!()
        };
        backend.put_item(TABLE, "a.com", item, &[]).await.unwrap();

        let rule = resolver.resolve("a.com", false, &cancel).await.unwrap();
        assert_eq!(rule.hostname, "a.com");
        assert!(resolver.cache().get("a.com").is_some());
    }

    #[tokio::test]
    async fn test_cached_under_requested_hostname() {
        let (backend, resolver) = setup();
        let cancel = CancellationToken::new();
        let stored = RedirectRule::new("victim.com", "evil.example");
        backend
            .put_item(TABLE, "a.com", stored.to_document(), &[])
            .await
            .unwrap();

        let rule = resolver.resolve("a.com", false, &cancel).await.unwrap();
        assert_eq!(rule.location, "evil.example");
        assert!(resolver.cache().get("a.com").is_some());
        assert!(resolver.cache().get("victim.com").is_none());
        assert!(resolver.resolve("victim.com", false, &cancel).await.is_none());
    }
}
