//! Bounded TTL cache of redirect rules
//!
//! Entries expire after the cache TTL and are evicted oldest-admitted first
//! once the cache is over capacity. Expired entries read as misses right
//! away; the optional background sweeper only reclaims their memory.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use mirage_common::CancellationToken;
use mirage_config::CacheConfig;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use super::rule::RedirectRule;

#[derive(Debug, Clone)]
struct CacheEntry {
    rule: RedirectRule,
    expires_at: Instant,
    /// Admission number, matched against the admission queue
    admitted: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// Hostnames in admission order; stale slots are skipped on eviction
    admissions: VecDeque<(String, u64)>,
    next_admission: u64,
}

impl CacheInner {
    fn insert(
        &mut self,
        hostname: String,
        rule: RedirectRule,
        expires_at: Instant,
        capacity: usize,
    ) -> usize {
        let admitted = self.next_admission;
        self.next_admission += 1;

        self.admissions.push_back((hostname.clone(), admitted));
        self.entries.insert(
            hostname,
            CacheEntry {
                rule,
                expires_at,
                admitted,
            },
        );

        let mut evicted = 0;
        while self.entries.len() > capacity {
            let Some((hostname, admission)) = self.admissions.pop_front() else {
                break;
            };
            if self
                .entries
                .get(&hostname)
                .is_some_and(|entry| entry.admitted == admission)
            {
                self.entries.remove(&hostname);
                evicted += 1;
            }
        }

        // Overwrites and deletes leave stale slots behind
        if self.admissions.len() > capacity.saturating_mul(2).max(16) {
            let entries = &self.entries;
            self.admissions.retain(|(hostname, admission)| {
                entries
                    .get(hostname)
                    .is_some_and(|entry| entry.admitted == *admission)
            });
        }

        evicted
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }
}

struct Sweeper {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// Hostname-keyed redirect rule cache
///
/// # Thread Safety
///
/// All state sits behind one internal mutex; callers share the cache
/// through an `Arc` without further locking.
pub struct RedirectCache {
    inner: Arc<Mutex<CacheInner>>,
    capacity: usize,
    ttl: Duration,
    sweep_interval: Duration,
    sweeper: Mutex<Option<Sweeper>>,
}

impl RedirectCache {
    /// Create a cache holding at most `capacity` rules for `ttl` each
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner::default())),
            capacity: capacity.max(1),
            ttl,
            sweep_interval: Duration::from_secs(60),
            sweeper: Mutex::new(None),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity, config.ttl()).with_sweep_interval(config.sweep_interval())
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached rule for `hostname`, if present and unexpired
    pub fn get(&self, hostname: &str) -> Option<RedirectRule> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let entry = inner.entries.get(hostname)?;
        if entry.expires_at > now {
            return Some(entry.rule.clone());
        }

        inner.entries.remove(hostname);
        trace!(hostname = %hostname, "Cached redirect expired");
        None
    }

    /// Cache `rule` for requests to `hostname` with the default TTL
    ///
    /// The entry is keyed by `hostname` alone; the rule's own `hostname`
    /// field plays no part in lookups.
    pub fn set(&self, hostname: &str, rule: RedirectRule) {
        self.set_with_ttl(hostname, rule, self.ttl);
    }

    pub fn set_with_ttl(&self, hostname: &str, rule: RedirectRule, ttl: Duration) {
        let evicted = self.inner.lock().insert(
            hostname.to_string(),
            rule,
            Instant::now() + ttl,
            self.capacity,
        );

        if evicted > 0 {
            debug!(hostname = %hostname, evicted = evicted, "Cache over capacity, evicted oldest");
        } else {
            trace!(hostname = %hostname, "Cached redirect");
        }
    }

    pub fn delete(&self, hostname: &str) {
        if self.inner.lock().entries.remove(hostname).is_some() {
            trace!(hostname = %hostname, "Invalidated cached redirect");
        }
    }

    /// Number of stored entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        self.inner.lock().purge_expired(Instant::now())
    }

    // =========================================================================
    // Background sweeper
    // =========================================================================

    /// Start the background sweeper; does nothing if it is already running
    pub fn start(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let stop = CancellationToken::new();
        let token = stop.clone();
        let period = self.sweep_interval;

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = inner.lock().purge_expired(Instant::now());
                        if removed > 0 {
                            debug!(removed = removed, "Swept expired redirects");
                        }
                    }
                }
            }
        });

        info!(
            capacity = self.capacity,
            ttl_secs = self.ttl.as_secs(),
            sweep_interval_secs = period.as_secs(),
            "Started redirect cache sweeper"
        );
        *sweeper = Some(Sweeper { stop, task });
    }

    /// Stop the background sweeper
    pub fn stop(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.stop.cancel();
            sweeper.task.abort();
            info!("Stopped redirect cache sweeper");
        }
    }

    pub fn is_running(&self) -> bool {
        self.sweeper.lock().is_some()
    }
}

impl Drop for RedirectCache {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.task.abort();
        }
    }
}

impl std::fmt::Debug for RedirectCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectCache")
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(hostname: &str) -> RedirectRule {
        RedirectRule::new(hostname, "example.com")
    }

    #[test]
    fn test_set_get() {
        let cache = RedirectCache::new(10, Duration::from_secs(60));
        cache.set("a.com", rule("a.com"));

        assert_eq!(cache.get("a.com"), Some(rule("a.com")));
        assert_eq!(cache.get("b.com"), None);
    }

    #[test]
    fn test_delete() {
        let cache = RedirectCache::new(10, Duration::from_secs(60));
        cache.set("a.com", rule("a.com"));
        cache.delete("a.com");

        assert_eq!(cache.get("a.com"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_keyed_by_lookup_hostname() {
        let cache = RedirectCache::new(10, Duration::from_secs(60));
        cache.set("a.com", rule("victim.com"));

        assert!(cache.get("a.com").is_some());
        assert_eq!(cache.get("victim.com"), None);
    }

    #[test]
    fn test_overwrite() {
        let cache = RedirectCache::new(10, Duration::from_secs(60));
        cache.set("a.com", rule("a.com"));
        cache.set("a.com", RedirectRule::new("a.com", "other.com"));

        assert_eq!(cache.get("a.com").unwrap().location, "other.com");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evicts_oldest_admitted() {
        let cache = RedirectCache::new(2, Duration::from_secs(60));
        cache.set("a.com", rule("a.com"));
        cache.set("b.com", rule("b.com"));
        cache.set("c.com", rule("c.com"));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a.com"), None);
        assert!(cache.get("b.com").is_some());
        assert!(cache.get("c.com").is_some());
    }

    #[test]
    fn test_readmission_moves_entry_to_back() {
        let cache = RedirectCache::new(2, Duration::from_secs(60));
        cache.set("a.com", rule("a.com"));
        cache.set("b.com", rule("b.com"));
        cache.set("a.com", rule("a.com"));
        cache.set("c.com", rule("c.com"));

        assert!(cache.get("a.com").is_some());
        assert_eq!(cache.get("b.com"), None);
        assert!(cache.get("c.com").is_some());
    }

    #[test]
    fn test_admission_queue_stays_bounded() {
        let cache = RedirectCache::new(4, Duration::from_secs(60));
        for _ in 0..1000 {
            cache.set("a.com", rule("a.com"));
        }
        assert_eq!(cache.len(), 1);
        assert!(cache.inner.lock().admissions.len() <= 16);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = RedirectCache::new(10, Duration::from_secs(60));
        cache.set_with_ttl("a.com", rule("a.com"), Duration::from_millis(20));
        cache.set("b.com", rule("b.com"));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("a.com"), None);
        assert!(cache.get("b.com").is_some());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let cache = RedirectCache::new(10, Duration::from_millis(20));
        cache.set("a.com", rule("a.com"));
        cache.set("b.com", rule("b.com"));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.purge_expired(), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_sweeper() {
        let cache = RedirectCache::new(10, Duration::from_millis(20))
            .with_sweep_interval(Duration::from_millis(10));
        cache.start();
        cache.start();
        assert!(cache.is_running());

        cache.set("a.com", rule("a.com"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.is_empty());

        cache.stop();
        assert!(!cache.is_running());
    }
}
