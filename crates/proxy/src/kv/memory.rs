//! In-process key-value backend
//!
//! Tables are ordered maps behind a `RwLock`, looked up through a `DashMap`
//! so independent tables never contend. Every conditional write checks and
//! applies under the table's write lock, which gives the same single-key
//! atomicity a remote store provides.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::trace;

use super::{Condition, Consistency, Document, KvBackend, KvError, ScanPage};

/// Items examined per scan page when the caller sets no limit
pub const DEFAULT_PAGE_SIZE: usize = 100;

type Table = Arc<RwLock<BTreeMap<String, Document>>>;

/// In-memory [`KvBackend`]
///
/// Reads are always strongly consistent. The backend can be switched offline
/// or told to fail scans after a number of pages, to exercise error paths of
/// the components built on top of it.
#[derive(Debug)]
pub struct MemoryBackend {
    tables: DashMap<String, Table>,
    page_size: usize,
    offline: AtomicBool,
    /// Remaining scan pages before scans start failing
    scan_budget: Mutex<Option<usize>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Create a backend that returns at most `page_size` items per scan page
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            tables: DashMap::new(),
            page_size: page_size.max(1),
            offline: AtomicBool::new(false),
            scan_budget: Mutex::new(None),
        }
    }

    /// Make every subsequent call fail with [`KvError::Unavailable`]
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Let `pages` more scan pages succeed, then fail every scan
    pub fn fail_scans_after(&self, pages: usize) {
        *self.scan_budget.lock() = Some(pages);
    }

    /// Number of items stored in `table`
    pub fn len(&self, table: &str) -> usize {
        self.tables
            .get(table)
            .map(|t| t.read().len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    fn table(&self, name: &str) -> Table {
        Arc::clone(self.tables.entry(name.to_string()).or_default().value())
    }

    fn check_online(&self) -> Result<(), KvError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(KvError::Unavailable("backend is offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn check_key(key: &str) -> Result<(), KvError> {
        if key.is_empty() {
            Err(KvError::InvalidRequest("partition key must not be empty".to_string()))
        } else {
            Ok(())
        }
    }

    fn check_conditions(current: Option<&Document>, conditions: &[Condition]) -> Result<(), KvError> {
        if conditions.iter().all(|c| c.holds(current)) {
            Ok(())
        } else {
            Err(KvError::ConditionFailed)
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get_item(
        &self,
        table: &str,
        key: &str,
        _consistency: Consistency,
    ) -> Result<Option<Document>, KvError> {
        self.check_online()?;
        Self::check_key(key)?;
        let table = self.table(table);
        let item = table.read().get(key).cloned();
        Ok(item)
    }

    async fn put_item(
        &self,
        table: &str,
        key: &str,
        document: Document,
        conditions: &[Condition],
    ) -> Result<(), KvError> {
        self.check_online()?;
        Self::check_key(key)?;
        let table = self.table(table);
        let mut items = table.write();
        Self::check_conditions(items.get(key), conditions)?;
        items.insert(key.to_string(), document);
        trace!(key = %key, "Stored item");
        Ok(())
    }

    async fn delete_item(
        &self,
        table: &str,
        key: &str,
        conditions: &[Condition],
    ) -> Result<(), KvError> {
        self.check_online()?;
        Self::check_key(key)?;
        let table = self.table(table);
        let mut items = table.write();
        Self::check_conditions(items.get(key), conditions)?;
        items.remove(key);
        trace!(key = %key, "Deleted item");
        Ok(())
    }

    async fn scan(
        &self,
        table: &str,
        prefix: &str,
        exclusive_start_key: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ScanPage, KvError> {
        self.check_online()?;
        {
            let mut budget = self.scan_budget.lock();
            match budget.as_mut() {
                Some(0) => return Err(KvError::Unavailable("scan failed".to_string())),
                Some(remaining) => *remaining -= 1,
                None => {}
            }
        }

        let page_size = limit.unwrap_or(self.page_size).clamp(1, self.page_size);
        let lower = match exclusive_start_key {
            Some(start) if start >= prefix => Bound::Excluded(start),
            _ => Bound::Included(prefix),
        };

        let table = self.table(table);
        let items = table.read();
        let mut matching = items
            .range::<str, _>((lower, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix));

        let page: Vec<(&String, &Document)> = matching.by_ref().take(page_size).collect();
        let has_more = matching.next().is_some();

        let last_evaluated_key = if has_more {
            page.last().map(|(key, _)| (*key).clone())
        } else {
            None
        };

        trace!(
            prefix = %prefix,
            items = page.len(),
            has_more = has_more,
            "Scanned page"
        );

        Ok(ScanPage {
            items: page.into_iter().map(|(_, doc)| doc.clone()).collect(),
            last_evaluated_key,
        })
    }
}
