use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::debug;

use crate::keys::CacheKey;

/// The query-cache layer. `invalidate` marks every cached result whose key starts with `prefix` as stale.
pub trait QueryCache: Send + Sync {
    fn invalidate(&self, prefix: &CacheKey);
}

impl<F> QueryCache for F
where F: Fn(&CacheKey) + Send + Sync
{
    fn invalidate(&self, prefix: &CacheKey) { self(prefix) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub stale: bool,
    pub fetches: u32,
}

/// In-memory cache that tracks freshness only. Reading a stale entry counts as a refetch.
#[derive(Debug, Default)]
pub struct MemoryQueryCache {
    entries: Mutex<BTreeMap<CacheKey, CacheEntry>>,
    invalidations: AtomicUsize,
}

impl MemoryQueryCache {
    pub fn new() -> Self { Self::default() }

    /// Read a query. Fetches when absent or stale, and returns the number of fetches so far.
    pub fn read(&self, key: &CacheKey) -> u32 {
        let mut entries = self.lock();
        let entry = entries.entry(key.clone()).or_insert(CacheEntry { stale: true, fetches: 0 });
        if entry.stale {
            entry.stale = false;
            entry.fetches += 1;
            debug!("MemoryQueryCache fetch {} (#{})", key, entry.fetches);
        }
        entry.fetches
    }

    pub fn entry(&self, key: &CacheKey) -> Option<CacheEntry> { self.lock().get(key).copied() }

    pub fn is_stale(&self, key: &CacheKey) -> bool { self.entry(key).map_or(true, |e| e.stale) }

    pub fn stale_keys(&self) -> Vec<CacheKey> { self.lock().iter().filter(|(_, e)| e.stale).map(|(k, _)| k.clone()).collect() }

    /// Number of `invalidate` calls received
    pub fn invalidation_count(&self) -> usize { self.invalidations.load(Ordering::SeqCst) }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<CacheKey, CacheEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl QueryCache for MemoryQueryCache {
    fn invalidate(&self, prefix: &CacheKey) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.lock();
        for (_, entry) in entries.range_mut(prefix.clone()..).take_while(|(key, _)| key.starts_with(prefix)) {
            entry.stale = true;
        }
    }
}
