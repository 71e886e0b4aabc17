#![allow(unused)]

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tenantsync_connector_local::LocalChangeFeed;
use tenantsync_core::signals::ListenerGuard;
use tenantsync_core::{CacheKey, ChangeEvent, MutationKind, QueryCache, SyncConfig, SyncEngine, SyncNotice};
use tokio::time::Instant;
use tracing::Level;

pub use anyhow::Result;

// Initialize tracing for tests
#[ctor::ctor]
fn init_tracing() { tracing_subscriber::fmt().with_max_level(Level::INFO).with_test_writer().init(); }

/// A query cache that records every invalidation and when it happened
#[derive(Default)]
pub struct RecordingCache {
    calls: Mutex<Vec<(CacheKey, Instant)>>,
}

impl QueryCache for RecordingCache {
    fn invalidate(&self, prefix: &CacheKey) { self.calls.lock().unwrap().push((prefix.clone(), Instant::now())); }
}

impl RecordingCache {
    pub fn keys(&self) -> Vec<String> { self.calls.lock().unwrap().iter().map(|(k, _)| k.to_string()).collect() }

    pub fn calls(&self) -> Vec<(String, Instant)> { self.calls.lock().unwrap().iter().map(|(k, at)| (k.to_string(), *at)).collect() }

    pub fn count(&self, key: &str) -> usize { self.keys().iter().filter(|k| *k == key).count() }

    pub fn take(&self) -> Vec<String> { std::mem::take(&mut *self.calls.lock().unwrap()).into_iter().map(|(k, _)| k.to_string()).collect() }
}

/// One engine wired to a local feed, with its cache calls and notices recorded
pub struct Client {
    pub engine: SyncEngine,
    pub cache: Arc<RecordingCache>,
    notices: Arc<Mutex<Vec<(SyncNotice, Instant)>>>,
    _notices: ListenerGuard<SyncNotice>,
}

impl Client {
    pub fn new(feed: &LocalChangeFeed) -> Result<Self> { Self::with_config(feed, SyncConfig::default()) }

    pub fn with_config(feed: &LocalChangeFeed, config: SyncConfig) -> Result<Self> {
        let cache = Arc::new(RecordingCache::default());
        let engine = SyncEngine::init(cache.clone(), Arc::new(feed.clone()), config)?;
        let notices: Arc<Mutex<Vec<(SyncNotice, Instant)>>> = Arc::new(Mutex::new(Vec::new()));
        let guard = {
            let notices = notices.clone();
            engine.notices(move |notice: &SyncNotice| notices.lock().unwrap().push((notice.clone(), Instant::now())))
        };
        Ok(Self { engine, cache, notices, _notices: guard })
    }

    pub fn notices(&self) -> Vec<SyncNotice> { self.notices.lock().unwrap().iter().map(|(n, _)| n.clone()).collect() }

    pub fn timed_notices(&self) -> Vec<(SyncNotice, Instant)> { self.notices.lock().unwrap().clone() }

    /// Notices other than flush reports
    pub fn connection_notices(&self) -> Vec<SyncNotice> {
        self.notices().into_iter().filter(|n| !matches!(n, SyncNotice::Flushed { .. })).collect()
    }
}

/// Let spawned tasks (message pumps, timers that are due) run without advancing the clock
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

pub fn farmer_update(tenant: &str) -> ChangeEvent { ChangeEvent::new("farmers", MutationKind::Update).tenant(tenant) }

pub fn topic(tenant: &str) -> String { format!("tenant_realtime_{}", tenant) }

pub fn millis(ms: u64) -> Duration { Duration::from_millis(ms) }
