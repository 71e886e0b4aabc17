//! Coalesces cache keys from routed events into one invalidation per key per window.
//!
//! The window is fixed: it opens with the first key after a flush and is never extended, so a storm of events
//! still sees invalidation within one window of its first event.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tenantsync_signals::{Broadcast, IntoListener, ListenerGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cache::QueryCache;
use crate::keys::CacheKey;
use crate::types::ScopeLease;

#[derive(Debug, Clone, PartialEq)]
pub struct FlushReport {
    pub lease: ScopeLease,
    pub keys: Vec<CacheKey>,
    pub flushed_at: DateTime<Utc>,
}

#[derive(Debug)]
struct PendingBatch {
    keys: BTreeSet<CacheKey>,
    window_started_at: Instant,
}

struct WindowTimer {
    seq: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct State {
    lease: Option<ScopeLease>,
    batch: Option<PendingBatch>,
    timer: Option<WindowTimer>,
    next_timer: u64,
    last_flush_at: Option<DateTime<Utc>>,
}

struct Inner {
    cache: Arc<dyn QueryCache>,
    window: Duration,
    state: Mutex<State>,
    flushed: Broadcast<FlushReport>,
}

#[derive(Clone)]
pub struct InvalidationScheduler(Arc<Inner>);

impl InvalidationScheduler {
    pub fn new(cache: Arc<dyn QueryCache>, window: Duration) -> Self {
        Self(Arc::new(Inner { cache, window, state: Mutex::new(State::default()), flushed: Broadcast::new() }))
    }

    /// Accept keys for `lease` only, dropping anything still pending for a previous scope
    pub fn bind(&self, lease: ScopeLease) {
        let mut state = self.0.lock();
        state.discard_batch();
        state.lease = Some(lease);
    }

    /// Drop the pending batch and stop accepting keys
    pub fn clear(&self) {
        let mut state = self.0.lock();
        if let Some(batch) = &state.batch {
            debug!("discarding {} pending key(s)", batch.keys.len());
        }
        state.discard_batch();
        state.lease = None;
    }

    /// Merge keys into the pending batch, starting the window timer if it is not already running
    pub fn schedule(&self, lease: &ScopeLease, keys: impl IntoIterator<Item = CacheKey>) {
        let mut state = self.0.lock();
        if state.lease.as_ref() != Some(lease) {
            debug!("ignoring keys for inactive scope {}", lease);
            return;
        }
        let mut keys = keys.into_iter().peekable();
        if keys.peek().is_none() {
            return;
        }

        let batch = state.batch.get_or_insert_with(|| PendingBatch { keys: BTreeSet::new(), window_started_at: Instant::now() });
        batch.keys.extend(keys);
        let deadline = batch.window_started_at + self.0.window;

        if state.timer.is_none() {
            state.next_timer += 1;
            let seq = state.next_timer;
            let weak = Arc::downgrade(&self.0);
            let lease = lease.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                if let Some(inner) = Weak::upgrade(&weak) {
                    inner.flush(Some((&lease, seq)));
                }
            });
            state.timer = Some(WindowTimer { seq, handle });
        }
    }

    /// Cancel the window and invalidate everything pending now. Returns the flushed keys.
    pub fn flush_now(&self) -> Vec<CacheKey> { self.0.flush(None) }

    pub fn pending_keys(&self) -> usize { self.0.lock().batch.as_ref().map_or(0, |b| b.keys.len()) }

    pub fn last_flush_at(&self) -> Option<DateTime<Utc>> { self.0.lock().last_flush_at }

    pub fn on_flush<L: IntoListener<FlushReport>>(&self, listener: L) -> ListenerGuard<FlushReport> { self.0.flushed.listen(listener) }
}

impl State {
    fn discard_batch(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
        }
        self.batch = None;
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// `fired` is the lease and sequence number a window timer captured; a manual flush passes `None`
    fn flush(&self, fired: Option<(&ScopeLease, u64)>) -> Vec<CacheKey> {
        let (lease, batch, flushed_at) = {
            let mut state = self.lock();
            let Some(lease) = state.lease.clone() else { return Vec::new() };
            match fired {
                Some((expected, _)) if *expected != lease => {
                    debug!("window timer for {} fired after scope changed to {}", expected, lease);
                    return Vec::new();
                }
                Some((_, seq)) if state.timer.as_ref().map(|t| t.seq) != Some(seq) => {
                    debug!("window timer {} for {} was superseded", seq, lease);
                    return Vec::new();
                }
                // this is the timer task itself, so drop rather than abort the handle
                Some(_) => drop(state.timer.take()),
                None => {
                    if let Some(timer) = state.timer.take() {
                        timer.handle.abort();
                    }
                }
            }
            let Some(batch) = state.batch.take() else { return Vec::new() };
            let flushed_at = Utc::now();
            state.last_flush_at = Some(flushed_at);
            (lease, batch, flushed_at)
        };

        let keys: Vec<CacheKey> = batch.keys.into_iter().collect();
        info!("flushing {} key(s) for {} after {:?}", keys.len(), lease, batch.window_started_at.elapsed());
        for key in &keys {
            self.cache.invalidate(key);
        }
        self.flushed.send(&FlushReport { lease, keys: keys.clone(), flushed_at });
        keys
    }
}
