use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tenantsync_signals::{IntoListener, ListenerGuard, Read};
use tracing::{debug, info};

use crate::cache::QueryCache;
use crate::channel::{ChannelHandle, ChannelManager};
use crate::config::SyncConfig;
use crate::descriptor::SubscriptionDescriptor;
use crate::error::SyncError;
use crate::feed::ChangeFeed;
use crate::keys::CacheKey;
use crate::presence::Presence;
use crate::scheduler::{FlushReport, InvalidationScheduler};
use crate::status::{ConnectionStatus, SyncNotice};
use crate::types::ScopeId;

struct Inner {
    config: SyncConfig,
    channels: ChannelManager,
    scheduler: InvalidationScheduler,
    presence: Presence,
    shut_down: AtomicBool,
    _flushes: ListenerGuard<FlushReport>,
}

/// The sync engine for one application. Create it at the root of the application and hand clones to the
/// screens that declare data interests.
///
/// Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct SyncEngine(Arc<Inner>);

impl SyncEngine {
    pub fn init(cache: Arc<dyn QueryCache>, feed: Arc<dyn ChangeFeed>, config: SyncConfig) -> Result<Self, SyncError> {
        config.validate()?;
        let scheduler = InvalidationScheduler::new(cache, config.debounce());
        let presence = Presence::new(config.stale_after());
        let channels = ChannelManager::new(feed, scheduler.clone(), presence.clone(), &config);

        let flushes = {
            let channels = channels.downgrade();
            scheduler.on_flush(move |report: &FlushReport| {
                if let Some(channels) = channels.upgrade() {
                    channels.publish_status();
                    channels.notify(SyncNotice::Flushed { keys: report.keys.clone() });
                }
            })
        };

        info!("sync engine started (debounce {:?}, {} reconnect attempts)", config.debounce(), config.backoff.max_attempts);
        Ok(Self(Arc::new(Inner { config, channels, scheduler, presence, shut_down: AtomicBool::new(false), _flushes: flushes })))
    }

    pub fn config(&self) -> &SyncConfig { &self.0.config }

    /// Declare the data interests for `scope`, replacing whatever scope was active
    pub fn subscribe(&self, scope: ScopeId, descriptors: Vec<SubscriptionDescriptor>) -> Result<ChannelHandle, SyncError> {
        self.check_running()?;
        self.0.channels.open(scope, descriptors)
    }

    /// Retract the interests for `scope`. Does nothing if it is not the active scope.
    pub fn unsubscribe(&self, scope: &ScopeId) { self.0.channels.close(scope); }

    pub fn active_scope(&self) -> Option<ScopeId> { self.0.channels.active_scope() }

    pub fn connection_status(&self) -> ConnectionStatus { self.0.channels.status().get() }

    pub fn status(&self) -> Read<ConnectionStatus> { self.0.channels.status() }

    pub fn notices<L: IntoListener<SyncNotice>>(&self, listener: L) -> ListenerGuard<SyncNotice> { self.0.channels.notices(listener) }

    /// Invalidate everything pending without waiting for the window to close
    pub fn flush_now(&self) -> Vec<CacheKey> {
        let keys = self.0.scheduler.flush_now();
        self.0.channels.publish_status();
        keys
    }

    /// Invalidate every fixed key of the active scope's descriptors right away
    pub fn refresh(&self) -> Result<Vec<CacheKey>, SyncError> {
        self.check_running()?;
        let (lease, keys) = self.0.channels.refresh_keys()?;
        debug!("manual refresh of {} ({} keys)", lease.scope, keys.len());
        self.0.scheduler.schedule(&lease, keys);
        Ok(self.flush_now())
    }

    /// Start over after the connection was reported lost
    pub fn reconnect(&self) -> Result<ChannelHandle, SyncError> {
        self.check_running()?;
        self.0.channels.reconnect()
    }

    pub fn presence(&self) -> Presence { self.0.presence.clone() }

    /// Close the channel and stop all timers. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.0.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("sync engine shutting down");
        self.0.channels.shutdown();
        self.0.presence.shutdown();
    }

    pub fn is_shut_down(&self) -> bool { self.0.shut_down.load(Ordering::SeqCst) }

    fn check_running(&self) -> Result<(), SyncError> {
        if self.is_shut_down() {
            return Err(SyncError::ShutDown);
        }
        Ok(())
    }
}
