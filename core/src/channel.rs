//! Owns the single backend channel for the active scope.
//!
//! All channel state lives behind one mutex. Nothing that can call back into consumer code (cache invalidation,
//! event hooks, signal and notice listeners) runs while it is held: handlers collect [`Effects`] under the lock
//! and run them after releasing it. Every spawned task (message pump, retry timer) captures the lease it was
//! started for and does nothing once that lease is no longer the active one.

use chrono::Utc;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use strum::Display;
use tenantsync_signals::{Broadcast, IntoListener, ListenerGuard, Mut, Read};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use ulid::Ulid;

use crate::config::SyncConfig;
use crate::descriptor::{EventHook, SubscriptionDescriptor};
use crate::error::SyncError;
use crate::feed::{ChangeFeed, ChannelControl, ChannelRequest, FeedConnection, FeedMessage, FeedStatus, PresenceMessage};
use crate::keys::CacheKey;
use crate::presence::{Presence, PresenceSession};
use crate::router::EventRouter;
use crate::scheduler::InvalidationScheduler;
use crate::status::{ConnectionState, ConnectionStatus, SyncNotice};
use crate::supervisor::{BackoffPolicy, Decision, ReconnectSupervisor};
use crate::types::{ChangeEvent, ScopeId, ScopeLease};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ChannelState {
    Closed,
    Connecting,
    Open,
    Degraded,
}

/// Refers to one activation of a channel. Goes `Closed` once its scope is closed or replaced.
#[derive(Clone)]
pub struct ChannelHandle {
    scope: ScopeId,
    id: Ulid,
    generation: u64,
    inner: Weak<Inner>,
}

impl ChannelHandle {
    pub fn scope(&self) -> &ScopeId { &self.scope }
    pub fn id(&self) -> Ulid { self.id }

    pub fn state(&self) -> ChannelState {
        let Some(inner) = self.inner.upgrade() else { return ChannelState::Closed };
        let state = inner.lock();
        match &state.active {
            Some(active) if active.lease.generation == self.generation => active.state,
            _ => ChannelState::Closed,
        }
    }

    pub fn is_open(&self) -> bool { self.state() == ChannelState::Open }
}

impl PartialEq for ChannelHandle {
    fn eq(&self, other: &Self) -> bool { self.id == other.id && self.generation == other.generation }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle").field("scope", &self.scope.to_string()).field("id", &self.id).field("generation", &self.generation).finish()
    }
}

struct LiveConnection {
    id: u64,
    control: Arc<dyn ChannelControl>,
    pump: JoinHandle<()>,
}

impl LiveConnection {
    fn close(self) {
        self.control.close();
        self.pump.abort();
    }
}

struct PendingRetry {
    seq: u64,
    timer: JoinHandle<()>,
}

struct ActiveChannel {
    lease: ScopeLease,
    id: Ulid,
    router: Arc<EventRouter>,
    state: ChannelState,
    supervisor: ReconnectSupervisor,
    connection: Option<LiveConnection>,
    retry: Option<PendingRetry>,
    next_seq: u64,
}

impl ActiveChannel {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn cancel_retry(&mut self) {
        if let Some(retry) = self.retry.take() {
            retry.timer.abort();
        }
    }
}

impl Drop for ActiveChannel {
    fn drop(&mut self) {
        self.cancel_retry();
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
    }
}

enum PresenceEffect {
    Link(PresenceSession, Arc<dyn ChannelControl>),
    Apply(PresenceSession, PresenceMessage),
    Changed,
}

/// Work collected under the channel lock and run after it is released. Everything that belongs to one channel
/// carries its lease or presence session and is dropped if that channel is gone by the time it runs.
#[derive(Default)]
struct Effects {
    presence: Vec<PresenceEffect>,
    invalidate: Option<(ScopeLease, Vec<CacheKey>)>,
    notices: Vec<SyncNotice>,
    hooks: Vec<(ScopeLease, EventHook, ChangeEvent)>,
}

#[derive(Default)]
struct State {
    generation: u64,
    active: Option<ActiveChannel>,
    shut_down: bool,
    status: ConnectionStatus,
}

struct Inner {
    feed: Arc<dyn ChangeFeed>,
    prefix: String,
    policy: BackoffPolicy,
    scheduler: InvalidationScheduler,
    presence: Presence,
    status: Mut<ConnectionStatus>,
    notices: Broadcast<SyncNotice>,
    state: Mutex<State>,
}

/// Opens, supervises and closes the one channel for the active scope
#[derive(Clone)]
pub struct ChannelManager(Arc<Inner>);

/// Does not keep the manager alive
#[derive(Clone)]
pub struct WeakChannelManager(Weak<Inner>);

impl WeakChannelManager {
    pub fn upgrade(&self) -> Option<ChannelManager> { self.0.upgrade().map(ChannelManager) }
}

impl ChannelManager {
    pub fn new(feed: Arc<dyn ChangeFeed>, scheduler: InvalidationScheduler, presence: Presence, config: &SyncConfig) -> Self {
        Self(Arc::new(Inner {
            feed,
            prefix: config.channel_prefix.clone(),
            policy: config.backoff_policy(),
            scheduler,
            presence,
            status: Mut::new(ConnectionStatus::default()),
            notices: Broadcast::new(),
            state: Mutex::new(State::default()),
        }))
    }

    pub fn downgrade(&self) -> WeakChannelManager { WeakChannelManager(Arc::downgrade(&self.0)) }

    /// Open the channel for `scope` carrying `descriptors`.
    ///
    /// A no-op returning the existing handle when `scope` is already open (the descriptors are not replaced).
    /// Any channel open for another scope is closed first. Failing to reach the backend is not an error here:
    /// the channel goes into reconnect and the failure shows up in the connection status.
    pub fn open(&self, scope: ScopeId, descriptors: Vec<SubscriptionDescriptor>) -> Result<ChannelHandle, SyncError> {
        if let Some(foreign) = descriptors.iter().find(|d| d.tenant_id() != scope.tenant_id()) {
            return Err(SyncError::ScopeMismatch { scope, descriptor: foreign.tenant_id().clone() });
        }

        let mut effects = Effects::default();
        let handle = {
            let mut guard = self.0.lock();
            let state = &mut *guard;
            if state.shut_down {
                return Err(SyncError::ShutDown);
            }
            if let Some(active) = state.active.as_ref().filter(|a| a.lease.scope == scope) {
                debug!("channel for {} already open", scope);
                return Ok(self.0.handle(active));
            }
            if let Some(previous) = state.active.take() {
                self.0.teardown(previous, &mut effects);
            }

            state.generation += 1;
            let lease = ScopeLease { scope: scope.clone(), generation: state.generation };
            let router = Arc::new(EventRouter::new(scope.tenant_id().clone(), descriptors));
            self.0.scheduler.bind(lease.clone());
            state.status = ConnectionStatus {
                state: ConnectionState::Connecting,
                scope: Some(scope.clone()),
                active_streams: router.streams(),
                ..ConnectionStatus::default()
            };

            let mut active = ActiveChannel {
                lease,
                id: Ulid::new(),
                router,
                state: ChannelState::Connecting,
                supervisor: ReconnectSupervisor::new(self.0.policy.clone()),
                connection: None,
                retry: None,
                next_seq: 0,
            };
            info!("opening channel {} for {} ({} descriptor(s))", active.id, scope, active.router.descriptors().len());
            active.supervisor.begin_connect();
            self.0.connect(&mut active, &mut state.status, &mut effects);
            let handle = self.0.handle(&active);
            state.active = Some(active);
            handle
        };
        self.0.run(effects);
        Ok(handle)
    }

    /// Close the channel for `scope`. Returns false, and does nothing, when that scope is not open.
    pub fn close(&self, scope: &ScopeId) -> bool {
        let mut effects = Effects::default();
        {
            let mut state = self.0.lock();
            if !state.active.as_ref().is_some_and(|a| a.lease.scope == *scope) {
                debug!("close {}: no open channel for this scope", scope);
                return false;
            }
            let Some(active) = state.active.take() else { return false };
            self.0.teardown(active, &mut effects);
            self.0.scheduler.clear();
            state.status = ConnectionStatus::default();
        }
        self.0.run(effects);
        true
    }

    /// Drop any backoff state and open a fresh connection for the active scope
    pub fn reconnect(&self) -> Result<ChannelHandle, SyncError> {
        let mut effects = Effects::default();
        let handle = {
            let mut guard = self.0.lock();
            let state = &mut *guard;
            if state.shut_down {
                return Err(SyncError::ShutDown);
            }
            let Some(active) = state.active.as_mut() else { return Err(SyncError::NoActiveScope) };
            info!("manual reconnect of {}", active.lease.scope);
            active.cancel_retry();
            if let Some(connection) = active.connection.take() {
                connection.close();
            }
            self.0.detach_presence(&mut effects);
            active.supervisor.reset();
            active.supervisor.begin_connect();
            state.status.state = ConnectionState::Connecting;
            state.status.attempt = 0;
            state.status.last_error = None;
            self.0.connect(active, &mut state.status, &mut effects);
            self.0.handle(active)
        };
        self.0.run(effects);
        Ok(handle)
    }

    /// Close whatever is open and refuse further opens
    pub fn shutdown(&self) {
        let mut effects = Effects::default();
        {
            let mut state = self.0.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            if let Some(active) = state.active.take() {
                self.0.teardown(active, &mut effects);
            }
            self.0.scheduler.clear();
            state.status = ConnectionStatus::default();
        }
        self.0.run(effects);
    }

    /// The active lease and every key its descriptors name without placeholders
    pub fn refresh_keys(&self) -> Result<(ScopeLease, Vec<CacheKey>), SyncError> {
        let state = self.0.lock();
        if state.shut_down {
            return Err(SyncError::ShutDown);
        }
        let active = state.active.as_ref().ok_or(SyncError::NoActiveScope)?;
        let mut keys: Vec<CacheKey> = Vec::new();
        for key in active.router.descriptors().iter().flat_map(SubscriptionDescriptor::static_keys) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        Ok((active.lease.clone(), keys))
    }

    pub fn active_scope(&self) -> Option<ScopeId> { self.0.lock().active.as_ref().map(|a| a.lease.scope.clone()) }

    pub fn status(&self) -> Read<ConnectionStatus> { self.0.status.read() }

    pub fn notices<L: IntoListener<SyncNotice>>(&self, listener: L) -> ListenerGuard<SyncNotice> { self.0.notices.listen(listener) }

    pub(crate) fn notify(&self, notice: SyncNotice) { self.0.notices.send(&notice) }

    /// Re-read scheduler figures into the published status
    pub fn publish_status(&self) { self.0.publish_status() }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn handle(self: &Arc<Self>, active: &ActiveChannel) -> ChannelHandle {
        ChannelHandle { scope: active.lease.scope.clone(), id: active.id, generation: active.lease.generation, inner: Arc::downgrade(self) }
    }

    fn teardown(&self, active: ActiveChannel, effects: &mut Effects) {
        info!("closing channel {} for {}", active.id, active.lease.scope);
        self.detach_presence(effects);
        drop(active);
    }

    fn detach_presence(&self, effects: &mut Effects) {
        if self.presence.detach() {
            effects.presence.push(PresenceEffect::Changed);
        }
    }

    fn is_active(&self, lease: &ScopeLease) -> bool { self.lock().active.as_ref().is_some_and(|a| a.lease == *lease) }

    fn connect(self: &Arc<Self>, active: &mut ActiveChannel, status: &mut ConnectionStatus, effects: &mut Effects) {
        let request = ChannelRequest {
            topic: active.lease.scope.topic(&self.prefix),
            scope: active.lease.scope.clone(),
            bindings: active.router.descriptors().iter().map(SubscriptionDescriptor::binding).collect(),
            presence_key: self.presence.own_key().unwrap_or_else(|| active.id.to_string()),
        };
        debug!("connecting {} with {} binding(s)", request.topic, request.bindings.len());
        active.state = ChannelState::Connecting;
        match self.feed.open(request) {
            Ok(FeedConnection { messages, control }) => {
                let id = active.next_seq();
                if self.presence.attach(PresenceSession { lease: active.lease.clone(), connection: id }) {
                    effects.presence.push(PresenceEffect::Changed);
                }
                let pump = self.spawn_pump(active.lease.clone(), id, messages);
                active.connection = Some(LiveConnection { id, control: Arc::from(control), pump });
            }
            Err(e) => {
                warn!("could not open channel for {}: {}", active.lease.scope, e);
                self.connection_lost(active, status, e.to_string(), effects);
            }
        }
    }

    fn spawn_pump(self: &Arc<Self>, lease: ScopeLease, connection: u64, mut messages: mpsc::UnboundedReceiver<FeedMessage>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                let Some(inner) = weak.upgrade() else { return };
                inner.handle_message(&lease, connection, message);
            }
            if let Some(inner) = weak.upgrade() {
                inner.handle_message(&lease, connection, FeedMessage::Status(FeedStatus::Error("change stream ended".into())));
            }
        })
    }

    fn spawn_retry(self: &Arc<Self>, lease: ScopeLease, seq: u64, delay: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.retry(&lease, seq);
            }
        })
    }

    fn retry(self: &Arc<Self>, lease: &ScopeLease, seq: u64) {
        let mut effects = Effects::default();
        {
            let mut guard = self.lock();
            let state = &mut *guard;
            let Some(active) = state.active.as_mut().filter(|a| a.lease == *lease) else {
                debug!("retry timer for {} fired after the scope closed", lease);
                return;
            };
            if active.retry.as_ref().map(|r| r.seq) != Some(seq) {
                debug!("retry timer for {} was superseded", lease);
                return;
            }
            // this is the timer task itself; dropping the handle does not cancel it
            active.retry = None;
            active.supervisor.retry_started();
            info!("reconnect attempt {}/{} for {}", active.supervisor.attempt(), self.policy.max_attempts, lease.scope);
            self.connect(active, &mut state.status, &mut effects);
        }
        self.run(effects);
    }

    fn handle_message(self: &Arc<Self>, lease: &ScopeLease, connection: u64, message: FeedMessage) {
        let mut effects = Effects::default();
        {
            let mut guard = self.lock();
            let state = &mut *guard;
            let Some(active) = state.active.as_mut().filter(|a| a.lease == *lease) else {
                trace!("dropping message for inactive scope {}", lease);
                return;
            };
            if active.connection.as_ref().map(|c| c.id) != Some(connection) {
                debug!("dropping message from superseded connection on {}", lease);
                return;
            }

            match message {
                FeedMessage::Status(FeedStatus::Subscribed) => {
                    let recovered = active.supervisor.on_connected();
                    active.state = ChannelState::Open;
                    mark_connected(&mut state.status);
                    info!("channel {} subscribed for {}", active.id, lease.scope);
                    if let Some(live) = &active.connection {
                        let session = PresenceSession { lease: lease.clone(), connection: live.id };
                        effects.presence.push(PresenceEffect::Link(session, live.control.clone()));
                    }
                    if recovered {
                        effects.notices.push(SyncNotice::Restored);
                    }
                }
                FeedMessage::Status(FeedStatus::Error(reason)) => self.connection_lost(active, &mut state.status, reason, &mut effects),
                FeedMessage::Status(FeedStatus::Closed) => {
                    self.connection_lost(active, &mut state.status, "channel closed by server".to_string(), &mut effects)
                }
                FeedMessage::Change(event) => {
                    let routed = active.router.route(&event);
                    state.status.dropped_events = active.router.dropped_events();
                    // only events for this channel's tenant count as traffic
                    if let Some(matches) = routed {
                        state.status.last_event_at = Some(Utc::now());
                        if active.supervisor.on_event() {
                            active.state = ChannelState::Open;
                            mark_connected(&mut state.status);
                            effects.notices.push(SyncNotice::Restored);
                        }
                        let mut keys = Vec::new();
                        for matched in matches {
                            keys.extend(matched.keys);
                            if let Some(hook) = matched.descriptor.hook() {
                                effects.hooks.push((lease.clone(), hook.clone(), event.clone()));
                            }
                        }
                        if !keys.is_empty() {
                            effects.invalidate = Some((lease.clone(), keys));
                        }
                    }
                }
                FeedMessage::Presence(message) => {
                    let session = PresenceSession { lease: lease.clone(), connection };
                    effects.presence.push(PresenceEffect::Apply(session, message));
                }
            }
        }
        self.run(effects);
    }

    fn connection_lost(self: &Arc<Self>, active: &mut ActiveChannel, status: &mut ConnectionStatus, reason: String, effects: &mut Effects) {
        if let Some(connection) = active.connection.take() {
            connection.close();
        }
        active.state = ChannelState::Degraded;
        self.detach_presence(effects);
        status.last_error = Some(reason.clone());

        match active.supervisor.on_failure() {
            Decision::Retry { attempt, delay } => {
                warn!("channel for {} lost ({}), reconnect {}/{} in {:?}", active.lease.scope, reason, attempt, self.policy.max_attempts, delay);
                let seq = active.next_seq();
                let timer = self.spawn_retry(active.lease.clone(), seq, delay);
                active.retry = Some(PendingRetry { seq, timer });
                status.state = ConnectionState::Reconnecting;
                status.attempt = attempt;
                effects.notices.push(SyncNotice::Reconnecting { attempt, max_attempts: self.policy.max_attempts, delay });
            }
            Decision::GiveUp { attempts } => {
                error!("channel for {} lost after {} reconnect attempt(s): {}", active.lease.scope, attempts, reason);
                status.state = ConnectionState::Failed;
                status.attempt = attempts;
                effects.notices.push(SyncNotice::ConnectionLost { reason });
            }
            Decision::Ignore => debug!("ignoring failure on {} ({}), supervisor is {}", active.lease.scope, reason, active.supervisor.state()),
        }
    }

    fn run(&self, effects: Effects) {
        for effect in effects.presence {
            match effect {
                PresenceEffect::Link(session, control) => self.presence.link(&session, control),
                PresenceEffect::Apply(session, message) => self.presence.apply(&session, message),
                PresenceEffect::Changed => self.presence.notify(),
            }
        }
        if let Some((lease, keys)) = effects.invalidate {
            self.scheduler.schedule(&lease, keys);
        }
        self.publish_status();
        for notice in effects.notices {
            self.notices.send(&notice);
        }
        for (lease, hook, event) in effects.hooks {
            if !self.is_active(&lease) {
                debug!("skipping hook for {} event, {} is no longer active", event, lease);
                continue;
            }
            hook(&event);
        }
    }

    fn publish_status(&self) {
        let snapshot = {
            let mut state = self.lock();
            state.status.pending_keys = self.scheduler.pending_keys();
            state.status.last_flush_at = self.scheduler.last_flush_at();
            state.status.clone()
        };
        if self.status.set_if_changed(snapshot.clone()) {
            debug!("connection status: {} (attempt {}, {} pending)", snapshot.state, snapshot.attempt, snapshot.pending_keys);
        }
    }
}

fn mark_connected(status: &mut ConnectionStatus) {
    status.state = ConnectionState::Connected;
    status.attempt = 0;
    status.last_error = None;
}
