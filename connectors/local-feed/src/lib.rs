use scopeql::evaluate_predicate;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tenantsync_core::feed::StreamBinding;
use tenantsync_core::{
    ChangeEvent, ChangeFeed, ChannelControl, ChannelRequest, FeedConnection, FeedError, FeedMessage, FeedStatus, PresenceMessage, PresenceState,
    ScopeId,
};

/// A call the client made against the feed, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedCall {
    Open(String),
    Close(String),
}

struct LocalChannel {
    topic: String,
    scope: ScopeId,
    bindings: Vec<StreamBinding>,
    presence_key: String,
    tracked: Option<PresenceState>,
    sender: mpsc::UnboundedSender<FeedMessage>,
}

impl LocalChannel {
    fn send(&self, message: FeedMessage) {
        if self.sender.send(message).is_err() {
            debug!("LocalChangeFeed: receiver for {} is gone", self.topic);
        }
    }

    fn wants(&self, event: &ChangeEvent) -> bool {
        self.bindings.iter().any(|binding| {
            binding.stream == event.stream
                && binding.mask.contains(event.kind)
                && evaluate_predicate(&event.fields, &binding.filter).unwrap_or(false)
        })
    }
}

struct Hub {
    next_id: u64,
    channels: BTreeMap<u64, LocalChannel>,
    journal: Vec<FeedCall>,
    failing_opens: Vec<FeedError>,
    auto_confirm: bool,
}

impl Hub {
    fn on_topic<'a>(&'a self, topic: &'a str) -> impl Iterator<Item = &'a LocalChannel> + 'a {
        self.channels.values().filter(move |c| c.topic == topic)
    }

    fn roster(&self, topic: &str) -> Vec<PresenceState> { self.on_topic(topic).filter_map(|c| c.tracked.clone()).collect() }

    fn broadcast_presence(&self, topic: &str, message: PresenceMessage) {
        for channel in self.on_topic(topic) {
            channel.send(FeedMessage::Presence(message.clone()));
        }
    }
}

/// An in-process change-notification backend.
///
/// Filters events against each channel's bindings the way a hosted backend would, relays presence between
/// channels on the same topic, and records every open and close so callers can check channel lifecycles.
#[derive(Clone)]
pub struct LocalChangeFeed(Arc<Mutex<Hub>>);

impl Default for LocalChangeFeed {
    fn default() -> Self { Self::new() }
}

impl LocalChangeFeed {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Hub { next_id: 0, channels: BTreeMap::new(), journal: Vec::new(), failing_opens: Vec::new(), auto_confirm: true })))
    }

    /// Channels stay unconfirmed until [`LocalChangeFeed::confirm`] is called
    pub fn manual_confirm(self) -> Self {
        self.hub().auto_confirm = false;
        self
    }

    /// Deliver an event to every channel with a binding that accepts it. Returns how many channels got it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let hub = self.hub();
        let mut delivered = 0;
        for channel in hub.channels.values().filter(|c| c.wants(&event)) {
            channel.send(FeedMessage::Change(event.clone()));
            delivered += 1;
        }
        debug!("LocalChangeFeed: {} delivered to {} channel(s)", event, delivered);
        delivered
    }

    /// Deliver an event to the channels on `topic` without consulting their filters
    pub fn inject(&self, topic: &str, event: ChangeEvent) -> usize { self.send_to(topic, FeedMessage::Change(event)) }

    pub fn confirm(&self, topic: &str) -> usize { self.send_to(topic, FeedMessage::Status(FeedStatus::Subscribed)) }

    /// Report an error on every channel for `topic` and forget them server-side
    pub fn fail_channel(&self, topic: &str, reason: &str) -> usize {
        let mut hub = self.hub();
        let ids: Vec<u64> = hub.channels.iter().filter(|(_, c)| c.topic == topic).map(|(id, _)| *id).collect();
        for id in &ids {
            if let Some(channel) = hub.channels.remove(id) {
                warn!("LocalChangeFeed: failing channel {} ({})", topic, reason);
                channel.send(FeedMessage::Status(FeedStatus::Error(reason.to_string())));
            }
        }
        ids.len()
    }

    /// Drop every channel for `topic` without any status, as if the connection vanished
    pub fn drop_channel(&self, topic: &str) -> usize {
        let mut hub = self.hub();
        let before = hub.channels.len();
        hub.channels.retain(|_, c| c.topic != topic);
        before - hub.channels.len()
    }

    /// Make the next `count` opens fail with [`FeedError::Unavailable`]
    pub fn fail_next_opens(&self, count: usize) {
        let mut hub = self.hub();
        hub.failing_opens.extend((0..count).map(|_| FeedError::Unavailable("local feed offline".into())));
    }

    pub fn journal(&self) -> Vec<FeedCall> { self.hub().journal.clone() }

    pub fn open_topics(&self) -> Vec<String> { self.hub().channels.values().map(|c| c.topic.clone()).collect() }

    pub fn open_scopes(&self) -> Vec<ScopeId> { self.hub().channels.values().map(|c| c.scope.clone()).collect() }

    /// Presence keys of the channels on `topic`
    pub fn members(&self, topic: &str) -> Vec<String> { self.hub().on_topic(topic).map(|c| c.presence_key.clone()).collect() }

    pub fn roster(&self, topic: &str) -> Vec<PresenceState> { self.hub().roster(topic) }

    fn send_to(&self, topic: &str, message: FeedMessage) -> usize {
        let hub = self.hub();
        let mut sent = 0;
        for channel in hub.on_topic(topic) {
            channel.send(message.clone());
            sent += 1;
        }
        sent
    }

    fn hub(&self) -> MutexGuard<'_, Hub> {
        match self.0.lock() {
            Ok(hub) => hub,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl ChangeFeed for LocalChangeFeed {
    fn open(&self, request: ChannelRequest) -> Result<FeedConnection, FeedError> {
        let mut hub = self.hub();
        hub.journal.push(FeedCall::Open(request.topic.clone()));
        if !hub.failing_opens.is_empty() {
            let error = hub.failing_opens.remove(0);
            warn!("LocalChangeFeed: refusing {}: {}", request.topic, error);
            return Err(error);
        }

        let (sender, messages) = mpsc::unbounded_channel();
        hub.next_id += 1;
        let id = hub.next_id;
        info!("LocalChangeFeed: open {} with {} binding(s)", request.topic, request.bindings.len());

        let roster = hub.roster(&request.topic);
        let channel = LocalChannel {
            topic: request.topic.clone(),
            scope: request.scope,
            bindings: request.bindings,
            presence_key: request.presence_key,
            tracked: None,
            sender,
        };
        if hub.auto_confirm {
            channel.send(FeedMessage::Status(FeedStatus::Subscribed));
        }
        if !roster.is_empty() {
            channel.send(FeedMessage::Presence(PresenceMessage::Sync(roster)));
        }
        hub.channels.insert(id, channel);

        let control = LocalControl { hub: Arc::downgrade(&self.0), id, topic: request.topic, closed: AtomicBool::new(false) };
        Ok(FeedConnection { messages, control: Box::new(control) })
    }
}

struct LocalControl {
    hub: Weak<Mutex<Hub>>,
    id: u64,
    topic: String,
    closed: AtomicBool,
}

impl LocalControl {
    fn with_hub<R>(&self, f: impl FnOnce(&mut Hub) -> R) -> Option<R> {
        let hub = self.hub.upgrade()?;
        let mut guard = match hub.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Some(f(&mut guard))
    }
}

impl ChannelControl for LocalControl {
    fn track(&self, state: PresenceState) -> Result<(), FeedError> {
        self.with_hub(|hub| {
            let channel = hub.channels.get_mut(&self.id).ok_or(FeedError::Closed)?;
            channel.tracked = Some(state.clone());
            hub.broadcast_presence(&self.topic, PresenceMessage::Join(state));
            Ok(())
        })
        .unwrap_or(Err(FeedError::Closed))
    }

    fn untrack(&self) -> Result<(), FeedError> {
        self.with_hub(|hub| {
            let channel = hub.channels.get_mut(&self.id).ok_or(FeedError::Closed)?;
            if let Some(state) = channel.tracked.take() {
                hub.broadcast_presence(&self.topic, PresenceMessage::Leave { key: state.key });
            }
            Ok(())
        })
        .unwrap_or(Err(FeedError::Closed))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.with_hub(|hub| {
            hub.journal.push(FeedCall::Close(self.topic.clone()));
            if let Some(channel) = hub.channels.remove(&self.id) {
                debug!("LocalChangeFeed: close {}", channel.topic);
                if let Some(state) = channel.tracked {
                    hub.broadcast_presence(&self.topic, PresenceMessage::Leave { key: state.key });
                }
            }
        });
    }
}

impl Drop for LocalControl {
    fn drop(&mut self) { self.close() }
}
