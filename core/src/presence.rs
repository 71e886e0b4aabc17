//! Who else is looking at this tenant, and which fields they are editing.
//!
//! Presence is soft state. A peer can vanish without a leave message, so field locks are advisory and expire
//! once a peer has not been heard from for `stale_after`. Every query fails open: no presence data means
//! nothing is locked.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tenantsync_signals::{Broadcast, IntoListener, ListenerGuard};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::feed::{ChannelControl, PresenceMessage};
use crate::types::ScopeLease;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collaborator {
    pub user_id: String,
    pub display_name: String,
}

impl Collaborator {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), display_name: display_name.into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    /// The screen or record being viewed
    pub view: Option<String>,
    /// The named field being edited, if any
    pub editing: Option<String>,
}

impl Activity {
    pub fn viewing(view: impl Into<String>) -> Self { Self { view: Some(view.into()), editing: None } }

    pub fn editing(mut self, field: impl Into<String>) -> Self {
        self.editing = Some(field.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceState {
    pub key: String,
    pub user: Collaborator,
    pub activity: Activity,
    pub online_at: DateTime<Utc>,
}

/// The one channel connection whose presence traffic the room currently accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PresenceSession {
    pub lease: ScopeLease,
    pub connection: u64,
}

struct Peer {
    state: PresenceState,
    seen_at: Instant,
}

#[derive(Default)]
struct Room {
    peers: BTreeMap<String, Peer>,
    own: Option<(Collaborator, Activity)>,
    session: Option<PresenceSession>,
    control: Option<Arc<dyn ChannelControl>>,
    shut_down: bool,
}

struct Inner {
    stale_after: Duration,
    room: Mutex<Room>,
    changed: Broadcast<Vec<PresenceState>>,
}

/// Presence for the active channel. Cheap to clone; all clones share one room.
#[derive(Clone)]
pub struct Presence(Arc<Inner>);

impl Presence {
    pub(crate) fn new(stale_after: Duration) -> Self {
        Self(Arc::new(Inner { stale_after, room: Mutex::new(Room::default()), changed: Broadcast::new() }))
    }

    /// Advertise our identity and activity to peers. Remembered and re-advertised after every (re)subscribe.
    pub fn track(&self, user: Collaborator, activity: Activity) -> Result<(), SyncError> {
        let control = {
            let mut room = self.room();
            if room.shut_down {
                return Err(SyncError::ShutDown);
            }
            room.own = Some((user.clone(), activity.clone()));
            room.control.clone()
        };
        if let Some(control) = control {
            let key = user.user_id.clone();
            if let Err(e) = control.track(PresenceState { key, user, activity, online_at: Utc::now() }) {
                warn!("presence track failed: {}", e);
            }
        }
        Ok(())
    }

    pub fn untrack(&self) -> Result<(), SyncError> {
        let control = {
            let mut room = self.room();
            if room.shut_down {
                return Err(SyncError::ShutDown);
            }
            room.own = None;
            room.control.clone()
        };
        if let Some(control) = control {
            if let Err(e) = control.untrack() {
                warn!("presence untrack failed: {}", e);
            }
        }
        Ok(())
    }

    /// Live peers, excluding ourselves
    pub fn observe(&self) -> Vec<PresenceState> {
        let room = self.room();
        self.live_peers(&room).cloned().collect()
    }

    pub fn is_field_locked(&self, field: &str) -> bool { self.locked_by(field).is_some() }

    /// The peer currently editing `field`, if any
    pub fn locked_by(&self, field: &str) -> Option<Collaborator> {
        let room = self.room();
        let holder = self.live_peers(&room).find(|peer| peer.activity.editing.as_deref() == Some(field)).map(|peer| peer.user.clone());
        holder
    }

    /// Called with the live peer list whenever it changes
    pub fn subscribe<L: IntoListener<Vec<PresenceState>>>(&self, listener: L) -> ListenerGuard<Vec<PresenceState>> {
        self.0.changed.listen(listener)
    }

    /// The key this client is tracked under, once `track` has been called
    pub(crate) fn own_key(&self) -> Option<String> { self.room().own.as_ref().map(|(user, _)| user.user_id.clone()) }

    /// Start accepting presence from `session` only. Peers from any earlier session are forgotten.
    /// Returns true when that emptied the room.
    pub(crate) fn attach(&self, session: PresenceSession) -> bool {
        let mut room = self.room();
        debug!("presence attached to {} connection {}", session.lease, session.connection);
        room.session = Some(session);
        Self::reset(&mut room)
    }

    /// Forget all peers and stop accepting presence. Our own tracked state is kept for the next channel.
    /// Returns true when that emptied the room.
    pub(crate) fn detach(&self) -> bool {
        let mut room = self.room();
        room.session = None;
        Self::reset(&mut room)
    }

    /// Use a newly confirmed channel for our own state and re-advertise it there
    pub(crate) fn link(&self, session: &PresenceSession, control: Arc<dyn ChannelControl>) {
        let own = {
            let mut room = self.room();
            if room.session.as_ref() != Some(session) {
                debug!("not linking presence to superseded {} connection {}", session.lease, session.connection);
                return;
            }
            room.control = Some(control.clone());
            room.own.clone()
        };
        if let Some((user, activity)) = own {
            debug!("re-advertising presence for {}", user.user_id);
            let key = user.user_id.clone();
            if let Err(e) = control.track(PresenceState { key, user, activity, online_at: Utc::now() }) {
                warn!("presence re-advertise failed: {}", e);
            }
        }
    }

    pub(crate) fn apply(&self, session: &PresenceSession, message: PresenceMessage) {
        let now = Instant::now();
        {
            let mut room = self.room();
            if room.session.as_ref() != Some(session) {
                debug!("dropping presence from superseded {} connection {}", session.lease, session.connection);
                return;
            }
            match message {
                PresenceMessage::Join(state) => {
                    debug!("presence join {}", state.key);
                    room.peers.insert(state.key.clone(), Peer { state, seen_at: now });
                }
                PresenceMessage::Leave { key } => {
                    debug!("presence leave {}", key);
                    room.peers.remove(&key);
                }
                PresenceMessage::Sync(states) => {
                    room.peers = states.into_iter().map(|state| (state.key.clone(), Peer { state, seen_at: now })).collect();
                }
            }
        }
        self.notify();
    }

    fn reset(room: &mut Room) -> bool {
        room.control = None;
        let had_peers = !room.peers.is_empty();
        room.peers.clear();
        had_peers
    }

    pub(crate) fn shutdown(&self) {
        if self.detach() {
            self.notify();
        }
        let mut room = self.room();
        room.shut_down = true;
        room.own = None;
    }

    pub(crate) fn notify(&self) {
        let peers = self.observe();
        self.0.changed.send(&peers);
    }

    fn live_peers<'a>(&self, room: &'a Room) -> impl Iterator<Item = &'a PresenceState> {
        let cutoff = self.0.stale_after;
        let own_key = room.own.as_ref().map(|(user, _)| user.user_id.clone());
        room.peers
            .values()
            .filter(move |peer| peer.seen_at.elapsed() < cutoff && Some(&peer.state.key) != own_key.as_ref())
            .map(|peer| &peer.state)
    }

    fn room(&self) -> MutexGuard<'_, Room> {
        match self.0.room.lock() {
            Ok(room) => room,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
