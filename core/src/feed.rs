//! The contract between the engine and a backend change-notification service.

use scopeql::ast::Predicate;
use std::fmt;
use tokio::sync::mpsc;

use crate::presence::PresenceState;
use crate::types::{ChangeEvent, EntityStream, EventMask, ScopeId};

/// A backend that can open multiplexed change channels.
///
/// `open` must not block and must not call back into the engine; the engine holds its channel lock while
/// opening and closing.
pub trait ChangeFeed: Send + Sync {
    fn open(&self, request: ChannelRequest) -> Result<FeedConnection, FeedError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRequest {
    pub topic: String,
    pub scope: ScopeId,
    pub bindings: Vec<StreamBinding>,
    /// Identity under which this client appears in the channel's presence state
    pub presence_key: String,
}

/// One entity stream the backend should deliver on the channel, filtered server-side
#[derive(Debug, Clone, PartialEq)]
pub struct StreamBinding {
    pub stream: EntityStream,
    pub filter: Predicate,
    pub mask: EventMask,
}

impl fmt::Display for StreamBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}[{}] where {}", self.stream, self.mask, self.filter) }
}

pub struct FeedConnection {
    pub messages: mpsc::UnboundedReceiver<FeedMessage>,
    pub control: Box<dyn ChannelControl>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Status(FeedStatus),
    Change(ChangeEvent),
    Presence(PresenceMessage),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedStatus {
    Subscribed,
    Error(String),
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PresenceMessage {
    Join(PresenceState),
    Leave { key: String },
    /// Full replacement of the channel's presence state
    Sync(Vec<PresenceState>),
}

/// Outbound operations on an open channel
pub trait ChannelControl: Send + Sync {
    fn track(&self, state: PresenceState) -> Result<(), FeedError>;
    fn untrack(&self) -> Result<(), FeedError>;
    /// Release the channel. Must be safe to call more than once.
    fn close(&self);
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FeedError {
    #[error("change feed unavailable: {0}")]
    Unavailable(String),
    #[error("channel rejected: {0}")]
    Rejected(String),
    #[error("channel closed")]
    Closed,
}
