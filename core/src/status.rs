use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use strum::Display;

use crate::keys::CacheKey;
use crate::types::{EntityStream, ScopeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// What the UI renders for the live/offline indicator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub attempt: u32,
    pub last_event_at: Option<DateTime<Utc>>,
    pub scope: Option<ScopeId>,
    pub active_streams: Vec<EntityStream>,
    pub pending_keys: usize,
    pub last_flush_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub dropped_events: u64,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempt: 0,
            last_event_at: None,
            scope: None,
            active_streams: Vec::new(),
            pending_keys: 0,
            last_flush_at: None,
            last_error: None,
            dropped_events: 0,
        }
    }
}

impl ConnectionStatus {
    pub fn is_live(&self) -> bool { self.state == ConnectionState::Connected }
}

/// User-facing notifications about the sync connection
#[derive(Debug, Clone, PartialEq)]
pub enum SyncNotice {
    Reconnecting { attempt: u32, max_attempts: u32, delay: Duration },
    Restored,
    /// Retries are exhausted. Live updates have stopped until the user reconnects.
    ConnectionLost { reason: String },
    Flushed { keys: Vec<CacheKey> },
}

impl fmt::Display for SyncNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncNotice::Reconnecting { attempt, max_attempts, delay } => {
                write!(f, "Connection lost, reconnecting in {}s (attempt {}/{})", delay.as_secs_f32(), attempt, max_attempts)
            }
            SyncNotice::Restored => f.write_str("Real-time updates restored"),
            SyncNotice::ConnectionLost { reason } => write!(f, "Real-time updates stopped: {}", reason),
            SyncNotice::Flushed { keys } => write!(f, "Refreshed {} queries", keys.len()),
        }
    }
}
