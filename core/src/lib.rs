//! Tenant-scoped realtime synchronization.
//!
//! Screens declare what they care about as [`SubscriptionDescriptor`]s. The [`SyncEngine`] multiplexes them onto
//! one backend channel for the active tenant, routes each change event to the descriptors that asked for it and
//! turns the matches into batched cache invalidations.

pub mod cache;
pub mod catalog;
pub mod channel;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod feed;
pub mod keys;
pub mod presence;
pub mod router;
pub mod scheduler;
pub mod status;
pub mod supervisor;
pub mod types;

pub use cache::{MemoryQueryCache, QueryCache};
pub use channel::{ChannelHandle, ChannelManager, ChannelState};
pub use config::SyncConfig;
pub use descriptor::{ScopePredicate, SubscriptionDescriptor};
pub use engine::SyncEngine;
pub use error::SyncError;
pub use feed::{ChangeFeed, ChannelControl, ChannelRequest, FeedConnection, FeedError, FeedMessage, FeedStatus, PresenceMessage};
pub use keys::{CacheKey, KeyTemplate};
pub use presence::{Activity, Collaborator, Presence, PresenceState};
pub use status::{ConnectionState, ConnectionStatus, SyncNotice};
pub use types::{ChangeEvent, EntityStream, EventMask, MutationKind, ScopeFields, ScopeId, ScopeLease, TenantId};

pub use scopeql;
pub use tenantsync_signals as signals;
