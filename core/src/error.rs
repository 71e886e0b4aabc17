use scopeql::error::ParseError;
use thiserror::Error;

use crate::feed::FeedError;
use crate::types::{ScopeId, TenantId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("sync engine has been shut down")]
    ShutDown,
    #[error("no scope is currently subscribed")]
    NoActiveScope,
    #[error("descriptor for tenant {descriptor} cannot be multiplexed onto scope {scope}")]
    ScopeMismatch { scope: ScopeId, descriptor: TenantId },
    #[error("filter pins tenant_id to {found:?}, expected {expected}")]
    CrossTenantFilter { expected: TenantId, found: String },
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("invalid cache key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),
}

impl From<ParseError> for SyncError {
    fn from(e: ParseError) -> Self { SyncError::InvalidFilter(e.to_string()) }
}
