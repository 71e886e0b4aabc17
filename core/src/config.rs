use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::SyncError;
use crate::supervisor::BackoffPolicy;

/// Engine configuration. Every field has a default, so a partial JSON document is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Fixed coalescing window for cache invalidation
    pub debounce_ms: u64,
    /// Backend channel names are this prefix followed by the scope
    pub channel_prefix: String,
    pub backoff: BackoffConfig,
    pub presence: PresenceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_delay_ms: u64,
    /// Reconnect attempts before the connection is reported as lost
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Peers not heard from within this long are ignored
    pub stale_after_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            channel_prefix: "tenant_realtime_".to_string(),
            backoff: BackoffConfig::default(),
            presence: PresenceConfig::default(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self { Self { base_ms: 1_000, max_delay_ms: 30_000, max_attempts: 5 } }
}

impl Default for PresenceConfig {
    fn default() -> Self { Self { stale_after_ms: 60_000 } }
}

impl SyncConfig {
    pub fn from_json(json: &str) -> Result<Self, SyncError> {
        let config: SyncConfig = serde_json::from_str(json).map_err(|e| SyncError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.debounce_ms == 0 {
            return Err(SyncError::InvalidConfig("debounce_ms must be greater than zero".into()));
        }
        if self.channel_prefix.is_empty() {
            return Err(SyncError::InvalidConfig("channel_prefix must not be empty".into()));
        }
        if self.backoff.base_ms == 0 {
            return Err(SyncError::InvalidConfig("backoff.base_ms must be greater than zero".into()));
        }
        if self.backoff.max_delay_ms < self.backoff.base_ms {
            return Err(SyncError::InvalidConfig(format!(
                "backoff.max_delay_ms ({}) is below backoff.base_ms ({})",
                self.backoff.max_delay_ms, self.backoff.base_ms
            )));
        }
        if self.presence.stale_after_ms == 0 {
            return Err(SyncError::InvalidConfig("presence.stale_after_ms must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration { Duration::from_millis(self.debounce_ms) }

    pub fn stale_after(&self) -> Duration { Duration::from_millis(self.presence.stale_after_ms) }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.backoff.base_ms),
            max_delay: Duration::from_millis(self.backoff.max_delay_ms),
            max_attempts: self.backoff.max_attempts,
        }
    }
}
