mod common;

use common::*;
use std::sync::Arc;
use tenantsync_connector_local::{FeedCall, LocalChangeFeed};
use tenantsync_core::catalog;
use tenantsync_core::{CacheKey, ConnectionState, MemoryQueryCache, ScopeId, SyncConfig, SyncEngine, SyncError, SyncNotice, TenantId};
use tokio::time::sleep;

#[tokio::test(start_paused = true)]
async fn test_refresh_invalidates_fixed_keys_now() -> Result<()> {
    let feed = LocalChangeFeed::new();
    let client = Client::new(&feed)?;
    assert_eq!(client.engine.refresh(), Err(SyncError::NoActiveScope));

    client.engine.subscribe(ScopeId::tenant("42"), catalog::farmer_workspace(&TenantId::new("42")))?;
    settle().await;
    let refreshed = client.engine.refresh()?;

    // the per-farmer template has no fixed form, and shared keys are only named once
    assert_eq!(refreshed.len(), catalog::FARMER_TABLES.len() + 2);
    assert_eq!(client.cache.keys().len(), refreshed.len());
    assert!(client.cache.keys().iter().all(|k| k.ends_with(":42")));
    assert!(matches!(client.notices().last(), Some(SyncNotice::Flushed { keys }) if keys.len() == refreshed.len()));

    sleep(millis(1000)).await;
    assert_eq!(client.cache.keys().len(), refreshed.len());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_is_final_and_idempotent() -> Result<()> {
    let feed = LocalChangeFeed::new();
    let client = Client::new(&feed)?;
    client.engine.subscribe(ScopeId::tenant("42"), catalog::tenant_overview(&TenantId::new("42")))?;
    settle().await;
    feed.publish(farmer_update("42"));
    settle().await;

    client.engine.shutdown();
    client.engine.shutdown();
    assert!(client.engine.is_shut_down());
    assert_eq!(feed.journal(), vec![FeedCall::Open(topic("42")), FeedCall::Close(topic("42"))]);

    sleep(millis(1000)).await;
    assert!(client.cache.keys().is_empty(), "pending invalidations are discarded");
    assert_eq!(client.engine.connection_status().state, ConnectionState::Disconnected);

    let result = client.engine.subscribe(ScopeId::tenant("42"), catalog::tenant_overview(&TenantId::new("42")));
    assert!(matches!(result, Err(SyncError::ShutDown)));
    assert!(matches!(client.engine.reconnect(), Err(SyncError::ShutDown)));
    assert!(matches!(client.engine.refresh(), Err(SyncError::ShutDown)));
    assert_eq!(feed.open_topics().len(), 0);
    Ok(())
}

#[tokio::test]
async fn test_reconnect_requires_a_scope() -> Result<()> {
    let feed = LocalChangeFeed::new();
    let client = Client::new(&feed)?;
    assert!(matches!(client.engine.reconnect(), Err(SyncError::NoActiveScope)));
    Ok(())
}

#[tokio::test]
async fn test_config_from_json() -> Result<()> {
    let config = SyncConfig::from_json(r#"{ "debounce_ms": 150, "backoff": { "max_attempts": 3 } }"#)?;
    assert_eq!(config.debounce_ms, 150);
    assert_eq!(config.backoff.max_attempts, 3);
    assert_eq!(config.backoff.base_ms, 1_000);
    assert_eq!(config.channel_prefix, "tenant_realtime_");

    let mut invalid = SyncConfig::default();
    invalid.backoff.base_ms = 0;
    let engine = SyncEngine::init(Arc::new(MemoryQueryCache::new()), Arc::new(LocalChangeFeed::new()), invalid);
    assert!(matches!(engine, Err(SyncError::InvalidConfig(_))));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_memory_cache_goes_stale() -> Result<()> {
    let feed = LocalChangeFeed::new();
    let cache = Arc::new(MemoryQueryCache::new());
    let engine = SyncEngine::init(cache.clone(), Arc::new(feed.clone()), SyncConfig::default())?;
    let farmers: CacheKey = "farmers:42:page=1".parse()?;
    let dealers: CacheKey = "dealers:42".parse()?;
    cache.read(&farmers);
    cache.read(&dealers);

    engine.subscribe(ScopeId::tenant("42"), catalog::tenant_overview(&TenantId::new("42")))?;
    settle().await;
    feed.publish(farmer_update("42"));
    settle().await;
    sleep(millis(301)).await;

    assert!(cache.is_stale(&farmers), "prefix invalidation reaches paged queries");
    assert!(!cache.is_stale(&dealers));
    Ok(())
}
