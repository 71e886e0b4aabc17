mod common;

use common::*;
use tenantsync_connector_local::LocalChangeFeed;
use tenantsync_core::catalog;
use tenantsync_core::{ChangeEvent, MutationKind, ScopeId, ScopePredicate, SubscriptionDescriptor, SyncError, TenantId};
use tokio::time::sleep;

#[tokio::test(start_paused = true)]
async fn test_foreign_tenant_event_never_invalidates() -> Result<()> {
    let feed = LocalChangeFeed::new();
    let client = Client::new(&feed)?;
    client.engine.subscribe(ScopeId::tenant("42"), catalog::tenant_overview(&TenantId::new("42")))?;
    settle().await;

    // bypass the server-side filter, as a misconfigured backend would
    assert_eq!(feed.inject(&topic("42"), farmer_update("43")), 1);
    settle().await;
    sleep(millis(1000)).await;

    assert!(client.cache.keys().is_empty());
    assert_eq!(client.engine.connection_status().pending_keys, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_tenants_on_one_backend_stay_apart() -> Result<()> {
    let feed = LocalChangeFeed::new();
    let a = Client::new(&feed)?;
    let b = Client::new(&feed)?;
    a.engine.subscribe(ScopeId::tenant("42"), catalog::tenant_overview(&TenantId::new("42")))?;
    b.engine.subscribe(ScopeId::tenant("43"), catalog::tenant_overview(&TenantId::new("43")))?;
    settle().await;

    assert_eq!(feed.publish(farmer_update("42")), 1);
    settle().await;
    sleep(millis(301)).await;

    assert_eq!(a.cache.keys(), vec!["farmer-stats:42", "farmers:42"]);
    assert!(b.cache.keys().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_event_without_tenant_is_dropped() -> Result<()> {
    let feed = LocalChangeFeed::new();
    let client = Client::new(&feed)?;
    client.engine.subscribe(ScopeId::tenant("42"), catalog::tenant_overview(&TenantId::new("42")))?;
    settle().await;

    feed.inject(&topic("42"), ChangeEvent::new("farmers", MutationKind::Update));
    feed.inject(&topic("42"), ChangeEvent::new("farmers", MutationKind::Update).tenant(""));
    settle().await;
    sleep(millis(301)).await;

    assert!(client.cache.keys().is_empty());
    assert_eq!(client.engine.connection_status().dropped_events, 2);
    assert!(client.engine.connection_status().is_live(), "bad events do not hurt the channel");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_pending_window_dies_with_scope() -> Result<()> {
    let feed = LocalChangeFeed::new();
    let client = Client::new(&feed)?;
    client.engine.subscribe(ScopeId::tenant("42"), catalog::tenant_overview(&TenantId::new("42")))?;
    settle().await;

    feed.publish(farmer_update("42"));
    settle().await;
    sleep(millis(100)).await;
    client.engine.subscribe(ScopeId::tenant("43"), catalog::tenant_overview(&TenantId::new("43")))?;
    settle().await;
    feed.publish(farmer_update("43"));
    settle().await;
    sleep(millis(1000)).await;

    assert_eq!(client.cache.keys(), vec!["farmer-stats:43", "farmers:43"]);
    Ok(())
}

#[tokio::test]
async fn test_descriptors_must_match_scope() -> Result<()> {
    let feed = LocalChangeFeed::new();
    let client = Client::new(&feed)?;

    let result = client.engine.subscribe(ScopeId::tenant("42"), catalog::tenant_overview(&TenantId::new("43")));
    assert!(matches!(result, Err(SyncError::ScopeMismatch { .. })));
    assert!(feed.journal().is_empty(), "nothing is opened for a rejected subscription");

    let narrowed = ScopePredicate::tenant("42").narrow("tenant_id = '43' AND farmer_id = '7'");
    assert!(matches!(narrowed, Err(SyncError::CrossTenantFilter { .. })));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_narrowed_descriptor_filters_records() -> Result<()> {
    let feed = LocalChangeFeed::new();
    let client = Client::new(&feed)?;
    let tenant = TenantId::new("42");
    let descriptor = SubscriptionDescriptor::new("lands", ScopePredicate::tenant("42").narrow("farmer_id = '7'")?)
        .invalidates(tenantsync_core::keys::farmer(&tenant));
    client.engine.subscribe(ScopeId::tenant("42"), vec![descriptor])?;
    settle().await;

    // the server filter drops the other farmer; inject it anyway to exercise the client-side check
    assert_eq!(feed.publish(ChangeEvent::new("lands", MutationKind::Update).tenant("42").field("farmer_id", "8")), 0);
    feed.inject(&topic("42"), ChangeEvent::new("lands", MutationKind::Update).tenant("42").field("farmer_id", "8"));
    feed.publish(ChangeEvent::new("lands", MutationKind::Update).tenant("42").field("farmer_id", "7"));
    settle().await;
    sleep(millis(301)).await;

    assert_eq!(client.cache.keys(), vec!["farmer:42:7"]);
    Ok(())
}
