mod common;

use common::*;
use tenantsync_connector_local::{FeedCall, LocalChangeFeed};
use tenantsync_core::catalog;
use tenantsync_core::{ChannelState, ConnectionState, ScopeId, TenantId};

#[tokio::test]
async fn test_switching_tenant_closes_previous_channel_first() -> Result<()> {
    let feed = LocalChangeFeed::new();
    let client = Client::new(&feed)?;

    for tenant in ["42", "43", "44"] {
        client.engine.subscribe(ScopeId::tenant(tenant), catalog::tenant_overview(&TenantId::new(tenant)))?;
        settle().await;
        assert_eq!(feed.open_topics(), vec![topic(tenant)], "exactly one channel after opening {}", tenant);
    }

    assert_eq!(
        feed.journal(),
        vec![
            FeedCall::Open(topic("42")),
            FeedCall::Close(topic("42")),
            FeedCall::Open(topic("43")),
            FeedCall::Close(topic("43")),
            FeedCall::Open(topic("44")),
        ]
    );
    assert_eq!(client.engine.active_scope(), Some(ScopeId::tenant("44")));
    Ok(())
}

#[tokio::test]
async fn test_resubscribing_same_scope_is_a_noop() -> Result<()> {
    let feed = LocalChangeFeed::new();
    let client = Client::new(&feed)?;
    let tenant = TenantId::new("42");

    let first = client.engine.subscribe(ScopeId::tenant("42"), catalog::tenant_overview(&tenant))?;
    settle().await;
    let second = client.engine.subscribe(ScopeId::tenant("42"), catalog::farmer_workspace(&tenant))?;
    settle().await;

    assert_eq!(first, second);
    assert_eq!(feed.journal(), vec![FeedCall::Open(topic("42"))]);
    // the original descriptor set stays in place
    let streams: Vec<String> = client.engine.connection_status().active_streams.iter().map(|s| s.to_string()).collect();
    assert_eq!(streams, vec!["farmers", "dealers", "products", "analytics_reports"]);
    Ok(())
}

#[tokio::test]
async fn test_resource_scope_gets_its_own_channel() -> Result<()> {
    let feed = LocalChangeFeed::new();
    let client = Client::new(&feed)?;
    let tenant = TenantId::new("42");

    client.engine.subscribe(ScopeId::tenant("42"), catalog::tenant_overview(&tenant))?;
    client.engine.subscribe(catalog::farmer_lands_scope(&tenant, "7"), catalog::farmer_lands(&tenant, "7")?)?;
    settle().await;

    assert_eq!(feed.open_topics(), vec!["tenant_realtime_42_farmer_7".to_string()]);
    assert_eq!(feed.journal().last(), Some(&FeedCall::Open("tenant_realtime_42_farmer_7".into())));
    Ok(())
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent() -> Result<()> {
    let feed = LocalChangeFeed::new();
    let client = Client::new(&feed)?;
    let scope = ScopeId::tenant("42");

    let handle = client.engine.subscribe(scope.clone(), catalog::tenant_overview(&TenantId::new("42")))?;
    settle().await;
    assert!(handle.is_open());

    client.engine.unsubscribe(&ScopeId::tenant("99"));
    assert_eq!(feed.open_topics(), vec![topic("42")], "closing a scope that is not open leaves the channel alone");

    client.engine.unsubscribe(&scope);
    client.engine.unsubscribe(&scope);
    settle().await;

    assert_eq!(feed.journal(), vec![FeedCall::Open(topic("42")), FeedCall::Close(topic("42"))]);
    assert_eq!(handle.state(), ChannelState::Closed);
    assert_eq!(client.engine.active_scope(), None);
    assert_eq!(client.engine.connection_status().state, ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test]
async fn test_handle_tracks_confirmation() -> Result<()> {
    let feed = LocalChangeFeed::new().manual_confirm();
    let client = Client::new(&feed)?;

    let handle = client.engine.subscribe(ScopeId::tenant("42"), catalog::tenant_overview(&TenantId::new("42")))?;
    settle().await;
    assert_eq!(handle.state(), ChannelState::Connecting);
    assert_eq!(client.engine.connection_status().state, ConnectionState::Connecting);

    feed.confirm(&topic("42"));
    settle().await;
    assert_eq!(handle.state(), ChannelState::Open);
    assert!(client.engine.connection_status().is_live());

    // a handle from a replaced activation stays closed even if the same scope is opened again
    client.engine.subscribe(ScopeId::tenant("43"), catalog::tenant_overview(&TenantId::new("43")))?;
    let again = client.engine.subscribe(ScopeId::tenant("42"), catalog::tenant_overview(&TenantId::new("42")))?;
    assert_eq!(handle.state(), ChannelState::Closed);
    assert_ne!(handle, again);
    Ok(())
}

#[tokio::test]
async fn test_status_signal_reaches_connected() -> Result<()> {
    let feed = LocalChangeFeed::new();
    let client = Client::new(&feed)?;
    let status = client.engine.status();

    client.engine.subscribe(ScopeId::tenant("42"), catalog::tenant_overview(&TenantId::new("42")))?;
    tokio::time::timeout(millis(1000), status.wait_for(|s| s.is_live())).await?;

    let json = serde_json::to_value(client.engine.connection_status())?;
    assert_eq!(json["state"], "connected");
    assert_eq!(json["attempt"], 0);
    Ok(())
}
