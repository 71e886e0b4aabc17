mod common;

use common::*;
use std::time::Duration;
use tenantsync_connector_local::{FeedCall, LocalChangeFeed};
use tenantsync_core::catalog;
use tenantsync_core::{ConnectionState, ScopeId, SyncConfig, SyncNotice, TenantId};
use tokio::time::sleep;

fn secs(s: u64) -> Duration { Duration::from_secs(s) }

fn opens(feed: &LocalChangeFeed) -> usize { feed.journal().iter().filter(|call| matches!(call, FeedCall::Open(_))).count() }

fn reconnecting(attempt: u32, delay: u64) -> SyncNotice { SyncNotice::Reconnecting { attempt, max_attempts: 5, delay: secs(delay) } }

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_then_gives_up() -> Result<()> {
    let feed = LocalChangeFeed::new();
    feed.fail_next_opens(100);
    let client = Client::new(&feed)?;

    client.engine.subscribe(ScopeId::tenant("42"), catalog::tenant_overview(&TenantId::new("42")))?;
    let start = tokio::time::Instant::now();
    assert_eq!(client.engine.connection_status().state, ConnectionState::Reconnecting);

    sleep(secs(120)).await;

    let notices = client.timed_notices();
    let offsets: Vec<Duration> = notices.iter().map(|(_, at)| *at - start).collect();
    let notices: Vec<SyncNotice> = notices.into_iter().map(|(n, _)| n).collect();
    assert_eq!(
        notices,
        vec![
            reconnecting(1, 1),
            reconnecting(2, 2),
            reconnecting(3, 4),
            reconnecting(4, 8),
            reconnecting(5, 16),
            SyncNotice::ConnectionLost { reason: "change feed unavailable: local feed offline".into() },
        ]
    );
    assert_eq!(offsets, vec![secs(0), secs(1), secs(3), secs(7), secs(15), secs(31)]);

    // the first open plus one per retry
    assert_eq!(opens(&feed), 6);
    let status = client.engine.connection_status();
    assert_eq!(status.state, ConnectionState::Failed);
    assert_eq!(status.attempt, 5);
    assert!(status.last_error.is_some());

    sleep(secs(3600)).await;
    assert_eq!(opens(&feed), 6, "no retries after giving up");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_delay_is_capped() -> Result<()> {
    let feed = LocalChangeFeed::new();
    feed.fail_next_opens(100);
    let mut config = SyncConfig::default();
    config.backoff.max_delay_ms = 5_000;
    let client = Client::with_config(&feed, config)?;

    client.engine.subscribe(ScopeId::tenant("42"), catalog::tenant_overview(&TenantId::new("42")))?;
    sleep(secs(120)).await;

    let delays: Vec<u64> = client
        .notices()
        .iter()
        .filter_map(|n| match n {
            SyncNotice::Reconnecting { delay, .. } => Some(delay.as_secs()),
            _ => None,
        })
        .collect();
    assert_eq!(delays, vec![1, 2, 4, 5, 5]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_channel_error_reconnects_with_same_descriptors() -> Result<()> {
    let feed = LocalChangeFeed::new();
    let client = Client::new(&feed)?;
    client.engine.subscribe(ScopeId::tenant("42"), catalog::tenant_overview(&TenantId::new("42")))?;
    settle().await;
    assert!(client.engine.connection_status().is_live());

    feed.fail_channel(&topic("42"), "network blip");
    settle().await;
    let status = client.engine.connection_status();
    assert_eq!(status.state, ConnectionState::Reconnecting);
    assert_eq!(status.attempt, 1);
    assert_eq!(status.last_error.as_deref(), Some("network blip"));
    assert!(feed.open_topics().is_empty());

    sleep(secs(1)).await;
    settle().await;
    assert!(client.engine.connection_status().is_live());
    assert_eq!(client.connection_notices(), vec![reconnecting(1, 1), SyncNotice::Restored]);
    assert_eq!(opens(&feed), 2);

    assert_eq!(feed.publish(farmer_update("42")), 1);
    settle().await;
    sleep(millis(301)).await;
    assert_eq!(client.cache.keys(), vec!["farmer-stats:42", "farmers:42"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_vanished_stream_counts_as_failure() -> Result<()> {
    let feed = LocalChangeFeed::new();
    let client = Client::new(&feed)?;
    client.engine.subscribe(ScopeId::tenant("42"), catalog::tenant_overview(&TenantId::new("42")))?;
    settle().await;

    feed.drop_channel(&topic("42"));
    settle().await;
    let status = client.engine.connection_status();
    assert_eq!(status.state, ConnectionState::Reconnecting);
    assert_eq!(status.last_error.as_deref(), Some("change stream ended"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_manual_reconnect_after_giving_up() -> Result<()> {
    let feed = LocalChangeFeed::new();
    feed.fail_next_opens(6);
    let client = Client::new(&feed)?;
    client.engine.subscribe(ScopeId::tenant("42"), catalog::tenant_overview(&TenantId::new("42")))?;
    sleep(secs(120)).await;
    assert_eq!(client.engine.connection_status().state, ConnectionState::Failed);

    let handle = client.engine.reconnect()?;
    settle().await;
    assert!(handle.is_open());
    let status = client.engine.connection_status();
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.attempt, 0);
    assert_eq!(status.last_error, None);
    assert_eq!(opens(&feed), 7);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_closing_scope_cancels_pending_retry() -> Result<()> {
    let feed = LocalChangeFeed::new();
    feed.fail_next_opens(1);
    let client = Client::new(&feed)?;
    let scope = ScopeId::tenant("42");
    client.engine.subscribe(scope.clone(), catalog::tenant_overview(&TenantId::new("42")))?;
    assert_eq!(client.engine.connection_status().state, ConnectionState::Reconnecting);

    client.engine.unsubscribe(&scope);
    sleep(secs(10)).await;
    assert_eq!(opens(&feed), 1, "the retry timer died with the scope");
    assert!(feed.open_topics().is_empty());
    Ok(())
}
