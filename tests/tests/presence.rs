mod common;

use common::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tenantsync_connector_local::LocalChangeFeed;
use tenantsync_core::catalog;
use tenantsync_core::{Activity, Collaborator, PresenceState, ScopeId, SyncError, TenantId};
use tokio::time::sleep;

async fn join(client: &Client, tenant: &str) -> Result<()> {
    client.engine.subscribe(ScopeId::tenant(tenant), catalog::farmer_workspace(&TenantId::new(tenant)))?;
    settle().await;
    Ok(())
}

fn alice() -> Collaborator { Collaborator::new("alice", "Alice") }
fn bob() -> Collaborator { Collaborator::new("bob", "Bob") }

fn names(peers: &[PresenceState]) -> Vec<String> { peers.iter().map(|p| p.user.display_name.clone()).collect() }

#[tokio::test(start_paused = true)]
async fn test_soft_lock_between_collaborators() -> Result<()> {
    let feed = LocalChangeFeed::new();
    let a = Client::new(&feed)?;
    let b = Client::new(&feed)?;

    // tracked before the channel exists, advertised once it is confirmed
    a.engine.presence().track(alice(), Activity::viewing("farmer:7").editing("phone"))?;
    join(&a, "42").await?;
    join(&b, "42").await?;

    assert_eq!(feed.members(&topic("42")).len(), 2);
    assert_eq!(names(&b.engine.presence().observe()), vec!["Alice"]);
    assert!(b.engine.presence().is_field_locked("phone"));
    assert_eq!(b.engine.presence().locked_by("phone"), Some(alice()));
    assert!(!b.engine.presence().is_field_locked("email"));
    assert!(!a.engine.presence().is_field_locked("phone"), "our own edits do not lock us out");

    b.engine.presence().track(bob(), Activity::viewing("farmer:7"))?;
    settle().await;
    assert_eq!(names(&a.engine.presence().observe()), vec!["Bob"]);

    a.engine.presence().untrack()?;
    settle().await;
    assert!(!b.engine.presence().is_field_locked("phone"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_leaving_channel_releases_locks() -> Result<()> {
    let feed = LocalChangeFeed::new();
    let a = Client::new(&feed)?;
    let b = Client::new(&feed)?;
    let updates: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let _guard = {
        let updates = updates.clone();
        b.engine.presence().subscribe(move |peers: &Vec<PresenceState>| updates.lock().unwrap().push(peers.len()))
    };

    a.engine.presence().track(alice(), Activity::viewing("farmer:7").editing("phone"))?;
    join(&a, "42").await?;
    join(&b, "42").await?;
    assert!(b.engine.presence().is_field_locked("phone"));

    a.engine.subscribe(ScopeId::tenant("43"), catalog::farmer_workspace(&TenantId::new("43")))?;
    settle().await;
    assert!(!b.engine.presence().is_field_locked("phone"));
    assert!(a.engine.presence().observe().is_empty(), "peers from the old scope are forgotten");
    assert_eq!(updates.lock().unwrap().last(), Some(&0));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_presence_is_readvertised_after_reconnect() -> Result<()> {
    let feed = LocalChangeFeed::new();
    let a = Client::new(&feed)?;
    let b = Client::new(&feed)?;
    a.engine.presence().track(alice(), Activity::viewing("farmer:7").editing("phone"))?;
    join(&a, "42").await?;
    join(&b, "42").await?;

    a.engine.reconnect()?;
    settle().await;
    assert_eq!(b.engine.presence().locked_by("phone"), Some(alice()));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stale_peers_are_ignored() -> Result<()> {
    let feed = LocalChangeFeed::new();
    let a = Client::new(&feed)?;
    let b = Client::new(&feed)?;
    a.engine.presence().track(alice(), Activity::viewing("farmer:7").editing("phone"))?;
    join(&a, "42").await?;
    join(&b, "42").await?;
    assert!(b.engine.presence().is_field_locked("phone"));

    sleep(Duration::from_secs(61)).await;
    assert!(!b.engine.presence().is_field_locked("phone"));

    a.engine.presence().track(alice(), Activity::viewing("farmer:7").editing("phone"))?;
    settle().await;
    assert!(b.engine.presence().is_field_locked("phone"));
    Ok(())
}

#[tokio::test]
async fn test_presence_fails_open() -> Result<()> {
    let feed = LocalChangeFeed::new();
    feed.fail_next_opens(100);
    let client = Client::new(&feed)?;
    client.engine.presence().track(alice(), Activity::viewing("farmers"))?;
    client.engine.subscribe(ScopeId::tenant("42"), catalog::farmer_workspace(&TenantId::new("42")))?;

    assert!(client.engine.presence().observe().is_empty());
    assert!(!client.engine.presence().is_field_locked("phone"));

    client.engine.shutdown();
    assert_eq!(client.engine.presence().track(bob(), Activity::viewing("farmers")), Err(SyncError::ShutDown));
    Ok(())
}
