//! Coherence scenarios against a live Redis.
//!
//! Run with a server available:
//!
//! ```text
//! REDIS_URL=redis://127.0.0.1:6379/ cargo test -p tandem -- --ignored
//! ```
//!
//! Each test uses a unique group so runs do not interfere; `clear_all`
//! flushes the current database, so point `REDIS_URL` at a scratch one.

use std::time::Duration;

use futures::StreamExt;
use tandem::{HybridCache, SetOptions};
use uuid::Uuid;

/// One bus-delivery delay, generous enough for CI.
const PROPAGATION: Duration = Duration::from_millis(200);

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/".to_string())
}

fn unique_group(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn engine(group: &str) -> HybridCache {
    init_tracing();
    HybridCache::builder()
        .redis_url(redis_url())
        .group(group)
        .default_local_ttl(Duration::from_secs(30))
        .default_redis_ttl(Duration::from_secs(60))
        .enable_logging(true)
        .build()
        .await
        .expect("redis must be reachable for ignored tests")
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn set_warms_peer_local_tiers() {
    let group = unique_group("warm");
    let a = engine(&group).await;
    let b = engine(&group).await;

    let options = SetOptions::new()
        .local_ttl(Duration::from_secs(30))
        .redis_ttl(Duration::from_secs(60));
    a.set_with("u:1", &"alice", &options).await.unwrap();

    tokio::time::sleep(PROPAGATION).await;

    // The sync message already landed in B's local tier, so the value is
    // served without a Redis round-trip.
    assert_eq!(b.local_entry_count().await, 1);
    let name: Option<String> = b.get("u:1").await.unwrap();
    assert_eq!(name.as_deref(), Some("alice"));

    a.close().await;
    b.close().await;
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn remove_propagates_to_every_instance() {
    let group = unique_group("del");
    let a = engine(&group).await;
    let b = engine(&group).await;

    a.set("u:1", &"alice").await.unwrap();
    tokio::time::sleep(PROPAGATION).await;
    assert!(b.exists("u:1").await.unwrap());

    a.remove("u:1", false).await.unwrap();
    tokio::time::sleep(PROPAGATION).await;

    assert!(!a.exists("u:1").await.unwrap());
    assert!(!b.exists("u:1").await.unwrap());

    a.close().await;
    b.close().await;
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn pattern_delete_returns_exactly_the_removed_keys() {
    let group = unique_group("pat");
    let a = engine(&group).await;
    let b = engine(&group).await;

    a.set("a:1", &1u32).await.unwrap();
    a.set("a:2", &2u32).await.unwrap();
    a.set("b:1", &3u32).await.unwrap();
    tokio::time::sleep(PROPAGATION).await;

    let mut removed = a.remove_by_pattern("a:", false, None).await.unwrap();
    removed.sort();
    assert_eq!(removed, vec![format!("{group}:a:1"), format!("{group}:a:2")]);

    tokio::time::sleep(PROPAGATION).await;
    assert!(!b.exists("a:1").await.unwrap());
    assert!(!b.exists("a:2").await.unwrap());
    let survivor: Option<u32> = b.get("b:1").await.unwrap();
    assert_eq!(survivor, Some(3));

    a.close().await;
    b.close().await;
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn clear_all_empties_every_local_tier() {
    let group = unique_group("clear");
    let a = engine(&group).await;
    let b = engine(&group).await;

    a.set("k1", &"v1").await.unwrap();
    a.set("k2", &"v2").await.unwrap();
    tokio::time::sleep(PROPAGATION).await;
    assert!(b.local_entry_count().await > 0);

    a.clear_all().await.unwrap();
    tokio::time::sleep(PROPAGATION).await;

    assert_eq!(a.local_entry_count().await, 0);
    assert_eq!(b.local_entry_count().await, 0);
    assert!(!b.exists("k1").await.unwrap());

    a.close().await;
    b.close().await;
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn flush_local_caches_wipes_peers_but_not_redis() {
    let group = unique_group("flush");
    let a = engine(&group).await;
    let b = engine(&group).await;

    a.set("k", &"v").await.unwrap();
    tokio::time::sleep(PROPAGATION).await;

    b.flush_local_caches().await.unwrap();
    tokio::time::sleep(PROPAGATION).await;

    // Both local tiers are gone, but the entry survives in Redis and a
    // read reloads it.
    assert_eq!(a.local_entry_count().await, 0);
    let reloaded: Option<String> = a.get("k").await.unwrap();
    assert_eq!(reloaded.as_deref(), Some("v"));

    a.close().await;
    b.close().await;
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn read_backfills_local_with_redis_remaining_ttl() {
    let group = unique_group("ttl");
    let a = engine(&group).await;

    let options = SetOptions::new()
        .local_enable(false)
        .redis_ttl(Duration::from_secs(60));
    a.set_with("k", &"v", &options).await.unwrap();
    assert_eq!(a.local_entry_count().await, 0);

    let value: Option<String> = a.get("k").await.unwrap();
    assert_eq!(value.as_deref(), Some("v"));
    assert_eq!(a.local_entry_count().await, 1);

    let remaining = a.get_expiration("k").await.unwrap();
    assert!(remaining <= Duration::from_secs(60));
    assert!(remaining >= Duration::from_secs(55));

    a.close().await;
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn keys_streams_every_match_and_honors_cancellation() {
    let group = unique_group("keys");
    let a = engine(&group).await;

    a.set("a:1", &1u32).await.unwrap();
    a.set("a:2", &2u32).await.unwrap();
    a.set("b:1", &3u32).await.unwrap();

    let mut matched: Vec<String> = a
        .keys("a:", None)
        .await
        .unwrap()
        .map(|key| key.unwrap())
        .collect()
        .await;
    matched.sort();
    assert_eq!(matched, vec![format!("{group}:a:1"), format!("{group}:a:2")]);

    // A pre-fired cancellation yields an empty stream.
    let (_tx, rx) = tokio::sync::watch::channel(true);
    let cancelled: Vec<_> = a
        .keys("a:", Some(rx))
        .await
        .unwrap()
        .collect()
        .await;
    assert!(cancelled.is_empty());

    a.close().await;
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn bulk_set_warms_peers_entry_by_entry() {
    let group = unique_group("bulk");
    let a = engine(&group).await;
    let b = engine(&group).await;

    let entries = vec![("u:1", "alice"), ("u:2", "bob"), ("u:3", "carol")];
    a.set_all(entries, &SetOptions::new()).await.unwrap();

    tokio::time::sleep(PROPAGATION).await;
    assert_eq!(b.local_entry_count().await, 3);
    let bob: Option<String> = b.get("u:2").await.unwrap();
    assert_eq!(bob.as_deref(), Some("bob"));

    a.close().await;
    b.close().await;
}
