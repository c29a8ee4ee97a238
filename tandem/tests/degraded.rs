//! Behaviour with Redis unreachable: the local tier keeps serving the
//! originating instance.
//!
//! These tests point at a closed port on purpose and need no server.

use std::time::Duration;

use tandem::{CacheError, HybridCache};

async fn degraded_engine(surface_remote_errors: bool) -> HybridCache {
    HybridCache::builder()
        .redis_url("redis://127.0.0.1:1/")
        .group("degraded")
        .abort_on_connect_fail(false)
        .surface_remote_errors(surface_remote_errors)
        .connect_retry(1)
        .connection_timeout(Duration::from_millis(250))
        .build()
        .await
        .expect("lazy build must not touch the transport")
}

#[tokio::test]
async fn swallowed_write_keeps_the_local_tier_authoritative() {
    let cache = degraded_engine(false).await;

    // The Redis write fails and is swallowed; the local write stands.
    cache.set("k", &"v").await.unwrap();

    let value: Option<String> = cache.get("k").await.unwrap();
    assert_eq!(value.as_deref(), Some("v"));

    // Exists falls back to the local tier when Redis is unreachable.
    assert!(cache.exists("k").await.unwrap());
}

#[tokio::test]
async fn surfacing_engine_reports_transport_errors() {
    let cache = degraded_engine(true).await;

    // No local entry, so the read must go to Redis and fail.
    let err = cache.get::<String>("missing").await.unwrap_err();
    assert!(matches!(err, CacheError::Transport(_)));

    let err = cache.set("k", &"v").await.unwrap_err();
    assert!(matches!(err, CacheError::Transport(_)));
}

#[tokio::test]
async fn try_get_never_surfaces_transport_errors() {
    let cache = degraded_engine(true).await;

    let (found, value) = cache.try_get::<String>("missing").await.unwrap();
    assert!(!found);
    assert!(value.is_none());
}

#[tokio::test]
async fn expiration_falls_back_to_the_configured_default() {
    let cache = degraded_engine(false).await;
    let ttl = cache.get_expiration("anything").await.unwrap();
    assert_eq!(ttl, Duration::from_secs(600));
}

#[tokio::test]
async fn swallowed_remove_still_clears_the_local_tier() {
    let cache = degraded_engine(false).await;
    cache.set("k", &"v").await.unwrap();
    assert!(cache.exists("k").await.unwrap());

    cache.remove("k", false).await.unwrap();

    assert!(!cache.exists("k").await.unwrap());
    let value: Option<String> = cache.get("k").await.unwrap();
    assert!(value.is_none());
}
