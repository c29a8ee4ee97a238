//! Coherence bus: message application and the push-stream listener.
//!
//! Two pub/sub channels ride the same connection as data commands. The
//! invalidation channel carries key lists to drop (or the clear-all
//! sentinel); the back-channel carries freshly written values so peers
//! can warm their local tier without touching Redis. Both rely on the
//! instance-id check for echo suppression: Redis delivers every publish
//! back to the publisher, and without the check each local write would be
//! overwritten by its own echo.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::{Msg, PushInfo, PushKind};
use tandem_core::{Codec, InvalidationMessage, Namespace, SyncMessage};
use tandem_local::LocalTier;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Literal channel names the engine subscribes to.
#[derive(Debug, Clone)]
pub(crate) struct BusChannels {
    pub(crate) invalidation: String,
    pub(crate) back: String,
}

/// Applies decoded bus messages to the local tier.
///
/// Separated from the listener loop so the subscribe contracts can be
/// exercised without a Redis connection.
pub(crate) struct Router<C: Codec> {
    instance_id: String,
    namespace: Namespace,
    local: Arc<LocalTier>,
    codec: C,
    flush_local_on_reconnect: bool,
    log: bool,
}

impl<C: Codec> Router<C> {
    pub(crate) fn new(
        instance_id: String,
        namespace: Namespace,
        local: Arc<LocalTier>,
        codec: C,
        flush_local_on_reconnect: bool,
        log: bool,
    ) -> Self {
        Self {
            instance_id,
            namespace,
            local,
            codec,
            flush_local_on_reconnect,
            log,
        }
    }

    /// Invalidation contract: drop own echo; sentinel first key rebuilds
    /// the whole tier; otherwise remove every listed key.
    pub(crate) async fn apply_invalidation(&self, payload: &[u8]) {
        let message: InvalidationMessage = match self.codec.decode(payload) {
            Ok(message) => message,
            Err(err) => {
                if self.log {
                    warn!(error = %err, "undecodable invalidation message dropped");
                }
                return;
            }
        };
        if message.instance_id == self.instance_id {
            return;
        }
        if message
            .keys
            .first()
            .is_some_and(|key| self.namespace.is_flush_sentinel(key))
        {
            if self.log {
                debug!(origin = %message.instance_id, "sentinel received, rebuilding local tier");
            }
            self.local.rebuild().await;
            return;
        }
        for key in &message.keys {
            self.local.remove(key).await;
        }
        if self.log {
            debug!(origin = %message.instance_id, keys = message.keys.len(), "invalidation applied");
        }
    }

    /// Back-channel contract: drop own echo, then warm the local tier
    /// with the carried value and absolute expiry.
    pub(crate) async fn apply_sync(&self, payload: &[u8]) {
        let message: SyncMessage = match self.codec.decode(payload) {
            Ok(message) => message,
            Err(err) => {
                if self.log {
                    warn!(error = %err, "undecodable sync message dropped");
                }
                return;
            }
        };
        if message.event_creator_id == self.instance_id {
            return;
        }
        if self.namespace.is_flush_sentinel(&message.key) {
            return;
        }
        let data = Bytes::from(message.value.into_bytes());
        self.local
            .insert_until(message.key, data, message.expires_at)
            .await;
    }

    /// Reconnect contract: invalidations may have been missed while the
    /// connection was down, so the safe posture is to treat everything
    /// local as stale.
    pub(crate) async fn on_reconnected(&self) {
        if self.flush_local_on_reconnect {
            if self.log {
                debug!("bus connection restored, rebuilding local tier");
            }
            self.local.rebuild().await;
        }
    }
}

/// Spawns the listener task draining the transport's push stream.
///
/// The transport resubscribes on its own after a reconnect; the first
/// subscription confirmation that arrives while the connection is marked
/// down is taken as the connection-restored event.
pub(crate) fn spawn_listener<C: Codec>(
    router: Router<C>,
    channels: BusChannels,
    mut pushes: UnboundedReceiver<PushInfo>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut disconnected = false;
        while let Some(push) = pushes.recv().await {
            match push.kind {
                PushKind::Disconnection => {
                    disconnected = true;
                    if router.log {
                        warn!("bus connection lost");
                    }
                }
                PushKind::Subscribe if disconnected => {
                    disconnected = false;
                    router.on_reconnected().await;
                }
                PushKind::Message => {
                    let Some(msg) = Msg::from_push_info(push) else {
                        continue;
                    };
                    let channel = msg.get_channel_name();
                    if channel == channels.invalidation {
                        router.apply_invalidation(msg.get_payload_bytes()).await;
                    } else if channel == channels.back {
                        router.apply_sync(msg.get_payload_bytes()).await;
                    }
                }
                _ => {}
            }
        }
    })
}

/// Publishes a bus payload, retrying with linear back-off.
///
/// Attempts are counted per call and capped at `max_attempts`; the
/// back-off between attempt `n` and `n + 1` is `base × n`. Failures are
/// never surfaced to the caller — after the last attempt the payload is
/// dropped.
pub(crate) async fn publish_with_retry(
    mut conn: ConnectionManager,
    channel: String,
    payload: Bytes,
    max_attempts: u32,
    base: Duration,
    log: bool,
) {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match redis::cmd("PUBLISH")
            .arg(&channel)
            .arg(payload.as_ref())
            .query_async::<i64>(&mut conn)
            .await
        {
            Ok(_) => return,
            Err(err) => {
                if attempt >= max_attempts {
                    if log {
                        warn!(%channel, error = %err, attempts = attempt, "bus publish dropped");
                    }
                    return;
                }
                tokio::time::sleep(base * attempt).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};
    use std::time::Duration as StdDuration;
    use tandem_core::{JsonCodec, Namespace};

    fn router(local: Arc<LocalTier>, flush_on_reconnect: bool) -> Router<JsonCodec> {
        Router::new(
            "self".into(),
            Namespace::new("app"),
            local,
            JsonCodec,
            flush_on_reconnect,
            false,
        )
    }

    fn encode<T: serde::Serialize>(value: &T) -> Bytes {
        JsonCodec.encode(value).unwrap()
    }

    async fn seeded_tier() -> Arc<LocalTier> {
        let tier = Arc::new(LocalTier::new(1_000));
        tier.insert("app:a", Bytes::from_static(b"\"1\""), StdDuration::from_secs(60))
            .await;
        tier.insert("app:b", Bytes::from_static(b"\"2\""), StdDuration::from_secs(60))
            .await;
        tier
    }

    #[tokio::test]
    async fn own_invalidation_echo_is_ignored() {
        let tier = seeded_tier().await;
        let router = router(Arc::clone(&tier), false);

        let msg = InvalidationMessage::new("self", vec!["app:a".into()]);
        router.apply_invalidation(&encode(&msg)).await;

        assert!(tier.contains("app:a").await);
    }

    #[tokio::test]
    async fn peer_invalidation_removes_listed_keys() {
        let tier = seeded_tier().await;
        let router = router(Arc::clone(&tier), false);

        let msg = InvalidationMessage::new("peer", vec!["app:a".into()]);
        router.apply_invalidation(&encode(&msg)).await;

        assert!(!tier.contains("app:a").await);
        assert!(tier.contains("app:b").await);
    }

    #[tokio::test]
    async fn sentinel_first_key_rebuilds_the_tier() {
        let tier = seeded_tier().await;
        let router = router(Arc::clone(&tier), false);

        let msg = InvalidationMessage::new("peer", vec!["app:*FLUSHDB*".into()]);
        router.apply_invalidation(&encode(&msg)).await;

        assert_eq!(tier.entry_count().await, 0);
    }

    #[tokio::test]
    async fn undecodable_invalidation_is_dropped() {
        let tier = seeded_tier().await;
        let router = router(Arc::clone(&tier), false);

        router.apply_invalidation(b"not json").await;

        assert!(tier.contains("app:a").await);
        assert!(tier.contains("app:b").await);
    }

    #[tokio::test]
    async fn peer_sync_warms_the_tier_until_its_expiry() {
        let tier = Arc::new(LocalTier::new(1_000));
        let router = router(Arc::clone(&tier), false);

        let expires_at = Utc::now() + TimeDelta::seconds(30);
        let msg = SyncMessage::new("peer", "app:u:1", "\"alice\"", expires_at);
        router.apply_sync(&encode(&msg)).await;

        assert_eq!(tier.get("app:u:1").await, Some(Bytes::from_static(b"\"alice\"")));
    }

    #[tokio::test]
    async fn own_sync_echo_is_ignored() {
        let tier = Arc::new(LocalTier::new(1_000));
        let router = router(Arc::clone(&tier), false);

        let expires_at = Utc::now() + TimeDelta::seconds(30);
        let msg = SyncMessage::new("self", "app:u:1", "\"alice\"", expires_at);
        router.apply_sync(&encode(&msg)).await;

        assert!(!tier.contains("app:u:1").await);
    }

    #[tokio::test]
    async fn expired_sync_is_not_stored() {
        let tier = Arc::new(LocalTier::new(1_000));
        let router = router(Arc::clone(&tier), false);

        let expires_at = Utc::now() - TimeDelta::seconds(1);
        let msg = SyncMessage::new("peer", "app:u:1", "\"alice\"", expires_at);
        router.apply_sync(&encode(&msg)).await;

        assert!(!tier.contains("app:u:1").await);
    }

    #[tokio::test]
    async fn sync_for_the_sentinel_key_is_never_stored() {
        let tier = Arc::new(LocalTier::new(1_000));
        let router = router(Arc::clone(&tier), false);

        let expires_at = Utc::now() + TimeDelta::seconds(30);
        let msg = SyncMessage::new("peer", "app:*FLUSHDB*", "\"x\"", expires_at);
        router.apply_sync(&encode(&msg)).await;

        assert_eq!(tier.entry_count().await, 0);
    }

    #[tokio::test]
    async fn reconnect_flushes_only_when_configured() {
        let tier = seeded_tier().await;
        let keeping = router(Arc::clone(&tier), false);
        keeping.on_reconnected().await;
        assert!(tier.contains("app:a").await);

        let flushing = router(Arc::clone(&tier), true);
        flushing.on_reconnected().await;
        assert_eq!(tier.entry_count().await, 0);
    }
}
