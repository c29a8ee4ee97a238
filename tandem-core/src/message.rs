//! Coherence-bus payloads.
//!
//! Two message kinds travel between instances: [`InvalidationMessage`]
//! tells peers which keys to drop from their local tier, and
//! [`SyncMessage`] carries a freshly written value so peers can warm
//! their local tier without a Redis round-trip. Every message names the
//! instance that produced it; recipients drop their own echo, since Redis
//! pub/sub delivers to all subscribers including the publisher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Broadcast of keys to drop from peers' local tiers.
///
/// When the first key equals the group's clear-all sentinel the message
/// means "rebuild the whole local tier" instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    /// Identifier of the originating instance.
    pub instance_id: String,
    /// Namespaced keys to drop; non-empty.
    pub keys: Vec<String>,
}

impl InvalidationMessage {
    /// Creates an invalidation for the given namespaced keys.
    pub fn new(instance_id: impl Into<String>, keys: Vec<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            keys,
        }
    }
}

/// Broadcast of a freshly written entry for peer warming.
///
/// The value travels in its serialized form; the recipient stores it
/// verbatim and decodes on read, so no freshness validation happens beyond
/// trusting the wall-clock expiry carried here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMessage {
    /// Identifier of the instance that performed the write.
    pub event_creator_id: String,
    /// Namespaced key of the entry.
    pub key: String,
    /// Serialized value, exactly as the codec produced it.
    pub value: String,
    /// Absolute local expiry for the warmed entry.
    pub expires_at: DateTime<Utc>,
}

impl SyncMessage {
    /// Creates a sync event for a freshly written entry.
    pub fn new(
        event_creator_id: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_creator_id: event_creator_id.into(),
            key: key.into(),
            value: value.into(),
            expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Codec, JsonCodec};
    use chrono::TimeDelta;

    #[test]
    fn invalidation_round_trips_through_codec() {
        let codec = JsonCodec;
        let msg = InvalidationMessage::new("instance-a", vec!["app:u:1".into(), "app:u:2".into()]);
        let raw = codec.encode(&msg).unwrap();
        let back: InvalidationMessage = codec.decode(&raw).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn sync_round_trips_through_codec() {
        let codec = JsonCodec;
        let expires_at = Utc::now() + TimeDelta::seconds(30);
        let msg = SyncMessage::new("instance-a", "app:u:1", "\"alice\"", expires_at);
        let raw = codec.encode(&msg).unwrap();
        let back: SyncMessage = codec.decode(&raw).unwrap();
        assert_eq!(back.event_creator_id, "instance-a");
        assert_eq!(back.key, "app:u:1");
        assert_eq!(back.value, "\"alice\"");
        // Chrono serializes with sub-second precision; the timestamp must
        // survive unchanged.
        assert_eq!(back.expires_at, expires_at);
    }
}
