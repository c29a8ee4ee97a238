use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use moka::Expiry;
use moka::future::Cache;
use tokio::sync::RwLock;

/// A single stored entry: the serialized value plus its absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierEntry {
    /// Serialized value, exactly as the codec produced it.
    pub data: Bytes,
    /// Wall-clock instant past which the entry must not be returned.
    pub expires_at: DateTime<Utc>,
}

impl TierEntry {
    fn new(data: Bytes, expires_at: DateTime<Utc>) -> Self {
        Self { data, expires_at }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Expiration policy that derives each entry's TTL from its absolute
/// `expires_at` timestamp.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct EntryExpiry;

impl Expiry<String, TierEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &TierEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Self::remaining(value)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &TierEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        // Use the NEW value's expiry. The default implementation returns
        // `duration_until_expiry`, which keeps the OLD expiration and
        // would truncate an overwrite that carries a longer TTL.
        Self::remaining(value)
    }
}

impl EntryExpiry {
    fn remaining(value: &TierEntry) -> Option<Duration> {
        let delta = value.expires_at - Utc::now();
        let millis = delta.num_milliseconds();
        if millis <= 0 {
            Some(Duration::ZERO)
        } else {
            Some(Duration::from_millis(millis as u64))
        }
    }
}

/// The per-process memory tier.
///
/// Ordinary `insert`/`get`/`remove` traffic relies on the underlying
/// store's own concurrency and only takes the shared side of the rebuild
/// lock. [`rebuild`](Self::rebuild) takes the exclusive side, drops the
/// store and recreates it, so no in-flight operation can observe a torn
/// state and no handle to the old store survives.
pub struct LocalTier {
    cache: RwLock<Cache<String, TierEntry>>,
    max_entries: u64,
}

impl LocalTier {
    /// Creates a tier bounded to `max_entries` entries.
    pub fn new(max_entries: u64) -> Self {
        Self {
            cache: RwLock::new(Self::build_cache(max_entries)),
            max_entries,
        }
    }

    fn build_cache(max_entries: u64) -> Cache<String, TierEntry> {
        Cache::builder()
            .max_capacity(max_entries)
            .expire_after(EntryExpiry)
            .build()
    }

    /// Stores an entry with a relative TTL.
    pub async fn insert(&self, key: impl Into<String>, data: Bytes, ttl: Duration) {
        let expires_at = Utc::now() + TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        self.insert_until(key, data, expires_at).await;
    }

    /// Stores an entry with an absolute expiry.
    ///
    /// This is the path bus-driven warming takes: the sync message
    /// carries the originator's wall-clock expiry, and an already-expired
    /// entry is simply not stored.
    pub async fn insert_until(&self, key: impl Into<String>, data: Bytes, expires_at: DateTime<Utc>) {
        if expires_at <= Utc::now() {
            return;
        }
        let cache = self.cache.read().await;
        cache.insert(key.into(), TierEntry::new(data, expires_at)).await;
    }

    /// Returns the stored bytes for `key`, if present and not expired.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        let cache = self.cache.read().await;
        let entry = cache.get(key).await?;
        // The expiry policy evicts lazily; enforce the deadline exactly.
        if entry.is_expired(Utc::now()) {
            cache.invalidate(key).await;
            return None;
        }
        Some(entry.data)
    }

    /// Returns `true` if `key` is present and not expired.
    pub async fn contains(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    /// Removes a single entry.
    pub async fn remove(&self, key: &str) {
        let cache = self.cache.read().await;
        cache.invalidate(key).await;
    }

    /// Drops every entry by discarding the store and creating a new one.
    ///
    /// Serialized against all other operations via the exclusive lock.
    pub async fn rebuild(&self) {
        let mut cache = self.cache.write().await;
        *cache = Self::build_cache(self.max_entries);
    }

    /// Number of live entries, after flushing the store's pending work.
    pub async fn entry_count(&self) -> u64 {
        let cache = self.cache.read().await;
        cache.run_pending_tasks().await;
        cache.entry_count()
    }
}

impl std::fmt::Debug for LocalTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTier")
            .field("max_entries", &self.max_entries)
            .finish()
    }
}
