//! The hybrid engine: read/write/evict orchestration across both tiers.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{TimeDelta, Utc};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use redis::Client;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tandem_core::key::FLUSH_SENTINEL;
use tandem_core::{Codec, InvalidationMessage, JsonCodec, Namespace, SyncMessage};
use tandem_local::LocalTier;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::builder::HybridCacheBuilder;
use crate::bus::{self, BusChannels, Router};
use crate::config::{CacheConfig, SetOptions};
use crate::error::{BoxError, CacheError, CacheResult};

/// Number of keys requested per SCAN step.
const SCAN_BATCH: usize = 100;

/// Two-tier cache engine: a per-process memory tier in front of a shared
/// Redis tier, kept approximately coherent across instances by two
/// pub/sub channels.
///
/// Writes propagate the new value to peers (a warming sync on the
/// back-channel); deletes propagate the key list (an invalidation). Both
/// tiers keep independent TTLs. Coherence is eventually consistent:
/// delivery is best-effort and concurrent writers to the same key race,
/// with Redis as the tie-breaker on the next miss-reload.
///
/// The engine is cheap to clone and safe to share across tasks. The
/// connection to Redis is established lazily unless
/// `abort_on_connect_fail` asked [`build`] to connect eagerly; the bus
/// subscription always completes before the first command runs on that
/// connection.
///
/// # Example
///
/// ```no_run
/// use tandem::HybridCache;
///
/// # async fn demo() -> Result<(), tandem::CacheError> {
/// let cache = HybridCache::builder()
///     .redis_url("redis://127.0.0.1:6379/")
///     .group("app")
///     .build()
///     .await?;
///
/// cache.set("u:1", &"alice").await?;
/// let name: Option<String> = cache.get("u:1").await?;
/// assert_eq!(name.as_deref(), Some("alice"));
/// # Ok(())
/// # }
/// ```
///
/// [`build`]: crate::HybridCacheBuilder::build
pub struct HybridCache<C: Codec = JsonCodec> {
    inner: Arc<Inner<C>>,
}

impl<C: Codec> Clone for HybridCache<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Codec> std::fmt::Debug for HybridCache<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridCache")
            .field("group", &self.inner.namespace.group())
            .field("instance_id", &self.inner.instance_id)
            .finish()
    }
}

struct Inner<C: Codec> {
    config: CacheConfig,
    namespace: Namespace,
    instance_id: String,
    codec: C,
    local: Arc<LocalTier>,
    channels: BusChannels,
    /// Lazy-initialized connection plus the bus listener tied to it.
    /// Held in a takeable slot so `close()` can drop the transport.
    connection: Mutex<Option<ConnectionState>>,
}

struct ConnectionState {
    manager: ConnectionManager,
    listener: JoinHandle<()>,
}

impl<C: Codec> Drop for Inner<C> {
    fn drop(&mut self) {
        if let Some(state) = self.connection.get_mut() {
            state.listener.abort();
        }
    }
}

/// Appends `protocol=resp3` to the connection URL; push messages (and
/// with them pub/sub on the data connection) require RESP3.
fn resp3_url(url: &str) -> String {
    if url.contains("protocol=") {
        url.to_owned()
    } else if url.contains('?') {
        format!("{url}&protocol=resp3")
    } else {
        format!("{url}?protocol=resp3")
    }
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().is_some_and(|rx| *rx.borrow())
}

impl HybridCache<JsonCodec> {
    /// Creates a builder for a JSON-codec engine.
    #[must_use]
    pub fn builder() -> HybridCacheBuilder<JsonCodec> {
        HybridCacheBuilder::default()
    }
}

impl<C: Codec> HybridCache<C> {
    pub(crate) fn with_codec(config: CacheConfig, codec: C) -> Self {
        let namespace = Namespace::new(config.group.clone());
        let channels = BusChannels {
            invalidation: config.invalidation_channel_name(),
            back: config.back_channel_name(),
        };
        let local = Arc::new(LocalTier::new(config.local_capacity));
        Self {
            inner: Arc::new(Inner {
                config,
                namespace,
                instance_id: Uuid::new_v4().to_string(),
                codec,
                local,
                channels,
                connection: Mutex::new(None),
            }),
        }
    }

    /// This instance's opaque identifier, as carried in every bus message.
    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    /// The key namespace shared by the instance group.
    pub fn namespace(&self) -> &Namespace {
        &self.inner.namespace
    }

    /// Number of live entries in this instance's local tier.
    pub async fn local_entry_count(&self) -> u64 {
        self.inner.local.entry_count().await
    }

    // ---- connection -----------------------------------------------------

    /// Gets or initializes the connection lazily.
    ///
    /// The slot stays locked across initialization, so concurrent first
    /// uses establish the manager, subscribe both bus channels and spawn
    /// the listener exactly once.
    async fn connection(&self) -> CacheResult<ConnectionManager> {
        let mut slot = self.inner.connection.lock().await;
        if let Some(state) = slot.as_ref() {
            return Ok(state.manager.clone());
        }
        let state = self.connect().await?;
        let manager = state.manager.clone();
        *slot = Some(state);
        Ok(manager)
    }

    async fn connect(&self) -> CacheResult<ConnectionState> {
        let url = resp3_url(&self.inner.config.redis_url);
        let client = Client::open(url.as_str())?;

        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let mut manager_config = ConnectionManagerConfig::new()
            .set_push_sender(push_tx)
            .set_automatic_resubscription()
            .set_number_of_retries(self.inner.config.connect_retry as usize);
        if let Some(timeout) = self.inner.config.connection_timeout {
            manager_config = manager_config.set_connection_timeout(timeout);
        }
        if let Some(timeout) = self.inner.config.response_timeout {
            manager_config = manager_config.set_response_timeout(timeout);
        }

        let mut manager = client
            .get_connection_manager_with_config(manager_config)
            .await?;
        manager.subscribe(&self.inner.channels.invalidation).await?;
        manager.subscribe(&self.inner.channels.back).await?;

        let router = Router::new(
            self.inner.instance_id.clone(),
            self.inner.namespace.clone(),
            Arc::clone(&self.inner.local),
            self.inner.codec.clone(),
            self.inner.config.flush_local_on_reconnect,
            self.inner.config.enable_logging,
        );
        let listener = bus::spawn_listener(router, self.inner.channels.clone(), push_rx);

        if self.log() {
            debug!(instance_id = %self.inner.instance_id, "connected and subscribed");
        }
        Ok(ConnectionState { manager, listener })
    }

    pub(crate) async fn connect_eagerly(&self) -> CacheResult<()> {
        self.connection().await.map(|_| ())
    }

    // ---- reads ----------------------------------------------------------

    /// Returns the cached value for `key`, or `None` on a miss.
    ///
    /// The local tier is consulted first; a local entry that does not
    /// decode as `T` is logged and treated as a miss. On a Redis hit the
    /// entry is written back into the local tier with a TTL equal to
    /// Redis's remaining TTL for that key. Transport errors degrade to a
    /// miss unless `surface_remote_errors` is set.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        Self::ensure_key(key)?;
        let namespaced = self.inner.namespace.key(key);
        self.read(&namespaced, true).await
    }

    /// Read-through variant of [`get`](Self::get).
    ///
    /// On a miss in both tiers the retriever is invoked; its value is
    /// written to both tiers with the TTLs from `options` and a warming
    /// sync is published, exactly as [`set_with`](Self::set_with) would.
    /// Retriever failures follow the surface/swallow policy.
    pub async fn get_with<T, F, Fut>(
        &self,
        key: &str,
        retriever: F,
        options: &SetOptions,
    ) -> CacheResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
    {
        Self::ensure_key(key)?;
        let namespaced = self.inner.namespace.key(key);
        if let Some(value) = self.read(&namespaced, true).await? {
            return Ok(Some(value));
        }
        match retriever().await {
            Ok(value) => {
                self.write_entry(&namespaced, &value, options).await?;
                Ok(Some(value))
            }
            Err(err) => {
                self.absorb(CacheError::Upstream(err))?;
                Ok(None)
            }
        }
    }

    /// Returns `(found, value)` without ever surfacing transport or
    /// decode errors; any failure degrades to `(false, None)`.
    ///
    /// Argument validation still applies.
    pub async fn try_get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<(bool, Option<T>)> {
        Self::ensure_key(key)?;
        let namespaced = self.inner.namespace.key(key);
        let value = self.read(&namespaced, false).await?;
        Ok((value.is_some(), value))
    }

    /// Shared read path. `apply_policy` selects between the configured
    /// surface/swallow behaviour (`get`) and swallow-always (`try_get`).
    async fn read<T: DeserializeOwned>(
        &self,
        namespaced: &str,
        apply_policy: bool,
    ) -> CacheResult<Option<T>> {
        if let Some(raw) = self.inner.local.get(namespaced).await {
            match self.inner.codec.decode::<T>(&raw) {
                Ok(value) => return Ok(Some(value)),
                Err(err) => {
                    if self.log() {
                        warn!(key = namespaced, error = %err, "local entry does not decode as the requested type, treating as miss");
                    }
                }
            }
        }

        match self.redis_get(namespaced).await {
            Ok(Some(raw)) => {
                let value = match self.inner.codec.decode::<T>(&raw) {
                    Ok(value) => value,
                    Err(err) if apply_policy => return Err(err.into()),
                    Err(err) => {
                        if self.log() {
                            warn!(key = namespaced, error = %err, "redis entry does not decode as the requested type, treating as miss");
                        }
                        return Ok(None);
                    }
                };
                let ttl = self.remote_expiration(namespaced).await;
                self.inner
                    .local
                    .insert(namespaced.to_string(), raw, ttl)
                    .await;
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                if apply_policy {
                    self.absorb(err)?;
                } else if self.log() {
                    warn!(key = namespaced, error = %err, "redis read failed, treating as miss");
                }
                Ok(None)
            }
        }
    }

    /// Returns `true` when the key exists in Redis, falling back to the
    /// local tier — a purely-local entry still "exists" while Redis is
    /// unreachable.
    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        Self::ensure_key(key)?;
        let namespaced = self.inner.namespace.key(key);
        match self.redis_exists(&namespaced).await {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(err) => self.absorb(err)?,
        }
        Ok(self.inner.local.contains(&namespaced).await)
    }

    /// Remaining TTL of the key as Redis reports it.
    ///
    /// Any failure — transport error, missing key, no expiry set —
    /// returns the configured default distributed expiration.
    pub async fn get_expiration(&self, key: &str) -> CacheResult<Duration> {
        Self::ensure_key(key)?;
        let namespaced = self.inner.namespace.key(key);
        Ok(self.remote_expiration(&namespaced).await)
    }

    // ---- writes ---------------------------------------------------------

    /// Writes `value` under `key` to both tiers with the default TTLs and
    /// publishes a warming sync to peers.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> CacheResult<()> {
        self.set_with(key, value, &SetOptions::new()).await
    }

    /// Writes `value` under `key` with explicit [`SetOptions`].
    ///
    /// The local write happens before the Redis write; a swallowed
    /// transport failure still leaves the local entry in place and still
    /// publishes the sync, so the originating instance stays
    /// authoritative until the next reload. Peers receive the new value
    /// on the back-channel, not a purge.
    pub async fn set_with<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        options: &SetOptions,
    ) -> CacheResult<()> {
        Self::ensure_key(key)?;
        let namespaced = self.inner.namespace.key(key);
        self.write_entry(&namespaced, value, options).await
    }

    /// Writes every entry in `entries`, publishing one sync per entry.
    ///
    /// A swallowed transport failure on one entry does not prevent the
    /// remaining entries from being processed.
    pub async fn set_all<K, T, I>(&self, entries: I, options: &SetOptions) -> CacheResult<()>
    where
        K: AsRef<str>,
        T: Serialize,
        I: IntoIterator<Item = (K, T)>,
    {
        let entries: Vec<(K, T)> = entries.into_iter().collect();
        if entries.is_empty() {
            return Err(CacheError::InvalidArgument(
                "set_all requires at least one entry",
            ));
        }
        for (key, value) in &entries {
            self.set_with(key.as_ref(), value, options).await?;
        }
        Ok(())
    }

    async fn write_entry<T: Serialize>(
        &self,
        namespaced: &str,
        value: &T,
        options: &SetOptions,
    ) -> CacheResult<()> {
        let local_ttl = options.local_ttl.unwrap_or(self.inner.config.default_local_ttl);
        let redis_ttl = options.redis_ttl.unwrap_or(self.inner.config.default_redis_ttl);
        let raw = self.inner.codec.encode(value)?;

        if options.local_enable {
            self.inner
                .local
                .insert(namespaced.to_string(), raw.clone(), local_ttl)
                .await;
        }
        if options.redis_enable {
            if let Err(err) = self
                .redis_set(namespaced, raw.clone(), redis_ttl, options.fire_and_forget)
                .await
            {
                self.absorb(err)?;
            }
        }
        self.publish_sync(namespaced, &raw, local_ttl).await;
        Ok(())
    }

    // ---- deletes --------------------------------------------------------

    /// Removes a single key from both tiers and broadcasts the
    /// invalidation.
    pub async fn remove(&self, key: &str, fire_and_forget: bool) -> CacheResult<()> {
        self.remove_all(std::slice::from_ref(&key), fire_and_forget)
            .await
    }

    /// Removes a set of keys: one multi-key Redis delete, local removal,
    /// then one invalidation carrying the full key list.
    ///
    /// A swallowed transport failure still removes the keys locally and
    /// still publishes the invalidation.
    pub async fn remove_all<K: AsRef<str>>(
        &self,
        keys: &[K],
        fire_and_forget: bool,
    ) -> CacheResult<()> {
        if keys.is_empty() {
            return Err(CacheError::InvalidArgument(
                "remove requires at least one key",
            ));
        }
        for key in keys {
            Self::ensure_key(key.as_ref())?;
        }
        let namespaced: Vec<String> = keys
            .iter()
            .map(|key| self.inner.namespace.key(key.as_ref()))
            .collect();

        if let Err(err) = self.redis_del(&namespaced, fire_and_forget).await {
            self.absorb(err)?;
        }
        for key in &namespaced {
            self.inner.local.remove(key).await;
        }
        self.publish_invalidation(namespaced).await;
        Ok(())
    }

    /// Deletes every key matching `pattern` (namespaced per the group's
    /// pattern transform) and returns the removed, namespaced keys.
    ///
    /// The server-side scan and the per-key deletes poll `cancel` before
    /// each step; on cancellation scanning stops, but keys already
    /// deleted stay deleted, are removed locally and are still published
    /// in the invalidation.
    pub async fn remove_by_pattern(
        &self,
        pattern: &str,
        fire_and_forget: bool,
        cancel: Option<watch::Receiver<bool>>,
    ) -> CacheResult<Vec<String>> {
        Self::ensure_key(pattern)?;
        let glob = self.inner.namespace.pattern(pattern);
        let mut removed: Vec<String> = Vec::new();
        let mut failure: Option<CacheError> = None;

        match self.connection().await {
            Err(err) => {
                self.absorb(err)?;
            }
            Ok(mut conn) => {
                let mut cursor: u64 = 0;
                'scan: loop {
                    if is_cancelled(&cancel) {
                        break;
                    }
                    let mut cmd = redis::cmd("SCAN");
                    cmd.arg(cursor)
                        .arg("MATCH")
                        .arg(&glob)
                        .arg("COUNT")
                        .arg(SCAN_BATCH);
                    let (next, batch): (u64, Vec<String>) =
                        match cmd.query_async(&mut conn).await {
                            Ok(reply) => reply,
                            Err(err) => {
                                if let Err(err) = self.absorb(err.into()) {
                                    failure = Some(err);
                                }
                                break;
                            }
                        };
                    for key in batch {
                        if is_cancelled(&cancel) {
                            break 'scan;
                        }
                        if self.inner.namespace.is_flush_sentinel(&key) {
                            continue;
                        }
                        if fire_and_forget {
                            let mut conn = conn.clone();
                            let log = self.log();
                            let spawned = key.clone();
                            tokio::spawn(async move {
                                if let Err(err) = redis::cmd("DEL")
                                    .arg(&spawned)
                                    .query_async::<i64>(&mut conn)
                                    .await
                                {
                                    if log {
                                        debug!(key = %spawned, error = %err, "unacknowledged delete failed");
                                    }
                                }
                            });
                            removed.push(key);
                        } else {
                            match redis::cmd("DEL").arg(&key).query_async::<i64>(&mut conn).await
                            {
                                Ok(_) => removed.push(key),
                                Err(err) => {
                                    if let Err(err) = self.absorb(err.into()) {
                                        failure = Some(err);
                                        break 'scan;
                                    }
                                }
                            }
                        }
                    }
                    cursor = next;
                    if cursor == 0 {
                        break;
                    }
                }
            }
        }

        // Keys deleted on the server stay deleted even when the scan was
        // cancelled or failed midway; finish the local and bus bookkeeping
        // before reporting.
        for key in &removed {
            self.inner.local.remove(key).await;
        }
        if !removed.is_empty() {
            self.publish_invalidation(removed.clone()).await;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(removed),
        }
    }

    /// Lazy stream of namespaced keys matching `pattern`.
    ///
    /// Driven by the server-side scan cursor; polls `cancel` before each
    /// step and ends early when it fires. The clear-all sentinel is never
    /// yielded.
    pub async fn keys(
        &self,
        pattern: &str,
        cancel: Option<watch::Receiver<bool>>,
    ) -> CacheResult<BoxStream<'static, CacheResult<String>>> {
        Self::ensure_key(pattern)?;
        let conn = self.connection().await?;

        struct ScanState {
            conn: ConnectionManager,
            glob: String,
            namespace: Namespace,
            cancel: Option<watch::Receiver<bool>>,
            cursor: u64,
            buffer: VecDeque<String>,
            done: bool,
        }

        let state = ScanState {
            conn,
            glob: self.inner.namespace.pattern(pattern),
            namespace: self.inner.namespace.clone(),
            cancel,
            cursor: 0,
            buffer: VecDeque::new(),
            done: false,
        };

        let stream = stream::try_unfold(state, |mut state| async move {
            loop {
                if is_cancelled(&state.cancel) {
                    return Ok(None);
                }
                if let Some(key) = state.buffer.pop_front() {
                    return Ok(Some((key, state)));
                }
                if state.done {
                    return Ok(None);
                }
                let mut cmd = redis::cmd("SCAN");
                cmd.arg(state.cursor)
                    .arg("MATCH")
                    .arg(&state.glob)
                    .arg("COUNT")
                    .arg(SCAN_BATCH);
                let (next, batch): (u64, Vec<String>) = cmd
                    .query_async(&mut state.conn)
                    .await
                    .map_err(CacheError::from)?;
                state.cursor = next;
                if next == 0 {
                    state.done = true;
                }
                state
                    .buffer
                    .extend(
                        batch
                            .into_iter()
                            .filter(|key| !state.namespace.is_flush_sentinel(key)),
                    );
            }
        });
        Ok(stream.boxed())
    }

    // ---- global operations ----------------------------------------------

    /// Empties the Redis database, rebuilds the local tier and broadcasts
    /// the clear-all sentinel so every peer drops its local tier too.
    pub async fn clear_all(&self) -> CacheResult<()> {
        match self.connection().await {
            Err(err) => self.absorb(err)?,
            Ok(mut conn) => {
                if let Err(err) = redis::cmd("FLUSHDB").query_async::<()>(&mut conn).await {
                    self.absorb(err.into())?;
                }
            }
        }
        self.inner.local.rebuild().await;
        self.publish_invalidation(vec![self.inner.namespace.flush_sentinel()])
            .await;
        Ok(())
    }

    /// Rebuilds this instance's local tier and broadcasts the sentinel.
    ///
    /// On the wire this is indistinguishable from [`clear_all`]'s
    /// broadcast, so peers drop their local tiers as well; Redis is left
    /// untouched.
    ///
    /// [`clear_all`]: Self::clear_all
    pub async fn flush_local_caches(&self) -> CacheResult<()> {
        self.inner.local.rebuild().await;
        self.publish_invalidation(vec![self.inner.namespace.flush_sentinel()])
            .await;
        Ok(())
    }

    /// Unsubscribes from both bus channels, stops the listener, closes
    /// the transport and drops the local tier's contents. The engine must
    /// not be used afterwards.
    pub async fn close(&self) {
        let state = self.inner.connection.lock().await.take();
        if let Some(mut state) = state {
            let _ = state
                .manager
                .unsubscribe(&self.inner.channels.invalidation)
                .await;
            let _ = state.manager.unsubscribe(&self.inner.channels.back).await;
            state.listener.abort();
            // The taken manager drops here, closing the connection.
        }
        self.inner.local.rebuild().await;
    }

    // ---- redis primitives -----------------------------------------------

    async fn redis_get(&self, namespaced: &str) -> CacheResult<Option<Bytes>> {
        let mut conn = self.connection().await?;
        let data: Option<Vec<u8>> = redis::cmd("GET")
            .arg(namespaced)
            .query_async(&mut conn)
            .await?;
        Ok(data.map(Bytes::from))
    }

    async fn redis_set(
        &self,
        namespaced: &str,
        raw: Bytes,
        ttl: Duration,
        fire_and_forget: bool,
    ) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(namespaced)
            .arg(raw.as_ref())
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64);
        if fire_and_forget {
            let log = self.log();
            let key = namespaced.to_owned();
            tokio::spawn(async move {
                if let Err(err) = cmd.query_async::<()>(&mut conn).await {
                    if log {
                        debug!(%key, error = %err, "unacknowledged redis write failed");
                    }
                }
            });
            return Ok(());
        }
        cmd.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn redis_del(&self, namespaced: &[String], fire_and_forget: bool) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("DEL");
        for key in namespaced {
            cmd.arg(key);
        }
        if fire_and_forget {
            let log = self.log();
            tokio::spawn(async move {
                if let Err(err) = cmd.query_async::<i64>(&mut conn).await {
                    if log {
                        debug!(error = %err, "unacknowledged delete failed");
                    }
                }
            });
            return Ok(());
        }
        cmd.query_async::<i64>(&mut conn).await?;
        Ok(())
    }

    async fn redis_exists(&self, namespaced: &str) -> CacheResult<bool> {
        let mut conn = self.connection().await?;
        let found: bool = redis::cmd("EXISTS")
            .arg(namespaced)
            .query_async(&mut conn)
            .await?;
        Ok(found)
    }

    /// PTTL, converted to a remaining duration; the configured default
    /// distributed expiration on any failure.
    async fn remote_expiration(&self, namespaced: &str) -> Duration {
        let fallback = self.inner.config.default_redis_ttl;
        let Ok(mut conn) = self.connection().await else {
            return fallback;
        };
        match redis::cmd("PTTL")
            .arg(namespaced)
            .query_async::<i64>(&mut conn)
            .await
        {
            Ok(pttl) if pttl > 0 => Duration::from_millis(pttl as u64),
            Ok(_) => fallback,
            Err(err) => {
                if self.log() {
                    debug!(key = namespaced, error = %err, "expire-time lookup failed");
                }
                fallback
            }
        }
    }

    // ---- bus publishing -------------------------------------------------

    async fn publish_sync(&self, namespaced: &str, raw: &Bytes, local_ttl: Duration) {
        let value = match std::str::from_utf8(raw) {
            Ok(text) => text.to_owned(),
            Err(_) => {
                if self.log() {
                    warn!(key = namespaced, "non-text payload cannot ride the back-channel, peers will reload from redis");
                }
                return;
            }
        };
        let expires_at = Utc::now() + TimeDelta::from_std(local_ttl).unwrap_or(TimeDelta::MAX);
        let message = SyncMessage::new(
            self.inner.instance_id.clone(),
            namespaced,
            value,
            expires_at,
        );
        self.publish(self.inner.channels.back.clone(), &message).await;
    }

    async fn publish_invalidation(&self, keys: Vec<String>) {
        let message = InvalidationMessage::new(self.inner.instance_id.clone(), keys);
        self.publish(self.inner.channels.invalidation.clone(), &message)
            .await;
    }

    /// Encodes and publishes a bus message. Never surfaces failures: the
    /// payload enters the bounded retry loop on its own task and is
    /// dropped after the last attempt.
    async fn publish<M: Serialize>(&self, channel: String, message: &M) {
        let payload = match self.inner.codec.encode(message) {
            Ok(payload) => payload,
            Err(err) => {
                if self.log() {
                    warn!(%channel, error = %err, "bus payload failed to encode");
                }
                return;
            }
        };
        let conn = match self.connection().await {
            Ok(conn) => conn,
            Err(err) => {
                if self.log() {
                    debug!(%channel, error = %err, "bus publish skipped, no connection");
                }
                return;
            }
        };
        tokio::spawn(bus::publish_with_retry(
            conn,
            channel,
            payload,
            self.inner.config.connect_retry,
            self.inner.config.publish_retry_base,
            self.log(),
        ));
    }

    // ---- shared helpers -------------------------------------------------

    fn ensure_key(key: &str) -> CacheResult<()> {
        if key.trim().is_empty() {
            return Err(CacheError::InvalidArgument("key must not be empty or blank"));
        }
        if key == FLUSH_SENTINEL {
            return Err(CacheError::InvalidArgument(
                "key is reserved for the clear-all sentinel",
            ));
        }
        Ok(())
    }

    fn log(&self) -> bool {
        self.inner.config.enable_logging
    }

    /// Applies the surface/swallow policy to a swallowable failure.
    fn absorb(&self, err: CacheError) -> CacheResult<()> {
        if self.log() {
            match &err {
                CacheError::Upstream(_) => warn!(error = %err, "data retriever failed"),
                _ => warn!(error = %err, "redis operation failed"),
            }
        }
        if self.inner.config.surface_remote_errors {
            Err(err)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> HybridCache<JsonCodec> {
        // No connection is ever established: these tests only exercise
        // paths that reject their input before touching the transport.
        let config = CacheConfig {
            redis_url: "redis://127.0.0.1:1/".into(),
            group: "app".into(),
            ..Default::default()
        };
        HybridCache::with_codec(config, JsonCodec)
    }

    #[tokio::test]
    async fn blank_keys_are_rejected() {
        let cache = engine();
        assert!(matches!(
            cache.get::<String>("").await,
            Err(CacheError::InvalidArgument(_))
        ));
        assert!(matches!(
            cache.set("  ", &1u32).await,
            Err(CacheError::InvalidArgument(_))
        ));
        assert!(matches!(
            cache.exists("").await,
            Err(CacheError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn the_sentinel_key_is_reserved() {
        let cache = engine();
        assert!(matches!(
            cache.set("*FLUSHDB*", &1u32).await,
            Err(CacheError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn empty_bulk_inputs_are_rejected() {
        let cache = engine();
        let no_entries: Vec<(&str, u32)> = Vec::new();
        assert!(matches!(
            cache.set_all(no_entries, &SetOptions::new()).await,
            Err(CacheError::InvalidArgument(_))
        ));
        let no_keys: &[&str] = &[];
        assert!(matches!(
            cache.remove_all(no_keys, false).await,
            Err(CacheError::InvalidArgument(_))
        ));
    }

    #[test]
    fn instance_ids_are_unique_per_engine() {
        let a = engine();
        let b = engine();
        assert_ne!(a.instance_id(), b.instance_id());
    }

    #[test]
    fn resp3_is_requested_exactly_once() {
        assert_eq!(
            resp3_url("redis://localhost:6379/"),
            "redis://localhost:6379/?protocol=resp3"
        );
        assert_eq!(
            resp3_url("redis://localhost:6379/0?timeout=1s"),
            "redis://localhost:6379/0?timeout=1s&protocol=resp3"
        );
        assert_eq!(
            resp3_url("redis://localhost/?protocol=resp3"),
            "redis://localhost/?protocol=resp3"
        );
    }
}
