//! Builder for configuring [`HybridCache`].

use std::time::Duration;

use tandem_core::{Codec, JsonCodec};

use crate::cache::HybridCache;
use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};

/// Builder for creating and configuring a [`HybridCache`].
///
/// Use [`HybridCache::builder`] to create a new builder instance.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use tandem::HybridCache;
///
/// # async fn demo() -> Result<(), tandem::CacheError> {
/// let cache = HybridCache::builder()
///     .redis_url("redis://localhost:6379/")
///     .group("app")
///     .default_local_ttl(Duration::from_secs(30))
///     .default_redis_ttl(Duration::from_secs(300))
///     .flush_local_on_reconnect(true)
///     .build()
///     .await?;
/// # let _ = cache;
/// # Ok(())
/// # }
/// ```
pub struct HybridCacheBuilder<C = JsonCodec>
where
    C: Codec,
{
    config: CacheConfig,
    codec: C,
}

impl Default for HybridCacheBuilder<JsonCodec> {
    fn default() -> Self {
        Self {
            config: CacheConfig::default(),
            codec: JsonCodec,
        }
    }
}

impl HybridCacheBuilder<JsonCodec> {
    /// Starts from an existing configuration instead of the defaults.
    pub fn from_config(config: CacheConfig) -> Self {
        Self {
            config,
            codec: JsonCodec,
        }
    }
}

impl<C: Codec> HybridCacheBuilder<C> {
    /// Sets the Redis connection URL. Required.
    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.config.redis_url = url.into();
        self
    }

    /// Sets the shared group name.
    ///
    /// Every instance that should observe the same cache must use the
    /// same group; it prefixes every key and names the invalidation
    /// channel.
    ///
    /// # Default
    ///
    /// `"tandem"`
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.config.group = group.into();
        self
    }

    /// Sets the back-channel name.
    ///
    /// # Default
    ///
    /// `"<group>:sync"`
    pub fn back_channel(mut self, name: impl Into<String>) -> Self {
        self.config.back_channel = Some(name.into());
        self
    }

    /// Sets the fallback TTL for local-tier entries.
    ///
    /// # Default
    ///
    /// 120 seconds.
    pub fn default_local_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_local_ttl = ttl;
        self
    }

    /// Sets the fallback TTL for Redis entries.
    ///
    /// # Default
    ///
    /// 600 seconds.
    pub fn default_redis_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_redis_ttl = ttl;
        self
    }

    /// Sets the ceiling on transport connect retries and per-publish bus
    /// retry attempts.
    ///
    /// # Default
    ///
    /// `6`
    pub fn connect_retry(mut self, retries: u32) -> Self {
        self.config.connect_retry = retries;
        self
    }

    /// Chooses between eager (fail-fast) and lazy connection at build
    /// time.
    ///
    /// # Default
    ///
    /// `true` (connect eagerly, fail fast).
    pub fn abort_on_connect_fail(mut self, abort: bool) -> Self {
        self.config.abort_on_connect_fail = abort;
        self
    }

    /// Chooses whether Redis-side errors surface to callers or are
    /// swallowed (reads degrade to a miss, writes and deletes still
    /// mutate the local tier and publish).
    ///
    /// # Default
    ///
    /// `true` (surface).
    pub fn surface_remote_errors(mut self, surface: bool) -> Self {
        self.config.surface_remote_errors = surface;
        self
    }

    /// Rebuilds the local tier whenever the bus connection is restored.
    ///
    /// Invalidations may have been missed while disconnected; flushing
    /// treats everything local as stale.
    ///
    /// # Default
    ///
    /// `false`
    pub fn flush_local_on_reconnect(mut self, flush: bool) -> Self {
        self.config.flush_local_on_reconnect = flush;
        self
    }

    /// Toggles diagnostic log emission.
    ///
    /// # Default
    ///
    /// `false`
    pub fn enable_logging(mut self, enabled: bool) -> Self {
        self.config.enable_logging = enabled;
        self
    }

    /// Sets the entry capacity of the local tier.
    ///
    /// # Default
    ///
    /// `100_000`
    pub fn local_capacity(mut self, max_entries: u64) -> Self {
        self.config.local_capacity = max_entries;
        self
    }

    /// Sets the base of the linear back-off between bus publish attempts.
    ///
    /// # Default
    ///
    /// 100 milliseconds.
    pub fn publish_retry_base(mut self, base: Duration) -> Self {
        self.config.publish_retry_base = base;
        self
    }

    /// Sets the timeout for establishing the Redis connection.
    ///
    /// # Default
    ///
    /// No timeout (waits indefinitely).
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = Some(timeout);
        self
    }

    /// Sets the timeout for individual Redis responses.
    ///
    /// # Default
    ///
    /// No timeout (waits indefinitely).
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.response_timeout = Some(timeout);
        self
    }

    /// Swaps the value codec.
    ///
    /// The codec serializes user values, both bus payloads, and the
    /// entries held by the local tier.
    ///
    /// # Default
    ///
    /// [`JsonCodec`]
    pub fn codec<NewC: Codec>(self, codec: NewC) -> HybridCacheBuilder<NewC> {
        HybridCacheBuilder {
            config: self.config,
            codec,
        }
    }

    /// Builds the engine.
    ///
    /// With `abort_on_connect_fail` set (the default) this connects to
    /// Redis, subscribes both bus channels and fails fast on any error;
    /// otherwise the connection is established lazily on first use.
    ///
    /// # Errors
    ///
    /// [`CacheError::InvalidArgument`] when no Redis URL was given;
    /// [`CacheError::Transport`] when the eager connection fails.
    pub async fn build(self) -> CacheResult<HybridCache<C>> {
        if self.config.redis_url.trim().is_empty() {
            return Err(CacheError::InvalidArgument(
                "redis_url is required, call .redis_url() before .build()",
            ));
        }
        let eager = self.config.abort_on_connect_fail;
        let cache = HybridCache::with_codec(self.config, self.codec);
        if eager {
            cache.connect_eagerly().await?;
        }
        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_redis_url_is_rejected() {
        let err = HybridCache::builder().group("app").build().await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn lazy_build_succeeds_without_a_server() {
        // abort_on_connect_fail(false) defers the connection to first use.
        let cache = HybridCache::builder()
            .redis_url("redis://127.0.0.1:1/")
            .group("app")
            .abort_on_connect_fail(false)
            .build()
            .await
            .unwrap();
        assert_eq!(cache.namespace().group(), "app");
    }
}
