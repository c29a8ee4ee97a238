//! Engine configuration and per-write options.

use std::time::Duration;

/// Configuration for a [`HybridCache`] engine.
///
/// Usually assembled through [`HybridCacheBuilder`]; the fields are public
/// so configuration can also be loaded from an application's own config
/// layer and passed in wholesale.
///
/// [`HybridCache`]: crate::HybridCache
/// [`HybridCacheBuilder`]: crate::HybridCacheBuilder
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis connection URL in format
    /// `redis://[:<password>@]<host>[:<port>][/<database>]`.
    pub redis_url: String,

    /// Shared group name: the key-namespace prefix and the basis of the
    /// invalidation channel name. Every instance that should observe the
    /// same cache must use the same group.
    pub group: String,

    /// Name of the value-warming back-channel. Defaults to
    /// `"<group>:sync"` when unset.
    pub back_channel: Option<String>,

    /// Fallback TTL for local-tier entries when a write names none.
    pub default_local_ttl: Duration,

    /// Fallback TTL for Redis entries when a write names none.
    pub default_redis_ttl: Duration,

    /// Ceiling on transport connect retries and on attempts per bus
    /// publish.
    pub connect_retry: u32,

    /// When `true`, building the engine connects and subscribes eagerly
    /// and fails fast; when `false`, the connection is established lazily
    /// on first use.
    pub abort_on_connect_fail: bool,

    /// Whether Redis-side errors surface to callers or are swallowed
    /// (logged, with reads degrading to a miss).
    pub surface_remote_errors: bool,

    /// Rebuild the local tier when the bus connection is restored, on the
    /// grounds that invalidations may have been missed while disconnected.
    pub flush_local_on_reconnect: bool,

    /// Toggle for diagnostic log emission.
    pub enable_logging: bool,

    /// Entry capacity of the local tier.
    pub local_capacity: u64,

    /// Base of the linear back-off between bus publish attempts
    /// (`base × attempt`).
    pub publish_retry_base: Duration,

    /// Timeout for establishing the Redis connection. `None` waits
    /// indefinitely.
    pub connection_timeout: Option<Duration>,

    /// Timeout for individual Redis responses. `None` waits indefinitely.
    pub response_timeout: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: String::new(),
            group: "tandem".into(),
            back_channel: None,
            default_local_ttl: Duration::from_secs(120),
            default_redis_ttl: Duration::from_secs(600),
            connect_retry: 6,
            abort_on_connect_fail: true,
            surface_remote_errors: true,
            flush_local_on_reconnect: false,
            enable_logging: false,
            local_capacity: 100_000,
            publish_retry_base: Duration::from_millis(100),
            connection_timeout: None,
            response_timeout: None,
        }
    }
}

impl CacheConfig {
    /// Resolved back-channel name.
    pub(crate) fn back_channel_name(&self) -> String {
        self.back_channel
            .clone()
            .unwrap_or_else(|| format!("{}:sync", self.group))
    }

    /// Invalidation channel name: `"<group>:invalidate"`.
    pub(crate) fn invalidation_channel_name(&self) -> String {
        format!("{}:invalidate", self.group)
    }
}

/// Grouped options for a single write (or read-through write).
///
/// Unset TTLs fall back to the engine defaults. Both tiers are enabled
/// unless switched off here.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tandem::SetOptions;
///
/// let options = SetOptions::new()
///     .local_ttl(Duration::from_secs(30))
///     .redis_ttl(Duration::from_secs(60))
///     .fire_and_forget();
/// assert!(options.local_enable && options.redis_enable);
/// ```
#[derive(Debug, Clone)]
pub struct SetOptions {
    /// TTL for the local-tier entry; engine default when `None`.
    pub local_ttl: Option<Duration>,
    /// TTL for the Redis entry; engine default when `None`.
    pub redis_ttl: Option<Duration>,
    /// Issue the Redis write without awaiting its acknowledgement.
    pub fire_and_forget: bool,
    /// Write to the local tier.
    pub local_enable: bool,
    /// Write to Redis.
    pub redis_enable: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            local_ttl: None,
            redis_ttl: None,
            fire_and_forget: false,
            local_enable: true,
            redis_enable: true,
        }
    }
}

impl SetOptions {
    /// Creates options with both tiers enabled and default TTLs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the local-tier TTL.
    pub fn local_ttl(mut self, ttl: Duration) -> Self {
        self.local_ttl = Some(ttl);
        self
    }

    /// Sets the Redis TTL.
    pub fn redis_ttl(mut self, ttl: Duration) -> Self {
        self.redis_ttl = Some(ttl);
        self
    }

    /// Issues the Redis write without awaiting its acknowledgement.
    pub fn fire_and_forget(mut self) -> Self {
        self.fire_and_forget = true;
        self
    }

    /// Enables or disables the local-tier write.
    pub fn local_enable(mut self, enabled: bool) -> Self {
        self.local_enable = enabled;
        self
    }

    /// Enables or disables the Redis write.
    pub fn redis_enable(mut self, enabled: bool) -> Self {
        self.redis_enable = enabled;
        self
    }
}
