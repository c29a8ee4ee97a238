//! Error types for hybrid cache operations.

use tandem_core::CodecError;
use thiserror::Error;

/// Boxed error type accepted from data retrievers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias used throughout the crate.
pub type CacheResult<T> = Result<T, CacheError>;

/// Error type for hybrid cache operations.
///
/// Argument validation always surfaces. Transport failures are logged and
/// then surfaced or swallowed according to the engine's
/// `surface_remote_errors` setting; swallowed read failures degrade to a
/// miss, swallowed write and delete failures still mutate the local tier
/// and publish on the bus. Bus publish failures never reach callers —
/// they enter a bounded retry loop and are then dropped.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A caller-supplied argument was rejected (empty key, empty bulk
    /// input, reserved key).
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// An error from the Redis transport.
    #[error(transparent)]
    Transport(#[from] redis::RedisError),

    /// A value or bus payload failed to serialize or deserialize.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The data retriever passed to a read-through get failed.
    #[error("data retriever failed: {0}")]
    Upstream(#[source] BoxError),
}
