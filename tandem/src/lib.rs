#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Builder for configuring and constructing the engine.
pub mod builder;

/// The hybrid engine orchestrating both tiers and the bus.
pub mod cache;

/// Engine configuration and per-write options.
pub mod config;

/// Error types and the surface/swallow propagation policy.
pub mod error;

pub(crate) mod bus;

#[doc(inline)]
pub use crate::builder::HybridCacheBuilder;
#[doc(inline)]
pub use crate::cache::HybridCache;
#[doc(inline)]
pub use crate::config::{CacheConfig, SetOptions};
#[doc(inline)]
pub use crate::error::{BoxError, CacheError, CacheResult};

pub use tandem_core::{Codec, CodecError, JsonCodec, Namespace};
pub use tandem_local::LocalTier;
