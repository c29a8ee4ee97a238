//! In-process memory tier for the `tandem` hybrid cache.
//!
//! The local tier is a per-process store of serialized entries with
//! per-entry TTL, sitting in front of the shared Redis tier. It is safe
//! for concurrent use and supports a destructive [`rebuild`] that drops
//! every entry at once — the operation the coherence bus triggers when a
//! peer broadcasts the clear-all sentinel.
//!
//! [`rebuild`]: LocalTier::rebuild

mod tier;

pub use tier::{LocalTier, TierEntry};
