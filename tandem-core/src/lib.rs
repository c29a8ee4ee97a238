//! Core building blocks shared by the `tandem` cache crates.
//!
//! This crate holds the leaf types of the hybrid cache: the key
//! [`Namespace`] that scopes every key to an instance group, the two
//! coherence-bus payloads ([`InvalidationMessage`] and [`SyncMessage`]),
//! and the [`Codec`] seam through which both user values and bus payloads
//! are serialized. Nothing in here performs I/O.

pub mod codec;
pub mod key;
pub mod message;

pub use codec::{Codec, CodecError, JsonCodec};
pub use key::Namespace;
pub use message::{InvalidationMessage, SyncMessage};
