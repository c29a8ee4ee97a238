//! Value serialization.
//!
//! A single configured codec turns typed values into the bytes stored in
//! both tiers and carried on the coherence bus. The engine is generic over
//! [`Codec`], with [`JsonCodec`] as the default.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Error type for codec operations.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Value could not be serialized.
    #[error(transparent)]
    Encode(Box<dyn std::error::Error + Send + Sync>),

    /// Stored bytes could not be deserialized into the requested type.
    #[error(transparent)]
    Decode(Box<dyn std::error::Error + Send + Sync>),
}

/// Serialization seam for cache values and bus payloads.
///
/// Implementations must be cheap to clone; the engine hands a copy to the
/// bus listener task.
pub trait Codec: Clone + Send + Sync + 'static {
    /// Serializes a value to bytes.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes, CodecError>;

    /// Deserializes bytes into the requested type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec (default).
///
/// Human-readable and self-describing, which also makes the back-channel
/// payloads inspectable with `redis-cli monitor`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes, CodecError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|err| CodecError::Encode(Box::new(err)))
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(data).map_err(|err| CodecError::Decode(Box::new(err)))
    }
}
