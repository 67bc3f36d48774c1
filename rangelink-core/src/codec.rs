//! Pluggable body encoding for exchanged messages.
//!
//! The concrete wire representation of a certificate-management message
//! belongs to the caller. The exchange layer only needs something that
//! turns a request into bytes and bytes back into a reply, which is what
//! [`MessageCodec`] captures. [`JsonCodec`] is the stock implementation.
//!
//! ```rust
//! use rangelink_core::{JsonCodec, MessageCodec};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Debug, PartialEq)]
//! struct ArchiveKey {
//!     request_id: u64,
//! }
//!
//! let codec = JsonCodec;
//! let bytes = codec.encode(&ArchiveKey { request_id: 9 }).unwrap();
//! assert_eq!(&bytes, br#"{"request_id":9}"#);
//! let back: ArchiveKey = codec.decode(&bytes).unwrap();
//! assert_eq!(back.request_id, 9);
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Error type for codec operations.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Failed to encode a message to bytes.
    #[error("encode error: {0}")]
    Encode(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Failed to decode bytes to a message.
    #[error("decode error: {0}")]
    Decode(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Body encoding used by the message exchange.
///
/// Implementations must be cheap to clone; every connector holds one.
pub trait MessageCodec: Clone + Send + Sync + 'static {
    /// Content type advertised when the peer configuration leaves it unset.
    fn content_type(&self) -> &'static str;

    /// Encode a request body.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode a reply body.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` if the bytes are not a valid message.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec using serde_json.
#[derive(Clone, Default, Debug, Copy)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(msg).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}
