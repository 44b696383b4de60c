//! Codec trait and the JSON implementation.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! The sync layer also uses it to measure payload sizes, so the size it
//! reports is exactly the size of what goes on the wire.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because a single codec is shared by every
/// connection task for the lifetime of the server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;

    /// Serializes a value into a UTF-8 string.
    ///
    /// Only meaningful for text formats. The default implementation
    /// rejects output that isn't valid UTF-8.
    fn encode_text<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<String, ProtocolError> {
        let bytes = self.encode(value)?;
        String::from_utf8(bytes).map_err(|e| {
            ProtocolError::InvalidMessage(format!(
                "codec produced non-UTF-8 output: {e}"
            ))
        })
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// JSON is what browser and pygame clients both parse natively, and it is
/// the canonical form the sync layer measures and compresses.
///
/// ## Example
///
/// ```rust
/// use metamind_protocol::{ClientRequest, Codec, JsonCodec};
///
/// let codec = JsonCodec;
///
/// let bytes = codec.encode(&ClientRequest::ListModules).unwrap();
/// let decoded: ClientRequest = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded, ClientRequest::ListModules);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }

    fn encode_text<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<String, ProtocolError> {
        serde_json::to_string(value).map_err(ProtocolError::Encode)
    }
}
