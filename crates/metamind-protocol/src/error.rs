//! Error types for the protocol layer.
//!
//! Each MetaMind crate defines its own error enum. When you see a
//! `ProtocolError`, you know the problem is in serialization, not in
//! networking, delta application, or session bookkeeping.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust type).
    ///
    /// Common causes: malformed JSON, an unknown `event` tag, or a
    /// missing required field.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message parsed but violates protocol rules.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
