//! Error types for the sync layer.

use metamind_protocol::ProtocolError;

/// Errors that can occur while preparing, encoding, or decoding updates.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// JSON encoding or decoding failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// zlib compression failed.
    #[error("compression failed: {0}")]
    Compress(#[source] std::io::Error),

    /// The payload was marked compressed but isn't valid base64/zlib.
    /// Never returns partially decoded data.
    #[error("decompression failed: {0}")]
    Decompress(String),

    /// An update decoded to something other than a JSON object.
    #[error("update payload is not a JSON object")]
    NotAnObject,

    /// An update arrived without the `_meta` block.
    #[error("update payload has no metadata")]
    MissingMeta,

    /// The [`SyncContext`](crate::SyncContext) was shut down.
    #[error("sync context has been shut down")]
    ShutDown,
}

/// A delta path that can't be applied to the base snapshot.
///
/// Reported per key: the rest of the delta is still applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// An intermediate segment is absent (only fatal for removals).
    #[error("path `{path}`: segment `{segment}` does not exist")]
    Missing { path: String, segment: String },

    /// An intermediate segment exists but holds a non-map value.
    #[error("path `{path}`: segment `{segment}` is not a map")]
    NotAMap { path: String, segment: String },
}
