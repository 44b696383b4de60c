//! Unified error type for the MetaMind server.

use metamind_protocol::ProtocolError;
use metamind_session::SessionError;
use metamind_sync::SyncError;
use metamind_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates the `From` impl, so
/// `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum MetamindError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A sync-level error (compression, shut-down context).
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// A session-level error (unknown module, no session, module failure).
    #[error(transparent)]
    Session(#[from] SessionError),
}
