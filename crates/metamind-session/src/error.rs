//! Error types for the session layer.

use metamind_protocol::ClientId;
use metamind_sync::SyncError;

use crate::{ModuleError, SinkError};

/// Errors that can occur while managing sessions.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The client never connected, or already disconnected.
    #[error("client {0} is not connected")]
    NotConnected(ClientId),

    /// The client is connected but has no running session.
    #[error("client {0} has no active session")]
    NoActiveSession(ClientId),

    /// No module is registered under this id.
    #[error("unknown training module `{0}`")]
    UnknownModule(String),

    /// The active module doesn't accept this kind of input.
    #[error("module `{module}` does not handle {input} input")]
    Unsupported { module: String, input: &'static str },

    /// The training module itself failed.
    #[error(transparent)]
    Module(#[from] ModuleError),

    /// Preparing or encoding the update failed.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// The update could not be handed to the client's connection.
    #[error(transparent)]
    Sink(#[from] SinkError),
}
