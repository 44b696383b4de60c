//! Where state updates and session events are delivered.

use std::sync::Arc;

use metamind_protocol::{ClientId, ServerEvent};

/// Delivers server events to one client.
///
/// Called from inside the update loop while the session lock is held, so
/// implementations must not block: queue the event and return.
pub trait StateSink: Send + Sync + 'static {
    fn send(
        &self,
        client_id: ClientId,
        event: ServerEvent,
    ) -> Result<(), SinkError>;
}

impl<T: StateSink + ?Sized> StateSink for Arc<T> {
    fn send(
        &self,
        client_id: ClientId,
        event: ServerEvent,
    ) -> Result<(), SinkError> {
        (**self).send(client_id, event)
    }
}

/// Why a [`StateSink`] couldn't take an event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// No outbound channel is registered for the client.
    #[error("no outbound channel for client {0}")]
    UnknownClient(ClientId),

    /// The client's channel exists but its receiver is gone.
    #[error("outbound channel for client {0} is closed")]
    Closed(ClientId),
}
