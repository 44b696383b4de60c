/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed by the peer.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding the listener or completing the WebSocket upgrade failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),
}
