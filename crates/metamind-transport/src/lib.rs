//! Transport abstraction layer for MetaMind.
//!
//! The sync core only needs two capabilities from the network: accept a
//! client and move bytes to and from it. [`Transport`] and [`Connection`]
//! capture exactly that, so the server can run over WebSocket today and
//! something else later.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;

/// Opaque identifier for a connection.
///
/// Allocated by the transport from a process-wide counter, so it is
/// unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// The local address the transport is listening on.
    fn local_addr(&self) -> std::io::Result<std::net::SocketAddr>;
}

/// A single connection that can send and receive messages.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends one message to the remote peer.
    ///
    /// Transports with a text/binary distinction send valid UTF-8 as
    /// text, since every MetaMind event is JSON.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next message from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Closes the connection.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
