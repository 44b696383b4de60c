//! WebSocket transport implementation using `tokio-tungstenite`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use crate::{Connection, ConnectionId, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type WsStream = WebSocketStream<TcpStream>;

/// A WebSocket-based [`Transport`] that listens for incoming connections.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    ///
    /// Bind to port 0 to let the OS pick a free port, then read it back
    /// with [`Transport::local_addr`].
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener })
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| {
                TransportError::AcceptFailed(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    e,
                ))
            })?;

        let id = ConnectionId::new(
            NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        );
        tracing::debug!(%id, %addr, "accepted WebSocket connection");

        // Split so a pending `recv` never holds up an outgoing state push.
        let (sink, stream) = ws.split();
        Ok(WebSocketConnection {
            id,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        })
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// A single WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        let msg = match std::str::from_utf8(data) {
            Ok(text) => Message::Text(text.to_owned().into()),
            Err(_) => Message::Binary(data.to_vec().into()),
        };
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(data.into()));
                }
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // ping/pong/raw frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            e,
                        ),
                    ));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.sink.lock().await.close().await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
