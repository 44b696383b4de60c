//! `ChannelSink`: the server's [`StateSink`], one unbounded channel per
//! connection.
//!
//! The update loop pushes events while holding the session lock, so the
//! sink must never wait on the network. Each connection handler owns the
//! receiving end and writes to its socket at its own pace.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use metamind_protocol::{ClientId, ServerEvent};
use metamind_session::{SinkError, StateSink};
use tokio::sync::mpsc;

/// Sender half of a connection's outbound queue.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// Routes events to per-client channels.
#[derive(Debug, Default)]
pub struct ChannelSink {
    senders: Mutex<HashMap<ClientId, EventSender>>,
}

impl ChannelSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, client_id: ClientId, sender: EventSender) {
        self.lock().insert(client_id, sender);
    }

    pub fn unregister(&self, client_id: ClientId) {
        self.lock().remove(&client_id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ClientId, EventSender>> {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StateSink for ChannelSink {
    fn send(
        &self,
        client_id: ClientId,
        event: ServerEvent,
    ) -> Result<(), SinkError> {
        let senders = self.lock();
        let sender = senders
            .get(&client_id)
            .ok_or(SinkError::UnknownClient(client_id))?;
        sender
            .send(event)
            .map_err(|_| SinkError::Closed(client_id))
    }
}
