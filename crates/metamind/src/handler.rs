//! Per-connection handler: registration, request routing, and the
//! outbound event queue.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Register an outbound channel with the sink, connect the client
//!   2. Send `connected`
//!   3. Loop: either a request arrives from the socket and is dispatched,
//!      or an event (state update, reply, session event) is waiting in
//!      the outbound queue and is written to the socket

use std::sync::Arc;

use metamind_protocol::{ClientId, ClientRequest, Codec, ServerEvent};
use metamind_transport::{Connection, WebSocketConnection};
use tokio::sync::mpsc;

use crate::MetamindError;
use crate::server::ServerState;
use crate::sink::EventSender;

/// Drop guard that disconnects a client when the handler exits.
///
/// `Drop` is synchronous, so the async cleanup runs in a spawned task.
struct ClientGuard {
    client_id: ClientId,
    state: Arc<ServerState>,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        let client_id = self.client_id;
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            state.sessions.disconnect_client(client_id).await;
            state.sink.unregister(client_id);
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection(
    conn: WebSocketConnection,
    client_id: ClientId,
    state: Arc<ServerState>,
) -> Result<(), MetamindError> {
    let conn_id = conn.id();
    tracing::debug!(%conn_id, client_id = %client_id, "handling new connection");

    let (outbound, mut queue) = mpsc::unbounded_channel();
    state.sink.register(client_id, outbound.clone());
    state.sessions.connect_client(client_id).await;
    let _guard = ClientGuard {
        client_id,
        state: Arc::clone(&state),
    };

    send_event(&conn, &state, &ServerEvent::Connected { client_id }).await?;

    loop {
        tokio::select! {
            inbound = conn.recv() => {
                let data = match inbound {
                    Ok(Some(data)) => data,
                    Ok(None) => {
                        tracing::info!(
                            client_id = %client_id, "connection closed cleanly"
                        );
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(
                            client_id = %client_id, error = %e, "recv error"
                        );
                        break;
                    }
                };

                let request: ClientRequest = match state.codec.decode(&data) {
                    Ok(request) => request,
                    Err(e) => {
                        tracing::debug!(
                            client_id = %client_id, error = %e, "failed to decode request"
                        );
                        reply(&outbound, ServerEvent::Error {
                            message: format!("invalid request: {e}"),
                        });
                        continue;
                    }
                };

                if handle_request(&state, client_id, &outbound, request).await {
                    break;
                }
            }
            Some(event) = queue.recv() => {
                send_event(&conn, &state, &event).await?;
            }
        }
    }

    // Flush what is already queued (e.g. the reply to `disconnect`).
    while let Ok(event) = queue.try_recv() {
        if send_event(&conn, &state, &event).await.is_err() {
            break;
        }
    }
    let _ = conn.close().await;

    // _guard drops here → client disconnect fires.
    Ok(())
}

/// Dispatches one request. Returns `true` if the connection should close.
///
/// Replies go through the outbound queue, so they stay ordered with the
/// session events the manager emits for the same request.
async fn handle_request(
    state: &ServerState,
    client_id: ClientId,
    outbound: &EventSender,
    request: ClientRequest,
) -> bool {
    match request {
        ClientRequest::ListModules => {
            reply(
                outbound,
                ServerEvent::ModuleList {
                    modules: state.sessions.registry().list(),
                },
            );
        }

        ClientRequest::StartSession {
            module_id,
            parameters,
        } => {
            // On success the manager has already queued `session_started`.
            if let Err(e) = state
                .sessions
                .start_session(client_id, &module_id, &parameters)
                .await
            {
                tracing::debug!(
                    client_id = %client_id,
                    %module_id,
                    error = %e,
                    "start_session failed"
                );
                reply_error(outbound, e);
            }
        }

        ClientRequest::EndSession => {
            if let Err(e) = state.sessions.end_session(client_id).await {
                reply_error(outbound, e);
            }
        }

        ClientRequest::Input { input } => {
            match state.sessions.handle_client_input(client_id, input).await {
                Ok(result) => {
                    reply(outbound, ServerEvent::InputResult { result })
                }
                Err(e) => reply_error(outbound, e),
            }
        }

        ClientRequest::Disconnect => {
            tracing::info!(client_id = %client_id, "client requested disconnect");
            return true;
        }
    }

    false
}

fn reply(outbound: &EventSender, event: ServerEvent) {
    // The receiver lives as long as the handler, so this can't fail while
    // anyone is listening.
    let _ = outbound.send(event);
}

fn reply_error(outbound: &EventSender, error: impl std::fmt::Display) {
    reply(
        outbound,
        ServerEvent::Error {
            message: error.to_string(),
        },
    );
}

async fn send_event(
    conn: &WebSocketConnection,
    state: &ServerState,
    event: &ServerEvent,
) -> Result<(), MetamindError> {
    let text = state.codec.encode_text(event)?;
    conn.send(text.as_bytes()).await?;
    Ok(())
}
