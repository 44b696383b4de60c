//! The state manager: sessions, input routing, and one update tick.
//!
//! Each client moves through a small state machine:
//!
//! ```text
//!  Disconnected ──connect──→ Connected ──start_session──→ InSession
//!       ↑                       ↑  ↑                          │
//!       │                       │  └────────end_session───────┘
//!       └──────disconnect───────┴──────────disconnect─────────┘
//! ```
//!
//! # Concurrency note
//!
//! `StateManager` is not thread-safe by itself. The [`SessionService`]
//! keeps it behind a `tokio::sync::Mutex` shared by the request handlers
//! and the update loop, so every change to a client's sync record happens
//! under that one lock and per-client versions stay in order.
//!
//! [`SessionService`]: crate::SessionService

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use metamind_protocol::{
    ClientId, ClientInput, ServerEvent, SessionId, SessionInfo,
};
use metamind_sync::{StateSynchronizer, SyncContext};
use rand::Rng;
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    ModuleError, SessionConfig, SessionError, StateSink, TrainingModule,
};

/// Reason sent with `session_ended` when the module kept failing.
const REASON_FAILURES: &str = "module failed repeatedly";

/// Where a client is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    Disconnected,
    Connected,
    InSession,
}

/// What one call to [`StateManager::tick`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Sessions that received an update.
    pub updated: Vec<ClientId>,
    /// Sessions whose update failed this tick.
    pub failed: Vec<ClientId>,
    /// Sessions ended because they failed too many ticks in a row.
    pub ended: Vec<ClientId>,
}

impl TickReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A running training session.
struct ActiveSession {
    session_id: SessionId,
    module_id: String,
    module: Box<dyn TrainingModule>,
    start_time: Instant,
    last_tick: Instant,
    consecutive_failures: u32,
}

/// Owns all sessions and the synchronizer that serves them.
pub struct StateManager {
    config: SessionConfig,
    synchronizer: StateSynchronizer,
    sink: Arc<dyn StateSink>,
    connected: HashSet<ClientId>,
    sessions: HashMap<ClientId, ActiveSession>,
    /// Whether a background loop is currently driving `tick`. Only
    /// touched under the service lock.
    pub(crate) loop_running: bool,
}

impl StateManager {
    pub fn new(
        config: SessionConfig,
        context: Arc<SyncContext>,
        sink: Arc<dyn StateSink>,
    ) -> Self {
        Self {
            config: config.validated(),
            synchronizer: StateSynchronizer::new(context),
            sink,
            connected: HashSet::new(),
            sessions: HashMap::new(),
            loop_running: false,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn synchronizer(&self) -> &StateSynchronizer {
        &self.synchronizer
    }

    pub fn phase(&self, client_id: ClientId) -> ClientPhase {
        if self.sessions.contains_key(&client_id) {
            ClientPhase::InSession
        } else if self.connected.contains(&client_id) {
            ClientPhase::Connected
        } else {
            ClientPhase::Disconnected
        }
    }

    pub fn session_info(&self, client_id: ClientId) -> Option<SessionInfo> {
        self.sessions.get(&client_id).map(|s| SessionInfo {
            session_id: s.session_id.clone(),
            module_id: s.module_id.clone(),
        })
    }

    /// How long the client's current session has been running.
    pub fn session_age(
        &self,
        client_id: ClientId,
        now: Instant,
    ) -> Option<std::time::Duration> {
        self.sessions
            .get(&client_id)
            .map(|s| now.saturating_duration_since(s.start_time))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn has_sessions(&self) -> bool {
        !self.sessions.is_empty()
    }

    pub fn is_loop_running(&self) -> bool {
        self.loop_running
    }

    // -----------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------

    /// Marks a client connected and gives it a fresh sync record.
    pub fn connect_client(&mut self, client_id: ClientId) {
        if self.connected.insert(client_id) {
            self.synchronizer.register_client(client_id);
            info!(client_id = %client_id, "client connected");
        }
    }

    /// Ends the client's session, if any, and forgets the client.
    pub fn disconnect_client(&mut self, client_id: ClientId) {
        if self.sessions.contains_key(&client_id) {
            // The connection is going away; SessionEnded may not land.
            let _ = self.end_session(client_id, "client disconnected");
        }
        if self.connected.remove(&client_id) {
            self.synchronizer.unregister_client(client_id);
            info!(client_id = %client_id, "client disconnected");
        }
    }

    // -----------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------

    /// Starts `module` for a connected client, replacing any running
    /// session. The first update of the new session is a full snapshot.
    ///
    /// # Errors
    /// [`SessionError::NotConnected`] if the client isn't connected.
    pub fn start_session(
        &mut self,
        client_id: ClientId,
        module_id: &str,
        module: Box<dyn TrainingModule>,
    ) -> Result<SessionInfo, SessionError> {
        if !self.connected.contains(&client_id) {
            return Err(SessionError::NotConnected(client_id));
        }
        if self.sessions.contains_key(&client_id) {
            self.end_session(client_id, "replaced by a new session")?;
        }

        let session_id = generate_session_id();
        let now = Instant::now();
        self.synchronizer.register_client(client_id);
        self.sessions.insert(
            client_id,
            ActiveSession {
                session_id: session_id.clone(),
                module_id: module_id.to_owned(),
                module,
                start_time: now,
                last_tick: now,
                consecutive_failures: 0,
            },
        );

        info!(
            client_id = %client_id,
            session_id = %session_id,
            module_id,
            "session started"
        );
        self.notify(
            client_id,
            ServerEvent::SessionStarted {
                session_id: session_id.clone(),
                module_id: module_id.to_owned(),
            },
        );

        Ok(SessionInfo {
            session_id,
            module_id: module_id.to_owned(),
        })
    }

    /// Ends the client's session: runs module cleanup and sends
    /// `session_ended`.
    ///
    /// # Errors
    /// [`SessionError::NoActiveSession`] if nothing is running.
    pub fn end_session(
        &mut self,
        client_id: ClientId,
        reason: &str,
    ) -> Result<SessionId, SessionError> {
        let mut session = self
            .sessions
            .remove(&client_id)
            .ok_or(SessionError::NoActiveSession(client_id))?;

        session.module.cleanup();

        info!(
            client_id = %client_id,
            session_id = %session.session_id,
            reason,
            "session ended"
        );
        self.notify(
            client_id,
            ServerEvent::SessionEnded {
                session_id: session.session_id.clone(),
                reason: reason.to_owned(),
            },
        );

        Ok(session.session_id)
    }

    /// Routes one input to the client's active module.
    ///
    /// `full_state_request` never reaches the module: it forces the next
    /// update to be a full snapshot.
    ///
    /// Module errors are returned to the caller and do not count towards
    /// the tick failure limit.
    pub fn handle_client_input(
        &mut self,
        client_id: ClientId,
        input: ClientInput,
    ) -> Result<Value, SessionError> {
        let session = self
            .sessions
            .get_mut(&client_id)
            .ok_or(SessionError::NoActiveSession(client_id))?;

        debug!(client_id = %client_id, kind = input.kind(), "client input");

        match input {
            ClientInput::Click { x, y } => {
                match session.module.click_handler() {
                    Some(handler) => Ok(handler.handle_click(x, y)?),
                    None => Err(unsupported(&session.module_id, "click")),
                }
            }
            ClientInput::Key { key } => match session.module.key_handler() {
                Some(handler) => Ok(handler.handle_key(&key)?),
                None => Err(unsupported(&session.module_id, "key")),
            },
            ClientInput::FullStateRequest => {
                self.synchronizer.force_full_resync(client_id);
                Ok(json!({ "full_state_sent": true }))
            }
        }
    }

    // -----------------------------------------------------------------
    // Updates
    // -----------------------------------------------------------------

    /// Advances every session to `now` and sends each client its update.
    ///
    /// A failing session is skipped for this tick without affecting the
    /// others; after `max_consecutive_failures` failures in a row it is
    /// ended. A panic inside a module counts as a failure.
    pub fn tick(&mut self, now: Instant) -> TickReport {
        let mut report = TickReport::default();

        let mut clients: Vec<ClientId> =
            self.sessions.keys().copied().collect();
        clients.sort_unstable();

        for client_id in clients {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                self.tick_session(client_id, now)
            }))
            .unwrap_or_else(|payload| {
                Err(ModuleError::failed(format!(
                    "panicked: {}",
                    panic_message(&*payload)
                ))
                .into())
            });

            match outcome {
                Ok(()) => {
                    if let Some(session) = self.sessions.get_mut(&client_id) {
                        session.consecutive_failures = 0;
                    }
                    report.updated.push(client_id);
                }
                Err(e) => {
                    report.failed.push(client_id);
                    let failures = match self.sessions.get_mut(&client_id) {
                        Some(session) => {
                            session.consecutive_failures += 1;
                            session.consecutive_failures
                        }
                        None => continue,
                    };
                    warn!(
                        client_id = %client_id,
                        failures,
                        error = %e,
                        "session update failed"
                    );
                    if failures >= self.config.max_consecutive_failures
                        && self.end_session(client_id, REASON_FAILURES).is_ok()
                    {
                        report.ended.push(client_id);
                    }
                }
            }
        }

        report
    }

    fn tick_session(
        &mut self,
        client_id: ClientId,
        now: Instant,
    ) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(&client_id)
            .ok_or(SessionError::NoActiveSession(client_id))?;

        let dt = now.saturating_duration_since(session.last_tick);
        session.last_tick = now;
        session.module.update(dt)?;

        self.send_update(client_id)
    }

    /// Builds and sends one update for the client's current state.
    pub fn send_update(
        &mut self,
        client_id: ClientId,
    ) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get(&client_id)
            .ok_or(SessionError::NoActiveSession(client_id))?;

        let state = session.module.get_state()?;
        let envelope = self.synchronizer.prepare_update(client_id, &state)?;
        let update = self.synchronizer.encode_update(&envelope)?;
        self.sink.send(client_id, ServerEvent::StateUpdate(update))?;
        Ok(())
    }

    /// Sends a lifecycle event. Delivery failures only mean the client is
    /// gone, which its handler deals with.
    fn notify(&self, client_id: ClientId, event: ServerEvent) {
        if let Err(e) = self.sink.send(client_id, event) {
            debug!(client_id = %client_id, error = %e, "event not delivered");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}

fn unsupported(module_id: &str, input: &'static str) -> SessionError {
    SessionError::Unsupported {
        module: module_id.to_owned(),
        input,
    }
}

/// 128 random bits as 32 lowercase hex characters.
fn generate_session_id() -> SessionId {
    let bytes: [u8; 16] = rand::rng().random();
    SessionId(bytes.iter().map(|b| format!("{b:02x}")).collect())
}
