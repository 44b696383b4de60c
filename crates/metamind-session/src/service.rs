//! `SessionService`: shared access to the state manager plus the
//! background update loop.
//!
//! The loop is only alive while there is work: `start_session` spawns it
//! when idle, and it exits on the first tick that finds no session left.
//! Both checks happen under the manager lock, so a session started while
//! the loop is shutting down always gets a new loop.

use std::sync::Arc;
use std::time::Duration;

use metamind_protocol::{
    ClientId, ClientInput, SessionId, SessionInfo, Snapshot,
};
use metamind_tick::{TickConfig, TickScheduler};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{ModuleRegistry, SessionError, StateManager};

/// Reason sent with `session_ended` when the client asked for it.
const REASON_REQUESTED: &str = "ended by client";

/// Shared handle to the sessions of one server.
///
/// Cheap to clone; every clone talks to the same manager.
#[derive(Clone)]
pub struct SessionService {
    manager: Arc<Mutex<StateManager>>,
    registry: Arc<ModuleRegistry>,
}

impl SessionService {
    pub fn new(manager: StateManager, registry: ModuleRegistry) -> Self {
        Self {
            manager: Arc::new(Mutex::new(manager)),
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Direct access to the manager, for inspection.
    pub fn manager(&self) -> &Arc<Mutex<StateManager>> {
        &self.manager
    }

    pub async fn connect_client(&self, client_id: ClientId) {
        self.manager.lock().await.connect_client(client_id);
    }

    pub async fn disconnect_client(&self, client_id: ClientId) {
        self.manager.lock().await.disconnect_client(client_id);
    }

    /// Creates module `module_id` from the registry and starts it for the
    /// client. Starts the update loop if it isn't running.
    pub async fn start_session(
        &self,
        client_id: ClientId,
        module_id: &str,
        parameters: &Snapshot,
    ) -> Result<SessionInfo, SessionError> {
        let module = self.registry.create(module_id, parameters)?;

        let mut manager = self.manager.lock().await;
        let info = manager.start_session(client_id, module_id, module)?;

        if !manager.loop_running {
            manager.loop_running = true;
            let interval = manager.config().sync_interval;
            let manager_ref = Arc::clone(&self.manager);
            tokio::spawn(run_update_loop(manager_ref, interval));
        }

        Ok(info)
    }

    pub async fn end_session(
        &self,
        client_id: ClientId,
    ) -> Result<SessionId, SessionError> {
        self.manager
            .lock()
            .await
            .end_session(client_id, REASON_REQUESTED)
    }

    pub async fn handle_client_input(
        &self,
        client_id: ClientId,
        input: ClientInput,
    ) -> Result<Value, SessionError> {
        self.manager
            .lock()
            .await
            .handle_client_input(client_id, input)
    }

    pub async fn is_loop_running(&self) -> bool {
        self.manager.lock().await.is_loop_running()
    }
}

/// Clears `loop_running` if the loop task unwinds, so the next
/// `start_session` spawns a fresh loop.
struct LoopGuard {
    manager: Arc<Mutex<StateManager>>,
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        warn!("update loop panicked");
        let manager = Arc::clone(&self.manager);
        tokio::spawn(async move {
            manager.lock().await.loop_running = false;
        });
    }
}

async fn run_update_loop(
    manager: Arc<Mutex<StateManager>>,
    interval: Duration,
) {
    let _guard = LoopGuard {
        manager: Arc::clone(&manager),
    };
    let mut scheduler =
        TickScheduler::new(TickConfig::with_interval(interval));
    info!(
        interval_ms = interval.as_secs_f64() * 1000.0,
        "update loop started"
    );

    loop {
        let tick = scheduler.wait_for_tick().await;

        let report = {
            let mut manager = manager.lock().await;
            if !manager.has_sessions() {
                manager.loop_running = false;
                break;
            }
            manager.tick(tick.now)
        };
        scheduler.record_tick_end();

        if !report.is_clean() {
            debug!(
                tick = tick.tick,
                failed = report.failed.len(),
                ended = report.ended.len(),
                "tick finished with failures"
            );
        }
    }

    info!(ticks = scheduler.tick_count(), "update loop stopped");
}
