//! Test doubles shared by the session integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metamind_protocol::{ClientId, ServerEvent, Snapshot, StateUpdate};
use metamind_session::{
    ClickHandler, KeyHandler, ModuleError, SinkError, StateSink,
    TrainingModule,
};
use serde_json::{Value, json};

/// Records every event instead of sending it anywhere.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(ClientId, ServerEvent)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events_for(&self, client_id: ClientId) -> Vec<ServerEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == client_id)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn updates_for(&self, client_id: ClientId) -> Vec<StateUpdate> {
        self.events_for(client_id)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::StateUpdate(u) => Some(u),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl StateSink for RecordingSink {
    fn send(
        &self,
        client_id: ClientId,
        event: ServerEvent,
    ) -> Result<(), SinkError> {
        self.events.lock().unwrap().push((client_id, event));
        Ok(())
    }
}

/// Counts elapsed time and clicks. Handles clicks, not keys.
pub struct Counter {
    pub elapsed_ms: u128,
    pub clicks: u32,
    pub last_dt: Arc<Mutex<Option<Duration>>>,
    pub cleaned_up: Arc<AtomicBool>,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            elapsed_ms: 0,
            clicks: 0,
            last_dt: Arc::default(),
            cleaned_up: Arc::default(),
        }
    }
}

impl TrainingModule for Counter {
    fn get_state(&self) -> Result<Snapshot, ModuleError> {
        let state = json!({
            "elapsed_ms": self.elapsed_ms as u64,
            "clicks": self.clicks,
            "title": "counter module with a reasonably long constant title",
        });
        match state {
            Value::Object(map) => Ok(map),
            _ => Err(ModuleError::failed("state is not an object")),
        }
    }

    fn update(&mut self, dt: Duration) -> Result<(), ModuleError> {
        self.elapsed_ms += dt.as_millis();
        *self.last_dt.lock().unwrap() = Some(dt);
        Ok(())
    }

    fn cleanup(&mut self) {
        self.cleaned_up.store(true, Ordering::SeqCst);
    }

    fn click_handler(&mut self) -> Option<&mut dyn ClickHandler> {
        Some(self)
    }
}

impl ClickHandler for Counter {
    fn handle_click(&mut self, x: i32, y: i32) -> Result<Value, ModuleError> {
        self.clicks += 1;
        Ok(json!({ "hit": x == y, "clicks": self.clicks }))
    }
}

/// Handles keys only; rejects anything but "space".
pub struct KeysOnly;

impl TrainingModule for KeysOnly {
    fn get_state(&self) -> Result<Snapshot, ModuleError> {
        Ok(Snapshot::new())
    }

    fn update(&mut self, _dt: Duration) -> Result<(), ModuleError> {
        Ok(())
    }

    fn key_handler(&mut self) -> Option<&mut dyn KeyHandler> {
        Some(self)
    }
}

impl KeyHandler for KeysOnly {
    fn handle_key(&mut self, key: &str) -> Result<Value, ModuleError> {
        if key == "space" {
            Ok(json!({ "accepted": true }))
        } else {
            Err(ModuleError::failed(format!("unexpected key {key}")))
        }
    }
}

/// Fails `update` while the shared switch is on.
pub struct Flaky {
    pub failing: Arc<AtomicBool>,
    pub updates: Arc<AtomicU32>,
}

impl Flaky {
    pub fn new(failing: bool) -> (Self, Arc<AtomicBool>) {
        let switch = Arc::new(AtomicBool::new(failing));
        let module = Self {
            failing: Arc::clone(&switch),
            updates: Arc::default(),
        };
        (module, switch)
    }
}

impl TrainingModule for Flaky {
    fn get_state(&self) -> Result<Snapshot, ModuleError> {
        let mut state = Snapshot::new();
        state.insert(
            "updates".into(),
            self.updates.load(Ordering::SeqCst).into(),
        );
        Ok(state)
    }

    fn update(&mut self, _dt: Duration) -> Result<(), ModuleError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ModuleError::failed("simulated failure"));
        }
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Panics in `update`.
pub struct Panicky;

impl TrainingModule for Panicky {
    fn get_state(&self) -> Result<Snapshot, ModuleError> {
        Ok(Snapshot::new())
    }

    fn update(&mut self, _dt: Duration) -> Result<(), ModuleError> {
        panic!("module blew up");
    }
}
