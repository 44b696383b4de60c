//! The `TrainingModule` trait, the extension point for minigames.
//!
//! A module owns its game state and produces a [`Snapshot`] of it on
//! demand. The session layer calls [`update`](TrainingModule::update)
//! once per tick with the elapsed time, then
//! [`get_state`](TrainingModule::get_state) to build the update.
//!
//! Input handling is a capability, not a requirement: a module that
//! reacts to clicks returns itself from
//! [`click_handler`](TrainingModule::click_handler). Input of a kind the
//! module has no handler for is rejected with
//! [`SessionError::Unsupported`](crate::SessionError::Unsupported).

use std::time::Duration;

use metamind_protocol::Snapshot;
use serde_json::Value;

/// A cognitive-training minigame running inside one session.
pub trait TrainingModule: Send + 'static {
    /// The current state. Must not use the reserved `_meta` key.
    fn get_state(&self) -> Result<Snapshot, ModuleError>;

    /// Advances the module by `dt`.
    fn update(&mut self, dt: Duration) -> Result<(), ModuleError>;

    /// Called once when the session ends, for any reason. Default: no-op.
    fn cleanup(&mut self) {}

    /// The click capability, if the module has one.
    fn click_handler(&mut self) -> Option<&mut dyn ClickHandler> {
        None
    }

    /// The key capability, if the module has one.
    fn key_handler(&mut self) -> Option<&mut dyn KeyHandler> {
        None
    }
}

/// Reacts to pointer clicks.
pub trait ClickHandler {
    /// Returns whatever the client should see as the `input_result`.
    fn handle_click(&mut self, x: i32, y: i32) -> Result<Value, ModuleError>;
}

/// Reacts to key presses.
pub trait KeyHandler {
    fn handle_key(&mut self, key: &str) -> Result<Value, ModuleError>;
}

/// Errors reported by a training module.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModuleError {
    /// A start parameter was missing or out of range.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Anything else that went wrong inside the module.
    #[error("module failed: {0}")]
    Failed(String),
}

impl ModuleError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
