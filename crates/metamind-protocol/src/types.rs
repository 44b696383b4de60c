//! Core protocol types for MetaMind's wire format.
//!
//! Every type in this module is serialized to JSON and sent over the
//! network. Client → server traffic is a [`ClientRequest`]; server →
//! client traffic is a [`ServerEvent`]. Both are internally tagged by an
//! `"event"` field so browser and pygame clients can switch on one string.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The full state of a training session at one instant.
///
/// A tree of string-keyed maps whose leaves are JSON primitives, arrays,
/// or further maps. Training modules build one every tick.
pub type Snapshot = Map<String, Value>;

/// Reserved top-level key under which update metadata travels.
///
/// Modules must not use this key in their own snapshots; delta
/// application skips it.
pub const META_KEY: &str = "_meta";

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a connected client.
///
/// Newtype over `u64` so a client id can't be confused with any other
/// counter. `#[serde(transparent)]` keeps it a plain number on the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C-{}", self.0)
    }
}

/// A unique identifier for one training session.
///
/// Generated by the session layer when a session starts (32 hex chars).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the server tells a client about the session it just joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub module_id: String,
}

/// One entry of the module catalogue returned by `list_modules`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSummary {
    pub id: String,
    pub description: String,
}

// ---------------------------------------------------------------------------
// ClientInput: gameplay input routed to a module
// ---------------------------------------------------------------------------

/// Input a client sends to its active training module.
///
/// Tagged by `"type"`, matching what the pygame and web clients emit:
///
/// ```text
/// { "type": "click", "x": 120, "y": 44 }
/// { "type": "key", "key": "space" }
/// { "type": "full_state_request" }
/// ```
///
/// `full_state_request` is not forwarded to the module. It forces the
/// next update for this client to be a full snapshot, which is how a
/// client recovers after a reconnect or a detected gap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientInput {
    Click {
        #[serde(default)]
        x: i32,
        #[serde(default)]
        y: i32,
    },
    Key {
        #[serde(default)]
        key: String,
    },
    FullStateRequest,
}

impl ClientInput {
    /// The wire discriminator, handy for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Click { .. } => "click",
            Self::Key { .. } => "key",
            Self::FullStateRequest => "full_state_request",
        }
    }
}

// ---------------------------------------------------------------------------
// ClientRequest: client → server
// ---------------------------------------------------------------------------

/// Requests a client can make over its connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientRequest {
    /// "Which training modules can I start?"
    ListModules,

    /// "Start this module for me." Ends any session already running for
    /// this client. `parameters` are handed to the module factory.
    StartSession {
        module_id: String,
        #[serde(default)]
        parameters: Snapshot,
    },

    /// "Stop my current session."
    EndSession,

    /// Gameplay input for the active session.
    Input { input: ClientInput },

    /// "I'm leaving." The server closes the connection afterwards.
    Disconnect,
}

// ---------------------------------------------------------------------------
// ServerEvent: server → client
// ---------------------------------------------------------------------------

/// A state update as delivered to the client.
///
/// `data` is the encoded update: a JSON object (full snapshot or delta,
/// with metadata under [`META_KEY`]); or, when `is_compressed` is set,
/// that JSON zlib-compressed and base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub data: String,
    pub is_delta: bool,
    pub is_compressed: bool,
}

/// Events the server pushes to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Sent once right after the connection is accepted.
    Connected { client_id: ClientId },

    /// Reply to `list_modules`.
    ModuleList { modules: Vec<ModuleSummary> },

    /// A session is now running for this client.
    SessionStarted { session_id: SessionId, module_id: String },

    /// The session ended, either on request or because the module kept
    /// failing.
    SessionEnded { session_id: SessionId, reason: String },

    /// Whatever the module returned for an input.
    InputResult { result: Value },

    /// Periodic state push from the update loop.
    StateUpdate(StateUpdate),

    /// A request could not be served.
    Error { message: String },
}

// =========================================================================
// Tests
// =========================================================================
