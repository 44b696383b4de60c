//! Training sessions and the state update loop for MetaMind.
//!
//! A client connects, starts a training module, and from then on receives
//! a `state_update` every `sync_interval` until the session ends.
//!
//! # Key types
//!
//! - [`TrainingModule`]: what a minigame implements. Input handling is
//!   opt-in through the [`ClickHandler`] / [`KeyHandler`] capabilities.
//! - [`ModuleRegistry`]: the catalogue of modules clients may start.
//! - [`StateSink`]: where updates go (the server's connection channels).
//! - [`StateManager`]: per-client state machine plus one `tick`.
//! - [`SessionService`]: shares the manager with request handlers and
//!   drives the background update loop.
//!
//! # How it fits in the stack
//!
//! ```text
//! Server (above)          ← routes client requests into the service
//!     ↕
//! Session layer (this)    ← sessions, modules, update loop
//!     ↕
//! Sync layer (below)      ← full/delta decision, compression
//! ```

mod config;
mod error;
mod manager;
mod module;
mod registry;
mod service;
mod sink;

pub use config::SessionConfig;
pub use error::SessionError;
pub use manager::{ClientPhase, StateManager, TickReport};
pub use module::{ClickHandler, KeyHandler, ModuleError, TrainingModule};
pub use registry::{ModuleFactory, ModuleRegistry};
pub use service::SessionService;
pub use sink::{SinkError, StateSink};
