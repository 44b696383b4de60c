//! # MetaMind
//!
//! State synchronization server for cognitive-training minigames.
//!
//! Training modules implement [`TrainingModule`](prelude::TrainingModule)
//! and are registered by id; clients connect over WebSocket, start a
//! module, and receive its state ten times a second as compressed deltas
//! with periodic full snapshots.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use metamind::prelude::*;
//!
//! # async fn run() -> Result<(), MetamindError> {
//! let mut registry = ModuleRegistry::new();
//! // registry.register("symbol_memory", "Remember the symbols", |params| ...);
//!
//! let server = MetamindServer::builder()
//!     .bind("0.0.0.0:8765")
//!     .registry(registry)
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```

mod error;
mod handler;
mod server;
mod sink;

pub use error::MetamindError;
pub use server::{MetamindServer, MetamindServerBuilder};
pub use sink::ChannelSink;

use tracing_subscriber::EnvFilter;

/// Installs a `tracing` subscriber that logs to stderr.
///
/// Honours `RUST_LOG`; defaults to `info`. Calling it twice is harmless.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Everything a server binary or training module needs.
pub mod prelude {
    pub use crate::{MetamindError, MetamindServer, MetamindServerBuilder};
    pub use metamind_protocol::{
        ClientId, ClientInput, ClientRequest, ModuleSummary, ServerEvent,
        SessionId, Snapshot, StateUpdate,
    };
    pub use metamind_session::{
        ClickHandler, KeyHandler, ModuleError, ModuleRegistry,
        SessionConfig, SessionError, TrainingModule,
    };
    pub use metamind_sync::{
        MirrorOutcome, StateMirror, SyncConfig, SyncStatistics,
    };
}
