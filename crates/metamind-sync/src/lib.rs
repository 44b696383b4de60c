//! State synchronization for MetaMind.
//!
//! Training modules hand over a full [`Snapshot`](metamind_protocol::Snapshot)
//! every tick. Sending that whole tree to every client 10 times a second is
//! wasteful, so this crate turns it into the smallest update it can:
//!
//! - [`compute_delta`] / [`apply_delta`]: structural diff between two
//!   snapshots, keyed by dotted path.
//! - [`Compressor`]: zlib + base64 for payloads above a size threshold.
//! - [`StateSynchronizer`]: per-client version tracking, full-vs-delta
//!   decision, periodic full resync, bandwidth statistics.
//! - [`StateMirror`]: the client half: rebuilds the state from the
//!   updates it receives and notices when it has missed one.
//!
//! # Sync model
//!
//! Updates are fire-and-forget. The server never waits for an
//! acknowledgment and always diffs against the last snapshot it
//! *computed*, not the last one the client *applied*. A lost delta
//! therefore leaves the client behind until the next periodic full
//! resync (every `resync_interval` updates) or until the client asks for
//! one with `full_state_request`.
//!
//! All configuration and statistics live in a [`SyncContext`], created
//! once with [`init_sync_context`] and passed to every synchronizer.

mod compress;
mod context;
mod delta;
mod error;
mod mirror;
mod stats;
mod synchronizer;

pub use compress::{Compressor, DEFAULT_COMPRESSION_THRESHOLD};
pub use context::{
    DEFAULT_RESYNC_INTERVAL, SyncConfig, SyncContext, init_sync_context,
};
pub use delta::{
    Delta, DeltaOp, apply_delta, apply_delta_checked, compute_delta,
    join_path, split_path,
};
pub use error::{PathError, SyncError};
pub use mirror::{MirrorOutcome, StateMirror};
pub use stats::SyncStatistics;
pub use synchronizer::{
    ClientSyncRecord, StateSynchronizer, UpdateEnvelope, UpdateMeta,
    UpdatePayload,
};
