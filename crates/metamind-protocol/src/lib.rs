//! Wire protocol for MetaMind.
//!
//! This crate defines the "language" that training clients and the sync
//! server speak:
//!
//! - **Types** ([`ClientRequest`], [`ServerEvent`], [`ClientInput`],
//!   [`Snapshot`], etc.): the structures that travel on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how those structures
//!   are converted to/from bytes.
//! - **Errors** ([`ProtocolError`]): what can go wrong during
//!   encoding/decoding.
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Protocol (ClientRequest / ServerEvent) → Session (client context)
//! ```
//!
//! The protocol layer knows nothing about deltas or compression. A
//! [`StateUpdate`] carries an already-encoded payload string produced by
//! the sync layer.

mod codec;
mod error;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use types::{
    ClientId, ClientInput, ClientRequest, ModuleSummary, ServerEvent,
    SessionId, SessionInfo, Snapshot, StateUpdate, META_KEY,
};
