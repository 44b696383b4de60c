//! Client-side reconstruction of the server state.
//!
//! Not used by the server itself. Clients written in Rust (and the tests)
//! feed every `state_update` into a [`StateMirror`]; it keeps the last
//! applied version and refuses deltas computed against a different one,
//! which is how a client notices it lost an update and should send
//! `full_state_request`.

use metamind_protocol::{META_KEY, ProtocolError, Snapshot, StateUpdate};
use serde_json::Value;
use tracing::debug;

use crate::{Compressor, Delta, SyncError, UpdateMeta, apply_delta};

/// What happened to an update handed to [`StateMirror::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorOutcome {
    Applied { version: u64, was_delta: bool },
    /// The delta was computed against `got_base` but the mirror is at
    /// `expected_base`. Nothing was applied.
    NeedsResync { expected_base: u64, got_base: u64 },
}

/// The client's copy of a session's state.
#[derive(Debug, Clone, Default)]
pub struct StateMirror {
    state: Snapshot,
    version: u64,
    compressor: Compressor,
}

impl StateMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &Snapshot {
        &self.state
    }

    /// The version of the last applied update; 0 before the first one.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Decodes `update` and applies it.
    ///
    /// # Errors
    /// Decoding errors, a non-object payload, or missing metadata.
    pub fn apply(
        &mut self,
        update: &StateUpdate,
    ) -> Result<MirrorOutcome, SyncError> {
        let value = self
            .compressor
            .decompress(&update.data, update.is_compressed)?;
        let Value::Object(mut object) = value else {
            return Err(SyncError::NotAnObject);
        };

        let meta: UpdateMeta = match object.remove(META_KEY) {
            Some(raw) => {
                serde_json::from_value(raw).map_err(ProtocolError::Decode)?
            }
            None => return Err(SyncError::MissingMeta),
        };

        if meta.is_delta {
            let got_base = meta.base_version.unwrap_or(0);
            if got_base != self.version {
                debug!(
                    expected_base = self.version,
                    got_base, "delta does not match mirror version"
                );
                return Ok(MirrorOutcome::NeedsResync {
                    expected_base: self.version,
                    got_base,
                });
            }
            self.state = apply_delta(&self.state, &Delta::from_wire(object));
        } else {
            self.state = object;
        }

        self.version = meta.version;
        Ok(MirrorOutcome::Applied {
            version: meta.version,
            was_delta: meta.is_delta,
        })
    }
}
