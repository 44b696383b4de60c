//! Per-client version tracking and the full-vs-delta decision.
//!
//! ## How an update is chosen
//!
//! ```text
//! update_count += 1
//! full if  version == 0                      (new or reset client)
//!      or  update_count % resync_interval == 0 (periodic resync)
//!      or  delta is larger than the snapshot
//!      or  delta sets something to null      (null means "remove")
//! otherwise delta = compute_delta(last_state, snapshot)
//! last_state = snapshot; version += 1
//! ```
//!
//! `last_state` is always the snapshot just computed, whether or not the
//! client ever receives it. There are no acknowledgments: a lost delta
//! leaves the client behind until the next full update.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use metamind_protocol::{
    ClientId, Codec, JsonCodec, META_KEY, Snapshot, StateUpdate,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    Compressor, Delta, SyncContext, SyncError, SyncStatistics, compute_delta,
};

// ---------------------------------------------------------------------------
// ClientSyncRecord
// ---------------------------------------------------------------------------

/// What the server remembers about one client's view of the state.
#[derive(Debug, Clone)]
pub struct ClientSyncRecord {
    pub client_id: ClientId,
    /// The last snapshot computed for this client (sent or not).
    pub last_state: Snapshot,
    /// Number of updates prepared since registration; 0 forces a full
    /// update next.
    pub version: u64,
    pub update_count: u64,
    pub last_sync_time: Instant,
}

impl ClientSyncRecord {
    fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            last_state: Snapshot::new(),
            version: 0,
            update_count: 0,
            last_sync_time: Instant::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// UpdateEnvelope
// ---------------------------------------------------------------------------

/// The body of an update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdatePayload {
    Full(Snapshot),
    Delta(Delta),
}

/// Metadata that travels under the `_meta` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMeta {
    /// The version the client is at after applying this update.
    pub version: u64,
    pub is_delta: bool,
    /// The version a delta was computed against. Absent on full updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<u64>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// A prepared update for one client.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEnvelope {
    pub payload: UpdatePayload,
    pub meta: UpdateMeta,
}

impl UpdateEnvelope {
    pub fn is_delta(&self) -> bool {
        self.meta.is_delta
    }

    pub fn version(&self) -> u64 {
        self.meta.version
    }

    /// The JSON object sent to the client: the payload with the metadata
    /// merged in under `_meta`.
    pub fn to_wire_value(&self) -> Value {
        let mut object = match &self.payload {
            UpdatePayload::Full(snapshot) => snapshot.clone(),
            UpdatePayload::Delta(delta) => delta.to_wire(),
        };
        let mut meta = Map::new();
        meta.insert("version".into(), self.meta.version.into());
        meta.insert("is_delta".into(), self.meta.is_delta.into());
        if let Some(base) = self.meta.base_version {
            meta.insert("base_version".into(), base.into());
        }
        meta.insert("timestamp".into(), self.meta.timestamp.into());
        object.insert(META_KEY.to_owned(), Value::Object(meta));
        Value::Object(object)
    }
}

// ---------------------------------------------------------------------------
// StateSynchronizer
// ---------------------------------------------------------------------------

/// Decides, per client, what each state update should contain.
///
/// Holds one [`ClientSyncRecord`] per registered client. Not internally
/// synchronized: the session layer keeps it behind the same lock as the
/// sessions themselves, which is what keeps each client's versions in
/// order.
#[derive(Debug)]
pub struct StateSynchronizer {
    context: Arc<SyncContext>,
    clients: HashMap<ClientId, ClientSyncRecord>,
    compressor: Compressor,
    codec: JsonCodec,
}

impl StateSynchronizer {
    pub fn new(context: Arc<SyncContext>) -> Self {
        let compressor =
            Compressor::new(context.config().compression_threshold);
        Self {
            context,
            clients: HashMap::new(),
            compressor,
            codec: JsonCodec,
        }
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.context
    }

    /// Starts tracking a client. An existing record is reset, so the next
    /// update is full.
    pub fn register_client(&mut self, client_id: ClientId) {
        self.clients
            .insert(client_id, ClientSyncRecord::new(client_id));
        debug!(client_id = %client_id, "sync record registered");
    }

    /// Stops tracking a client. No-op if it isn't registered.
    pub fn unregister_client(&mut self, client_id: ClientId) {
        if self.clients.remove(&client_id).is_some() {
            debug!(client_id = %client_id, "sync record removed");
        }
    }

    pub fn is_registered(&self, client_id: ClientId) -> bool {
        self.clients.contains_key(&client_id)
    }

    pub fn record(&self, client_id: ClientId) -> Option<&ClientSyncRecord> {
        self.clients.get(&client_id)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Makes the next update for this client a full snapshot.
    ///
    /// Returns `false` if the client isn't registered.
    pub fn force_full_resync(&mut self, client_id: ClientId) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(record) => {
                record.version = 0;
                debug!(client_id = %client_id, "full resync forced");
                true
            }
            None => false,
        }
    }

    /// Builds the next update for `client_id` from `current`.
    ///
    /// Registers the client if needed. The serialized payload is never
    /// larger than the serialized snapshot.
    ///
    /// # Errors
    /// `SyncError::ShutDown` once the context is shut down,
    /// `SyncError::Protocol` if the snapshot can't be serialized.
    pub fn prepare_update(
        &mut self,
        client_id: ClientId,
        current: &Snapshot,
    ) -> Result<UpdateEnvelope, SyncError> {
        if self.context.is_shut_down() {
            return Err(SyncError::ShutDown);
        }

        let resync_interval = self.context.config().resync_interval.max(1);
        let record = self
            .clients
            .entry(client_id)
            .or_insert_with(|| ClientSyncRecord::new(client_id));

        record.update_count += 1;
        let base_version = record.version;
        let periodic = record.update_count % resync_interval == 0;

        let full_size = self.codec.encode(current)?.len();
        let mut payload = None;

        if base_version != 0 && !periodic {
            let delta = compute_delta(&record.last_state, current);
            let delta_size = self.codec.encode(&delta)?.len();
            if delta_size <= full_size && delta.is_wire_safe() {
                payload = Some((UpdatePayload::Delta(delta), delta_size));
            } else {
                debug!(
                    client_id = %client_id,
                    delta_size,
                    full_size,
                    "delta not usable, sending full snapshot"
                );
            }
        }

        let (payload, size) = match payload {
            Some(delta) => delta,
            None => (UpdatePayload::Full(current.clone()), full_size),
        };
        let is_delta = matches!(payload, UpdatePayload::Delta(_));

        record.last_state = current.clone();
        record.version += 1;
        record.last_sync_time = Instant::now();

        let meta = UpdateMeta {
            version: record.version,
            is_delta,
            base_version: is_delta.then_some(base_version),
            timestamp: unix_millis(),
        };

        self.context.record(|stats| {
            if is_delta {
                stats.record_delta(size, full_size);
            } else {
                stats.record_full(size);
            }
        });

        debug!(
            client_id = %client_id,
            version = meta.version,
            is_delta,
            size,
            "update prepared"
        );

        Ok(UpdateEnvelope { payload, meta })
    }

    /// Serializes and, above the threshold, compresses `data`.
    pub fn compress_data(
        &self,
        data: &Value,
    ) -> Result<(String, bool), SyncError> {
        let (encoded, compressed) = self.compressor.compress(data)?;
        if compressed {
            self.context.record(SyncStatistics::record_compressed);
        }
        Ok((encoded, compressed))
    }

    pub fn decompress_data(
        &self,
        data: &str,
        is_compressed: bool,
    ) -> Result<Value, SyncError> {
        self.compressor.decompress(data, is_compressed)
    }

    /// Turns a prepared envelope into the `state_update` body.
    pub fn encode_update(
        &self,
        envelope: &UpdateEnvelope,
    ) -> Result<StateUpdate, SyncError> {
        let (data, is_compressed) =
            self.compress_data(&envelope.to_wire_value())?;
        Ok(StateUpdate {
            data,
            is_delta: envelope.is_delta(),
            is_compressed,
        })
    }

    pub fn get_statistics(&self) -> SyncStatistics {
        self.context.statistics()
    }

    pub fn reset_statistics(&self) {
        self.context.reset_statistics();
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
