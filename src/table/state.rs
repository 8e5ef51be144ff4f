//! Compute state store — serialize and restore operator progress.
//!
//! A compute engine is stateless over tuples, but its *progress* —
//! watermark, current window id, processed-event counter, and the
//! operator's opaque internal state — must survive a restart. This
//! module turns that would-be global state into explicit rows in two
//! internal tables:
//!
//! - `_compute_state` — the latest snapshot per compute name
//!   (overwritten in place).
//! - `_compute_checkpoint` — immutable snapshots keyed by
//!   `(compute_name, checkpoint_id)`.
//!
//! Rows are keyed by a stable 64-bit hash of the compute name (XORed
//! with a mixed checkpoint id for checkpoints); the name is stored in
//! the row itself and verified on read, so a hash collision surfaces as
//! a miss rather than silently returning foreign state.

use std::{collections::BTreeMap, path::Path, sync::Arc};

use tracing::{debug, info};

use super::{TableError, hex_decode, hex_encode, stream::StreamTable};
use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::record::{Record, TimeRange, Value};

/// Name of the latest-snapshot table.
pub const STATE_TABLE: &str = "_compute_state";

/// Name of the immutable-checkpoint table.
pub const CHECKPOINT_TABLE: &str = "_compute_checkpoint";

/// Field key carrying the encoded state inside a stored record.
const STATE_FIELD: &str = "state";

// ------------------------------------------------------------------------------------------------
// ComputeState
// ------------------------------------------------------------------------------------------------

/// A snapshot of one compute engine's progress.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeState {
    /// Name of the compute engine instance.
    pub compute_name: String,

    /// Wall-clock time this snapshot was taken (ms since epoch).
    pub snapshot_ts: i64,

    /// Event-time watermark the engine had reached.
    pub watermark: i64,

    /// Window id the engine was processing.
    pub current_window_id: u64,

    /// Total events fed to the operator so far.
    pub processed_events: u64,

    /// Opaque serialized operator internals.
    pub operator_state: Vec<u8>,

    /// Free-form annotations.
    pub metadata: BTreeMap<String, String>,
}

impl ComputeState {
    /// Creates an empty snapshot for a named compute engine.
    pub fn new(compute_name: impl Into<String>) -> Self {
        Self {
            compute_name: compute_name.into(),
            snapshot_ts: 0,
            watermark: 0,
            current_window_id: 0,
            processed_events: 0,
            operator_state: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }
}

impl Encode for ComputeState {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.compute_name.encode_to(buf)?;
        self.snapshot_ts.encode_to(buf)?;
        self.watermark.encode_to(buf)?;
        self.current_window_id.encode_to(buf)?;
        self.processed_events.encode_to(buf)?;
        self.operator_state.encode_to(buf)?;
        encoding::encode_string_map(&self.metadata, buf)?;
        Ok(())
    }
}

impl Decode for ComputeState {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (compute_name, n) = String::decode_from(&buf[offset..])?;
        offset += n;
        let (snapshot_ts, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        let (watermark, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        let (current_window_id, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (processed_events, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (operator_state, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        let (metadata, n) = encoding::decode_string_map(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                compute_name,
                snapshot_ts,
                watermark,
                current_window_id,
                processed_events,
                operator_state,
                metadata,
            },
            offset,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// ComputeStateStore
// ------------------------------------------------------------------------------------------------

/// Persists [`ComputeState`] snapshots into the two internal tables.
///
/// All operations are thread-safe; the underlying stream tables carry
/// their own synchronization.
pub struct ComputeStateStore {
    state_table: Arc<StreamTable>,
    checkpoint_table: Arc<StreamTable>,
}

impl ComputeStateStore {
    /// Opens the store, creating the internal tables under `data_dir`.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, TableError> {
        let state_table = Arc::new(StreamTable::open(STATE_TABLE, &data_dir, Vec::new())?);
        let checkpoint_table =
            Arc::new(StreamTable::open(CHECKPOINT_TABLE, &data_dir, Vec::new())?);
        info!("compute state store opened");
        Ok(Self {
            state_table,
            checkpoint_table,
        })
    }

    /// Builds a store over existing table handles (used by the table
    /// manager, which owns the internal tables).
    pub fn with_tables(state_table: Arc<StreamTable>, checkpoint_table: Arc<StreamTable>) -> Self {
        Self {
            state_table,
            checkpoint_table,
        }
    }

    /// Writes the latest snapshot for its compute name (memtable write;
    /// durable via the table's WAL).
    pub fn save_state(&self, state: &ComputeState) -> Result<(), TableError> {
        let key = state_key(&state.compute_name);
        self.state_table.insert(Self::state_to_record(key, state)?)?;
        debug!(compute = %state.compute_name, watermark = state.watermark, "compute state saved");
        Ok(())
    }

    /// Saves the snapshot and forces a flush to disk.
    pub fn persist_state(&self, state: &ComputeState) -> Result<(), TableError> {
        self.save_state(state)?;
        self.state_table.flush()
    }

    /// Loads the latest snapshot for `compute_name`.
    pub fn load_state(&self, compute_name: &str) -> Result<ComputeState, TableError> {
        let key = state_key(compute_name);
        Self::lookup(&self.state_table, key, compute_name)
    }

    /// Copies the current snapshot of `compute_name` into an immutable
    /// checkpoint row keyed `(compute_name, checkpoint_id)`.
    pub fn create_checkpoint(&self, compute_name: &str, checkpoint_id: u64) -> Result<(), TableError> {
        let key = checkpoint_key(compute_name, checkpoint_id);
        if Self::lookup(&self.checkpoint_table, key, compute_name).is_ok() {
            return Err(TableError::CheckpointExists {
                name: compute_name.to_string(),
                id: checkpoint_id,
            });
        }

        let state = self.load_state(compute_name)?;
        self.checkpoint_table
            .insert(Self::state_to_record(key, &state)?)?;
        self.checkpoint_table.flush()?;
        info!(compute = compute_name, checkpoint_id, "checkpoint created");
        Ok(())
    }

    /// Reads back an immutable checkpoint.
    pub fn restore_checkpoint(
        &self,
        compute_name: &str,
        checkpoint_id: u64,
    ) -> Result<ComputeState, TableError> {
        let key = checkpoint_key(compute_name, checkpoint_id);
        Self::lookup(&self.checkpoint_table, key, compute_name)
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    fn lookup(
        table: &StreamTable,
        key: i64,
        compute_name: &str,
    ) -> Result<ComputeState, TableError> {
        let records = table.query(TimeRange::new(key, key.saturating_add(1)), &BTreeMap::new())?;
        let record = records
            .first()
            .ok_or_else(|| TableError::StateNotFound(compute_name.to_string()))?;
        let state = Self::record_to_state(record)?;
        if state.compute_name != compute_name {
            // Hash collision with a different compute name.
            return Err(TableError::StateNotFound(compute_name.to_string()));
        }
        Ok(state)
    }

    fn state_to_record(key: i64, state: &ComputeState) -> Result<Record, TableError> {
        let encoded = encoding::encode_to_vec(state)?;
        let mut record = Record {
            timestamp: key,
            value: Value::Scalar(state.watermark as f64),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
        };
        record
            .tags
            .insert("compute".to_string(), state.compute_name.clone());
        record
            .fields
            .insert(STATE_FIELD.to_string(), hex_encode(&encoded));
        Ok(record)
    }

    fn record_to_state(record: &Record) -> Result<ComputeState, TableError> {
        let text = record
            .fields
            .get(STATE_FIELD)
            .ok_or_else(|| TableError::CorruptRow {
                offset: 0,
                reason: "missing state field".into(),
            })?;
        let bytes = hex_decode(text)?;
        let (state, _) = ComputeState::decode_from(&bytes).map_err(|e| TableError::CorruptRow {
            offset: 0,
            reason: e.to_string(),
        })?;
        Ok(state)
    }
}

/// Stable row key for the latest snapshot of a compute name.
fn state_key(compute_name: &str) -> i64 {
    fnv1a(compute_name.as_bytes()) as i64
}

/// Stable row key for a checkpoint `(compute_name, checkpoint_id)`.
fn checkpoint_key(compute_name: &str, checkpoint_id: u64) -> i64 {
    (fnv1a(compute_name.as_bytes()) ^ mix64(checkpoint_id)) as i64
}

/// FNV-1a 64-bit hash.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xCBF2_9CE4_8422_2325u64;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
    }
    hash
}

/// Finalizer from splitmix64.
fn mix64(mut x: u64) -> u64 {
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}
