//! Multi-table layer — named tables of distinct kinds over the LSM core.
//!
//! | Sub-module | Table kind |
//! |------------|------------|
//! | [`stream`] | Append-optimized stream tables with sliding-window queries and tag indices |
//! | [`results`] | Join-result tables keyed by window id, with opaque payload blobs |
//! | [`state`] | Compute-state snapshots and checkpoints in internal tables |
//! | [`manager`] | The named-table registry and batch multi-table operations |
//!
//! Every table kind stores [`Record`](crate::record::Record)s in its own
//! LSM engine rooted under the manager's data directory. Structured rows
//! (join results, compute state) are encoded through [`crate::encoding`]
//! and carried in a record field as hex text, so the storage path below
//! the table layer stays uniform.

pub mod manager;
pub mod results;
pub mod state;
pub mod stream;

#[cfg(test)]
mod tests;

pub use manager::{TableKind, TableManager, TableManagerConfig};
pub use results::{AggregateStats, JoinResultRecord, JoinResultTable};
pub use state::{ComputeState, ComputeStateStore};
pub use stream::{InsertListener, StreamTable};

use thiserror::Error;

use crate::encoding::EncodingError;
use crate::lsm::LsmError;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by the table layer.
#[derive(Debug, Error)]
pub enum TableError {
    /// A table with this name already exists.
    #[error("table '{0}' already exists")]
    DuplicateTable(String),

    /// No table with this name exists.
    #[error("table '{0}' not found")]
    UnknownTable(String),

    /// The named table exists but has the wrong kind for the operation.
    #[error("table '{name}' is not a {expected} table")]
    WrongTableKind {
        name: String,
        expected: &'static str,
    },

    /// No window range registered under this id.
    #[error("window {0} not registered")]
    WindowNotFound(u64),

    /// A stored row or payload failed to decode.
    #[error("corrupt row at byte offset {offset}: {reason}")]
    CorruptRow { offset: usize, reason: String },

    /// No state or checkpoint stored under the given key.
    #[error("no state for compute '{0}'")]
    StateNotFound(String),

    /// A checkpoint id is already taken (checkpoints are immutable).
    #[error("checkpoint {id} for compute '{name}' already exists")]
    CheckpointExists { name: String, id: u64 },

    /// Error from the underlying LSM engine.
    #[error("LSM error: {0}")]
    Lsm(#[from] LsmError),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Hex transport for structured rows
// ------------------------------------------------------------------------------------------------

/// Encodes bytes as lowercase hex for storage in a record field.
pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from_digit((byte >> 4) as u32, 16).unwrap_or('0'));
        out.push(char::from_digit((byte & 0x0F) as u32, 16).unwrap_or('0'));
    }
    out
}

/// Decodes the hex transport form back into bytes.
pub(crate) fn hex_decode(text: &str) -> Result<Vec<u8>, TableError> {
    if text.len() % 2 != 0 {
        return Err(TableError::CorruptRow {
            offset: text.len(),
            reason: "odd-length hex row".into(),
        });
    }
    let mut out = Vec::with_capacity(text.len() / 2);
    let bytes = text.as_bytes();
    for (idx, pair) in bytes.chunks_exact(2).enumerate() {
        let hi = (pair[0] as char).to_digit(16);
        let lo = (pair[1] as char).to_digit(16);
        match (hi, lo) {
            (Some(hi), Some(lo)) => out.push(((hi << 4) | lo) as u8),
            _ => {
                return Err(TableError::CorruptRow {
                    offset: idx * 2,
                    reason: "non-hex byte in row".into(),
                });
            }
        }
    }
    Ok(out)
}
