//! Write-Ahead Logging (WAL) Module
//!
//! A **durable**, **append-only** log recorded before any in-memory state
//! changes, so a crash can never lose an acknowledged write.
//!
//! # On-disk layout
//!
//! ```text
//! [FRAME_LEN_LE u32][FRAME_BYTES]
//! [FRAME_LEN_LE u32][FRAME_BYTES]
//! ...
//! ```
//!
//! Each frame payload is `[i64 timestamp][encoded Record]`. A trailing
//! partial frame (truncated length prefix or payload) marks the end of the
//! log and is dropped silently: the corresponding append was never
//! acknowledged, so dropping it is the correct recovery outcome.
//!
//! # Concurrency model
//!
//! The WAL is single-writer and process-local. The file handle is shared
//! behind `Arc<Mutex<File>>` so recovery and the owning engine can read
//! and append without racing.
//!
//! # Guarantees
//!
//! - **Durability to the OS:** every `append()` flushes the frame to the
//!   operating system before returning; [`Wal::sync`] additionally forces
//!   a disk fsync.
//! - **Crash recovery:** [`Wal::recover`] replays all complete frames into
//!   a timestamp-ordered map with last-write-wins per timestamp.
//! - **Atomic truncation:** [`Wal::clear`] empties the log after a
//!   successful memtable flush.

#[cfg(test)]
mod tests;

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use std::collections::BTreeMap;

use crate::encoding::{self, EncodingError};
use crate::record::Record;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

const U32_SIZE: usize = std::mem::size_of::<u32>();

/// Maximum accepted frame size during recovery (64 MiB). A larger length
/// prefix is treated as corruption past the end of the valid log.
const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Frame exceeds the maximum accepted size.
    #[error("Frame size exceeds limit ({0} bytes)")]
    FrameTooLarge(usize),

    /// Internal consistency or locking error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// WAL Core
// ------------------------------------------------------------------------------------------------

/// A durable append-only record log.
///
/// See the [module-level documentation](self) for format, concurrency,
/// and guarantees.
#[derive(Debug)]
pub struct Wal {
    /// Thread-safe file handle for WAL operations.
    inner_file: Arc<Mutex<File>>,

    /// Path to the WAL file on disk.
    path: PathBuf,
}

impl Wal {
    /// Opens or creates a WAL file at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WalError> {
        let path_ref = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path_ref)?;

        info!(path = %path_ref.display(), "WAL opened");

        Ok(Self {
            inner_file: Arc::new(Mutex::new(file)),
            path: path_ref.to_path_buf(),
        })
    }

    /// Appends one `(timestamp, record)` frame and flushes it to the OS.
    ///
    /// The frame is `[u32 len][i64 ts][encoded record]`. On success the
    /// write survives a process crash (not necessarily a power failure —
    /// call [`Wal::sync`] for that).
    pub fn append(&self, timestamp: i64, record: &Record) -> Result<(), WalError> {
        let mut payload = Vec::new();
        encoding::Encode::encode_to(&timestamp, &mut payload)?;
        encoding::Encode::encode_to(record, &mut payload)?;

        let frame_len = u32::try_from(payload.len())
            .map_err(|_| WalError::FrameTooLarge(payload.len()))?;
        if frame_len as usize > MAX_FRAME_SIZE {
            return Err(WalError::FrameTooLarge(frame_len as usize));
        }

        let mut guard = self
            .inner_file
            .lock()
            .map_err(|_| WalError::Internal("Mutex poisoned".into()))?;

        guard.write_all(&frame_len.to_le_bytes())?;
        guard.write_all(&payload)?;
        guard.flush()?;

        trace!(ts = timestamp, len = frame_len, "WAL frame appended");
        Ok(())
    }

    /// Forces an fsync of the WAL file to stable storage.
    pub fn sync(&self) -> Result<(), WalError> {
        let guard = self
            .inner_file
            .lock()
            .map_err(|_| WalError::Internal("Mutex poisoned".into()))?;
        guard.sync_all()?;
        Ok(())
    }

    /// Replays the log from the start into a timestamp-ordered map.
    ///
    /// Later frames for the same timestamp overwrite earlier ones
    /// (last-write-wins). A trailing partial frame ends the replay
    /// silently; it belongs to a write that was never acknowledged.
    pub fn recover(&self) -> Result<BTreeMap<i64, Record>, WalError> {
        debug!(path = %self.path.display(), "WAL replay started");

        let mut guard = self
            .inner_file
            .lock()
            .map_err(|_| WalError::Internal("Mutex poisoned".into()))?;

        guard.seek(SeekFrom::Start(0))?;

        let mut recovered = BTreeMap::new();
        let mut offset = 0u64;

        loop {
            let mut len_bytes = [0u8; U32_SIZE];
            match guard.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    trace!(offset, "WAL replay reached end of file");
                    break;
                }
                Err(e) => return Err(WalError::Io(e)),
            }

            let frame_len = u32::from_le_bytes(len_bytes) as usize;
            if frame_len > MAX_FRAME_SIZE {
                warn!(offset, len = frame_len, "WAL frame length out of range, stopping replay");
                break;
            }

            let mut payload = vec![0u8; frame_len];
            match guard.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    // Crash mid-append: the frame was never acknowledged.
                    warn!(offset, len = frame_len, "WAL truncated trailing frame dropped");
                    break;
                }
                Err(e) => return Err(WalError::Io(e)),
            }

            let (timestamp, n) = encoding::decode_from_slice::<i64>(&payload)?;
            let (record, _) = encoding::decode_from_slice::<Record>(&payload[n..])?;
            recovered.insert(timestamp, record);

            offset += (U32_SIZE + frame_len) as u64;
        }

        // Leave the cursor at the end so subsequent appends are not
        // interleaved into replayed territory.
        guard.seek(SeekFrom::End(0))?;

        info!(
            path = %self.path.display(),
            records = recovered.len(),
            "WAL replay finished"
        );
        Ok(recovered)
    }

    /// Truncates the log to empty. Called after a successful memtable
    /// flush, when every logged record is durable in an SSTable.
    pub fn clear(&self) -> Result<(), WalError> {
        let mut guard = self
            .inner_file
            .lock()
            .map_err(|_| WalError::Internal("Mutex poisoned".into()))?;

        guard.set_len(0)?;
        guard.seek(SeekFrom::Start(0))?;
        guard.sync_all()?;

        info!(path = %self.path.display(), "WAL truncated");
        Ok(())
    }

    /// Path of the underlying WAL file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current on-disk file size in bytes.
    pub fn file_size(&self) -> Result<u64, WalError> {
        let guard = self
            .inner_file
            .lock()
            .map_err(|_| WalError::Internal("Mutex poisoned".into()))?;
        Ok(guard.metadata()?.len())
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        match self.inner_file.lock() {
            Ok(guard) => {
                if let Err(e) = guard.sync_all() {
                    error!(path = %self.path.display(), error = %e, "WAL sync failed on drop");
                }
            }
            Err(poisoned) => {
                let file = poisoned.into_inner();
                if let Err(e) = file.sync_all() {
                    error!(path = %self.path.display(), error = %e, "WAL sync failed on drop (poisoned lock)");
                } else {
                    warn!(path = %self.path.display(), "WAL recovered and synced after poisoned lock");
                }
            }
        }
    }
}
