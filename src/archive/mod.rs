//! Archive store — the legacy `.tsdb` snapshot format and checkpoints.
//!
//! The archival path trades write-path sophistication for simplicity: an
//! in-memory [`TimeSeriesIndex`] holds the live records, and whole-store
//! snapshots serialize to flat `.tsdb` files.
//!
//! # `.tsdb` file layout
//!
//! ```text
//! [HEADER]
//! [RECORD]*            shared record wire format, insertion order
//! ```
//!
//! Header fields (little-endian): `magic 0x53544442 ("STDB") u32 |
//! format_version u32 | data_count u64 | checkpoint_id u64 | min_ts i64 |
//! max_ts i64 | index_offset u64 | metadata_offset u64`. The index and
//! metadata offsets are reserved for sidecar sections and currently point
//! at end-of-file. A reader MUST reject a mismatched magic or version.
//!
//! # Checkpoints
//!
//! [`ArchiveStore::create_checkpoint`] snapshots the store into
//! `checkpoint_{id}.tsdb` under the data directory and records it in
//! `checkpoints.meta` — a CRC32-protected registry rewritten atomically
//! on every change. Checkpoint files are immutable once written.

#[cfg(test)]
mod tests;

use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Read, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::record::{Record, TimeRange};
use crate::tsindex::TimeSeriesIndex;

/// `.tsdb` magic: `"STDB"` read as a little-endian u32.
pub const TSDB_MAGIC: u32 = 0x5354_4442;

/// Current `.tsdb` format version.
pub const TSDB_VERSION: u32 = 1;

/// Default archive data directory.
pub const DEFAULT_ARCHIVE_DIR: &str = "./sage_tsdb_data";

/// Checkpoint registry file name.
const CHECKPOINTS_META: &str = "checkpoints.meta";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by archive operations.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// File failed structural validation.
    #[error("Corrupt archive file: {0}")]
    CorruptFile(String),

    /// No checkpoint with the given id.
    #[error("checkpoint {0} not found")]
    CheckpointNotFound(u64),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Header
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct TsdbHeader {
    magic: u32,
    version: u32,
    data_count: u64,
    checkpoint_id: u64,
    min_ts: i64,
    max_ts: i64,
    index_offset: u64,
    metadata_offset: u64,
}

impl TsdbHeader {
    /// Encoded header size in bytes.
    const SIZE: usize = 4 + 4 + 8 + 8 + 8 + 8 + 8 + 8;
}

impl Encode for TsdbHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.magic.encode_to(buf)?;
        self.version.encode_to(buf)?;
        self.data_count.encode_to(buf)?;
        self.checkpoint_id.encode_to(buf)?;
        self.min_ts.encode_to(buf)?;
        self.max_ts.encode_to(buf)?;
        self.index_offset.encode_to(buf)?;
        self.metadata_offset.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for TsdbHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (magic, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (version, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (data_count, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (checkpoint_id, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (min_ts, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        let (max_ts, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        let (index_offset, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (metadata_offset, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                magic,
                version,
                data_count,
                checkpoint_id,
                min_ts,
                max_ts,
                index_offset,
                metadata_offset,
            },
            offset,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Checkpoint registry
// ------------------------------------------------------------------------------------------------

/// One row of the checkpoint registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointMeta {
    pub id: u64,
    pub data_count: u64,
    pub min_ts: i64,
    pub max_ts: i64,
}

impl Encode for CheckpointMeta {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.id.encode_to(buf)?;
        self.data_count.encode_to(buf)?;
        self.min_ts.encode_to(buf)?;
        self.max_ts.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for CheckpointMeta {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (id, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (data_count, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (min_ts, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        let (max_ts, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                id,
                data_count,
                min_ts,
                max_ts,
            },
            offset,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Free functions: save / load
// ------------------------------------------------------------------------------------------------

/// Writes records to a `.tsdb` file. `load(save(x)) = x`.
pub fn save_tsdb<P: AsRef<Path>>(
    path: P,
    records: &[Record],
    checkpoint_id: u64,
) -> Result<(), ArchiveError> {
    let mut body = Vec::new();
    for record in records {
        record.encode_to(&mut body)?;
    }

    let header = TsdbHeader {
        magic: TSDB_MAGIC,
        version: TSDB_VERSION,
        data_count: records.len() as u64,
        checkpoint_id,
        min_ts: records.iter().map(|r| r.timestamp).min().unwrap_or(0),
        max_ts: records.iter().map(|r| r.timestamp).max().unwrap_or(0),
        index_offset: (TsdbHeader::SIZE + body.len()) as u64,
        metadata_offset: (TsdbHeader::SIZE + body.len()) as u64,
    };
    let header_bytes = encoding::encode_to_vec(&header)?;

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&header_bytes)?;
    writer.write_all(&body)?;
    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| ArchiveError::Internal(format!("failed to unwrap buffered writer: {e}")))?
        .sync_all()?;

    debug!(path = %path.as_ref().display(), records = records.len(), "tsdb file written");
    Ok(())
}

/// Reads a `.tsdb` file back into records.
pub fn load_tsdb<P: AsRef<Path>>(path: P) -> Result<Vec<Record>, ArchiveError> {
    let mut file = File::open(path.as_ref())?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    if bytes.len() < TsdbHeader::SIZE {
        return Err(ArchiveError::CorruptFile(
            "file shorter than header".into(),
        ));
    }

    let (header, mut offset) = TsdbHeader::decode_from(&bytes)?;
    if header.magic != TSDB_MAGIC {
        return Err(ArchiveError::CorruptFile(format!(
            "bad magic 0x{:08X}",
            header.magic
        )));
    }
    if header.version != TSDB_VERSION {
        return Err(ArchiveError::CorruptFile(format!(
            "unsupported version {}",
            header.version
        )));
    }

    let mut records = Vec::with_capacity(header.data_count as usize);
    for _ in 0..header.data_count {
        let (record, n) = Record::decode_from(&bytes[offset..])
            .map_err(|e| ArchiveError::CorruptFile(format!("record at offset {offset}: {e}")))?;
        offset += n;
        records.push(record);
    }
    Ok(records)
}

// ------------------------------------------------------------------------------------------------
// ArchiveStore
// ------------------------------------------------------------------------------------------------

/// In-memory archival store with `.tsdb` persistence and checkpoints.
pub struct ArchiveStore {
    data_dir: PathBuf,
    index: TimeSeriesIndex,
    registry: Mutex<Vec<CheckpointMeta>>,
}

impl ArchiveStore {
    /// Opens the store, loading any existing checkpoint registry.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;

        let registry = read_registry(&data_dir.join(CHECKPOINTS_META))?;
        info!(
            data_dir = %data_dir.display(),
            checkpoints = registry.len(),
            "archive store opened"
        );

        Ok(Self {
            data_dir,
            index: TimeSeriesIndex::new(),
            registry: Mutex::new(registry),
        })
    }

    /// Opens the store at the default directory.
    pub fn open_default() -> Result<Self, ArchiveError> {
        Self::open(DEFAULT_ARCHIVE_DIR)
    }

    /// Appends a record to the in-memory index.
    pub fn insert(&self, record: Record) {
        self.index.add(record);
    }

    /// Appends a batch of records.
    pub fn insert_batch(&self, records: Vec<Record>) {
        self.index.add_batch(records);
    }

    /// Queries the half-open `range` with an optional tag filter.
    pub fn query(&self, range: TimeRange, tag_filter: &BTreeMap<String, String>) -> Vec<Record> {
        self.index.query(range, tag_filter)
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True when the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Writes the current contents to an arbitrary `.tsdb` file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ArchiveError> {
        let records = self.index.range_query(TimeRange::all());
        save_tsdb(path, &records, 0)
    }

    /// Replaces the current contents with a `.tsdb` file's records.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<usize, ArchiveError> {
        let records = load_tsdb(path)?;
        let count = records.len();
        self.index.clear();
        self.index.add_batch(records);
        Ok(count)
    }

    /// Snapshots the store into `checkpoint_{id}.tsdb` and registers it.
    /// Returns the new checkpoint id.
    pub fn create_checkpoint(&self) -> Result<u64, ArchiveError> {
        let mut registry = self
            .registry
            .lock()
            .map_err(|_| ArchiveError::Internal("Mutex poisoned".into()))?;
        let id = registry.iter().map(|c| c.id).max().unwrap_or(0) + 1;

        let records = self.index.range_query(TimeRange::all());
        let path = self.checkpoint_path(id);
        save_tsdb(&path, &records, id)?;

        registry.push(CheckpointMeta {
            id,
            data_count: records.len() as u64,
            min_ts: records.iter().map(|r| r.timestamp).min().unwrap_or(0),
            max_ts: records.iter().map(|r| r.timestamp).max().unwrap_or(0),
        });
        write_registry(&self.data_dir.join(CHECKPOINTS_META), &registry)?;

        info!(id, records = records.len(), "checkpoint created");
        Ok(id)
    }

    /// Restores the store from a checkpoint, replacing live contents.
    pub fn restore_checkpoint(&self, id: u64) -> Result<usize, ArchiveError> {
        {
            let registry = self
                .registry
                .lock()
                .map_err(|_| ArchiveError::Internal("Mutex poisoned".into()))?;
            if !registry.iter().any(|c| c.id == id) {
                return Err(ArchiveError::CheckpointNotFound(id));
            }
        }
        self.load(self.checkpoint_path(id))
    }

    /// Registered checkpoints, ascending by id.
    pub fn list_checkpoints(&self) -> Vec<CheckpointMeta> {
        self.registry
            .lock()
            .map(|r| {
                let mut out = r.clone();
                out.sort_by_key(|c| c.id);
                out
            })
            .unwrap_or_default()
    }

    /// Removes a checkpoint file and its registry row.
    pub fn delete_checkpoint(&self, id: u64) -> Result<(), ArchiveError> {
        let mut registry = self
            .registry
            .lock()
            .map_err(|_| ArchiveError::Internal("Mutex poisoned".into()))?;
        let before = registry.len();
        registry.retain(|c| c.id != id);
        if registry.len() == before {
            return Err(ArchiveError::CheckpointNotFound(id));
        }
        write_registry(&self.data_dir.join(CHECKPOINTS_META), &registry)?;

        if let Err(e) = fs::remove_file(self.checkpoint_path(id)) {
            warn!(id, error = %e, "failed to remove checkpoint file");
        }
        Ok(())
    }

    fn checkpoint_path(&self, id: u64) -> PathBuf {
        self.data_dir.join(format!("checkpoint_{id}.tsdb"))
    }
}

// ------------------------------------------------------------------------------------------------
// Registry I/O — CRC-protected frames, rewritten atomically
// ------------------------------------------------------------------------------------------------

/// Registry layout: `[u32 len][payload][u32 crc32]` per checkpoint,
/// where the CRC covers `len || payload`. A frame failing its checksum
/// ends the read; later frames are discarded as corrupt.
fn read_registry(path: &Path) -> Result<Vec<CheckpointMeta>, ArchiveError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ArchiveError::Io(e)),
    };

    let mut registry = Vec::new();
    let mut offset = 0usize;
    while offset + 4 <= bytes.len() {
        let len_bytes: [u8; 4] = bytes[offset..offset + 4]
            .try_into()
            .map_err(|_| ArchiveError::Internal("length slice conversion failed".into()))?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        let payload_start = offset + 4;
        let crc_start = payload_start + len;
        if crc_start + 4 > bytes.len() {
            warn!(offset, "truncated checkpoint registry frame dropped");
            break;
        }

        let mut hasher = Crc32::new();
        hasher.update(&bytes[offset..crc_start]);
        let computed = hasher.finalize();
        let crc_bytes: [u8; 4] = bytes[crc_start..crc_start + 4]
            .try_into()
            .map_err(|_| ArchiveError::Internal("crc slice conversion failed".into()))?;
        if computed != u32::from_le_bytes(crc_bytes) {
            warn!(offset, "checkpoint registry frame failed CRC, stopping");
            break;
        }

        let (meta, _) = CheckpointMeta::decode_from(&bytes[payload_start..crc_start])?;
        registry.push(meta);
        offset = crc_start + 4;
    }
    Ok(registry)
}

fn write_registry(path: &Path, registry: &[CheckpointMeta]) -> Result<(), ArchiveError> {
    let mut bytes = Vec::new();
    for meta in registry {
        let payload = encoding::encode_to_vec(meta)?;
        let len = payload.len() as u32;
        let mut frame = Vec::with_capacity(payload.len() + 8);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        let mut hasher = Crc32::new();
        hasher.update(&frame);
        let crc = hasher.finalize();
        frame.extend_from_slice(&crc.to_le_bytes());
        bytes.extend_from_slice(&frame);
    }

    let tmp = path.with_extension("meta.tmp");
    fs::write(&tmp, &bytes)?;
    let file = File::open(&tmp)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}
