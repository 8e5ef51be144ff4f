//! Sorted String Table (SSTable) Module
//!
//! An **immutable**, **disk-backed**, timestamp-sorted table file. Each
//! SSTable is written once by a memtable flush or a compaction merge and
//! never modified afterwards; updates appear only as newer SSTables with
//! higher sequence numbers.
//!
//! # On-disk layout
//!
//! ```text
//! [METADATA (68 B)]
//! [BLOOM FILTER BLOCK]
//! [INDEX BLOCK]          entry_count × (i64 ts | u64 offset | u32 size)
//! [DATA BLOCK]           encoded records at the indexed offsets
//! ```
//!
//! - **Metadata** — `magic 0x53535442 ("SSTB") | version | level |
//!   sequence | entry_count | min_ts | max_ts | bloom_offset |
//!   index_offset | data_offset`, all integers little-endian.
//! - **Bloom filter** — `[u32 k][u64 bit_count][bit payload]`, built from
//!   every indexed timestamp.
//! - **Index** — sorted ascending by timestamp; offsets are absolute file
//!   positions into the data block.
//!
//! A reader MUST reject a file whose magic or version mismatches.
//!
//! # Sub-modules
//!
//! - [`builder`] — builds SSTables from memtable snapshots and merges
//!   existing SSTables during compaction.
//!
//! # Concurrency model
//!
//! - SSTables are immutable, so reads are lock-free and thread-safe.
//! - The file is memory-mapped read-only; multiple readers share the map.
//! - Compaction replaces whole level vectors; readers holding an
//!   `Arc<SSTable>` keep the old table readable until they finish.
//!
//! # Invariants
//!
//! - The index is sorted ascending by timestamp.
//! - Every indexed timestamp is present in the bloom filter.
//! - `min_timestamp == index.first.ts` and `max_timestamp == index.last.ts`.

pub mod builder;

#[cfg(test)]
mod tests;

pub use builder::{build_from_entries, merge_tables};

use std::{fs::File, io, path::{Path, PathBuf}};

use crate::bloom::BloomFilter;
use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::record::Record;
use memmap2::Mmap;
use thiserror::Error;
use tracing::{debug, trace, warn};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Metadata magic: `"SSTB"` read as a little-endian u32.
pub const SST_MAGIC: u32 = 0x5353_5442;

/// Current SSTable format version.
pub const SST_VERSION: u32 = 1;

/// Fixed metadata block size:
/// `magic(4) + version(4) + level(4) + sequence(8) + entry_count(8)
///  + min_ts(8) + max_ts(8) + bloom_offset(8) + index_offset(8)
///  + data_offset(8)`.
pub const SST_METADATA_SIZE: usize = 68;

/// Encoded size of one index entry: `ts(8) + offset(8) + size(4)`.
pub const SST_INDEX_ENTRY_SIZE: usize = 20;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by SSTable operations (read, write, build).
#[derive(Debug, Error)]
pub enum SSTableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// File failed structural validation (bad magic, version, offsets).
    #[error("Corrupt SSTable: {0}")]
    CorruptFile(String),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// On-disk format structures
// ------------------------------------------------------------------------------------------------

/// SSTable metadata block, written at the start of the file.
///
/// Written twice during a build: first as a stub to reserve the space,
/// then rewritten with final offsets once every block is placed.
#[derive(Debug, Clone)]
pub struct SSTableMetadata {
    /// Magic constant ([`SST_MAGIC`]).
    pub magic: u32,

    /// Format version ([`SST_VERSION`]).
    pub version: u32,

    /// LSM level this table belongs to.
    pub level: u32,

    /// Monotonic sequence number; higher = newer data.
    pub sequence: u64,

    /// Number of indexed records.
    pub entry_count: u64,

    /// Smallest indexed timestamp.
    pub min_timestamp: i64,

    /// Largest indexed timestamp.
    pub max_timestamp: i64,

    /// Absolute offset of the bloom filter block.
    pub bloom_offset: u64,

    /// Absolute offset of the index block.
    pub index_offset: u64,

    /// Absolute offset of the data block.
    pub data_offset: u64,
}

impl Encode for SSTableMetadata {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.magic.encode_to(buf)?;
        self.version.encode_to(buf)?;
        self.level.encode_to(buf)?;
        self.sequence.encode_to(buf)?;
        self.entry_count.encode_to(buf)?;
        self.min_timestamp.encode_to(buf)?;
        self.max_timestamp.encode_to(buf)?;
        self.bloom_offset.encode_to(buf)?;
        self.index_offset.encode_to(buf)?;
        self.data_offset.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for SSTableMetadata {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (magic, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (version, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (level, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (sequence, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (entry_count, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (min_timestamp, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        let (max_timestamp, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        let (bloom_offset, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (index_offset, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (data_offset, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                magic,
                version,
                level,
                sequence,
                entry_count,
                min_timestamp,
                max_timestamp,
                bloom_offset,
                index_offset,
                data_offset,
            },
            offset,
        ))
    }
}

/// One index entry: a timestamp and the position of its record bytes.
#[derive(Debug, Clone, Copy)]
pub struct IndexEntry {
    /// Record timestamp.
    pub timestamp: i64,

    /// Absolute file offset of the encoded record.
    pub offset: u64,

    /// Encoded record size in bytes.
    pub size: u32,
}

impl Encode for IndexEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.timestamp.encode_to(buf)?;
        self.offset.encode_to(buf)?;
        self.size.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for IndexEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (timestamp, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        let (file_offset, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (size, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                timestamp,
                offset: file_offset,
                size,
            },
            offset,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// SSTable reader
// ------------------------------------------------------------------------------------------------

/// An opened, immutable SSTable.
///
/// The file is memory-mapped; point and range reads decode records
/// straight out of the map without a read syscall per record.
pub struct SSTable {
    /// Parsed metadata block.
    metadata: SSTableMetadata,

    /// Bloom filter over every indexed timestamp.
    bloom: BloomFilter,

    /// Index entries, sorted ascending by timestamp.
    index: Vec<IndexEntry>,

    /// Read-only map of the whole file.
    mmap: Mmap,

    /// Path of the backing file (used by compaction for deferred delete).
    path: PathBuf,

    /// File size in bytes.
    file_size: u64,
}

impl std::fmt::Debug for SSTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTable")
            .field("path", &self.path)
            .field("level", &self.metadata.level)
            .field("sequence", &self.metadata.sequence)
            .field("entry_count", &self.metadata.entry_count)
            .finish_non_exhaustive()
    }
}

impl SSTable {
    /// Opens and validates an SSTable file.
    ///
    /// Rejects files with a mismatched magic or version, truncated
    /// blocks, or an out-of-order index.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SSTableError> {
        let path_ref = path.as_ref();
        let file = File::open(path_ref)?;
        let file_size = file.metadata()?.len();

        if (file_size as usize) < SST_METADATA_SIZE {
            return Err(SSTableError::CorruptFile(format!(
                "file shorter than metadata block ({file_size} bytes)"
            )));
        }

        // SAFETY: the map is read-only and the file is never written
        // after the atomic rename that published it.
        let mmap = unsafe { Mmap::map(&file)? };

        let (metadata, _) = SSTableMetadata::decode_from(&mmap[..SST_METADATA_SIZE])?;

        if metadata.magic != SST_MAGIC {
            return Err(SSTableError::CorruptFile(format!(
                "bad magic 0x{:08X}",
                metadata.magic
            )));
        }
        if metadata.version != SST_VERSION {
            return Err(SSTableError::CorruptFile(format!(
                "unsupported version {}",
                metadata.version
            )));
        }
        if metadata.bloom_offset > file_size
            || metadata.index_offset > file_size
            || metadata.data_offset > file_size
        {
            return Err(SSTableError::CorruptFile("block offsets past EOF".into()));
        }

        let (bloom, _) =
            BloomFilter::decode_from(&mmap[metadata.bloom_offset as usize..])
                .map_err(|e| SSTableError::CorruptFile(format!("bloom block: {e}")))?;

        let mut index = Vec::with_capacity(metadata.entry_count as usize);
        let mut cursor = metadata.index_offset as usize;
        for _ in 0..metadata.entry_count {
            let (entry, n) = IndexEntry::decode_from(&mmap[cursor..])
                .map_err(|e| SSTableError::CorruptFile(format!("index block: {e}")))?;
            cursor += n;
            index.push(entry);
        }

        if !index.is_empty() {
            if index.windows(2).any(|w| w[0].timestamp > w[1].timestamp) {
                return Err(SSTableError::CorruptFile("index not sorted".into()));
            }
            if metadata.min_timestamp != index[0].timestamp
                || metadata.max_timestamp != index[index.len() - 1].timestamp
            {
                return Err(SSTableError::CorruptFile(
                    "metadata min/max disagree with index".into(),
                ));
            }
        }

        debug!(
            path = %path_ref.display(),
            level = metadata.level,
            sequence = metadata.sequence,
            entries = metadata.entry_count,
            "SSTable opened"
        );

        Ok(Self {
            metadata,
            bloom,
            index,
            mmap,
            path: path_ref.to_path_buf(),
            file_size,
        })
    }

    /// Point read by timestamp.
    ///
    /// Consults the bloom filter first; a negative answer returns
    /// `Ok(None)` without touching the index.
    pub fn get(&self, timestamp: i64) -> Result<Option<Record>, SSTableError> {
        if !self.bloom.might_contain(timestamp) {
            trace!(ts = timestamp, "bloom filter rejected lookup");
            return Ok(None);
        }

        match self
            .index
            .binary_search_by_key(&timestamp, |e| e.timestamp)
        {
            Ok(pos) => {
                let entry = self.index[pos];
                Ok(Some(self.read_record(&entry)?))
            }
            Err(_) => Ok(None),
        }
    }

    /// Returns all records with timestamp in `[lo, hi]`, ascending.
    pub fn range_query(&self, lo: i64, hi: i64) -> Result<Vec<Record>, SSTableError> {
        let start = self.index.partition_point(|e| e.timestamp < lo);
        let mut out = Vec::new();
        for entry in &self.index[start..] {
            if entry.timestamp > hi {
                break;
            }
            out.push(self.read_record(entry)?);
        }
        Ok(out)
    }

    /// Cheap containment pre-check: bloom filter AND `[min_ts, max_ts]`.
    pub fn might_contain(&self, timestamp: i64) -> bool {
        timestamp >= self.metadata.min_timestamp
            && timestamp <= self.metadata.max_timestamp
            && self.bloom.might_contain(timestamp)
    }

    /// Streaming iterator over all `(timestamp, record)` entries in
    /// ascending order. Decodes lazily from the map, one record at a
    /// time; used by compaction merges.
    pub fn iter_all(&self) -> SSTableIter<'_> {
        SSTableIter {
            table: self,
            pos: 0,
        }
    }

    fn read_record(&self, entry: &IndexEntry) -> Result<Record, SSTableError> {
        let start = entry.offset as usize;
        let end = start + entry.size as usize;
        if end > self.mmap.len() {
            return Err(SSTableError::CorruptFile(format!(
                "record at offset {start} extends past EOF"
            )));
        }
        let (record, _) = encoding::decode_from_slice::<Record>(&self.mmap[start..end])?;
        Ok(record)
    }

    // Read-only getters.

    /// Smallest indexed timestamp.
    pub fn min_timestamp(&self) -> i64 {
        self.metadata.min_timestamp
    }

    /// Largest indexed timestamp.
    pub fn max_timestamp(&self) -> i64 {
        self.metadata.max_timestamp
    }

    /// LSM level this table belongs to.
    pub fn level(&self) -> u32 {
        self.metadata.level
    }

    /// Monotonic sequence number.
    pub fn sequence(&self) -> u64 {
        self.metadata.sequence
    }

    /// Number of indexed records.
    pub fn entry_count(&self) -> u64 {
        self.metadata.entry_count
    }

    /// Size of the backing file in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the table's `[min_ts, max_ts]` overlaps `[lo, hi]`.
    pub fn overlaps_range(&self, lo: i64, hi: i64) -> bool {
        self.metadata.min_timestamp <= hi && lo <= self.metadata.max_timestamp
    }
}

/// Streaming forward iterator over an SSTable's records.
pub struct SSTableIter<'a> {
    table: &'a SSTable,
    pos: usize,
}

impl Iterator for SSTableIter<'_> {
    type Item = Result<(i64, Record), SSTableError>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.table.index.get(self.pos)?;
        self.pos += 1;
        match self.table.read_record(entry) {
            Ok(record) => Some(Ok((entry.timestamp, record))),
            Err(e) => {
                warn!(path = %self.table.path.display(), error = %e, "SSTable iteration failed");
                Some(Err(e))
            }
        }
    }
}
