//! SSTable writer — builds complete SSTable files from memtable snapshots
//! and from compaction merges.
//!
//! # Input Requirements
//!
//! - [`build_from_entries`] expects entries **sorted ascending by
//!   timestamp with no duplicates** — exactly what a memtable flush
//!   snapshot provides.
//! - [`merge_tables`] accepts any number of input SSTables; it performs a
//!   heap-based k-way merge and resolves duplicate timestamps in favour
//!   of the input with the **highest sequence number** (newest data wins).
//!
//! # Write choreography
//!
//! 1. Write a zeroed metadata stub to reserve the block.
//! 2. Write the bloom filter (populated from every timestamp).
//! 3. Write the index block with final data offsets.
//! 4. Write the data block.
//! 5. Seek back and rewrite the metadata with final offsets.
//!
//! # Atomicity
//!
//! Everything is written to `<path>.tmp`, synced, then renamed onto the
//! final path. A crash cannot publish a partially-written SSTable.

use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    fs::{self, File, OpenOptions},
    io::{BufWriter, Seek, SeekFrom, Write},
    path::Path,
    sync::Arc,
};

use crate::bloom::BloomFilter;
use crate::encoding::{self, Encode};
use crate::record::Record;
use tracing::{debug, info};

use super::{
    IndexEntry, SST_MAGIC, SST_METADATA_SIZE, SST_VERSION, SSTable, SSTableError, SSTableIter,
    SSTableMetadata,
};

/// Builds an SSTable at `path` from a sorted, deduplicated entry list.
///
/// `entries` is typically a memtable flush snapshot. Returns the opened
/// table so the caller can install it directly into a level vector.
pub fn build_from_entries<P: AsRef<Path>>(
    path: P,
    entries: &[(i64, Record)],
    level: u32,
    sequence: u64,
    bloom_bits_per_key: usize,
) -> Result<SSTable, SSTableError> {
    if entries.is_empty() {
        return Err(SSTableError::Internal(
            "cannot build SSTable from an empty entry set".into(),
        ));
    }
    if entries.windows(2).any(|w| w[0].0 >= w[1].0) {
        return Err(SSTableError::Internal(
            "SSTable input entries must be sorted and unique".into(),
        ));
    }

    let path_ref = path.as_ref();
    let tmp_path = path_ref.with_extension("sst.tmp");

    {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = BufWriter::new(file);

        // 1. Metadata stub — reserves the fixed-size block.
        writer.write_all(&[0u8; SST_METADATA_SIZE])?;

        // 2. Bloom filter over every timestamp.
        let mut bloom = BloomFilter::with_params(
            entries.len(),
            bloom_bits_per_key,
            crate::bloom::DEFAULT_NUM_HASHES,
        );
        for (ts, _) in entries {
            bloom.add(*ts);
        }
        let bloom_offset = SST_METADATA_SIZE as u64;
        let bloom_bytes = encoding::encode_to_vec(&bloom)?;
        writer.write_all(&bloom_bytes)?;

        // Encode all records up front so index offsets are final.
        let mut encoded: Vec<Vec<u8>> = Vec::with_capacity(entries.len());
        for (_, record) in entries {
            encoded.push(encoding::encode_to_vec(record)?);
        }

        // 3. Index block.
        let index_offset = bloom_offset + bloom_bytes.len() as u64;
        let index_size = (entries.len() * super::SST_INDEX_ENTRY_SIZE) as u64;
        let data_offset = index_offset + index_size;

        let mut index_bytes = Vec::with_capacity(index_size as usize);
        let mut cursor = data_offset;
        for ((ts, _), bytes) in entries.iter().zip(&encoded) {
            let entry = IndexEntry {
                timestamp: *ts,
                offset: cursor,
                size: bytes.len() as u32,
            };
            entry.encode_to(&mut index_bytes)?;
            cursor += bytes.len() as u64;
        }
        writer.write_all(&index_bytes)?;

        // 4. Data block.
        for bytes in &encoded {
            writer.write_all(bytes)?;
        }

        // 5. Rewrite the metadata with final offsets.
        let metadata = SSTableMetadata {
            magic: SST_MAGIC,
            version: SST_VERSION,
            level,
            sequence,
            entry_count: entries.len() as u64,
            min_timestamp: entries[0].0,
            max_timestamp: entries[entries.len() - 1].0,
            bloom_offset,
            index_offset,
            data_offset,
        };
        let metadata_bytes = encoding::encode_to_vec(&metadata)?;

        writer.flush()?;
        let mut file = writer.into_inner().map_err(|e| {
            SSTableError::Internal(format!("failed to unwrap buffered writer: {e}"))
        })?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&metadata_bytes)?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path_ref)?;
    sync_parent_dir(path_ref)?;

    info!(
        path = %path_ref.display(),
        level,
        sequence,
        entries = entries.len(),
        "SSTable built"
    );

    SSTable::open(path_ref)
}

/// Merges several SSTables into one at `target_level`.
///
/// Performs a streaming k-way merge by timestamp. Duplicate timestamps
/// across inputs resolve to the record from the input with the highest
/// sequence number.
pub fn merge_tables<P: AsRef<Path>>(
    inputs: &[Arc<SSTable>],
    path: P,
    target_level: u32,
    sequence: u64,
    bloom_bits_per_key: usize,
) -> Result<SSTable, SSTableError> {
    if inputs.is_empty() {
        return Err(SSTableError::Internal(
            "cannot merge an empty SSTable set".into(),
        ));
    }

    debug!(
        inputs = inputs.len(),
        target_level, sequence, "merging SSTables"
    );

    let mut merge = MergeIter::new(inputs.iter().map(|t| t.iter_all()).collect())?;

    // Drain the merge into a deduplicated, sorted entry list. The first
    // record popped for a timestamp comes from the newest input.
    let mut entries: Vec<(i64, Record)> = Vec::new();
    while let Some(item) = merge.next() {
        let (ts, record) = item?;
        match entries.last() {
            Some((last_ts, _)) if *last_ts == ts => {} // older duplicate
            _ => entries.push((ts, record)),
        }
    }

    build_from_entries(path, &entries, target_level, sequence, bloom_bits_per_key)
}

/// Fsync the directory containing `path` so the rename is durable.
fn sync_parent_dir(path: &Path) -> Result<(), SSTableError> {
    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        dir.sync_all()?;
    }
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// MergeIter — heap-based k-way merge over SSTable iterators
// ------------------------------------------------------------------------------------------------

/// Yields `(timestamp, record)` in `(ts ASC, source sequence DESC)`
/// order, so for duplicate timestamps the newest source pops first.
struct MergeIter<'a> {
    iters: Vec<SSTableIter<'a>>,
    sequences: Vec<u64>,
    heap: BinaryHeap<HeapEntry>,
}

struct HeapEntry {
    timestamp: i64,
    sequence: u64,
    source_idx: usize,
    record: Record,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on timestamp; among equal timestamps the highest
        // sequence pops first.
        other
            .timestamp
            .cmp(&self.timestamp)
            .then(self.sequence.cmp(&other.sequence))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp && self.sequence == other.sequence
    }
}

impl Eq for HeapEntry {}

impl<'a> MergeIter<'a> {
    fn new(mut iters: Vec<SSTableIter<'a>>) -> Result<Self, SSTableError> {
        let sequences: Vec<u64> = iters.iter().map(|it| it.table_sequence()).collect();
        let mut heap = BinaryHeap::new();

        for (idx, iter) in iters.iter_mut().enumerate() {
            if let Some(item) = iter.next() {
                let (timestamp, record) = item?;
                heap.push(HeapEntry {
                    timestamp,
                    sequence: sequences[idx],
                    source_idx: idx,
                    record,
                });
            }
        }

        Ok(Self {
            iters,
            sequences,
            heap,
        })
    }

    fn next(&mut self) -> Option<Result<(i64, Record), SSTableError>> {
        let entry = self.heap.pop()?;
        let idx = entry.source_idx;

        if let Some(item) = self.iters[idx].next() {
            match item {
                Ok((timestamp, record)) => self.heap.push(HeapEntry {
                    timestamp,
                    sequence: self.sequences[idx],
                    source_idx: idx,
                    record,
                }),
                Err(e) => return Some(Err(e)),
            }
        }

        Some(Ok((entry.timestamp, entry.record)))
    }
}

impl SSTableIter<'_> {
    /// Sequence number of the table this iterator reads from.
    fn table_sequence(&self) -> u64 {
        self.table.sequence()
    }
}
