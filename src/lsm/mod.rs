//! # LSM Storage Engine
//!
//! A **write-optimized**, **crash-safe** storage engine organising data
//! across three layers, queried newest-first:
//!
//! 1. **Active memtable** — an in-memory timestamp-sorted map backed by a
//!    write-ahead log.
//! 2. **Immutable memtable** — at most one previously-active memtable
//!    awaiting flush to a level-0 SSTable.
//! 3. **Leveled SSTables** — level 0 holds recently-flushed tables with
//!    overlapping ranges; levels ≥ 1 hold range-disjoint tables ordered by
//!    minimum timestamp.
//!
//! Writes go through the WAL first, then into the active memtable. When
//! the memtable reaches [`LsmConfig::memtable_budget`] and the immutable
//! slot is free, the engine atomically swaps in a fresh memtable and
//! schedules a background flush.
//!
//! ## Concurrency Model
//!
//! - The memtable pair lives behind one `RwLock`; the write critical
//!   section (WAL append + insert + maybe swap) serializes on it.
//! - The level map lives behind an independent `RwLock`; compaction takes
//!   the write half only for the vector swap, never during a merge.
//! - A single background worker drains flush/compaction signals from a
//!   crossbeam channel. Foreground writers never block on flush while the
//!   immutable slot is free.
//! - SSTables are shared via `Arc`, so a reader traversing an old level
//!   vector stays safe across a concurrent compaction swap; files are
//!   deleted only after the in-memory swap.
//!
//! ## Guarantees
//!
//! - **Durability:** every write is in the WAL before it is visible.
//! - **Recovery:** on open, the data directory is scanned for
//!   `L{level}_{sequence}.sst` files and the WAL is replayed into a fresh
//!   memtable.
//! - **Last-write-wins:** for duplicate timestamps the newest source wins
//!   (active, then immutable, then L0 by descending sequence, then lower
//!   levels).

pub mod compaction;

#[cfg(test)]
mod tests;

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    thread::JoinHandle,
};

use crossbeam::channel::{Receiver, Sender, unbounded};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::memtable::{DEFAULT_MEMTABLE_BUDGET, Memtable, MemtableError};
use crate::record::Record;
use crate::sstable::{self, SSTable, SSTableError};
use crate::wal::{Wal, WalError};

/// WAL file name inside the data directory.
pub const WAL_FILE: &str = "wal.log";

/// Default data directory.
pub const DEFAULT_DATA_DIR: &str = "./lsm_data";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum LsmError {
    /// Error originating from the WAL subsystem.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Error originating from the memtable subsystem.
    #[error("Memtable error: {0}")]
    Memtable(#[from] MemtableError),

    /// Error originating from the SSTable subsystem.
    #[error("SSTable error: {0}")]
    SSTable(#[from] SSTableError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violation (poisoned lock, unexpected state).
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for an [`LsmEngine`] instance.
#[derive(Debug, Clone)]
pub struct LsmConfig {
    /// Memtable byte budget before a swap is triggered.
    pub memtable_budget: usize,

    /// Number of L0 SSTables that triggers compaction into L1.
    pub l0_compaction_trigger: usize,

    /// Maximum number of levels (level indices `0..max_levels`).
    pub max_levels: u32,

    /// Per-level size multiplier: level-k target bytes =
    /// `memtable_budget × l0_compaction_trigger × multiplier^k`.
    pub level_size_multiplier: u64,

    /// Bloom filter bits budgeted per key in every SSTable.
    pub bloom_bits_per_key: usize,

    /// Directory holding the WAL and SSTable files.
    pub data_dir: PathBuf,

    /// Reserved; block compression is not implemented yet.
    pub enable_compression: bool,
}

impl Default for LsmConfig {
    fn default() -> Self {
        Self {
            memtable_budget: DEFAULT_MEMTABLE_BUDGET,
            l0_compaction_trigger: 4,
            max_levels: 7,
            level_size_multiplier: 10,
            bloom_bits_per_key: 10,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            enable_compression: false,
        }
    }
}

impl LsmConfig {
    /// Target byte size for level `k` (k ≥ 1).
    pub fn level_target_bytes(&self, level: u32) -> u64 {
        let l0_target = (self.memtable_budget * self.l0_compaction_trigger) as u64;
        l0_target.saturating_mul(self.level_size_multiplier.saturating_pow(level))
    }
}

// ------------------------------------------------------------------------------------------------
// Statistics
// ------------------------------------------------------------------------------------------------

/// Monotonic engine counters, updated without coordination.
#[derive(Debug, Default)]
pub struct LsmStats {
    pub(crate) puts: AtomicU64,
    pub(crate) gets: AtomicU64,
    pub(crate) memtable_hits: AtomicU64,
    pub(crate) sstable_hits: AtomicU64,
    pub(crate) bloom_rejections: AtomicU64,
    pub(crate) flushes: AtomicU64,
    pub(crate) compactions: AtomicU64,
}

/// A point-in-time snapshot of engine statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LsmStatsSnapshot {
    pub puts: u64,
    pub gets: u64,
    pub memtable_hits: u64,
    pub sstable_hits: u64,
    pub bloom_rejections: u64,
    pub flushes: u64,
    pub compactions: u64,
    pub sstable_count: u64,
    pub total_sstable_bytes: u64,
}

// ------------------------------------------------------------------------------------------------
// Internal state
// ------------------------------------------------------------------------------------------------

/// Active + immutable memtable pair, swapped atomically under the lock.
struct MemtablePair {
    active: Arc<Memtable>,
    immutable: Option<Arc<Memtable>>,
}

/// State shared between the engine handle and the background worker.
pub(crate) struct LsmInner {
    pub(crate) config: LsmConfig,
    wal: Wal,
    memtables: RwLock<MemtablePair>,
    /// `level → tables`. L0 is append-ordered (ascending sequence);
    /// levels ≥ 1 are kept sorted by `min_timestamp` and range-disjoint.
    pub(crate) levels: RwLock<BTreeMap<u32, Vec<Arc<SSTable>>>>,
    pub(crate) next_sequence: AtomicU64,
    pub(crate) stats: LsmStats,
}

/// Signals handled by the background worker.
enum WorkerSignal {
    Flush,
    Compact,
    Shutdown,
}

// ------------------------------------------------------------------------------------------------
// Engine
// ------------------------------------------------------------------------------------------------

/// The LSM storage engine handle.
///
/// Cheap to clone; all clones share the same underlying state.
pub struct LsmEngine {
    inner: Arc<LsmInner>,
    worker_tx: Sender<WorkerSignal>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Clone for LsmEngine {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            worker_tx: self.worker_tx.clone(),
            worker: Arc::clone(&self.worker),
        }
    }
}

impl LsmEngine {
    /// Opens (or creates) an engine rooted at `config.data_dir`.
    ///
    /// Recovery order: scan the directory for SSTable files and rebuild
    /// the level map from their filename-encoded `(level, sequence)`,
    /// then replay the WAL into a fresh active memtable. If the replayed
    /// contents already exceed the budget, an immediate flush is queued.
    pub fn open(config: LsmConfig) -> Result<Self, LsmError> {
        fs::create_dir_all(&config.data_dir)?;

        // 1. Discover SSTables.
        let mut levels: BTreeMap<u32, Vec<Arc<SSTable>>> = BTreeMap::new();
        let mut max_sequence = 0u64;

        for entry in fs::read_dir(&config.data_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some((level, sequence)) = parse_sstable_filename(&path) else {
                continue;
            };

            match SSTable::open(&path) {
                Ok(table) => {
                    max_sequence = max_sequence.max(sequence);
                    levels.entry(level).or_default().push(Arc::new(table));
                }
                Err(e) => {
                    // A corrupt table is left on disk for inspection but
                    // excluded from the live set.
                    error!(path = %path.display(), error = %e, "skipping unreadable SSTable");
                }
            }
        }

        for (level, tables) in levels.iter_mut() {
            if *level == 0 {
                tables.sort_by_key(|t| t.sequence());
            } else {
                tables.sort_by_key(|t| t.min_timestamp());
            }
        }

        // 2. Replay the WAL.
        let wal = Wal::open(config.data_dir.join(WAL_FILE))?;
        let recovered = wal.recover()?;
        let active = Arc::new(Memtable::new(config.memtable_budget));
        let recovered_count = recovered.len();
        active.load(recovered)?;

        info!(
            data_dir = %config.data_dir.display(),
            sstables = levels.values().map(Vec::len).sum::<usize>(),
            wal_records = recovered_count,
            "LSM engine opened"
        );

        let inner = Arc::new(LsmInner {
            config,
            wal,
            memtables: RwLock::new(MemtablePair {
                active,
                immutable: None,
            }),
            levels: RwLock::new(levels),
            next_sequence: AtomicU64::new(max_sequence + 1),
            stats: LsmStats::default(),
        });

        let (worker_tx, worker_rx) = unbounded();
        let worker_inner = Arc::clone(&inner);
        let worker = std::thread::Builder::new()
            .name("lsm-worker".into())
            .spawn(move || worker_loop(worker_inner, worker_rx))?;

        let engine = Self {
            inner,
            worker_tx,
            worker: Arc::new(Mutex::new(Some(worker))),
        };

        // 3. An over-budget replay flushes immediately.
        if engine.inner.memtables.read().map(|g| g.active.is_full()).unwrap_or(false) {
            engine.swap_active()?;
            engine.flush_now()?;
        }

        Ok(engine)
    }

    /// Opens an engine with defaults rooted at `data_dir`.
    pub fn open_at(data_dir: impl AsRef<Path>) -> Result<Self, LsmError> {
        Self::open(LsmConfig {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..LsmConfig::default()
        })
    }

    /// Inserts one record.
    ///
    /// The WAL append must succeed before the write becomes visible. If
    /// the active memtable fills and the immutable slot is free, the
    /// memtables swap atomically and a background flush is scheduled.
    pub fn put(&self, timestamp: i64, record: Record) -> Result<(), LsmError> {
        let mut guard = self
            .inner
            .memtables
            .write()
            .map_err(|_| LsmError::Internal("RwLock poisoned".into()))?;

        self.inner.wal.append(timestamp, &record)?;
        guard.active.put(timestamp, record)?;
        self.inner.stats.puts.fetch_add(1, Ordering::Relaxed);

        if guard.active.is_full() && guard.immutable.is_none() {
            let budget = self.inner.config.memtable_budget;
            let fresh = Arc::new(Memtable::new(budget));
            guard.immutable = Some(std::mem::replace(&mut guard.active, fresh));
            drop(guard);
            let _ = self.worker_tx.send(WorkerSignal::Flush);
        }

        Ok(())
    }

    /// Inserts a batch of records, taking the memtable lock once.
    pub fn put_batch(&self, batch: Vec<(i64, Record)>) -> Result<(), LsmError> {
        let mut guard = self
            .inner
            .memtables
            .write()
            .map_err(|_| LsmError::Internal("RwLock poisoned".into()))?;

        let count = batch.len() as u64;
        for (timestamp, record) in batch {
            self.inner.wal.append(timestamp, &record)?;
            guard.active.put(timestamp, record)?;
        }
        self.inner.stats.puts.fetch_add(count, Ordering::Relaxed);

        if guard.active.is_full() && guard.immutable.is_none() {
            let budget = self.inner.config.memtable_budget;
            let fresh = Arc::new(Memtable::new(budget));
            guard.immutable = Some(std::mem::replace(&mut guard.active, fresh));
            drop(guard);
            let _ = self.worker_tx.send(WorkerSignal::Flush);
        }

        Ok(())
    }

    /// Point read, newest source first: active memtable, immutable
    /// memtable, L0 by descending sequence, then lower levels by range
    /// binary search.
    pub fn get(&self, timestamp: i64) -> Result<Option<Record>, LsmError> {
        self.inner.stats.gets.fetch_add(1, Ordering::Relaxed);

        {
            let guard = self
                .inner
                .memtables
                .read()
                .map_err(|_| LsmError::Internal("RwLock poisoned".into()))?;
            if let Some(record) = guard.active.get(timestamp)? {
                self.inner.stats.memtable_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(record));
            }
            if let Some(immutable) = &guard.immutable
                && let Some(record) = immutable.get(timestamp)?
            {
                self.inner.stats.memtable_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(record));
            }
        }

        let levels = self
            .inner
            .levels
            .read()
            .map_err(|_| LsmError::Internal("RwLock poisoned".into()))?;

        // L0 may contain overlapping ranges: search newest first.
        if let Some(l0) = levels.get(&0) {
            for table in l0.iter().rev() {
                match self.probe_table(table, timestamp)? {
                    Some(record) => return Ok(Some(record)),
                    None => continue,
                }
            }
        }

        // Levels ≥ 1 are disjoint: at most one candidate per level.
        for (_, tables) in levels.range(1..) {
            let idx = tables.partition_point(|t| t.max_timestamp() < timestamp);
            if let Some(table) = tables.get(idx)
                && table.overlaps_range(timestamp, timestamp)
                && let Some(record) = self.probe_table(table, timestamp)?
            {
                return Ok(Some(record));
            }
        }

        Ok(None)
    }

    /// Probes one table, counting bloom rejections and hits.
    fn probe_table(
        &self,
        table: &Arc<SSTable>,
        timestamp: i64,
    ) -> Result<Option<Record>, LsmError> {
        if !table.overlaps_range(timestamp, timestamp) {
            return Ok(None);
        }
        if !table.might_contain(timestamp) {
            self.inner
                .stats
                .bloom_rejections
                .fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }
        match table.get(timestamp)? {
            Some(record) => {
                self.inner.stats.sstable_hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Returns all records with timestamp in `[lo, hi]`, ascending, with
    /// duplicate timestamps resolved in favour of the newest source.
    pub fn range_query(&self, lo: i64, hi: i64) -> Result<Vec<Record>, LsmError> {
        let mut merged: BTreeMap<i64, Record> = BTreeMap::new();

        // Sources are visited newest-first; `or_insert`-style insertion
        // keeps the first (newest) record per timestamp.
        {
            let guard = self
                .inner
                .memtables
                .read()
                .map_err(|_| LsmError::Internal("RwLock poisoned".into()))?;
            for record in guard.active.range_query(lo, hi)? {
                merged.entry(record.timestamp).or_insert(record);
            }
            if let Some(immutable) = &guard.immutable {
                for record in immutable.range_query(lo, hi)? {
                    merged.entry(record.timestamp).or_insert(record);
                }
            }
        }

        let levels = self
            .inner
            .levels
            .read()
            .map_err(|_| LsmError::Internal("RwLock poisoned".into()))?;

        if let Some(l0) = levels.get(&0) {
            for table in l0.iter().rev() {
                if table.overlaps_range(lo, hi) {
                    for record in table.range_query(lo, hi)? {
                        merged.entry(record.timestamp).or_insert(record);
                    }
                }
            }
        }

        for (_, tables) in levels.range(1..) {
            for table in tables {
                if table.overlaps_range(lo, hi) {
                    for record in table.range_query(lo, hi)? {
                        merged.entry(record.timestamp).or_insert(record);
                    }
                }
            }
        }

        Ok(merged.into_values().collect())
    }

    /// Forces the active memtable into the immutable slot (flushing any
    /// previous occupant first) and flushes it to a level-0 SSTable
    /// synchronously.
    pub fn flush(&self) -> Result<(), LsmError> {
        // Drain a pending immutable memtable first.
        self.flush_now()?;
        self.swap_active()?;
        self.flush_now()
    }

    /// Runs compaction synchronously until no trigger condition holds.
    pub fn compact(&self) -> Result<(), LsmError> {
        compaction::run_until_settled(&self.inner)
    }

    /// Asks the background worker to run compaction soon.
    pub fn schedule_compaction(&self) {
        let _ = self.worker_tx.send(WorkerSignal::Compact);
    }

    /// Swaps the active memtable out (when the immutable slot is free)
    /// and asks the background worker to flush it. Never blocks the
    /// caller on I/O.
    pub fn schedule_flush(&self) {
        if self.swap_active().is_ok() {
            let _ = self.worker_tx.send(WorkerSignal::Flush);
        }
    }

    /// Removes every record and SSTable file, resetting the engine to an
    /// empty state. Destructive; intended for result-table truncation.
    pub fn clear(&self) -> Result<(), LsmError> {
        {
            let mut guard = self
                .inner
                .memtables
                .write()
                .map_err(|_| LsmError::Internal("RwLock poisoned".into()))?;
            guard.active.clear()?;
            guard.immutable = None;
            self.inner.wal.clear()?;
        }

        let mut levels = self
            .inner
            .levels
            .write()
            .map_err(|_| LsmError::Internal("RwLock poisoned".into()))?;
        for table in levels.values().flat_map(|v| v.iter()) {
            if let Err(e) = fs::remove_file(table.path()) {
                warn!(path = %table.path().display(), error = %e, "failed to remove SSTable during clear");
            }
        }
        levels.clear();
        Ok(())
    }

    /// Snapshot of all engine counters.
    pub fn stats(&self) -> LsmStatsSnapshot {
        let (sstable_count, total_bytes) = self
            .inner
            .levels
            .read()
            .map(|levels| {
                let count = levels.values().map(|v| v.len() as u64).sum();
                let bytes = levels
                    .values()
                    .flat_map(|v| v.iter())
                    .map(|t| t.file_size())
                    .sum();
                (count, bytes)
            })
            .unwrap_or((0, 0));

        let s = &self.inner.stats;
        LsmStatsSnapshot {
            puts: s.puts.load(Ordering::Relaxed),
            gets: s.gets.load(Ordering::Relaxed),
            memtable_hits: s.memtable_hits.load(Ordering::Relaxed),
            sstable_hits: s.sstable_hits.load(Ordering::Relaxed),
            bloom_rejections: s.bloom_rejections.load(Ordering::Relaxed),
            flushes: s.flushes.load(Ordering::Relaxed),
            compactions: s.compactions.load(Ordering::Relaxed),
            sstable_count,
            total_sstable_bytes: total_bytes,
        }
    }

    /// Number of SSTables at the given level.
    pub fn level_len(&self, level: u32) -> usize {
        self.inner
            .levels
            .read()
            .map(|levels| levels.get(&level).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Approximate resident bytes of the memtable pair.
    pub fn memtable_bytes(&self) -> usize {
        self.inner
            .memtables
            .read()
            .map(|g| {
                g.active.approximate_size()
                    + g.immutable.as_ref().map_or(0, |m| m.approximate_size())
            })
            .unwrap_or(0)
    }

    /// Fraction of the memtable budget currently used by the active
    /// memtable, in `[0, 1]` (may exceed 1 briefly at swap time).
    pub fn memtable_usage_ratio(&self) -> f64 {
        self.inner
            .memtables
            .read()
            .map(|g| g.active.approximate_size() as f64 / self.inner.config.memtable_budget as f64)
            .unwrap_or(0.0)
    }

    /// Gracefully shuts down: flushes outstanding data and joins the
    /// background worker.
    pub fn close(&self) -> Result<(), LsmError> {
        self.flush_now()?;
        self.swap_active()?;
        self.flush_now()?;

        let _ = self.worker_tx.send(WorkerSignal::Shutdown);
        if let Ok(mut guard) = self.worker.lock()
            && let Some(handle) = guard.take()
            && handle.join().is_err()
        {
            return Err(LsmError::Internal("LSM worker panicked".into()));
        }
        Ok(())
    }

    /// Moves a non-empty active memtable into the immutable slot.
    ///
    /// Precondition: the immutable slot is empty (callers flush first).
    fn swap_active(&self) -> Result<(), LsmError> {
        let mut guard = self
            .inner
            .memtables
            .write()
            .map_err(|_| LsmError::Internal("RwLock poisoned".into()))?;
        if guard.active.is_empty() || guard.immutable.is_some() {
            return Ok(());
        }
        let budget = self.inner.config.memtable_budget;
        let fresh = Arc::new(Memtable::new(budget));
        guard.immutable = Some(std::mem::replace(&mut guard.active, fresh));
        Ok(())
    }

    /// Flushes the immutable memtable (if any) to a level-0 SSTable.
    fn flush_now(&self) -> Result<(), LsmError> {
        flush_immutable(&self.inner)?;
        compaction::run_if_l0_full(&self.inner)
    }
}

impl Drop for LsmEngine {
    fn drop(&mut self) {
        // Last handle out shuts the worker down.
        if Arc::strong_count(&self.inner) == 1 {
            let _ = self.worker_tx.send(WorkerSignal::Shutdown);
            if let Ok(mut guard) = self.worker.lock()
                && let Some(handle) = guard.take()
            {
                let _ = handle.join();
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Background worker
// ------------------------------------------------------------------------------------------------

fn worker_loop(inner: Arc<LsmInner>, rx: Receiver<WorkerSignal>) {
    while let Ok(signal) = rx.recv() {
        match signal {
            WorkerSignal::Flush => {
                if let Err(e) = flush_immutable(&inner) {
                    error!(error = %e, "background flush failed");
                    continue;
                }
                if let Err(e) = compaction::run_if_l0_full(&inner) {
                    error!(error = %e, "background compaction failed");
                }
            }
            WorkerSignal::Compact => {
                if let Err(e) = compaction::run_until_settled(&inner) {
                    error!(error = %e, "background compaction failed");
                }
            }
            WorkerSignal::Shutdown => break,
        }
    }
    debug!("LSM worker stopped");
}

/// Flushes the immutable memtable to a new L0 SSTable, drops it, and
/// rewrites the WAL so it covers only the active memtable again.
///
/// On any error the immutable memtable is left in place and the SSTable
/// set is untouched — a failed flush is retried, never half-installed.
pub(crate) fn flush_immutable(inner: &LsmInner) -> Result<(), LsmError> {
    let immutable = {
        let guard = inner
            .memtables
            .read()
            .map_err(|_| LsmError::Internal("RwLock poisoned".into()))?;
        match &guard.immutable {
            Some(m) => Arc::clone(m),
            None => return Ok(()),
        }
    };

    let entries = immutable.iter_for_flush()?;
    if entries.is_empty() {
        let mut guard = inner
            .memtables
            .write()
            .map_err(|_| LsmError::Internal("RwLock poisoned".into()))?;
        guard.immutable = None;
        return Ok(());
    }

    let sequence = inner.next_sequence.fetch_add(1, Ordering::SeqCst);
    let path = inner.config.data_dir.join(format!("L0_{sequence}.sst"));
    let table = sstable::build_from_entries(
        &path,
        &entries,
        0,
        sequence,
        inner.config.bloom_bits_per_key,
    )?;

    {
        let mut levels = inner
            .levels
            .write()
            .map_err(|_| LsmError::Internal("RwLock poisoned".into()))?;
        levels.entry(0).or_default().push(Arc::new(table));
    }

    // Drop the immutable memtable and rewrite the WAL. The log is shared
    // by both memtables, so truncation must re-append whatever is still
    // buffered in the active one.
    {
        let mut guard = inner
            .memtables
            .write()
            .map_err(|_| LsmError::Internal("RwLock poisoned".into()))?;
        guard.immutable = None;
        inner.wal.clear()?;
        for (timestamp, record) in guard.active.iter_for_flush()? {
            inner.wal.append(timestamp, &record)?;
        }
    }

    inner.stats.flushes.fetch_add(1, Ordering::Relaxed);
    info!(sequence, entries = entries.len(), "memtable flushed to L0");
    Ok(())
}

/// Parses `L{level}_{sequence}.sst` filenames.
fn parse_sstable_filename(path: &Path) -> Option<(u32, u64)> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".sst")?;
    let rest = stem.strip_prefix('L')?;
    let (level_str, seq_str) = rest.split_once('_')?;
    Some((level_str.parse().ok()?, seq_str.parse().ok()?))
}
