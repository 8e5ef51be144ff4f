//! Stream table — the append-optimized ingest surface of the database.
//!
//! A stream table stores the records of one logical event stream in its
//! own LSM engine and layers three things on top:
//!
//! - **Tag inverted indices** for the tags named in `indexed_tags`
//!   (`tag_key → tag_value → timestamps`), merged with LSM range results
//!   at query time.
//! - **Insert listeners** — the window scheduler registers a callback and
//!   receives `(table_name, timestamp, count)` on every insert.
//! - **Window registrations** — the scheduler publishes
//!   `window_id → time range` so [`StreamTable::query_window`] can
//!   resolve a window id to a range query.
//!
//! # Flush policy
//!
//! When the active memtable crosses `flush_threshold` (default 0.9) of
//! its budget, flush work is routed through the attached
//! [`ResourceHandle`](crate::resource::ResourceHandle) when one is set,
//! and otherwise through the engine's own background worker. Writers
//! never block on a flush.
//!
//! # Concurrency
//!
//! Index and listener registries sit behind reader-writer locks. The LSM
//! engine has its own synchronization; no stream-table lock is held
//! across engine I/O.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::Path,
    sync::{Arc, RwLock},
};

use tracing::{debug, info};

use super::TableError;
use crate::lsm::{LsmConfig, LsmEngine};
use crate::record::{Record, TimeRange};
use crate::resource::ResourceHandle;

/// Default fraction of the memtable budget that triggers a flush.
pub const DEFAULT_FLUSH_THRESHOLD: f64 = 0.9;

/// Callback invoked after every successful insert:
/// `(table_name, timestamp, inserted_count)`.
pub type InsertListener = Arc<dyn Fn(&str, i64, usize) + Send + Sync>;

/// An append-optimized table over one event stream.
pub struct StreamTable {
    name: String,
    engine: LsmEngine,
    flush_threshold: f64,
    indexed_tags: RwLock<BTreeSet<String>>,
    /// `tag_key → tag_value → timestamps carrying that pair`.
    tag_index: RwLock<HashMap<String, HashMap<String, BTreeSet<i64>>>>,
    listeners: RwLock<Vec<InsertListener>>,
    windows: RwLock<HashMap<u64, TimeRange>>,
    resource_handle: RwLock<Option<Arc<ResourceHandle>>>,
}

impl StreamTable {
    /// Opens (or creates) a stream table rooted at
    /// `data_dir/<name>`, indexing the given tag keys.
    pub fn open(
        name: impl Into<String>,
        data_dir: impl AsRef<Path>,
        indexed_tags: Vec<String>,
    ) -> Result<Self, TableError> {
        let name = name.into();
        let engine = LsmEngine::open(LsmConfig {
            data_dir: data_dir.as_ref().join(&name),
            ..LsmConfig::default()
        })?;

        let table = Self {
            name: name.clone(),
            engine,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            indexed_tags: RwLock::new(indexed_tags.into_iter().collect()),
            tag_index: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            windows: RwLock::new(HashMap::new()),
            resource_handle: RwLock::new(None),
        };
        table.rebuild_tag_indices()?;

        info!(table = %name, "stream table opened");
        Ok(table)
    }

    /// Opens a stream table with an explicit LSM configuration.
    pub fn open_with_config(
        name: impl Into<String>,
        config: LsmConfig,
        indexed_tags: Vec<String>,
    ) -> Result<Self, TableError> {
        let name = name.into();
        let engine = LsmEngine::open(config)?;
        let table = Self {
            name,
            engine,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            indexed_tags: RwLock::new(indexed_tags.into_iter().collect()),
            tag_index: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            windows: RwLock::new(HashMap::new()),
            resource_handle: RwLock::new(None),
        };
        table.rebuild_tag_indices()?;
        Ok(table)
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inserts one record.
    pub fn insert(&self, record: Record) -> Result<(), TableError> {
        let timestamp = record.timestamp;
        self.index_record(&record);
        self.engine.put(timestamp, record)?;
        self.notify(timestamp, 1);
        self.maybe_schedule_flush();
        Ok(())
    }

    /// Inserts a batch, taking the engine's write lock once.
    pub fn insert_batch(&self, records: Vec<Record>) -> Result<(), TableError> {
        if records.is_empty() {
            return Ok(());
        }
        let count = records.len();
        let last_ts = records[records.len() - 1].timestamp;
        for record in &records {
            self.index_record(record);
        }
        self.engine
            .put_batch(records.into_iter().map(|r| (r.timestamp, r)).collect())?;
        self.notify(last_ts, count);
        self.maybe_schedule_flush();
        Ok(())
    }

    /// Queries the half-open `range`, optionally filtered by tag pairs.
    ///
    /// Results are ascending by timestamp with one record per timestamp.
    /// When every filter key is indexed, the tag index narrows the
    /// candidate set before records are matched.
    pub fn query(
        &self,
        range: TimeRange,
        tag_filter: &BTreeMap<String, String>,
    ) -> Result<Vec<Record>, TableError> {
        if !range.is_valid() {
            return Ok(Vec::new());
        }

        let mut records = self
            .engine
            .range_query(range.start, range.end.saturating_sub(1))?;

        if tag_filter.is_empty() {
            return Ok(records);
        }

        let candidates = self.tag_candidates(tag_filter);
        match candidates {
            Some(candidates) => {
                records.retain(|r| candidates.contains(&r.timestamp) && r.matches_tags(tag_filter));
            }
            None => records.retain(|r| r.matches_tags(tag_filter)),
        }
        Ok(records)
    }

    /// Queries the range registered for `window_id`.
    pub fn query_window(&self, window_id: u64) -> Result<Vec<Record>, TableError> {
        let range = self
            .windows
            .read()
            .ok()
            .and_then(|g| g.get(&window_id).copied())
            .ok_or(TableError::WindowNotFound(window_id))?;
        self.query(range, &BTreeMap::new())
    }

    /// Registers (or replaces) a window id → range mapping. Called by
    /// the window scheduler when it opens a window over this table.
    pub fn register_window(&self, window_id: u64, range: TimeRange) {
        if let Ok(mut guard) = self.windows.write() {
            guard.insert(window_id, range);
        }
    }

    /// Returns the `n` records with the highest timestamps, descending.
    pub fn query_latest(&self, n: usize) -> Result<Vec<Record>, TableError> {
        let mut all = self.engine.range_query(i64::MIN, i64::MAX)?;
        let keep = all.len().saturating_sub(n);
        let mut latest: Vec<Record> = all.drain(keep..).collect();
        latest.reverse();
        Ok(latest)
    }

    /// Counts records in the half-open `range` without applying filters.
    pub fn count(&self, range: TimeRange) -> Result<usize, TableError> {
        if !range.is_valid() {
            return Ok(0);
        }
        Ok(self
            .engine
            .range_query(range.start, range.end.saturating_sub(1))?
            .len())
    }

    /// Starts indexing `field`, rebuilding its index from stored data.
    pub fn create_index(&self, field: &str) -> Result<(), TableError> {
        {
            let mut guard = self
                .indexed_tags
                .write()
                .map_err(|_| TableError::Internal("RwLock poisoned".into()))?;
            if !guard.insert(field.to_string()) {
                return Ok(());
            }
        }
        self.rebuild_tag_indices()
    }

    /// Stops indexing `field` and drops its index.
    pub fn drop_index(&self, field: &str) -> Result<(), TableError> {
        if let Ok(mut guard) = self.indexed_tags.write() {
            guard.remove(field);
        }
        if let Ok(mut guard) = self.tag_index.write() {
            guard.remove(field);
        }
        Ok(())
    }

    /// Currently indexed tag keys.
    pub fn list_indices(&self) -> Vec<String> {
        self.indexed_tags
            .read()
            .map(|g| g.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Registers an insert listener.
    pub fn add_listener(&self, listener: InsertListener) {
        if let Ok(mut guard) = self.listeners.write() {
            guard.push(listener);
        }
    }

    /// Routes future flush work through the given resource handle.
    pub fn attach_resource_handle(&self, handle: Arc<ResourceHandle>) {
        if let Ok(mut guard) = self.resource_handle.write() {
            *guard = Some(handle);
        }
    }

    /// Forces an immediate memtable → L0 flush.
    pub fn flush(&self) -> Result<(), TableError> {
        self.engine.flush()?;
        Ok(())
    }

    /// Triggers compaction synchronously.
    pub fn compact(&self) -> Result<(), TableError> {
        self.engine.compact()?;
        Ok(())
    }

    /// Approximate resident bytes of the table's memtables.
    pub fn resident_bytes(&self) -> usize {
        self.engine.memtable_bytes()
    }

    /// Swaps and flushes in the background without blocking the caller.
    pub fn schedule_flush(&self) {
        self.engine.schedule_flush();
    }

    /// Flushes outstanding data and shuts the engine down.
    pub fn close(&self) -> Result<(), TableError> {
        self.engine.close()?;
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    /// Adds the record's indexed tags to the inverted index.
    fn index_record(&self, record: &Record) {
        let indexed = match self.indexed_tags.read() {
            Ok(g) => g,
            Err(_) => return,
        };
        if indexed.is_empty() {
            return;
        }
        if let Ok(mut index) = self.tag_index.write() {
            for (key, value) in &record.tags {
                if indexed.contains(key) {
                    index
                        .entry(key.clone())
                        .or_default()
                        .entry(value.clone())
                        .or_default()
                        .insert(record.timestamp);
                }
            }
        }
    }

    /// Full index rebuild from stored data; used on open and
    /// `create_index`.
    fn rebuild_tag_indices(&self) -> Result<(), TableError> {
        let indexed = self
            .indexed_tags
            .read()
            .map_err(|_| TableError::Internal("RwLock poisoned".into()))?
            .clone();
        if indexed.is_empty() {
            return Ok(());
        }

        let records = self.engine.range_query(i64::MIN, i64::MAX)?;
        let mut fresh: HashMap<String, HashMap<String, BTreeSet<i64>>> = HashMap::new();
        for record in &records {
            for (key, value) in &record.tags {
                if indexed.contains(key) {
                    fresh
                        .entry(key.clone())
                        .or_default()
                        .entry(value.clone())
                        .or_default()
                        .insert(record.timestamp);
                }
            }
        }

        let mut guard = self
            .tag_index
            .write()
            .map_err(|_| TableError::Internal("RwLock poisoned".into()))?;
        *guard = fresh;
        debug!(table = %self.name, indexed = indexed.len(), "tag indices rebuilt");
        Ok(())
    }

    /// Intersected candidate timestamps when every filter key is
    /// indexed; `None` means at least one key is unindexed and the
    /// caller must fall back to record-level matching.
    fn tag_candidates(&self, filter: &BTreeMap<String, String>) -> Option<BTreeSet<i64>> {
        let indexed = self.indexed_tags.read().ok()?;
        if !filter.keys().all(|k| indexed.contains(k)) {
            return None;
        }
        drop(indexed);

        let index = self.tag_index.read().ok()?;
        let mut result: Option<BTreeSet<i64>> = None;
        for (key, value) in filter {
            let set = index
                .get(key)
                .and_then(|values| values.get(value))
                .cloned()
                .unwrap_or_default();
            result = Some(match result {
                None => set,
                Some(prev) => prev.intersection(&set).copied().collect(),
            });
            if result.as_ref().is_some_and(BTreeSet::is_empty) {
                break;
            }
        }
        result
    }

    /// Fires every registered listener.
    fn notify(&self, timestamp: i64, count: usize) {
        if let Ok(listeners) = self.listeners.read() {
            for listener in listeners.iter() {
                listener(&self.name, timestamp, count);
            }
        }
    }

    /// Routes flush work through the resource handle when attached,
    /// otherwise through the engine's own background worker. Either way
    /// the inserting thread does not wait for I/O.
    fn maybe_schedule_flush(&self) {
        if self.engine.memtable_usage_ratio() < self.flush_threshold {
            return;
        }
        let handle = self
            .resource_handle
            .read()
            .ok()
            .and_then(|g| g.clone());
        match handle {
            Some(handle) if handle.is_valid() => {
                let engine = self.engine.clone();
                let submitted = handle.submit_task(move || {
                    engine.schedule_flush();
                });
                if !submitted {
                    self.engine.schedule_flush();
                }
            }
            _ => self.engine.schedule_flush(),
        }
    }
}
