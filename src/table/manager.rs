//! Table manager — a namespace of named tables of distinct kinds.
//!
//! The manager owns every table in the database and is the root of the
//! ownership graph: stream tables hold weak, name-based references to
//! their listeners, and the compute subsystem borrows table handles from
//! here rather than owning them.
//!
//! # Memory-limit enforcement
//!
//! After each insert the manager sums the resident memtable bytes across
//! all stream-backed tables; while the total exceeds the configured
//! limit, flushes are scheduled round-robin (a rotating cursor picks the
//! next table each time) until usage subsides. Scheduling is
//! non-blocking — the flushes run on the engines' background workers.

use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
    sync::{Arc, Mutex, RwLock},
};

use tracing::{debug, info};

use super::{
    TableError,
    results::JoinResultTable,
    state::{CHECKPOINT_TABLE, ComputeStateStore, STATE_TABLE},
    stream::StreamTable,
};
use crate::record::{Aggregation, QueryConfig, Record, TimeRange};
use crate::tsindex::TimeSeriesIndex;

/// Default cumulative memtable budget across tables (256 MiB).
pub const DEFAULT_MEMORY_LIMIT: u64 = 256 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Kinds and entries
// ------------------------------------------------------------------------------------------------

/// The kind of a named table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// Archival append-then-sort index, in memory.
    TimeSeries,
    /// Append-optimized LSM-backed event stream.
    Stream,
    /// Window-keyed join results.
    JoinResult,
    /// Internal compute-state storage.
    ComputeState,
}

enum TableEntry {
    TimeSeries(Arc<TimeSeriesIndex>),
    Stream(Arc<StreamTable>),
    JoinResult(Arc<JoinResultTable>),
    /// Compute-state tables are stream tables underneath; the kind is
    /// tracked so they are listed and routed separately.
    ComputeState(Arc<StreamTable>),
}

impl TableEntry {
    fn kind(&self) -> TableKind {
        match self {
            TableEntry::TimeSeries(_) => TableKind::TimeSeries,
            TableEntry::Stream(_) => TableKind::Stream,
            TableEntry::JoinResult(_) => TableKind::JoinResult,
            TableEntry::ComputeState(_) => TableKind::ComputeState,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for a [`TableManager`].
#[derive(Debug, Clone)]
pub struct TableManagerConfig {
    /// Root directory; each table gets a subdirectory.
    pub data_dir: PathBuf,

    /// Cumulative memtable byte limit across all tables.
    pub memory_limit_bytes: u64,
}

impl Default for TableManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./sage_tsdb_tables"),
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TableManager
// ------------------------------------------------------------------------------------------------

/// The multi-table database: named tables, batch operations, memory
/// enforcement.
pub struct TableManager {
    config: TableManagerConfig,
    tables: RwLock<HashMap<String, TableEntry>>,
    /// Round-robin cursor for memory-pressure flush scheduling.
    flush_cursor: Mutex<usize>,
}

impl TableManager {
    /// Creates a manager rooted at the configured data directory.
    pub fn new(config: TableManagerConfig) -> Self {
        Self {
            config,
            tables: RwLock::new(HashMap::new()),
            flush_cursor: Mutex::new(0),
        }
    }

    /// Creates a table of the given kind. Fails if the name is taken.
    pub fn create_table(&self, name: &str, kind: TableKind) -> Result<(), TableError> {
        self.create_table_indexed(name, kind, Vec::new())
    }

    /// Creates a stream table with the given indexed tag keys.
    pub fn create_table_indexed(
        &self,
        name: &str,
        kind: TableKind,
        indexed_tags: Vec<String>,
    ) -> Result<(), TableError> {
        {
            let tables = self
                .tables
                .read()
                .map_err(|_| TableError::Internal("RwLock poisoned".into()))?;
            if tables.contains_key(name) {
                return Err(TableError::DuplicateTable(name.to_string()));
            }
        }

        let entry = match kind {
            TableKind::TimeSeries => TableEntry::TimeSeries(Arc::new(TimeSeriesIndex::new())),
            TableKind::Stream => TableEntry::Stream(Arc::new(StreamTable::open(
                name,
                &self.config.data_dir,
                indexed_tags,
            )?)),
            TableKind::JoinResult => TableEntry::JoinResult(Arc::new(JoinResultTable::open(
                name,
                &self.config.data_dir,
            )?)),
            TableKind::ComputeState => TableEntry::ComputeState(Arc::new(StreamTable::open(
                name,
                &self.config.data_dir,
                Vec::new(),
            )?)),
        };

        let mut tables = self
            .tables
            .write()
            .map_err(|_| TableError::Internal("RwLock poisoned".into()))?;
        if tables.contains_key(name) {
            return Err(TableError::DuplicateTable(name.to_string()));
        }
        tables.insert(name.to_string(), entry);
        info!(table = name, ?kind, "table created");
        Ok(())
    }

    /// Removes a table from the namespace.
    pub fn drop_table(&self, name: &str) -> Result<(), TableError> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| TableError::Internal("RwLock poisoned".into()))?;
        tables
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| TableError::UnknownTable(name.to_string()))
    }

    /// Whether a table exists under this name.
    pub fn has_table(&self, name: &str) -> bool {
        self.tables
            .read()
            .map(|t| t.contains_key(name))
            .unwrap_or(false)
    }

    /// Names and kinds of every table, sorted by name.
    pub fn list_tables(&self) -> Vec<(String, TableKind)> {
        let mut out: Vec<(String, TableKind)> = self
            .tables
            .read()
            .map(|tables| {
                tables
                    .iter()
                    .map(|(name, entry)| (name.clone(), entry.kind()))
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Typed handle to a stream table.
    pub fn get_stream_table(&self, name: &str) -> Result<Arc<StreamTable>, TableError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| TableError::Internal("RwLock poisoned".into()))?;
        match tables.get(name) {
            Some(TableEntry::Stream(table)) => Ok(Arc::clone(table)),
            Some(_) => Err(TableError::WrongTableKind {
                name: name.to_string(),
                expected: "stream",
            }),
            None => Err(TableError::UnknownTable(name.to_string())),
        }
    }

    /// Typed handle to a join-result table.
    pub fn get_join_result_table(&self, name: &str) -> Result<Arc<JoinResultTable>, TableError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| TableError::Internal("RwLock poisoned".into()))?;
        match tables.get(name) {
            Some(TableEntry::JoinResult(table)) => Ok(Arc::clone(table)),
            Some(_) => Err(TableError::WrongTableKind {
                name: name.to_string(),
                expected: "join-result",
            }),
            None => Err(TableError::UnknownTable(name.to_string())),
        }
    }

    /// Typed handle to a time-series index table.
    pub fn get_time_series(&self, name: &str) -> Result<Arc<TimeSeriesIndex>, TableError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| TableError::Internal("RwLock poisoned".into()))?;
        match tables.get(name) {
            Some(TableEntry::TimeSeries(index)) => Ok(Arc::clone(index)),
            Some(_) => Err(TableError::WrongTableKind {
                name: name.to_string(),
                expected: "time-series",
            }),
            None => Err(TableError::UnknownTable(name.to_string())),
        }
    }

    /// Opens a [`ComputeStateStore`] over this manager's internal state
    /// tables, creating them on first use.
    pub fn compute_state_store(&self) -> Result<ComputeStateStore, TableError> {
        for name in [STATE_TABLE, CHECKPOINT_TABLE] {
            if !self.has_table(name) {
                self.create_table(name, TableKind::ComputeState)?;
            }
        }
        let state = self.state_backed_table(STATE_TABLE)?;
        let checkpoint = self.state_backed_table(CHECKPOINT_TABLE)?;
        Ok(ComputeStateStore::with_tables(state, checkpoint))
    }

    fn state_backed_table(&self, name: &str) -> Result<Arc<StreamTable>, TableError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| TableError::Internal("RwLock poisoned".into()))?;
        match tables.get(name) {
            Some(TableEntry::ComputeState(table)) => Ok(Arc::clone(table)),
            Some(_) => Err(TableError::WrongTableKind {
                name: name.to_string(),
                expected: "compute-state",
            }),
            None => Err(TableError::UnknownTable(name.to_string())),
        }
    }

    /// Inserts a record into a named table.
    ///
    /// Join-result tables take typed rows through
    /// [`TableManager::get_join_result_table`], not raw records.
    pub fn insert(&self, name: &str, record: Record) -> Result<(), TableError> {
        {
            let tables = self
                .tables
                .read()
                .map_err(|_| TableError::Internal("RwLock poisoned".into()))?;
            match tables.get(name) {
                Some(TableEntry::TimeSeries(index)) => index.add(record),
                Some(TableEntry::Stream(table)) | Some(TableEntry::ComputeState(table)) => {
                    table.insert(record)?
                }
                Some(TableEntry::JoinResult(_)) => {
                    return Err(TableError::WrongTableKind {
                        name: name.to_string(),
                        expected: "record-bearing",
                    });
                }
                None => return Err(TableError::UnknownTable(name.to_string())),
            }
        }
        self.enforce_memory_limit();
        Ok(())
    }

    /// Inserts a batch into a named table.
    pub fn insert_batch(&self, name: &str, records: Vec<Record>) -> Result<usize, TableError> {
        let count = records.len();
        {
            let tables = self
                .tables
                .read()
                .map_err(|_| TableError::Internal("RwLock poisoned".into()))?;
            match tables.get(name) {
                Some(TableEntry::TimeSeries(index)) => index.add_batch(records),
                Some(TableEntry::Stream(table)) | Some(TableEntry::ComputeState(table)) => {
                    table.insert_batch(records)?
                }
                Some(TableEntry::JoinResult(_)) => {
                    return Err(TableError::WrongTableKind {
                        name: name.to_string(),
                        expected: "record-bearing",
                    });
                }
                None => return Err(TableError::UnknownTable(name.to_string())),
            }
        }
        self.enforce_memory_limit();
        Ok(count)
    }

    /// Range + tag query against a named table.
    pub fn query_range(
        &self,
        name: &str,
        range: TimeRange,
        tag_filter: &BTreeMap<String, String>,
    ) -> Result<Vec<Record>, TableError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| TableError::Internal("RwLock poisoned".into()))?;
        match tables.get(name) {
            Some(TableEntry::TimeSeries(index)) => Ok(index.query(range, tag_filter)),
            Some(TableEntry::Stream(table)) | Some(TableEntry::ComputeState(table)) => {
                table.query(range, tag_filter)
            }
            Some(TableEntry::JoinResult(_)) => Err(TableError::WrongTableKind {
                name: name.to_string(),
                expected: "record-bearing",
            }),
            None => Err(TableError::UnknownTable(name.to_string())),
        }
    }

    /// Full [`QueryConfig`] query: range + tags + limit.
    pub fn query(&self, name: &str, config: &QueryConfig) -> Result<Vec<Record>, TableError> {
        let mut records = self.query_range(name, config.range, &config.tag_filter)?;
        if let Some(limit) = config.limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    /// Aggregated query: applies `config.aggregation` over the scalar
    /// projections of the matching records.
    pub fn query_aggregate(&self, name: &str, config: &QueryConfig) -> Result<f64, TableError> {
        let records = self.query(name, config)?;
        let values: Vec<f64> = records.iter().map(Record::scalar_value).collect();
        Ok(config.aggregation.apply(&values))
    }

    /// Windowed aggregation: buckets matching records into fixed windows
    /// of `config.window_size_ms` and aggregates each bucket.
    /// Returns `(window_start, aggregate)` pairs in ascending order.
    pub fn query_windowed_aggregate(
        &self,
        name: &str,
        config: &QueryConfig,
    ) -> Result<Vec<(i64, f64)>, TableError> {
        let window = config.window_size_ms.unwrap_or(0);
        if window <= 0 {
            let value = self.query_aggregate(name, config)?;
            return Ok(vec![(config.range.start, value)]);
        }

        let records = self.query(name, config)?;
        let mut buckets: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
        for record in &records {
            let bucket = record.timestamp.div_euclid(window) * window;
            buckets.entry(bucket).or_default().push(record.scalar_value());
        }

        let aggregation = if config.aggregation == Aggregation::None {
            Aggregation::Avg
        } else {
            config.aggregation
        };
        Ok(buckets
            .into_iter()
            .map(|(start, values)| (start, aggregation.apply(&values)))
            .collect())
    }

    /// Batch multi-table insert: `name → batch`, returns `name → count`.
    pub fn multi_insert(
        &self,
        batches: BTreeMap<String, Vec<Record>>,
    ) -> Result<BTreeMap<String, usize>, TableError> {
        let mut out = BTreeMap::new();
        for (name, batch) in batches {
            let count = self.insert_batch(&name, batch)?;
            out.insert(name, count);
        }
        Ok(out)
    }

    /// Batch multi-table query: `name → range`, returns `name → records`.
    pub fn multi_query(
        &self,
        ranges: BTreeMap<String, TimeRange>,
    ) -> Result<BTreeMap<String, Vec<Record>>, TableError> {
        let mut out = BTreeMap::new();
        let empty = BTreeMap::new();
        for (name, range) in ranges {
            let records = self.query_range(&name, range, &empty)?;
            out.insert(name, records);
        }
        Ok(out)
    }

    /// Convenience constructor for the standard windowed-join trio:
    /// `{prefix}stream_s`, `{prefix}stream_r`, `{prefix}join_results`.
    pub fn create_pecj_tables(&self, prefix: &str) -> Result<(), TableError> {
        self.create_table(&format!("{prefix}stream_s"), TableKind::Stream)?;
        self.create_table(&format!("{prefix}stream_r"), TableKind::Stream)?;
        self.create_table(&format!("{prefix}join_results"), TableKind::JoinResult)?;
        Ok(())
    }

    /// Cumulative resident memtable bytes across LSM-backed tables.
    pub fn resident_bytes(&self) -> u64 {
        self.tables
            .read()
            .map(|tables| {
                tables
                    .values()
                    .map(|entry| match entry {
                        TableEntry::Stream(t) | TableEntry::ComputeState(t) => {
                            t.resident_bytes() as u64
                        }
                        _ => 0,
                    })
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Schedules round-robin flushes while cumulative usage exceeds the
    /// configured limit. Non-blocking.
    fn enforce_memory_limit(&self) {
        if self.resident_bytes() <= self.config.memory_limit_bytes {
            return;
        }

        let stream_tables: Vec<Arc<StreamTable>> = self
            .tables
            .read()
            .map(|tables| {
                let mut out: Vec<(String, Arc<StreamTable>)> = tables
                    .iter()
                    .filter_map(|(name, entry)| match entry {
                        TableEntry::Stream(t) | TableEntry::ComputeState(t) => {
                            Some((name.clone(), Arc::clone(t)))
                        }
                        _ => None,
                    })
                    .collect();
                out.sort_by(|a, b| a.0.cmp(&b.0));
                out.into_iter().map(|(_, t)| t).collect()
            })
            .unwrap_or_default();
        if stream_tables.is_empty() {
            return;
        }

        let mut cursor = self.flush_cursor.lock().map(|g| *g).unwrap_or(0);
        for _ in 0..stream_tables.len() {
            let table = &stream_tables[cursor % stream_tables.len()];
            cursor += 1;
            table.schedule_flush();
            debug!(table = table.name(), "memory-pressure flush scheduled");
            if self.resident_bytes() <= self.config.memory_limit_bytes {
                break;
            }
        }
        if let Ok(mut guard) = self.flush_cursor.lock() {
            *guard = cursor % stream_tables.len();
        }
    }
}
