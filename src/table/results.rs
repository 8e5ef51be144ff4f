//! Join-result table — window-keyed aggregates and opaque payload blobs.
//!
//! Each row describes the outcome of one windowed join: exact or
//! approximate match counts, selectivity, execution metrics, and a
//! serialized list of the joined record pairs. Rows are keyed by
//! `window_id`; re-computing a window overwrites its row, so the steady
//! state holds at most one row per window.
//!
//! Rows are stored in the table's LSM engine keyed by window id, with
//! the encoded row carried in a record field. The payload blob has its
//! own wire format (`[u32 pair_count][record pair]…`) exposed through
//! [`serialize_payload`] / [`deserialize_payload`] so downstream readers
//! can unpack joined pairs without knowing the row layout.

use std::{
    collections::BTreeMap,
    path::Path,
    sync::RwLock,
};

use tracing::{debug, info};

use super::{TableError, hex_decode, hex_encode};
use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::lsm::{LsmConfig, LsmEngine};
use crate::record::{Record, TimeRange, Value};

/// Field key carrying the encoded row inside a stored record.
const ROW_FIELD: &str = "row";

// ------------------------------------------------------------------------------------------------
// Row type
// ------------------------------------------------------------------------------------------------

/// One windowed-join outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinResultRecord {
    /// Window this row describes; the table's primary key.
    pub window_id: u64,

    /// Window end timestamp.
    pub timestamp: i64,

    /// Number of matched pairs (exact count, or 0 when AQP-only).
    pub join_count: u64,

    /// Approximate estimate; `NaN` when AQP was not used.
    pub aqp_estimate: f64,

    /// `join_count / (|S| × |R|)`, 0 when either input is empty.
    pub selectivity: f64,

    /// Serialized joined pairs ([`serialize_payload`] format).
    pub payload: Vec<u8>,

    /// Wall-clock computation time in milliseconds.
    pub compute_time_ms: u64,

    /// Peak memory attributed to the computation.
    pub memory_used_bytes: u64,

    /// Worker threads used.
    pub threads_used: u32,

    /// CPU utilisation during the computation, percent.
    pub cpu_percent: f64,

    /// Whether the result came from the AQP path.
    pub used_aqp: bool,

    /// Operator tag that produced the row (e.g. `"IAWJ"`).
    pub algorithm: String,

    /// Free-form annotations.
    pub tags: BTreeMap<String, String>,

    /// Failure detail when the window completed with an error.
    pub error_message: String,
}

impl JoinResultRecord {
    /// Creates an empty successful row for a window.
    pub fn new(window_id: u64, timestamp: i64) -> Self {
        Self {
            window_id,
            timestamp,
            join_count: 0,
            aqp_estimate: f64::NAN,
            selectivity: 0.0,
            payload: Vec::new(),
            compute_time_ms: 0,
            memory_used_bytes: 0,
            threads_used: 0,
            cpu_percent: 0.0,
            used_aqp: false,
            algorithm: String::new(),
            tags: BTreeMap::new(),
            error_message: String::new(),
        }
    }

    /// True when the AQP estimate field is populated.
    pub fn has_aqp_estimate(&self) -> bool {
        !self.aqp_estimate.is_nan()
    }
}

impl Encode for JoinResultRecord {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.window_id.encode_to(buf)?;
        self.timestamp.encode_to(buf)?;
        self.join_count.encode_to(buf)?;
        self.aqp_estimate.encode_to(buf)?;
        self.selectivity.encode_to(buf)?;
        self.payload.encode_to(buf)?;
        self.compute_time_ms.encode_to(buf)?;
        self.memory_used_bytes.encode_to(buf)?;
        self.threads_used.encode_to(buf)?;
        self.cpu_percent.encode_to(buf)?;
        self.used_aqp.encode_to(buf)?;
        self.algorithm.encode_to(buf)?;
        encoding::encode_string_map(&self.tags, buf)?;
        self.error_message.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for JoinResultRecord {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (window_id, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (timestamp, n) = i64::decode_from(&buf[offset..])?;
        offset += n;
        let (join_count, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (aqp_estimate, n) = f64::decode_from(&buf[offset..])?;
        offset += n;
        let (selectivity, n) = f64::decode_from(&buf[offset..])?;
        offset += n;
        let (payload, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        let (compute_time_ms, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (memory_used_bytes, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (threads_used, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        let (cpu_percent, n) = f64::decode_from(&buf[offset..])?;
        offset += n;
        let (used_aqp, n) = bool::decode_from(&buf[offset..])?;
        offset += n;
        let (algorithm, n) = String::decode_from(&buf[offset..])?;
        offset += n;
        let (tags, n) = encoding::decode_string_map(&buf[offset..])?;
        offset += n;
        let (error_message, n) = String::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                window_id,
                timestamp,
                join_count,
                aqp_estimate,
                selectivity,
                payload,
                compute_time_ms,
                memory_used_bytes,
                threads_used,
                cpu_percent,
                used_aqp,
                algorithm,
                tags,
                error_message,
            },
            offset,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Payload codec
// ------------------------------------------------------------------------------------------------

/// Serializes joined pairs as `[u32 pair_count][s record][r record]…`.
pub fn serialize_payload(pairs: &[(Record, Record)]) -> Result<Vec<u8>, TableError> {
    let mut buf = Vec::new();
    (pairs.len() as u32).encode_to(&mut buf)?;
    for (s, r) in pairs {
        s.encode_to(&mut buf)?;
        r.encode_to(&mut buf)?;
    }
    Ok(buf)
}

/// Inverse of [`serialize_payload`]; decode failures surface the byte
/// offset at which decoding stopped.
pub fn deserialize_payload(bytes: &[u8]) -> Result<Vec<(Record, Record)>, TableError> {
    let (count, mut offset) =
        u32::decode_from(bytes).map_err(|e| TableError::CorruptRow {
            offset: 0,
            reason: e.to_string(),
        })?;

    let mut pairs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (s, n) = Record::decode_from(&bytes[offset..]).map_err(|e| TableError::CorruptRow {
            offset,
            reason: e.to_string(),
        })?;
        offset += n;
        let (r, n) = Record::decode_from(&bytes[offset..]).map_err(|e| TableError::CorruptRow {
            offset,
            reason: e.to_string(),
        })?;
        offset += n;
        pairs.push((s, r));
    }
    Ok(pairs)
}

// ------------------------------------------------------------------------------------------------
// Aggregate statistics
// ------------------------------------------------------------------------------------------------

/// Aggregates over a set of result rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateStats {
    pub total_windows: u64,
    pub total_joins: u64,
    pub avg_join_count: f64,
    pub avg_compute_ms: f64,
    pub avg_selectivity: f64,
    pub aqp_usage_count: u64,
    pub error_count: u64,
}

// ------------------------------------------------------------------------------------------------
// Table
// ------------------------------------------------------------------------------------------------

/// A join-result table: a thin LSM wrapper specialized for result rows.
pub struct JoinResultTable {
    name: String,
    engine: LsmEngine,
    /// Cached aggregate stats; invalidated on every write. Call
    /// [`JoinResultTable::refresh_stats`] for deterministic reads.
    stats_cache: RwLock<Option<AggregateStats>>,
    /// Window ids with stored rows, maintained by
    /// [`JoinResultTable::create_window_index`].
    window_index: RwLock<Option<std::collections::HashSet<u64>>>,
}

impl JoinResultTable {
    /// Opens (or creates) a result table rooted at `data_dir/<name>`.
    pub fn open(
        name: impl Into<String>,
        data_dir: impl AsRef<Path>,
    ) -> Result<Self, TableError> {
        let name = name.into();
        let engine = LsmEngine::open(LsmConfig {
            data_dir: data_dir.as_ref().join(&name),
            ..LsmConfig::default()
        })?;
        info!(table = %name, "join-result table opened");
        Ok(Self {
            name,
            engine,
            stats_cache: RwLock::new(None),
            window_index: RwLock::new(None),
        })
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inserts (or overwrites) the row for its window id.
    pub fn insert(&self, row: JoinResultRecord) -> Result<(), TableError> {
        let window_id = row.window_id;
        let record = Self::row_to_record(&row)?;
        self.engine.put(window_id as i64, record)?;

        if let Ok(mut cache) = self.stats_cache.write() {
            *cache = None;
        }
        if let Ok(mut index) = self.window_index.write()
            && let Some(set) = index.as_mut()
        {
            set.insert(window_id);
        }
        debug!(table = %self.name, window_id, "result row inserted");
        Ok(())
    }

    /// Inserts a batch of rows.
    pub fn insert_batch(&self, rows: Vec<JoinResultRecord>) -> Result<(), TableError> {
        for row in rows {
            self.insert(row)?;
        }
        Ok(())
    }

    /// Returns the row for `window_id`, if present.
    pub fn query_by_window(&self, window_id: u64) -> Result<Option<JoinResultRecord>, TableError> {
        if let Ok(index) = self.window_index.read()
            && let Some(set) = index.as_ref()
            && !set.contains(&window_id)
        {
            return Ok(None);
        }
        match self.engine.get(window_id as i64)? {
            Some(record) => Ok(Some(Self::record_to_row(&record)?)),
            None => Ok(None),
        }
    }

    /// Rows whose window-end timestamp falls in the half-open `range`,
    /// ascending by window id.
    pub fn query_by_time_range(&self, range: TimeRange) -> Result<Vec<JoinResultRecord>, TableError> {
        let mut out = Vec::new();
        for record in self.engine.range_query(i64::MIN, i64::MAX)? {
            let row = Self::record_to_row(&record)?;
            if range.contains(row.timestamp) {
                out.push(row);
            }
        }
        Ok(out)
    }

    /// Rows carrying every `(key, value)` pair in `tag_filter`.
    pub fn query_by_tags(
        &self,
        tag_filter: &BTreeMap<String, String>,
    ) -> Result<Vec<JoinResultRecord>, TableError> {
        let mut out = Vec::new();
        for record in self.engine.range_query(i64::MIN, i64::MAX)? {
            let row = Self::record_to_row(&record)?;
            if tag_filter
                .iter()
                .all(|(k, v)| row.tags.get(k).is_some_and(|tv| tv == v))
            {
                out.push(row);
            }
        }
        Ok(out)
    }

    /// The `n` rows with the highest window-end timestamps, descending.
    pub fn query_latest(&self, n: usize) -> Result<Vec<JoinResultRecord>, TableError> {
        let mut rows: Vec<JoinResultRecord> = self
            .engine
            .range_query(i64::MIN, i64::MAX)?
            .iter()
            .map(Self::record_to_row)
            .collect::<Result<_, _>>()?;
        rows.sort_by_key(|r| std::cmp::Reverse(r.timestamp));
        rows.truncate(n);
        Ok(rows)
    }

    /// Aggregate statistics over rows in the half-open `range`.
    ///
    /// Served from a cache that is invalidated on every write; call
    /// [`JoinResultTable::refresh_stats`] first when determinism
    /// matters. Range-restricted calls always recompute.
    pub fn query_aggregate_stats(&self, range: TimeRange) -> Result<AggregateStats, TableError> {
        let full_range = range == TimeRange::all();
        if full_range
            && let Ok(cache) = self.stats_cache.read()
            && let Some(stats) = cache.as_ref()
        {
            return Ok(stats.clone());
        }

        let rows = self.query_by_time_range(range)?;
        let stats = Self::aggregate(&rows);

        if full_range && let Ok(mut cache) = self.stats_cache.write() {
            *cache = Some(stats.clone());
        }
        Ok(stats)
    }

    /// Recomputes and caches the full-table aggregate statistics.
    pub fn refresh_stats(&self) -> Result<AggregateStats, TableError> {
        let rows = self.query_by_time_range(TimeRange::all())?;
        let stats = Self::aggregate(&rows);
        if let Ok(mut cache) = self.stats_cache.write() {
            *cache = Some(stats.clone());
        }
        Ok(stats)
    }

    /// Deletes rows whose window-end timestamp is older than
    /// `before_ts`. Returns the number of rows removed.
    pub fn delete_old_results(&self, before_ts: i64) -> Result<usize, TableError> {
        let rows = self.query_by_time_range(TimeRange::all())?;
        let (stale, fresh): (Vec<_>, Vec<_>) =
            rows.into_iter().partition(|r| r.timestamp < before_ts);
        if stale.is_empty() {
            return Ok(0);
        }

        self.engine.clear()?;
        for row in &fresh {
            let record = Self::row_to_record(row)?;
            self.engine.put(row.window_id as i64, record)?;
        }

        if let Ok(mut cache) = self.stats_cache.write() {
            *cache = None;
        }
        if let Ok(mut index) = self.window_index.write()
            && let Some(set) = index.as_mut()
        {
            set.retain(|id| fresh.iter().any(|r| r.window_id == *id));
        }

        info!(table = %self.name, removed = stale.len(), "old result rows deleted");
        Ok(stale.len())
    }

    /// Removes every row.
    pub fn clear(&self) -> Result<(), TableError> {
        self.engine.clear()?;
        if let Ok(mut cache) = self.stats_cache.write() {
            *cache = None;
        }
        if let Ok(mut index) = self.window_index.write()
            && let Some(set) = index.as_mut()
        {
            set.clear();
        }
        Ok(())
    }

    /// Builds the window-id hash index over stored rows.
    pub fn create_window_index(&self) -> Result<(), TableError> {
        let mut set = std::collections::HashSet::new();
        for record in self.engine.range_query(i64::MIN, i64::MAX)? {
            set.insert(Self::record_to_row(&record)?.window_id);
        }
        if let Ok(mut index) = self.window_index.write() {
            *index = Some(set);
        }
        Ok(())
    }

    /// Number of stored rows.
    pub fn len(&self) -> Result<usize, TableError> {
        Ok(self.engine.range_query(i64::MIN, i64::MAX)?.len())
    }

    /// True when the table holds no rows.
    pub fn is_empty(&self) -> Result<bool, TableError> {
        Ok(self.len()? == 0)
    }

    /// Flushes outstanding data and shuts the engine down.
    pub fn close(&self) -> Result<(), TableError> {
        self.engine.close()?;
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    fn aggregate(rows: &[JoinResultRecord]) -> AggregateStats {
        let mut stats = AggregateStats {
            total_windows: rows.len() as u64,
            ..AggregateStats::default()
        };
        if rows.is_empty() {
            return stats;
        }

        let mut compute_sum = 0u64;
        let mut selectivity_sum = 0.0;
        for row in rows {
            stats.total_joins += row.join_count;
            compute_sum += row.compute_time_ms;
            selectivity_sum += row.selectivity;
            if row.used_aqp {
                stats.aqp_usage_count += 1;
            }
            if !row.error_message.is_empty() {
                stats.error_count += 1;
            }
        }
        let n = rows.len() as f64;
        stats.avg_join_count = stats.total_joins as f64 / n;
        stats.avg_compute_ms = compute_sum as f64 / n;
        stats.avg_selectivity = selectivity_sum / n;
        stats
    }

    /// Packs a row into the storage record shape: keyed by window id,
    /// scalar value mirroring the join count, row bytes in a field.
    fn row_to_record(row: &JoinResultRecord) -> Result<Record, TableError> {
        let encoded = encoding::encode_to_vec(row)?;
        let mut record = Record {
            timestamp: row.window_id as i64,
            value: Value::Scalar(row.join_count as f64),
            tags: row.tags.clone(),
            fields: BTreeMap::new(),
        };
        record
            .fields
            .insert(ROW_FIELD.to_string(), hex_encode(&encoded));
        Ok(record)
    }

    fn record_to_row(record: &Record) -> Result<JoinResultRecord, TableError> {
        let text = record
            .fields
            .get(ROW_FIELD)
            .ok_or_else(|| TableError::CorruptRow {
                offset: 0,
                reason: "missing row field".into(),
            })?;
        let bytes = hex_decode(text)?;
        let (row, _) =
            JoinResultRecord::decode_from(&bytes).map_err(|e| TableError::CorruptRow {
                offset: 0,
                reason: e.to_string(),
            })?;
        Ok(row)
    }
}
