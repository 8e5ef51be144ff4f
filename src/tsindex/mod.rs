//! Time-series index — an append-then-sort archival structure.
//!
//! Records append in arrival order into a plain vector; the first query
//! after an append re-sorts the vector by timestamp and rebuilds the tag
//! inverted index (`tag_key → tag_value → sorted record positions`).
//! This trades write cost for deferred sort cost, which suits the
//! archival path; the hot write path uses the always-sorted
//! [`Memtable`](crate::memtable::Memtable) instead.
//!
//! Positions stored in the tag index refer to the **sorted** vector and
//! are rebuilt on every re-sort, so a query can never observe positions
//! from a stale ordering: every read path sorts first, under the same
//! write lock.

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::record::{Record, TimeRange};
use tracing::debug;

/// Append-then-sort record index with a tag inverted index.
pub struct TimeSeriesIndex {
    inner: RwLock<IndexInner>,
}

struct IndexInner {
    /// Record storage; sorted by timestamp only when `sorted` is true.
    records: Vec<Record>,

    /// Whether `records` is currently sorted (and `tag_index` valid).
    sorted: bool,

    /// `tag_key → tag_value → ascending positions into `records``.
    tag_index: HashMap<String, HashMap<String, Vec<usize>>>,
}

impl Default for TimeSeriesIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSeriesIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(IndexInner {
                records: Vec::new(),
                sorted: true,
                tag_index: HashMap::new(),
            }),
        }
    }

    /// Appends a record, invalidating the sort flag.
    pub fn add(&self, record: Record) {
        if let Ok(mut guard) = self.inner.write() {
            guard.records.push(record);
            guard.sorted = false;
        }
    }

    /// Appends a batch of records.
    pub fn add_batch(&self, records: Vec<Record>) {
        if let Ok(mut guard) = self.inner.write() {
            guard.records.extend(records);
            guard.sorted = false;
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.inner.read().map(|g| g.records.len()).unwrap_or(0)
    }

    /// True when no records are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every record.
    pub fn clear(&self) {
        if let Ok(mut guard) = self.inner.write() {
            guard.records.clear();
            guard.tag_index.clear();
            guard.sorted = true;
        }
    }

    /// Returns records with timestamps in the half-open `range`,
    /// ascending.
    pub fn range_query(&self, range: TimeRange) -> Vec<Record> {
        let mut guard = match self.inner.write() {
            Ok(g) => g,
            Err(_) => return Vec::new(),
        };
        guard.ensure_sorted();

        let start = guard.records.partition_point(|r| r.timestamp < range.start);
        guard.records[start..]
            .iter()
            .take_while(|r| r.timestamp < range.end)
            .cloned()
            .collect()
    }

    /// Returns records matching every `(key, value)` pair, using the tag
    /// inverted index, intersected with the half-open `range`.
    pub fn query(&self, range: TimeRange, tag_filter: &BTreeMap<String, String>) -> Vec<Record> {
        if tag_filter.is_empty() {
            return self.range_query(range);
        }

        let mut guard = match self.inner.write() {
            Ok(g) => g,
            Err(_) => return Vec::new(),
        };
        guard.ensure_sorted();

        // Intersect candidate position sets, smallest first.
        let mut candidate: Option<Vec<usize>> = None;
        for (key, value) in tag_filter {
            let positions = guard
                .tag_index
                .get(key)
                .and_then(|values| values.get(value))
                .cloned()
                .unwrap_or_default();
            candidate = Some(match candidate {
                None => positions,
                Some(prev) => intersect_sorted(&prev, &positions),
            });
            if candidate.as_ref().is_some_and(Vec::is_empty) {
                return Vec::new();
            }
        }

        candidate
            .unwrap_or_default()
            .into_iter()
            .filter_map(|pos| {
                let record = &guard.records[pos];
                range.contains(record.timestamp).then(|| record.clone())
            })
            .collect()
    }

    /// Returns every record carrying the tag pair, ascending.
    pub fn query_by_tag(&self, key: &str, value: &str) -> Vec<Record> {
        let mut filter = BTreeMap::new();
        filter.insert(key.to_string(), value.to_string());
        self.query(TimeRange::all(), &filter)
    }
}

impl IndexInner {
    /// Sorts by timestamp and rebuilds the tag index if stale.
    fn ensure_sorted(&mut self) {
        if self.sorted {
            return;
        }
        self.records.sort_by_key(|r| r.timestamp);

        self.tag_index.clear();
        for (pos, record) in self.records.iter().enumerate() {
            for (key, value) in &record.tags {
                self.tag_index
                    .entry(key.clone())
                    .or_default()
                    .entry(value.clone())
                    .or_default()
                    .push(pos);
            }
        }

        self.sorted = true;
        debug!(records = self.records.len(), "time-series index re-sorted");
    }
}

/// Intersects two ascending position vectors.
fn intersect_sorted(a: &[usize], b: &[usize]) -> Vec<usize> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}
