//! # Memtable Module
//!
//! The in-memory write buffer fronting the LSM engine: a timestamp-ordered
//! map bounded by a byte budget.
//!
//! ## Design Invariants
//!
//! - Entries are keyed by timestamp; a `put` for an existing timestamp
//!   replaces the previous record (last-write-wins).
//! - The map is always sorted — `BTreeMap` keeps insertion-order problems
//!   out of the hot write path entirely.
//! - `approximate_size` tracks the estimated footprint; [`Memtable::is_full`]
//!   reports when the budget is reached so the engine can swap in a fresh
//!   active memtable.
//!
//! ## Flush Semantics
//!
//! - [`Memtable::iter_for_flush`] returns a snapshot of all entries in
//!   ascending timestamp order, sufficient to build an SSTable.
//! - Flush iteration does **not** mutate or clear in-memory state; the
//!   engine drops the immutable memtable after the SSTable is durable.
//!
//! ## Concurrency
//!
//! - Writers acquire an exclusive lock.
//! - Readers may proceed concurrently.

#[cfg(test)]
mod tests;

use std::{
    collections::BTreeMap,
    sync::RwLock,
};

use crate::record::Record;
use thiserror::Error;
use tracing::trace;

/// Default memtable byte budget (4 MiB).
pub const DEFAULT_MEMTABLE_BUDGET: usize = 4 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`Memtable`] operations.
#[derive(Debug, Error)]
pub enum MemtableError {
    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Memtable Core
// ------------------------------------------------------------------------------------------------

/// The mutable, in-memory write buffer of the storage engine.
///
/// Stores one record per timestamp in sorted order, bounded by a byte
/// budget. The owning engine is responsible for WAL-first durability and
/// for swapping a full memtable out for flushing.
pub struct Memtable {
    inner: RwLock<MemtableInner>,
}

struct MemtableInner {
    /// Timestamp-ordered entries.
    tree: BTreeMap<i64, Record>,

    /// Approximate in-memory footprint.
    approximate_size: usize,

    /// Configured byte budget.
    budget: usize,
}

impl Memtable {
    /// Creates an empty memtable with the given byte budget.
    pub fn new(budget: usize) -> Self {
        Self {
            inner: RwLock::new(MemtableInner {
                tree: BTreeMap::new(),
                approximate_size: 0,
                budget,
            }),
        }
    }

    /// Creates an empty memtable with the default 4 MiB budget.
    pub fn with_default_budget() -> Self {
        Self::new(DEFAULT_MEMTABLE_BUDGET)
    }

    /// Inserts or replaces the record for `timestamp`.
    ///
    /// Replacement is last-write-wins: the byte estimate is adjusted by
    /// the difference between the old and new record footprints.
    pub fn put(&self, timestamp: i64, record: Record) -> Result<(), MemtableError> {
        let new_size = record.approximate_size();

        let mut guard = self
            .inner
            .write()
            .map_err(|_| MemtableError::Internal("RwLock poisoned".into()))?;

        if let Some(old) = guard.tree.insert(timestamp, record) {
            guard.approximate_size = guard
                .approximate_size
                .saturating_sub(old.approximate_size());
        }
        guard.approximate_size += new_size;

        trace!(ts = timestamp, size = guard.approximate_size, "memtable put");
        Ok(())
    }

    /// Point lookup by timestamp.
    pub fn get(&self, timestamp: i64) -> Result<Option<Record>, MemtableError> {
        let guard = self
            .inner
            .read()
            .map_err(|_| MemtableError::Internal("RwLock poisoned".into()))?;
        Ok(guard.tree.get(&timestamp).cloned())
    }

    /// Returns all records with timestamp in `[lo, hi]`, ascending.
    pub fn range_query(&self, lo: i64, hi: i64) -> Result<Vec<Record>, MemtableError> {
        let guard = self
            .inner
            .read()
            .map_err(|_| MemtableError::Internal("RwLock poisoned".into()))?;
        Ok(guard.tree.range(lo..=hi).map(|(_, r)| r.clone()).collect())
    }

    /// True when the estimated footprint has reached the budget.
    pub fn is_full(&self) -> bool {
        self.inner
            .read()
            .map(|g| g.approximate_size >= g.budget)
            .unwrap_or(false)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.read().map(|g| g.tree.len()).unwrap_or(0)
    }

    /// True when the memtable holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Estimated footprint in bytes.
    pub fn approximate_size(&self) -> usize {
        self.inner.read().map(|g| g.approximate_size).unwrap_or(0)
    }

    /// Configured byte budget.
    pub fn budget(&self) -> usize {
        self.inner.read().map(|g| g.budget).unwrap_or(0)
    }

    /// Snapshot of all entries in ascending timestamp order, suitable
    /// for building an SSTable. Does not mutate in-memory state.
    pub fn iter_for_flush(&self) -> Result<Vec<(i64, Record)>, MemtableError> {
        let guard = self
            .inner
            .read()
            .map_err(|_| MemtableError::Internal("RwLock poisoned".into()))?;
        Ok(guard.tree.iter().map(|(ts, r)| (*ts, r.clone())).collect())
    }

    /// Removes all entries and resets the byte estimate.
    pub fn clear(&self) -> Result<(), MemtableError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| MemtableError::Internal("RwLock poisoned".into()))?;
        guard.tree.clear();
        guard.approximate_size = 0;
        Ok(())
    }

    /// Bulk load used during WAL recovery; replaces the current contents.
    pub fn load(&self, entries: BTreeMap<i64, Record>) -> Result<(), MemtableError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| MemtableError::Internal("RwLock poisoned".into()))?;
        guard.approximate_size = entries.values().map(Record::approximate_size).sum();
        guard.tree = entries;
        Ok(())
    }
}
