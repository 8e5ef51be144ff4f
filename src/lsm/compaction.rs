//! Leveled compaction for the LSM engine.
//!
//! Two operations, applied until the tree settles:
//!
//! - **L0 → L1** — triggered when level 0 holds at least
//!   [`LsmConfig::l0_compaction_trigger`](super::LsmConfig) tables. All L0
//!   tables plus the overlapping L1 tables are k-way merged into a single
//!   L1 table whose range is their union.
//! - **Level k → k+1** (k ≥ 1) — triggered when level k's total bytes
//!   exceed its target. The oldest table at level k and the overlapping
//!   tables at k+1 merge into one table at k+1.
//!
//! # Invariants preserved
//!
//! - Levels ≥ 1 stay range-disjoint and sorted by minimum timestamp:
//!   every compaction consumes **all** overlapping tables at the target
//!   level before inserting the merged result.
//! - Duplicate timestamps resolve to the input with the highest sequence
//!   number (newest data wins).
//!
//! # Reader safety
//!
//! Merges run without holding the level-map lock; the lock is taken only
//! for the vector swap. Input files are deleted *after* the swap, so a
//! reader that grabbed `Arc` handles before the swap finishes its
//! traversal against intact files.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::{debug, info, warn};

use super::{LsmError, LsmInner};
use crate::sstable::{self, SSTable};

/// Runs one L0 compaction if level 0 has reached the trigger count.
pub(crate) fn run_if_l0_full(inner: &LsmInner) -> Result<(), LsmError> {
    let l0_len = {
        let levels = inner
            .levels
            .read()
            .map_err(|_| LsmError::Internal("RwLock poisoned".into()))?;
        levels.get(&0).map_or(0, Vec::len)
    };
    if l0_len >= inner.config.l0_compaction_trigger {
        run_until_settled(inner)?;
    }
    Ok(())
}

/// Runs compaction rounds until no trigger condition holds.
pub(crate) fn run_until_settled(inner: &LsmInner) -> Result<(), LsmError> {
    loop {
        let l0_len = {
            let levels = inner
                .levels
                .read()
                .map_err(|_| LsmError::Internal("RwLock poisoned".into()))?;
            levels.get(&0).map_or(0, Vec::len)
        };

        if l0_len >= inner.config.l0_compaction_trigger {
            compact_l0_to_l1(inner)?;
            inner.stats.compactions.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        if let Some(level) = find_oversized_level(inner)? {
            compact_level(inner, level)?;
            inner.stats.compactions.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        break;
    }
    Ok(())
}

/// Finds the lowest level k ≥ 1 whose byte total exceeds its target and
/// which still has a level below it to compact into.
fn find_oversized_level(inner: &LsmInner) -> Result<Option<u32>, LsmError> {
    let levels = inner
        .levels
        .read()
        .map_err(|_| LsmError::Internal("RwLock poisoned".into()))?;

    for (level, tables) in levels.range(1..) {
        if *level + 1 >= inner.config.max_levels {
            break;
        }
        let total: u64 = tables.iter().map(|t| t.file_size()).sum();
        if total > inner.config.level_target_bytes(*level) && tables.len() > 1 {
            return Ok(Some(*level));
        }
    }
    Ok(None)
}

/// Merges all L0 tables plus the overlapping L1 tables into one L1 table.
fn compact_l0_to_l1(inner: &LsmInner) -> Result<(), LsmError> {
    let (l0_tables, l1_overlap) = {
        let levels = inner
            .levels
            .read()
            .map_err(|_| LsmError::Internal("RwLock poisoned".into()))?;

        let l0_tables: Vec<Arc<SSTable>> = levels.get(&0).cloned().unwrap_or_default();
        if l0_tables.is_empty() {
            return Ok(());
        }

        let lo = l0_tables.iter().map(|t| t.min_timestamp()).min().unwrap_or(i64::MIN);
        let hi = l0_tables.iter().map(|t| t.max_timestamp()).max().unwrap_or(i64::MAX);

        let l1_overlap: Vec<Arc<SSTable>> = levels
            .get(&1)
            .map(|tables| {
                tables
                    .iter()
                    .filter(|t| t.overlaps_range(lo, hi))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        (l0_tables, l1_overlap)
    };

    let mut inputs = l0_tables.clone();
    inputs.extend(l1_overlap.iter().cloned());

    debug!(
        l0 = l0_tables.len(),
        l1 = l1_overlap.len(),
        "compacting L0 into L1"
    );

    merge_and_swap(inner, inputs, 1)
}

/// Compacts the oldest table at `level` plus the overlapping tables at
/// `level + 1` into a single table at `level + 1`.
fn compact_level(inner: &LsmInner, level: u32) -> Result<(), LsmError> {
    let inputs = {
        let levels = inner
            .levels
            .read()
            .map_err(|_| LsmError::Internal("RwLock poisoned".into()))?;

        let Some(tables) = levels.get(&level) else {
            return Ok(());
        };
        // Oldest first: lowest sequence number has sat here longest.
        let Some(victim) = tables.iter().min_by_key(|t| t.sequence()).cloned() else {
            return Ok(());
        };

        let lo = victim.min_timestamp();
        let hi = victim.max_timestamp();

        let mut inputs = vec![victim];
        if let Some(below) = levels.get(&(level + 1)) {
            inputs.extend(below.iter().filter(|t| t.overlaps_range(lo, hi)).cloned());
        }
        inputs
    };

    debug!(level, inputs = inputs.len(), "compacting level downward");
    merge_and_swap(inner, inputs, level + 1)
}

/// Merges `inputs` into one table at `target_level`, swaps the level
/// vectors atomically, and deletes the input files afterwards.
fn merge_and_swap(
    inner: &LsmInner,
    inputs: Vec<Arc<SSTable>>,
    target_level: u32,
) -> Result<(), LsmError> {
    if inputs.is_empty() {
        return Ok(());
    }

    let sequence = inner.next_sequence.fetch_add(1, Ordering::SeqCst);
    let path = inner
        .config
        .data_dir
        .join(format!("L{target_level}_{sequence}.sst"));

    let merged = Arc::new(sstable::merge_tables(
        &inputs,
        &path,
        target_level,
        sequence,
        inner.config.bloom_bits_per_key,
    )?);

    let consumed: Vec<u64> = inputs.iter().map(|t| t.sequence()).collect();

    // Swap: remove every consumed table, insert the merged one keeping
    // levels ≥ 1 sorted by min_timestamp.
    {
        let mut levels = inner
            .levels
            .write()
            .map_err(|_| LsmError::Internal("RwLock poisoned".into()))?;

        for tables in levels.values_mut() {
            tables.retain(|t| !consumed.contains(&t.sequence()));
        }

        let target = levels.entry(target_level).or_default();
        let pos = target.partition_point(|t| t.min_timestamp() < merged.min_timestamp());
        target.insert(pos, Arc::clone(&merged));

        levels.retain(|_, tables| !tables.is_empty());
    }

    // Deferred delete: in-flight readers hold Arc handles and mmaps, so
    // unlinking here is safe.
    for table in &inputs {
        if let Err(e) = std::fs::remove_file(table.path()) {
            warn!(path = %table.path().display(), error = %e, "failed to remove compacted SSTable");
        }
    }

    info!(
        target_level,
        sequence,
        consumed = consumed.len(),
        entries = merged.entry_count(),
        "compaction finished"
    );
    Ok(())
}
