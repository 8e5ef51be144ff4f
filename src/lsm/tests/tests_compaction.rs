use crate::lsm::{LsmConfig, LsmEngine};
use crate::record::Record;
use tempfile::TempDir;

fn small_engine(tmp: &TempDir) -> LsmEngine {
    LsmEngine::open(LsmConfig {
        memtable_budget: 4096,
        l0_compaction_trigger: 4,
        data_dir: tmp.path().to_path_buf(),
        ..LsmConfig::default()
    })
    .unwrap()
}

#[test]
fn test_l0_compaction_at_exact_trigger() {
    let tmp = TempDir::new().unwrap();
    let engine = small_engine(&tmp);

    // Build exactly `l0_compaction_trigger` L0 tables via forced flushes.
    for batch in 0..4i64 {
        for ts in (batch * 10)..(batch * 10 + 10) {
            engine.put(ts, Record::new_scalar(ts, ts as f64)).unwrap();
        }
        engine.flush().unwrap();
    }

    // The fourth flush reaches the trigger; compaction runs, not defers.
    assert!(engine.level_len(0) < 4);
    assert!(engine.level_len(1) >= 1);
    assert!(engine.stats().compactions >= 1);

    // Every record survives the merge.
    assert_eq!(engine.range_query(0, 39).unwrap().len(), 40);
}

#[test]
fn test_compaction_dedups_overlapping_l0() {
    let tmp = TempDir::new().unwrap();
    let engine = small_engine(&tmp);

    // Four overlapping L0 tables, each rewriting the same timestamps.
    for round in 0..4i64 {
        for ts in 0..10 {
            engine
                .put(ts, Record::new_scalar(ts, (round * 100 + ts) as f64))
                .unwrap();
        }
        engine.flush().unwrap();
    }

    // After compaction the newest round's values win.
    for ts in 0..10 {
        assert_eq!(
            engine.get(ts).unwrap().unwrap().scalar_value(),
            (300 + ts) as f64
        );
    }
    assert_eq!(engine.range_query(0, 9).unwrap().len(), 10);
}

#[test]
fn test_compaction_removes_consumed_files() {
    let tmp = TempDir::new().unwrap();
    let engine = small_engine(&tmp);

    for batch in 0..4i64 {
        for ts in (batch * 10)..(batch * 10 + 10) {
            engine.put(ts, Record::new_scalar(ts, ts as f64)).unwrap();
        }
        engine.flush().unwrap();
    }
    engine.compact().unwrap();

    let on_disk = std::fs::read_dir(tmp.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path().extension().and_then(|s| s.to_str()) == Some("sst")
        })
        .count();
    let in_memory = engine.stats().sstable_count as usize;
    assert_eq!(on_disk, in_memory, "consumed SSTable files must be deleted");
}

#[test]
fn test_levels_stay_disjoint_after_repeated_compaction() {
    let tmp = TempDir::new().unwrap();
    let engine = small_engine(&tmp);

    for batch in 0..12i64 {
        for ts in (batch * 25)..(batch * 25 + 25) {
            engine.put(ts, Record::new_scalar(ts, ts as f64)).unwrap();
        }
        engine.flush().unwrap();
    }
    engine.compact().unwrap();

    // All 300 distinct timestamps round-trip.
    assert_eq!(engine.range_query(0, 299).unwrap().len(), 300);

    // Point reads hit regardless of which level holds the record.
    for ts in [0i64, 77, 150, 299] {
        assert_eq!(engine.get(ts).unwrap().unwrap().scalar_value(), ts as f64);
    }
}

#[test]
fn test_flush_and_l0_compaction_roundtrip_under_load() {
    let tmp = TempDir::new().unwrap();
    let engine = LsmEngine::open(LsmConfig {
        memtable_budget: 2048,
        l0_compaction_trigger: 4,
        data_dir: tmp.path().to_path_buf(),
        ..LsmConfig::default()
    })
    .unwrap();

    // Insert well over 4 memtable budgets of distinct timestamps.
    let count = 2000i64;
    for ts in 0..count {
        engine.put(ts, Record::new_scalar(ts, ts as f64)).unwrap();
    }
    engine.close().unwrap();
    engine.compact().unwrap();

    assert!(engine.level_len(0) < 4);
    assert!(engine.level_len(1) >= 1);

    let all = engine.range_query(0, count - 1).unwrap();
    assert_eq!(all.len(), count as usize);
    for (idx, record) in all.iter().enumerate() {
        assert_eq!(record.timestamp, idx as i64);
    }
}

#[test]
fn test_bloom_rejections_counted() {
    let tmp = TempDir::new().unwrap();
    let engine = small_engine(&tmp);

    for ts in 0..100 {
        engine.put(ts * 2, Record::new_scalar(ts * 2, 0.0)).unwrap();
    }
    engine.flush().unwrap();

    // Misses inside the table's [min, max] range hit the bloom filter.
    for ts in 0..100 {
        let _ = engine.get(ts * 2 + 1).unwrap();
    }

    let stats = engine.stats();
    assert!(
        stats.bloom_rejections > 0,
        "in-range misses should be bloom-rejected"
    );
}
