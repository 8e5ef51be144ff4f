use crate::lsm::{LsmConfig, LsmEngine};
use crate::record::Record;
use tempfile::TempDir;

#[test]
fn test_wal_recovery_without_flush() {
    let tmp = TempDir::new().unwrap();

    {
        let engine = LsmEngine::open_at(tmp.path()).unwrap();
        for ts in 0..1000i64 {
            engine.put(ts, Record::new_scalar(ts, ts as f64)).unwrap();
        }
        // Dropped without close(): simulates a crash after WAL appends.
    }

    let engine = LsmEngine::open_at(tmp.path()).unwrap();
    let all = engine.range_query(i64::MIN, i64::MAX).unwrap();
    assert_eq!(all.len(), 1000);
    for record in &all {
        assert_eq!(record.scalar_value(), record.timestamp as f64);
    }
}

#[test]
fn test_recovery_rebuilds_levels_from_filenames() {
    let tmp = TempDir::new().unwrap();

    {
        let engine = LsmEngine::open_at(tmp.path()).unwrap();
        for ts in 0..50 {
            engine.put(ts, Record::new_scalar(ts, ts as f64)).unwrap();
        }
        engine.flush().unwrap();
        for ts in 50..100 {
            engine.put(ts, Record::new_scalar(ts, ts as f64)).unwrap();
        }
        engine.flush().unwrap();
        engine.close().unwrap();
    }

    let engine = LsmEngine::open_at(tmp.path()).unwrap();
    assert_eq!(engine.stats().sstable_count, 2);
    assert_eq!(engine.range_query(0, 99).unwrap().len(), 100);
}

#[test]
fn test_recovery_preserves_overwrite_order() {
    let tmp = TempDir::new().unwrap();

    {
        let engine = LsmEngine::open_at(tmp.path()).unwrap();
        engine.put(5, Record::new_scalar(5, 1.0)).unwrap();
        engine.flush().unwrap();
        engine.put(5, Record::new_scalar(5, 2.0)).unwrap();
        // Crash with the overwrite only in the WAL.
    }

    let engine = LsmEngine::open_at(tmp.path()).unwrap();
    assert_eq!(engine.get(5).unwrap().unwrap().scalar_value(), 2.0);
}

#[test]
fn test_recovery_after_compaction() {
    let tmp = TempDir::new().unwrap();

    {
        let engine = LsmEngine::open(LsmConfig {
            memtable_budget: 4096,
            data_dir: tmp.path().to_path_buf(),
            ..LsmConfig::default()
        })
        .unwrap();
        for batch in 0..6i64 {
            for ts in (batch * 20)..(batch * 20 + 20) {
                engine.put(ts, Record::new_scalar(ts, ts as f64)).unwrap();
            }
            engine.flush().unwrap();
        }
        engine.compact().unwrap();
        engine.close().unwrap();
    }

    let engine = LsmEngine::open_at(tmp.path()).unwrap();
    assert_eq!(engine.range_query(0, 119).unwrap().len(), 120);
}

#[test]
fn test_sequence_numbers_continue_after_recovery() {
    let tmp = TempDir::new().unwrap();

    {
        let engine = LsmEngine::open_at(tmp.path()).unwrap();
        engine.put(1, Record::new_scalar(1, 1.0)).unwrap();
        engine.flush().unwrap();
        engine.close().unwrap();
    }

    let engine = LsmEngine::open_at(tmp.path()).unwrap();
    engine.put(1, Record::new_scalar(1, 9.0)).unwrap();
    engine.flush().unwrap();

    // The newer flush must shadow the recovered table.
    assert_eq!(engine.get(1).unwrap().unwrap().scalar_value(), 9.0);
}

#[test]
fn test_recovery_with_empty_directory() {
    let tmp = TempDir::new().unwrap();
    let engine = LsmEngine::open_at(tmp.path()).unwrap();
    assert!(engine.get(1).unwrap().is_none());
    assert!(engine.range_query(i64::MIN, i64::MAX).unwrap().is_empty());
}
