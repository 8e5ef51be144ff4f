use crate::record::{Aggregation, QueryConfig, Record, TimeRange};
use crate::table::manager::{TableKind, TableManager, TableManagerConfig};
use crate::table::TableError;
use std::collections::BTreeMap;
use tempfile::TempDir;

fn manager(tmp: &TempDir) -> TableManager {
    TableManager::new(TableManagerConfig {
        data_dir: tmp.path().to_path_buf(),
        memory_limit_bytes: 64 * 1024 * 1024,
    })
}

#[test]
fn test_create_and_list_tables() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);

    manager.create_table("events", TableKind::Stream).unwrap();
    manager.create_table("archive", TableKind::TimeSeries).unwrap();
    manager.create_table("results", TableKind::JoinResult).unwrap();

    assert!(manager.has_table("events"));
    assert!(!manager.has_table("ghost"));

    let tables = manager.list_tables();
    assert_eq!(tables.len(), 3);
    assert_eq!(tables[0], ("archive".to_string(), TableKind::TimeSeries));
}

#[test]
fn test_duplicate_create_fails() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);

    manager.create_table("events", TableKind::Stream).unwrap();
    let err = manager.create_table("events", TableKind::Stream).unwrap_err();
    assert!(matches!(err, TableError::DuplicateTable(_)));
}

#[test]
fn test_drop_table() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);

    manager.create_table("events", TableKind::Stream).unwrap();
    manager.drop_table("events").unwrap();
    assert!(!manager.has_table("events"));
    assert!(manager.drop_table("events").is_err());
}

#[test]
fn test_typed_getters_enforce_kind() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);

    manager.create_table("events", TableKind::Stream).unwrap();
    assert!(manager.get_stream_table("events").is_ok());
    assert!(matches!(
        manager.get_join_result_table("events"),
        Err(TableError::WrongTableKind { .. })
    ));
    assert!(matches!(
        manager.get_stream_table("ghost"),
        Err(TableError::UnknownTable(_))
    ));
}

#[test]
fn test_insert_and_query_through_manager() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);
    manager.create_table("events", TableKind::Stream).unwrap();

    for ts in 0..10i64 {
        manager
            .insert("events", Record::new_scalar(ts, ts as f64))
            .unwrap();
    }

    let records = manager
        .query_range("events", TimeRange::new(2, 6), &BTreeMap::new())
        .unwrap();
    assert_eq!(records.len(), 4);
}

#[test]
fn test_query_config_limit_and_aggregation() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);
    manager.create_table("events", TableKind::Stream).unwrap();

    for ts in 0..10i64 {
        manager
            .insert("events", Record::new_scalar(ts, ts as f64))
            .unwrap();
    }

    let limited = manager
        .query(
            "events",
            &QueryConfig::range(TimeRange::new(0, 10)).with_limit(3),
        )
        .unwrap();
    assert_eq!(limited.len(), 3);

    let sum = manager
        .query_aggregate(
            "events",
            &QueryConfig::range(TimeRange::new(0, 10)).with_aggregation(Aggregation::Sum),
        )
        .unwrap();
    assert_eq!(sum, 45.0);
}

#[test]
fn test_windowed_aggregate() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);
    manager.create_table("events", TableKind::Stream).unwrap();

    for ts in 0..100i64 {
        manager
            .insert("events", Record::new_scalar(ts, 1.0))
            .unwrap();
    }

    let mut config = QueryConfig::range(TimeRange::new(0, 100)).with_aggregation(Aggregation::Sum);
    config.window_size_ms = Some(25);
    let windows = manager.query_windowed_aggregate("events", &config).unwrap();
    assert_eq!(windows.len(), 4);
    assert!(windows.iter().all(|(_, sum)| *sum == 25.0));
    assert_eq!(windows[0].0, 0);
    assert_eq!(windows[3].0, 75);
}

#[test]
fn test_time_series_table_routing() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);
    manager.create_table("archive", TableKind::TimeSeries).unwrap();

    // Out-of-order appends are fine for the archival kind.
    for ts in [30i64, 10, 20] {
        manager
            .insert("archive", Record::new_scalar(ts, ts as f64))
            .unwrap();
    }

    let records = manager
        .query_range("archive", TimeRange::all(), &BTreeMap::new())
        .unwrap();
    let timestamps: Vec<i64> = records.iter().map(|r| r.timestamp).collect();
    assert_eq!(timestamps, vec![10, 20, 30]);
}

#[test]
fn test_raw_insert_into_result_table_rejected() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);
    manager.create_table("results", TableKind::JoinResult).unwrap();

    let err = manager
        .insert("results", Record::new_scalar(1, 1.0))
        .unwrap_err();
    assert!(matches!(err, TableError::WrongTableKind { .. }));
}

#[test]
fn test_multi_table_batch_ops() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);
    manager.create_table("s", TableKind::Stream).unwrap();
    manager.create_table("r", TableKind::Stream).unwrap();

    let mut batches = BTreeMap::new();
    batches.insert(
        "s".to_string(),
        vec![Record::new_scalar(1, 1.0), Record::new_scalar(2, 2.0)],
    );
    batches.insert("r".to_string(), vec![Record::new_scalar(3, 3.0)]);

    let counts = manager.multi_insert(batches).unwrap();
    assert_eq!(counts["s"], 2);
    assert_eq!(counts["r"], 1);

    let mut ranges = BTreeMap::new();
    ranges.insert("s".to_string(), TimeRange::new(0, 10));
    ranges.insert("r".to_string(), TimeRange::new(0, 10));
    let results = manager.multi_query(ranges).unwrap();
    assert_eq!(results["s"].len(), 2);
    assert_eq!(results["r"].len(), 1);
}

#[test]
fn test_create_pecj_tables() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);

    manager.create_pecj_tables("job1_").unwrap();
    assert!(manager.has_table("job1_stream_s"));
    assert!(manager.has_table("job1_stream_r"));
    assert!(manager.has_table("job1_join_results"));
    assert!(manager.get_stream_table("job1_stream_s").is_ok());
    assert!(manager.get_join_result_table("job1_join_results").is_ok());
}

#[test]
fn test_compute_state_store_through_manager() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);

    let store = manager.compute_state_store().unwrap();
    let state = crate::table::state::ComputeState::new("engine-1");
    store.save_state(&state).unwrap();
    assert_eq!(store.load_state("engine-1").unwrap(), state);

    // Internal tables are registered in the namespace.
    assert!(manager.has_table("_compute_state"));
    assert!(manager.has_table("_compute_checkpoint"));
}
