use crate::record::{Record, TimeRange};
use crate::table::stream::StreamTable;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

fn table(tmp: &TempDir, indexed: &[&str]) -> StreamTable {
    StreamTable::open(
        "stream_s",
        tmp.path(),
        indexed.iter().map(|s| s.to_string()).collect(),
    )
    .unwrap()
}

#[test]
fn test_insert_and_query_range() {
    let tmp = TempDir::new().unwrap();
    let table = table(&tmp, &[]);

    for ts in [100i64, 300, 200] {
        table.insert(Record::new_scalar(ts, ts as f64)).unwrap();
    }

    let result = table
        .query(TimeRange::new(100, 301), &BTreeMap::new())
        .unwrap();
    let timestamps: Vec<i64> = result.iter().map(|r| r.timestamp).collect();
    assert_eq!(timestamps, vec![100, 200, 300]);
}

#[test]
fn test_query_is_half_open() {
    let tmp = TempDir::new().unwrap();
    let table = table(&tmp, &[]);
    for ts in [10i64, 20, 30] {
        table.insert(Record::new_scalar(ts, ts as f64)).unwrap();
    }

    let result = table
        .query(TimeRange::new(10, 30), &BTreeMap::new())
        .unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(result[0].timestamp, 10);
    assert_eq!(result[1].timestamp, 20);
}

#[test]
fn test_record_visible_after_flush() {
    let tmp = TempDir::new().unwrap();
    let table = table(&tmp, &[]);

    let rec = Record::new_scalar(42, 4.2).with_tag("sensor", "a");
    table.insert(rec.clone()).unwrap();
    table.flush().unwrap();

    let result = table
        .query(TimeRange::new(42, 43), &BTreeMap::new())
        .unwrap();
    assert_eq!(result, vec![rec]);
}

#[test]
fn test_tag_filtered_query_uses_index() {
    let tmp = TempDir::new().unwrap();
    let table = table(&tmp, &["host"]);

    for ts in 0..10i64 {
        let host = if ts % 2 == 0 { "a" } else { "b" };
        table
            .insert(Record::new_scalar(ts, ts as f64).with_tag("host", host))
            .unwrap();
    }

    let mut filter = BTreeMap::new();
    filter.insert("host".to_string(), "a".to_string());
    let result = table.query(TimeRange::new(0, 10), &filter).unwrap();
    assert_eq!(result.len(), 5);
    assert!(result.iter().all(|r| r.timestamp % 2 == 0));
}

#[test]
fn test_unindexed_tag_filter_falls_back_to_scan() {
    let tmp = TempDir::new().unwrap();
    let table = table(&tmp, &[]);

    table
        .insert(Record::new_scalar(1, 1.0).with_tag("dc", "eu"))
        .unwrap();
    table
        .insert(Record::new_scalar(2, 2.0).with_tag("dc", "us"))
        .unwrap();

    let mut filter = BTreeMap::new();
    filter.insert("dc".to_string(), "eu".to_string());
    let result = table.query(TimeRange::all(), &filter).unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].timestamp, 1);
}

#[test]
fn test_listeners_fire_on_insert() {
    let tmp = TempDir::new().unwrap();
    let table = table(&tmp, &[]);

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_clone = Arc::clone(&fired);
    table.add_listener(Arc::new(move |name, ts, count| {
        assert_eq!(name, "stream_s");
        assert!(ts >= 0);
        fired_clone.fetch_add(count, Ordering::SeqCst);
    }));

    table.insert(Record::new_scalar(1, 1.0)).unwrap();
    table
        .insert_batch(vec![
            Record::new_scalar(2, 2.0),
            Record::new_scalar(3, 3.0),
        ])
        .unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 3);
}

#[test]
fn test_query_window_via_registration() {
    let tmp = TempDir::new().unwrap();
    let table = table(&tmp, &[]);

    for ts in 0..20i64 {
        table.insert(Record::new_scalar(ts, ts as f64)).unwrap();
    }
    table.register_window(7, TimeRange::new(5, 15));

    let result = table.query_window(7).unwrap();
    assert_eq!(result.len(), 10);
    assert_eq!(result[0].timestamp, 5);
    assert_eq!(result[9].timestamp, 14);

    assert!(table.query_window(99).is_err());
}

#[test]
fn test_query_latest_descending() {
    let tmp = TempDir::new().unwrap();
    let table = table(&tmp, &[]);
    for ts in 0..10i64 {
        table.insert(Record::new_scalar(ts, ts as f64)).unwrap();
    }

    let latest = table.query_latest(3).unwrap();
    let timestamps: Vec<i64> = latest.iter().map(|r| r.timestamp).collect();
    assert_eq!(timestamps, vec![9, 8, 7]);
}

#[test]
fn test_count() {
    let tmp = TempDir::new().unwrap();
    let table = table(&tmp, &[]);
    for ts in 0..10i64 {
        table.insert(Record::new_scalar(ts, ts as f64)).unwrap();
    }
    assert_eq!(table.count(TimeRange::new(2, 7)).unwrap(), 5);
    assert_eq!(table.count(TimeRange::new(7, 2)).unwrap(), 0);
}

#[test]
fn test_create_index_backfills_existing_records() {
    let tmp = TempDir::new().unwrap();
    let table = table(&tmp, &[]);

    table
        .insert(Record::new_scalar(1, 1.0).with_tag("host", "a"))
        .unwrap();
    table.create_index("host").unwrap();
    assert_eq!(table.list_indices(), vec!["host".to_string()]);

    let mut filter = BTreeMap::new();
    filter.insert("host".to_string(), "a".to_string());
    assert_eq!(table.query(TimeRange::all(), &filter).unwrap().len(), 1);

    table.drop_index("host").unwrap();
    assert!(table.list_indices().is_empty());
}
