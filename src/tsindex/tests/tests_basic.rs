use crate::record::{Record, TimeRange};
use crate::tsindex::TimeSeriesIndex;

#[test]
fn test_out_of_order_appends_query_sorted() {
    let index = TimeSeriesIndex::new();
    for ts in [50i64, 10, 30, 20, 40] {
        index.add(Record::new_scalar(ts, ts as f64));
    }

    let result = index.range_query(TimeRange::new(0, 100));
    let timestamps: Vec<i64> = result.iter().map(|r| r.timestamp).collect();
    assert_eq!(timestamps, vec![10, 20, 30, 40, 50]);
}

#[test]
fn test_range_is_half_open() {
    let index = TimeSeriesIndex::new();
    for ts in [10i64, 20, 30] {
        index.add(Record::new_scalar(ts, ts as f64));
    }

    let result = index.range_query(TimeRange::new(10, 30));
    let timestamps: Vec<i64> = result.iter().map(|r| r.timestamp).collect();
    assert_eq!(timestamps, vec![10, 20]);
}

#[test]
fn test_tag_queries_after_resort() {
    let index = TimeSeriesIndex::new();
    index.add(Record::new_scalar(30, 3.0).with_tag("host", "a"));
    index.add(Record::new_scalar(10, 1.0).with_tag("host", "b"));
    index.add(Record::new_scalar(20, 2.0).with_tag("host", "a"));

    let result = index.query_by_tag("host", "a");
    let timestamps: Vec<i64> = result.iter().map(|r| r.timestamp).collect();
    assert_eq!(timestamps, vec![20, 30]);

    // Appending invalidates the index; the next query re-sorts and
    // rebuilds, so positions are never stale.
    index.add(Record::new_scalar(5, 0.5).with_tag("host", "a"));
    let result = index.query_by_tag("host", "a");
    let timestamps: Vec<i64> = result.iter().map(|r| r.timestamp).collect();
    assert_eq!(timestamps, vec![5, 20, 30]);
}

#[test]
fn test_tag_filter_intersects_range() {
    let index = TimeSeriesIndex::new();
    for ts in 0..10i64 {
        let host = if ts % 2 == 0 { "even" } else { "odd" };
        index.add(Record::new_scalar(ts, ts as f64).with_tag("host", host));
    }

    let mut filter = std::collections::BTreeMap::new();
    filter.insert("host".to_string(), "even".to_string());

    let result = index.query(TimeRange::new(3, 9), &filter);
    let timestamps: Vec<i64> = result.iter().map(|r| r.timestamp).collect();
    assert_eq!(timestamps, vec![4, 6, 8]);
}

#[test]
fn test_multi_tag_filter_intersection() {
    let index = TimeSeriesIndex::new();
    index.add(
        Record::new_scalar(1, 1.0)
            .with_tag("host", "a")
            .with_tag("dc", "eu"),
    );
    index.add(
        Record::new_scalar(2, 2.0)
            .with_tag("host", "a")
            .with_tag("dc", "us"),
    );
    index.add(
        Record::new_scalar(3, 3.0)
            .with_tag("host", "b")
            .with_tag("dc", "eu"),
    );

    let mut filter = std::collections::BTreeMap::new();
    filter.insert("host".to_string(), "a".to_string());
    filter.insert("dc".to_string(), "eu".to_string());

    let result = index.query(TimeRange::all(), &filter);
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].timestamp, 1);
}

#[test]
fn test_unknown_tag_matches_nothing() {
    let index = TimeSeriesIndex::new();
    index.add(Record::new_scalar(1, 1.0).with_tag("host", "a"));
    assert!(index.query_by_tag("host", "zzz").is_empty());
    assert!(index.query_by_tag("rack", "a").is_empty());
}

#[test]
fn test_clear() {
    let index = TimeSeriesIndex::new();
    index.add(Record::new_scalar(1, 1.0));
    index.clear();
    assert!(index.is_empty());
    assert!(index.range_query(TimeRange::all()).is_empty());
}
