use crate::record::Record;
use crate::sstable::{self, SSTable};
use std::sync::Arc;
use tempfile::TempDir;

fn build(tmp: &TempDir, name: &str, seq: u64, entries: &[(i64, f64)]) -> Arc<SSTable> {
    let path = tmp.path().join(name);
    let input: Vec<(i64, Record)> = entries
        .iter()
        .map(|&(ts, v)| (ts, Record::new_scalar(ts, v)))
        .collect();
    Arc::new(sstable::build_from_entries(&path, &input, 0, seq, 10).unwrap())
}

#[test]
fn test_merge_disjoint_tables() {
    let tmp = TempDir::new().unwrap();
    let a = build(&tmp, "L0_1.sst", 1, &[(10, 1.0), (20, 2.0)]);
    let b = build(&tmp, "L0_2.sst", 2, &[(30, 3.0), (40, 4.0)]);

    let merged =
        sstable::merge_tables(&[a, b], tmp.path().join("L1_3.sst"), 1, 3, 10).unwrap();

    assert_eq!(merged.entry_count(), 4);
    assert_eq!(merged.level(), 1);
    assert_eq!(merged.min_timestamp(), 10);
    assert_eq!(merged.max_timestamp(), 40);

    let all: Vec<i64> = merged.iter_all().map(|i| i.unwrap().0).collect();
    assert_eq!(all, vec![10, 20, 30, 40]);
}

#[test]
fn test_merge_newest_sequence_wins_on_duplicates() {
    let tmp = TempDir::new().unwrap();
    let old = build(&tmp, "L0_1.sst", 1, &[(10, 1.0), (20, 2.0)]);
    let new = build(&tmp, "L0_2.sst", 2, &[(20, 99.0), (30, 3.0)]);

    let merged =
        sstable::merge_tables(&[old, new], tmp.path().join("L1_3.sst"), 1, 3, 10).unwrap();

    assert_eq!(merged.entry_count(), 3);
    assert_eq!(merged.get(20).unwrap().unwrap().scalar_value(), 99.0);
    assert_eq!(merged.get(10).unwrap().unwrap().scalar_value(), 1.0);
}

#[test]
fn test_merge_input_order_does_not_matter() {
    let tmp = TempDir::new().unwrap();
    let old = build(&tmp, "L0_1.sst", 1, &[(20, 2.0)]);
    let new = build(&tmp, "L0_2.sst", 5, &[(20, 50.0)]);

    let merged_a = sstable::merge_tables(
        &[Arc::clone(&new), Arc::clone(&old)],
        tmp.path().join("L1_6.sst"),
        1,
        6,
        10,
    )
    .unwrap();
    let merged_b =
        sstable::merge_tables(&[old, new], tmp.path().join("L1_7.sst"), 1, 7, 10).unwrap();

    assert_eq!(merged_a.get(20).unwrap().unwrap().scalar_value(), 50.0);
    assert_eq!(merged_b.get(20).unwrap().unwrap().scalar_value(), 50.0);
}

#[test]
fn test_merge_three_way_interleaved() {
    let tmp = TempDir::new().unwrap();
    let a = build(&tmp, "L0_1.sst", 1, &[(1, 1.0), (4, 4.0), (7, 7.0)]);
    let b = build(&tmp, "L0_2.sst", 2, &[(2, 2.0), (5, 5.0), (8, 8.0)]);
    let c = build(&tmp, "L0_3.sst", 3, &[(3, 3.0), (6, 6.0), (9, 9.0)]);

    let merged =
        sstable::merge_tables(&[a, b, c], tmp.path().join("L1_4.sst"), 1, 4, 10).unwrap();

    let all: Vec<i64> = merged.iter_all().map(|i| i.unwrap().0).collect();
    assert_eq!(all, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
}

#[test]
fn test_merge_single_table_relevels() {
    let tmp = TempDir::new().unwrap();
    let a = build(&tmp, "L0_1.sst", 1, &[(10, 1.0)]);

    let merged =
        sstable::merge_tables(&[a], tmp.path().join("L1_2.sst"), 1, 2, 10).unwrap();
    assert_eq!(merged.level(), 1);
    assert_eq!(merged.sequence(), 2);
    assert_eq!(merged.entry_count(), 1);
}
