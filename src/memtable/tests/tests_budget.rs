use crate::memtable::Memtable;
use crate::record::Record;

#[test]
fn test_is_full_at_exact_budget() {
    let rec = Record::new_scalar(0, 1.0);
    let one = rec.approximate_size();

    // Budget for exactly three records.
    let memtable = Memtable::new(3 * one);
    memtable.put(1, Record::new_scalar(1, 1.0)).unwrap();
    memtable.put(2, Record::new_scalar(2, 2.0)).unwrap();
    assert!(!memtable.is_full());

    // The third insert lands exactly on the budget; the table reports
    // full so the next write triggers the swap, and no record is lost.
    memtable.put(3, Record::new_scalar(3, 3.0)).unwrap();
    assert!(memtable.is_full());
    assert_eq!(memtable.len(), 3);
}

#[test]
fn test_replacement_does_not_grow_estimate() {
    let memtable = Memtable::new(1024 * 1024);
    memtable.put(1, Record::new_scalar(1, 1.0)).unwrap();
    let size_after_first = memtable.approximate_size();

    for _ in 0..100 {
        memtable.put(1, Record::new_scalar(1, 2.0)).unwrap();
    }
    assert_eq!(memtable.approximate_size(), size_after_first);
}

#[test]
fn test_size_accounts_for_tags_and_vectors() {
    let memtable = Memtable::new(1024 * 1024);
    memtable.put(1, Record::new_scalar(1, 1.0)).unwrap();
    let scalar_size = memtable.approximate_size();

    memtable.clear().unwrap();
    memtable
        .put(
            1,
            Record::new_vector(1, vec![0.0; 100]).with_tag("sensor", "a-long-sensor-name"),
        )
        .unwrap();
    assert!(memtable.approximate_size() > scalar_size);
}

#[test]
fn test_load_replaces_contents_and_recomputes_size() {
    let memtable = Memtable::new(1024 * 1024);
    memtable.put(99, Record::new_scalar(99, 9.0)).unwrap();

    let mut entries = std::collections::BTreeMap::new();
    entries.insert(1, Record::new_scalar(1, 1.0));
    entries.insert(2, Record::new_scalar(2, 2.0));
    memtable.load(entries).unwrap();

    assert_eq!(memtable.len(), 2);
    assert!(memtable.get(99).unwrap().is_none());
    assert!(memtable.approximate_size() > 0);
}
