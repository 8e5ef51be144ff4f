use crate::record::Record;
use crate::wal::Wal;
use tempfile::TempDir;

fn wal_in(dir: &TempDir) -> Wal {
    Wal::open(dir.path().join("wal.log")).unwrap()
}

#[test]
fn test_append_and_recover() {
    let tmp = TempDir::new().unwrap();
    let wal = wal_in(&tmp);

    wal.append(100, &Record::new_scalar(100, 1.0)).unwrap();
    wal.append(200, &Record::new_scalar(200, 2.0)).unwrap();
    wal.append(150, &Record::new_scalar(150, 1.5)).unwrap();

    let recovered = wal.recover().unwrap();
    assert_eq!(recovered.len(), 3);
    assert_eq!(recovered[&100].scalar_value(), 1.0);
    assert_eq!(recovered[&150].scalar_value(), 1.5);
    assert_eq!(recovered[&200].scalar_value(), 2.0);

    // BTreeMap iteration is ascending by timestamp.
    let keys: Vec<i64> = recovered.keys().copied().collect();
    assert_eq!(keys, vec![100, 150, 200]);
}

#[test]
fn test_recover_last_write_wins_per_timestamp() {
    let tmp = TempDir::new().unwrap();
    let wal = wal_in(&tmp);

    wal.append(42, &Record::new_scalar(42, 1.0)).unwrap();
    wal.append(42, &Record::new_scalar(42, 9.0)).unwrap();

    let recovered = wal.recover().unwrap();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[&42].scalar_value(), 9.0);
}

#[test]
fn test_recover_empty_wal() {
    let tmp = TempDir::new().unwrap();
    let wal = wal_in(&tmp);
    assert!(wal.recover().unwrap().is_empty());
}

#[test]
fn test_recover_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("wal.log");

    {
        let wal = Wal::open(&path).unwrap();
        for ts in 0..100i64 {
            wal.append(ts, &Record::new_scalar(ts, ts as f64)).unwrap();
        }
        wal.sync().unwrap();
    }

    let wal = Wal::open(&path).unwrap();
    let recovered = wal.recover().unwrap();
    assert_eq!(recovered.len(), 100);
    assert_eq!(recovered[&57].scalar_value(), 57.0);
}

#[test]
fn test_append_after_recover_is_visible() {
    let tmp = TempDir::new().unwrap();
    let wal = wal_in(&tmp);

    wal.append(1, &Record::new_scalar(1, 1.0)).unwrap();
    let _ = wal.recover().unwrap();
    wal.append(2, &Record::new_scalar(2, 2.0)).unwrap();

    let recovered = wal.recover().unwrap();
    assert_eq!(recovered.len(), 2);
}

#[test]
fn test_records_with_tags_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let wal = wal_in(&tmp);

    let rec = Record::new_vector(7, vec![1.0, 2.0])
        .with_tag("stream", "s")
        .with_field("note", "joined");
    wal.append(7, &rec).unwrap();

    let recovered = wal.recover().unwrap();
    assert_eq!(recovered[&7], rec);
}
