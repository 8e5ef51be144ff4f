use crate::record::Record;
use crate::wal::Wal;
use std::fs::OpenOptions;
use std::io::Write;
use tempfile::TempDir;

#[test]
fn test_clear_empties_the_log() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("wal.log");
    let wal = Wal::open(&path).unwrap();

    wal.append(1, &Record::new_scalar(1, 1.0)).unwrap();
    wal.append(2, &Record::new_scalar(2, 2.0)).unwrap();
    assert!(wal.file_size().unwrap() > 0);

    wal.clear().unwrap();
    assert_eq!(wal.file_size().unwrap(), 0);
    assert!(wal.recover().unwrap().is_empty());
}

#[test]
fn test_append_after_clear() {
    let tmp = TempDir::new().unwrap();
    let wal = Wal::open(tmp.path().join("wal.log")).unwrap();

    wal.append(1, &Record::new_scalar(1, 1.0)).unwrap();
    wal.clear().unwrap();
    wal.append(2, &Record::new_scalar(2, 2.0)).unwrap();

    let recovered = wal.recover().unwrap();
    assert_eq!(recovered.len(), 1);
    assert!(recovered.contains_key(&2));
}

#[test]
fn test_partial_trailing_frame_is_dropped() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("wal.log");

    {
        let wal = Wal::open(&path).unwrap();
        wal.append(10, &Record::new_scalar(10, 1.0)).unwrap();
        wal.append(20, &Record::new_scalar(20, 2.0)).unwrap();
        wal.sync().unwrap();
    }

    // Simulate a crash mid-append: a length prefix promising more bytes
    // than were written.
    {
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&1000u32.to_le_bytes()).unwrap();
        file.write_all(&[0xAB; 10]).unwrap();
        file.sync_all().unwrap();
    }

    let wal = Wal::open(&path).unwrap();
    let recovered = wal.recover().unwrap();
    assert_eq!(recovered.len(), 2);
    assert_eq!(recovered[&10].scalar_value(), 1.0);
    assert_eq!(recovered[&20].scalar_value(), 2.0);
}

#[test]
fn test_partial_length_prefix_is_dropped() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("wal.log");

    {
        let wal = Wal::open(&path).unwrap();
        wal.append(1, &Record::new_scalar(1, 1.0)).unwrap();
    }

    // Two stray bytes: not even a full length prefix.
    {
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x01, 0x02]).unwrap();
        file.sync_all().unwrap();
    }

    let wal = Wal::open(&path).unwrap();
    assert_eq!(wal.recover().unwrap().len(), 1);
}

#[test]
fn test_oversized_frame_length_stops_replay() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("wal.log");

    {
        let wal = Wal::open(&path).unwrap();
        wal.append(1, &Record::new_scalar(1, 1.0)).unwrap();
    }

    // A corrupted length prefix far beyond the frame cap.
    {
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&u32::MAX.to_le_bytes()).unwrap();
        file.sync_all().unwrap();
    }

    let wal = Wal::open(&path).unwrap();
    let recovered = wal.recover().unwrap();
    assert_eq!(recovered.len(), 1);
}
