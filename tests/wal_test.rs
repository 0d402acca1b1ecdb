use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};

use lumbung::wal::{log_path, Wal};
use tempfile::TempDir;

fn temp_base(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("test")
}

fn collect_records(wal: &Wal) -> Vec<Vec<u8>> {
    wal.rewind();
    let mut records = Vec::new();
    while let Some(record) = wal.next().unwrap() {
        records.push(record);
    }
    records
}

#[test]
fn test_append_and_replay() {
    let dir = TempDir::new().unwrap();
    let wal = Wal::create(temp_base(&dir)).unwrap();

    wal.append(b"first").unwrap();
    wal.append(b"second record").unwrap();
    wal.append(&[0u8; 64]).unwrap();

    let records = collect_records(&wal);
    assert_eq!(records.len(), 3);
    assert_eq!(records[0], b"first");
    assert_eq!(records[1], b"second record");
    assert_eq!(records[2], vec![0u8; 64]);
}

#[test]
fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let base = temp_base(&dir);

    let wal = Wal::create(&base).unwrap();
    wal.append(b"alpha").unwrap();
    wal.append(b"beta").unwrap();
    wal.close().unwrap();
    drop(wal);

    let wal = Wal::open(&base).unwrap();
    let records = collect_records(&wal);
    assert_eq!(records, vec![b"alpha".to_vec(), b"beta".to_vec()]);

    // The running checksum continues seamlessly after reopen.
    wal.append(b"gamma").unwrap();
    drop(wal);
    let wal = Wal::open(&base).unwrap();
    assert_eq!(collect_records(&wal).len(), 3);
}

#[test]
fn test_corrupted_tail_record_is_dropped() {
    let dir = TempDir::new().unwrap();
    let base = temp_base(&dir);

    let wal = Wal::create(&base).unwrap();
    wal.append(b"keep one").unwrap();
    wal.append(b"keep two").unwrap();
    wal.append(b"mangled").unwrap();
    drop(wal);

    // Flip the last payload byte so the final record fails its checksum.
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(log_path(&base))
        .unwrap();
    let len = file.metadata().unwrap().len();
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1)).unwrap();
    file.read_exact(&mut byte).unwrap();
    file.seek(SeekFrom::Start(len - 1)).unwrap();
    file.write_all(&[byte[0] ^ 0xFF]).unwrap();
    drop(file);

    let wal = Wal::open(&base).unwrap();
    let records = collect_records(&wal);
    assert_eq!(records, vec![b"keep one".to_vec(), b"keep two".to_vec()]);

    // The log is fully usable again after the trim.
    wal.append(b"after repair").unwrap();
    drop(wal);
    let wal = Wal::open(&base).unwrap();
    assert_eq!(collect_records(&wal).len(), 3);
}

#[test]
fn test_truncated_tail_is_dropped() {
    let dir = TempDir::new().unwrap();
    let base = temp_base(&dir);

    let wal = Wal::create(&base).unwrap();
    wal.append(b"whole").unwrap();
    wal.append(b"torn away").unwrap();
    drop(wal);

    // Chop into the middle of the last frame, as a crashed write would.
    let file = OpenOptions::new()
        .write(true)
        .open(log_path(&base))
        .unwrap();
    let len = file.metadata().unwrap().len();
    file.set_len(len - 4).unwrap();
    drop(file);

    let wal = Wal::open(&base).unwrap();
    assert_eq!(collect_records(&wal), vec![b"whole".to_vec()]);
}
