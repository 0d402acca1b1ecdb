use std::fs::OpenOptions;
use std::io::Write;

use lumbung::ledger::{ledger_path, TransactionLedger, SUPER_XID};
use lumbung::types::error::EngineError;
use tempfile::TempDir;

fn temp_base(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("test")
}

#[test]
fn test_begin_commit_abort_statuses() {
    let dir = TempDir::new().unwrap();
    let ledger = TransactionLedger::create(temp_base(&dir)).unwrap();

    let first = ledger.begin().unwrap();
    assert_eq!(first, 1);
    assert!(ledger.is_active(first).unwrap());
    assert!(!ledger.is_committed(first).unwrap());

    ledger.commit(first).unwrap();
    assert!(!ledger.is_active(first).unwrap());
    assert!(ledger.is_committed(first).unwrap());

    let second = ledger.begin().unwrap();
    assert_eq!(second, 2);
    ledger.abort(second).unwrap();
    assert!(ledger.is_aborted(second).unwrap());
    assert!(!ledger.is_committed(second).unwrap());
}

#[test]
fn test_super_transaction_is_always_committed() {
    let dir = TempDir::new().unwrap();
    let ledger = TransactionLedger::create(temp_base(&dir)).unwrap();

    assert!(ledger.is_committed(SUPER_XID).unwrap());
    assert!(!ledger.is_active(SUPER_XID).unwrap());
    assert!(!ledger.is_aborted(SUPER_XID).unwrap());
}

#[test]
fn test_statuses_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let base = temp_base(&dir);

    let ledger = TransactionLedger::create(&base).unwrap();
    let committed = ledger.begin().unwrap();
    ledger.commit(committed).unwrap();
    let aborted = ledger.begin().unwrap();
    ledger.abort(aborted).unwrap();
    ledger.close().unwrap();
    drop(ledger);

    let ledger = TransactionLedger::open(&base).unwrap();
    assert!(ledger.is_committed(committed).unwrap());
    assert!(ledger.is_aborted(aborted).unwrap());
    // The counter picks up where it left off.
    assert_eq!(ledger.begin().unwrap(), 3);
}

#[test]
fn test_length_mismatch_refuses_to_open() {
    let dir = TempDir::new().unwrap();
    let base = temp_base(&dir);

    let ledger = TransactionLedger::create(&base).unwrap();
    ledger.begin().unwrap();
    drop(ledger);

    // A stray byte makes the file longer than the counter accounts for.
    let mut file = OpenOptions::new()
        .append(true)
        .open(ledger_path(&base))
        .unwrap();
    file.write_all(&[0]).unwrap();
    drop(file);

    let result = TransactionLedger::open(&base);
    assert!(matches!(result, Err(EngineError::CorruptLedger { .. })));
}
