use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lumbung::engine::{Engine, EngineOptions};
use lumbung::ledger::SUPER_XID;
use lumbung::types::error::EngineError;
use lumbung::version::transaction::IsolationLevel::{ReadCommitted, RepeatableRead};
use tempfile::TempDir;

fn test_engine(dir: &TempDir) -> Engine {
    Engine::create(
        dir.path().join("test"),
        EngineOptions { memory: 1 << 21 },
    )
    .unwrap()
}

/// Insert and commit one record, returning its handle.
fn seed(engine: &Engine, data: &[u8]) -> u64 {
    let xid = engine.begin(ReadCommitted).unwrap();
    let uid = engine.insert(xid, data).unwrap();
    engine.commit(xid).unwrap();
    uid
}

#[test]
fn test_read_committed_sees_only_committed_writes() {
    let dir = TempDir::new().unwrap();
    let engine = test_engine(&dir);

    let writer = engine.begin(ReadCommitted).unwrap();
    let uid = engine.insert(writer, b"pending").unwrap();

    // The writer sees its own uncommitted insert; nobody else does.
    assert_eq!(engine.read(writer, uid).unwrap().unwrap(), b"pending");
    let reader = engine.begin(ReadCommitted).unwrap();
    assert_eq!(engine.read(reader, uid).unwrap(), None);

    engine.commit(writer).unwrap();
    assert_eq!(engine.read(reader, uid).unwrap().unwrap(), b"pending");

    engine.commit(reader).unwrap();
    engine.close().unwrap();
}

#[test]
fn test_repeatable_read_ignores_later_commits() {
    let dir = TempDir::new().unwrap();
    let engine = test_engine(&dir);

    let writer = engine.begin(ReadCommitted).unwrap();
    let uid = engine.insert(writer, b"late arrival").unwrap();

    // Snapshot taken while the writer is still active.
    let reader = engine.begin(RepeatableRead).unwrap();
    engine.commit(writer).unwrap();

    assert_eq!(engine.read(reader, uid).unwrap(), None);
    // Still invisible on a second read within the same transaction.
    assert_eq!(engine.read(reader, uid).unwrap(), None);

    // A snapshot taken after the commit sees it.
    let fresh = engine.begin(RepeatableRead).unwrap();
    assert_eq!(engine.read(fresh, uid).unwrap().unwrap(), b"late arrival");

    engine.commit(reader).unwrap();
    engine.commit(fresh).unwrap();
    engine.close().unwrap();
}

#[test]
fn test_delete_hides_record_and_repeats_as_noop() {
    let dir = TempDir::new().unwrap();
    let engine = test_engine(&dir);
    let uid = seed(&engine, b"short lived");

    let xid = engine.begin(ReadCommitted).unwrap();
    assert!(engine.delete(xid, uid).unwrap());
    // Deleting again inside the same transaction is a no-op.
    assert!(!engine.delete(xid, uid).unwrap());
    assert_eq!(engine.read(xid, uid).unwrap(), None);
    engine.commit(xid).unwrap();

    let later = engine.begin(ReadCommitted).unwrap();
    assert_eq!(engine.read(later, uid).unwrap(), None);
    engine.commit(later).unwrap();
    engine.close().unwrap();
}

#[test]
fn test_uncommitted_delete_stays_invisible_to_others() {
    let dir = TempDir::new().unwrap();
    let engine = test_engine(&dir);
    let uid = seed(&engine, b"contended");

    let deleter = engine.begin(ReadCommitted).unwrap();
    assert!(engine.delete(deleter, uid).unwrap());

    let reader = engine.begin(ReadCommitted).unwrap();
    assert_eq!(engine.read(reader, uid).unwrap().unwrap(), b"contended");

    engine.commit(deleter).unwrap();
    assert_eq!(engine.read(reader, uid).unwrap(), None);

    engine.commit(reader).unwrap();
    engine.close().unwrap();
}

#[test]
fn test_version_skip_aborts_the_overtaken_transaction() {
    let dir = TempDir::new().unwrap();
    let engine = test_engine(&dir);
    let uid = seed(&engine, b"target");

    let slow = engine.begin(RepeatableRead).unwrap();
    let fast = engine.begin(RepeatableRead).unwrap();

    assert!(engine.delete(fast, uid).unwrap());
    engine.commit(fast).unwrap();

    // `fast` deleted the version `slow` was about to act on; `slow` must
    // fail rather than overwrite, and stays dead afterwards.
    assert!(matches!(
        engine.delete(slow, uid),
        Err(EngineError::ConcurrentUpdate)
    ));
    assert!(matches!(
        engine.read(slow, uid),
        Err(EngineError::ConcurrentUpdate)
    ));
    // Rolling back an auto-aborted transaction is harmless.
    engine.abort(slow).unwrap();
    engine.close().unwrap();
}

#[test]
fn test_crossing_deletes_deadlock_one_transaction() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(test_engine(&dir));
    let first = seed(&engine, b"resource one");
    let second = seed(&engine, b"resource two");

    let a = engine.begin(ReadCommitted).unwrap();
    let b = engine.begin(ReadCommitted).unwrap();

    assert!(engine.delete(a, first).unwrap());
    assert!(engine.delete(b, second).unwrap());

    // a queues behind b on `second`; once b also wants `first` the wait
    // graph closes into a cycle and b is rejected.
    let blocked = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.delete(a, second))
    };
    thread::sleep(Duration::from_millis(100));

    assert!(matches!(engine.delete(b, first), Err(EngineError::Deadlock)));

    // b's auto-abort released its lock, so a's delete goes through.
    assert!(blocked.join().unwrap().unwrap());
    engine.commit(a).unwrap();
    assert!(matches!(
        engine.commit(b),
        Err(EngineError::Deadlock)
    ));
    engine.abort(b).unwrap();
    engine.close().unwrap();
}

#[test]
fn test_super_transaction_writes_and_reads() {
    let dir = TempDir::new().unwrap();
    let engine = test_engine(&dir);

    let uid = engine.insert(SUPER_XID, b"internal record").unwrap();
    assert_eq!(
        engine.read(SUPER_XID, uid).unwrap().unwrap(),
        b"internal record"
    );

    // Super writes are committed from the start.
    let reader = engine.begin(ReadCommitted).unwrap();
    assert_eq!(
        engine.read(reader, uid).unwrap().unwrap(),
        b"internal record"
    );
    engine.commit(reader).unwrap();
    engine.close().unwrap();
}

#[test]
fn test_visibility_survives_crash_recovery() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("test");

    let (kept, lost) = {
        let engine = Engine::create(&base, EngineOptions { memory: 1 << 21 }).unwrap();
        let committed = engine.begin(ReadCommitted).unwrap();
        let kept = engine.insert(committed, b"committed row").unwrap();
        engine.commit(committed).unwrap();

        let interrupted = engine.begin(ReadCommitted).unwrap();
        let lost = engine.insert(interrupted, b"uncommitted row").unwrap();
        // Crash without close or commit.
        drop(engine);
        (kept, lost)
    };

    let engine = Engine::open(&base, EngineOptions { memory: 1 << 21 }).unwrap();
    let reader = engine.begin(ReadCommitted).unwrap();
    assert_eq!(engine.read(reader, kept).unwrap().unwrap(), b"committed row");
    assert_eq!(engine.read(reader, lost).unwrap(), None);
    engine.commit(reader).unwrap();
    engine.close().unwrap();
}
