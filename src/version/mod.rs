pub mod entry;
pub mod lock_table;
pub mod transaction;
pub mod visibility;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::cache::RefCountCache;
use crate::data::DataManager;
use crate::ledger::{TransactionLedger, SUPER_XID};
use crate::types::error::{EngineError, Result};
use crate::types::{Uid, Xid};
use crate::version::entry::Entry;
use crate::version::lock_table::LockTable;
use crate::version::transaction::{Conflict, IsolationLevel, Transaction};

/// Multi-version record access on top of the data manager.
///
/// Every stored record is an entry stamped with its creating and deleting
/// XIDs; reads apply the isolation level's visibility rule, deletes go
/// through the lock table so write-write races either wait or fail fast as
/// deadlocks.
pub struct VersionManager {
    ledger: Arc<TransactionLedger>,
    dm: Arc<DataManager>,
    active: Mutex<HashMap<Xid, Arc<Transaction>>>,
    lock_table: LockTable,
    entries: RefCountCache<Arc<Entry>>,
}

impl VersionManager {
    pub fn new(ledger: Arc<TransactionLedger>, dm: Arc<DataManager>) -> Self {
        let release_dm = Arc::clone(&dm);
        let entries = RefCountCache::new(0, move |entry: &Arc<Entry>| {
            release_dm.release_item(entry.item())
        });
        let mut active = HashMap::new();
        // The super transaction backs internal reads and writes and is
        // always considered running.
        active.insert(
            SUPER_XID,
            Arc::new(Transaction::new(
                SUPER_XID,
                IsolationLevel::ReadCommitted,
                &HashMap::<Xid, ()>::new(),
            )),
        );
        Self {
            ledger,
            dm,
            active: Mutex::new(active),
            lock_table: LockTable::new(),
            entries,
        }
    }

    /// Start a transaction at the given isolation level.
    pub fn begin(&self, level: IsolationLevel) -> Result<Xid> {
        // Holding the map across ledger.begin keeps the snapshot consistent
        // with the set of transactions that can still commit under us.
        let mut active = self.active.lock();
        let xid = self.ledger.begin()?;
        let txn = Arc::new(Transaction::new(xid, level, &active));
        active.insert(xid, txn);
        debug!(xid, ?level, "transaction started");
        Ok(xid)
    }

    pub fn commit(&self, xid: Xid) -> Result<()> {
        let txn = self.transaction(xid)?;
        txn.check_conflict()?;
        self.active.lock().remove(&xid);
        self.lock_table.release_all(xid);
        self.ledger.commit(xid)
    }

    pub fn abort(&self, xid: Xid) -> Result<()> {
        self.intern_abort(xid, false)
    }

    /// Read the record at `uid` as seen by `xid`, or None when no version
    /// is visible.
    pub fn read(&self, xid: Xid, uid: Uid) -> Result<Option<Vec<u8>>> {
        let txn = self.transaction(xid)?;
        txn.check_conflict()?;

        let entry = match self.get_entry(uid) {
            Ok(entry) => entry,
            Err(EngineError::DataNotFound(_)) => return Ok(None),
            Err(err) => return Err(err),
        };
        let outcome = match visibility::is_visible(&self.ledger, &txn, &entry) {
            Ok(true) => Ok(Some(entry.data())),
            Ok(false) => Ok(None),
            Err(err) => Err(err),
        };
        self.release_entry(&entry)?;
        outcome
    }

    /// Store a new record version created by `xid`.
    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        let txn = self.transaction(xid)?;
        txn.check_conflict()?;
        let raw = Entry::wrap_raw(xid, data);
        self.dm.insert(xid, &raw)
    }

    /// Logically delete the version at `uid`. Returns false when there is
    /// nothing for this transaction to delete; a write-write conflict or
    /// deadlock aborts the transaction and surfaces the error.
    pub fn delete(&self, xid: Xid, uid: Uid) -> Result<bool> {
        let txn = self.transaction(xid)?;
        txn.check_conflict()?;

        let entry = match self.get_entry(uid) {
            Ok(entry) => entry,
            Err(EngineError::DataNotFound(_)) => return Ok(false),
            Err(err) => return Err(err),
        };
        let outcome = self.delete_entry(&txn, &entry, xid, uid);
        self.release_entry(&entry)?;
        outcome
    }

    /// Evict the entry cache, releasing every underlying data item.
    pub fn close(&self) -> Result<()> {
        self.entries.close()
    }

    fn delete_entry(
        &self,
        txn: &Transaction,
        entry: &Entry,
        xid: Xid,
        uid: Uid,
    ) -> Result<bool> {
        if !visibility::is_visible(&self.ledger, txn, entry)? {
            return Ok(false);
        }
        if visibility::is_version_skip(&self.ledger, txn, entry)? {
            return Err(self.conflict_abort(txn, Conflict::VersionSkip));
        }

        match self.lock_table.acquire(xid, uid) {
            Ok(None) => {}
            Ok(Some(handle)) => handle.wait(),
            Err(EngineError::Deadlock) => {
                return Err(self.conflict_abort(txn, Conflict::Deadlock));
            }
            Err(err) => return Err(err),
        }

        if entry.xmax() == xid {
            // Already deleted by this transaction.
            return Ok(false);
        }
        // A competing delete may have committed while we were queued.
        if visibility::is_version_skip(&self.ledger, txn, entry)? {
            return Err(self.conflict_abort(txn, Conflict::VersionSkip));
        }

        entry.set_xmax(&self.dm, xid)?;
        Ok(true)
    }

    /// Record the conflict on the transaction, roll it back, and hand the
    /// caller the error to propagate.
    fn conflict_abort(&self, txn: &Transaction, conflict: Conflict) -> EngineError {
        txn.set_conflict(conflict);
        debug!(xid = txn.xid, ?conflict, "aborting transaction on conflict");
        match self.intern_abort(txn.xid, true) {
            Ok(()) => conflict.into_error(),
            Err(err) => err,
        }
    }

    fn intern_abort(&self, xid: Xid, auto: bool) -> Result<()> {
        let txn = {
            let mut active = self.active.lock();
            let txn = active
                .get(&xid)
                .cloned()
                .ok_or(EngineError::TransactionNotActive(xid))?;
            if !auto {
                active.remove(&xid);
            }
            txn
        };
        if !txn.claim_abort(auto) {
            // Already rolled back by an earlier conflict.
            return Ok(());
        }
        self.lock_table.release_all(xid);
        self.ledger.abort(xid)
    }

    fn transaction(&self, xid: Xid) -> Result<Arc<Transaction>> {
        self.active
            .lock()
            .get(&xid)
            .cloned()
            .ok_or(EngineError::TransactionNotActive(xid))
    }

    fn get_entry(&self, uid: Uid) -> Result<Arc<Entry>> {
        self.entries.get(uid, || {
            match self.dm.read(uid)? {
                Some(item) => Ok(Arc::new(Entry::new(uid, item))),
                None => Err(EngineError::DataNotFound(uid)),
            }
        })
    }

    fn release_entry(&self, entry: &Entry) -> Result<()> {
        self.entries.release(entry.uid())
    }
}
