use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::data::DataManager;
use crate::ledger::{self, TransactionLedger};
use crate::types::error::Result;
use crate::types::{Uid, Xid};
use crate::version::transaction::IsolationLevel;
use crate::version::VersionManager;

pub struct EngineOptions {
    /// Page-cache memory budget in bytes.
    pub memory: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            memory: 64 << 20,
        }
    }
}

/// The assembled storage engine: transaction ledger, data manager and
/// version manager behind the narrow transactional record interface.
pub struct Engine {
    ledger: Arc<TransactionLedger>,
    dm: Arc<DataManager>,
    vm: VersionManager,
}

impl Engine {
    /// Open the database at `base`, creating it first if its files do not
    /// exist yet.
    pub fn new<P: AsRef<Path>>(base: P, options: EngineOptions) -> Result<Self> {
        let base = base.as_ref();
        if ledger::ledger_path(base).exists() {
            info!(path = %base.display(), "opening existing database");
            Self::open(base, options)
        } else {
            info!(path = %base.display(), "creating new database");
            Self::create(base, options)
        }
    }

    pub fn create<P: AsRef<Path>>(base: P, options: EngineOptions) -> Result<Self> {
        let ledger = Arc::new(TransactionLedger::create(&base)?);
        let dm = Arc::new(DataManager::create(&base, options.memory, Arc::clone(&ledger))?);
        let vm = VersionManager::new(Arc::clone(&ledger), Arc::clone(&dm));
        Ok(Self { ledger, dm, vm })
    }

    pub fn open<P: AsRef<Path>>(base: P, options: EngineOptions) -> Result<Self> {
        let ledger = Arc::new(TransactionLedger::open(&base)?);
        let dm = Arc::new(DataManager::open(&base, options.memory, Arc::clone(&ledger))?);
        let vm = VersionManager::new(Arc::clone(&ledger), Arc::clone(&dm));
        Ok(Self { ledger, dm, vm })
    }

    pub fn begin(&self, level: IsolationLevel) -> Result<Xid> {
        self.vm.begin(level)
    }

    pub fn commit(&self, xid: Xid) -> Result<()> {
        self.vm.commit(xid)
    }

    pub fn abort(&self, xid: Xid) -> Result<()> {
        self.vm.abort(xid)
    }

    pub fn read(&self, xid: Xid, uid: Uid) -> Result<Option<Vec<u8>>> {
        self.vm.read(xid, uid)
    }

    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        self.vm.insert(xid, data)
    }

    pub fn delete(&self, xid: Xid, uid: Uid) -> Result<bool> {
        self.vm.delete(xid, uid)
    }

    /// Shut down cleanly: evict every cache and stamp page one so the next
    /// open skips recovery.
    pub fn close(&self) -> Result<()> {
        self.vm.close()?;
        self.dm.close()?;
        self.ledger.close()
    }
}
