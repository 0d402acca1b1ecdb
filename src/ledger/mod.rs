use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::types::error::{EngineError, Result};
use crate::types::Xid;

pub const XID_SUFFIX: &str = ".xid";

/// The super transaction. It is permanently committed and backs internal
/// writes that do not belong to any client transaction.
pub const SUPER_XID: Xid = 0;

// File layout: an 8-byte big-endian XID counter, then one status byte per
// transaction, XID 1 first.
const HEADER_LEN: u64 = 8;

const STATUS_ACTIVE: u8 = 0;
const STATUS_COMMITTED: u8 = 1;
const STATUS_ABORTED: u8 = 2;

/// Durable map from XID to transaction status, and the source of new XIDs.
pub struct TransactionLedger {
    inner: Mutex<LedgerInner>,
}

struct LedgerInner {
    file: File,
    counter: u64,
}

impl TransactionLedger {
    pub fn create<P: AsRef<Path>>(base: P) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(ledger_path(base.as_ref()))?;
        file.write_all(&0u64.to_be_bytes())?;
        file.sync_data()?;
        Ok(Self {
            inner: Mutex::new(LedgerInner { file, counter: 0 }),
        })
    }

    /// Open an existing ledger and validate the counter against the file
    /// length. A mismatch means the ledger cannot be trusted and the engine
    /// must not start.
    pub fn open<P: AsRef<Path>>(base: P) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(ledger_path(base.as_ref()))?;
        let len = file.metadata()?.len();
        if len < HEADER_LEN {
            return Err(EngineError::CorruptLedger {
                reason: format!("file is {len} bytes, shorter than the header"),
            });
        }
        let mut header = [0u8; 8];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;
        let counter = u64::from_be_bytes(header);
        if len != HEADER_LEN + counter {
            return Err(EngineError::CorruptLedger {
                reason: format!("counter {counter} does not match file length {len}"),
            });
        }
        Ok(Self {
            inner: Mutex::new(LedgerInner { file, counter }),
        })
    }

    /// Reserve the next XID, record it as active, and persist the counter.
    pub fn begin(&self) -> Result<Xid> {
        let mut inner = self.inner.lock();
        let xid = inner.counter + 1;
        inner.write_status(xid, STATUS_ACTIVE)?;
        inner.file.seek(SeekFrom::Start(0))?;
        inner.file.write_all(&xid.to_be_bytes())?;
        inner.file.sync_data()?;
        inner.counter = xid;
        Ok(xid)
    }

    pub fn commit(&self, xid: Xid) -> Result<()> {
        if xid == SUPER_XID {
            return Ok(());
        }
        self.inner.lock().write_status(xid, STATUS_COMMITTED)
    }

    pub fn abort(&self, xid: Xid) -> Result<()> {
        if xid == SUPER_XID {
            return Ok(());
        }
        self.inner.lock().write_status(xid, STATUS_ABORTED)
    }

    pub fn is_active(&self, xid: Xid) -> Result<bool> {
        if xid == SUPER_XID {
            return Ok(false);
        }
        Ok(self.inner.lock().read_status(xid)? == STATUS_ACTIVE)
    }

    pub fn is_committed(&self, xid: Xid) -> Result<bool> {
        if xid == SUPER_XID {
            return Ok(true);
        }
        Ok(self.inner.lock().read_status(xid)? == STATUS_COMMITTED)
    }

    pub fn is_aborted(&self, xid: Xid) -> Result<bool> {
        if xid == SUPER_XID {
            return Ok(false);
        }
        Ok(self.inner.lock().read_status(xid)? == STATUS_ABORTED)
    }

    pub fn close(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}

impl LedgerInner {
    fn status_position(xid: Xid) -> u64 {
        HEADER_LEN + (xid - 1)
    }

    fn write_status(&mut self, xid: Xid, status: u8) -> Result<()> {
        self.file.seek(SeekFrom::Start(Self::status_position(xid)))?;
        self.file.write_all(&[status])?;
        self.file.sync_data()?;
        Ok(())
    }

    fn read_status(&mut self, xid: Xid) -> Result<u8> {
        let mut status = [0u8; 1];
        self.file.seek(SeekFrom::Start(Self::status_position(xid)))?;
        self.file.read_exact(&mut status)?;
        Ok(status[0])
    }
}

pub fn ledger_path(base: &Path) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(XID_SUFFIX);
    PathBuf::from(name)
}
