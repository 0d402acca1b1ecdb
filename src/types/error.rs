use thiserror::Error;

use crate::types::{PageNumber, Uid, Xid};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transaction ledger is corrupt: {reason}")]
    CorruptLedger { reason: String },

    #[error("log file is corrupt: {reason}")]
    CorruptLog { reason: String },

    #[error("page {page} is corrupt: {reason}")]
    CorruptPage { page: PageNumber, reason: String },

    #[error("cache is exhausted, all entries are checked out")]
    CacheExhausted,

    #[error("cache memory budget too small: {pages} pages (minimum {min})")]
    CacheTooSmall { pages: usize, min: usize },

    #[error("record too large: {size} bytes (maximum {max})")]
    RecordTooLarge { size: usize, max: usize },

    #[error("database is busy")]
    Busy,

    #[error("deadlock detected")]
    Deadlock,

    #[error("concurrent update conflict")]
    ConcurrentUpdate,

    #[error("transaction {0} is not active")]
    TransactionNotActive(Xid),

    #[error("no data item at uid {0:#x}")]
    DataNotFound(Uid),
}

pub type Result<T> = std::result::Result<T, EngineError>;
