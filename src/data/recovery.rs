use std::collections::HashMap;

use tracing::info;

use crate::data::item::DataItem;
use crate::ledger::TransactionLedger;
use crate::storage::data_page;
use crate::storage::page_cache::PageCache;
use crate::types::error::{EngineError, Result};
use crate::types::{uid_offset, uid_page, PageNumber, Uid, Xid};
use crate::wal::Wal;

// Log record formats, after WAL framing:
//   insert: [type:1][xid:8][page:4][offset:2][raw]
//   update: [type:1][xid:8][uid:8][old raw][new raw], halves equal length
const TYPE_INSERT: u8 = 0;
const TYPE_UPDATE: u8 = 1;

pub(crate) fn insert_record(xid: Xid, page: PageNumber, offset: u16, raw: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(15 + raw.len());
    record.push(TYPE_INSERT);
    record.extend_from_slice(&xid.to_be_bytes());
    record.extend_from_slice(&page.to_be_bytes());
    record.extend_from_slice(&offset.to_be_bytes());
    record.extend_from_slice(raw);
    record
}

pub(crate) fn update_record(xid: Xid, uid: Uid, old: &[u8], new: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(17 + old.len() + new.len());
    record.push(TYPE_UPDATE);
    record.extend_from_slice(&xid.to_be_bytes());
    record.extend_from_slice(&uid.to_be_bytes());
    record.extend_from_slice(old);
    record.extend_from_slice(new);
    record
}

enum LogRecord {
    Insert {
        xid: Xid,
        page: PageNumber,
        offset: u16,
        raw: Vec<u8>,
    },
    Update {
        xid: Xid,
        page: PageNumber,
        offset: u16,
        old: Vec<u8>,
        new: Vec<u8>,
    },
}

impl LogRecord {
    fn xid(&self) -> Xid {
        match self {
            LogRecord::Insert { xid, .. } | LogRecord::Update { xid, .. } => *xid,
        }
    }

    fn page(&self) -> PageNumber {
        match self {
            LogRecord::Insert { page, .. } | LogRecord::Update { page, .. } => *page,
        }
    }
}

fn parse_record(record: &[u8]) -> Result<LogRecord> {
    let corrupt = |reason: &str| EngineError::CorruptLog {
        reason: reason.to_string(),
    };
    if record.is_empty() {
        return Err(corrupt("empty record"));
    }
    match record[0] {
        TYPE_INSERT => {
            if record.len() < 15 {
                return Err(corrupt("insert record too short"));
            }
            let xid = u64::from_be_bytes(record[1..9].try_into().unwrap());
            let page = u32::from_be_bytes(record[9..13].try_into().unwrap());
            let offset = u16::from_be_bytes(record[13..15].try_into().unwrap());
            Ok(LogRecord::Insert {
                xid,
                page,
                offset,
                raw: record[15..].to_vec(),
            })
        }
        TYPE_UPDATE => {
            if record.len() < 17 || (record.len() - 17) % 2 != 0 {
                return Err(corrupt("update record malformed"));
            }
            let xid = u64::from_be_bytes(record[1..9].try_into().unwrap());
            let uid = u64::from_be_bytes(record[9..17].try_into().unwrap());
            let half = (record.len() - 17) / 2;
            Ok(LogRecord::Update {
                xid,
                page: uid_page(uid),
                offset: uid_offset(uid),
                old: record[17..17 + half].to_vec(),
                new: record[17 + half..].to_vec(),
            })
        }
        other => Err(corrupt(&format!("unknown record type {other}"))),
    }
}

/// Replay the log against the page file after an unclean shutdown.
///
/// One forward pass re-applies work whose transaction is not known to be
/// live (redo), then every transaction still marked active has its records
/// replayed newest-first with pre-images (undo) and is marked aborted. Both
/// passes are idempotent, so a crash during recovery just reruns it.
pub fn recover(ledger: &TransactionLedger, wal: &Wal, pages: &PageCache) -> Result<()> {
    info!("recovering from log");

    // Pages past the highest one the log mentions are torn allocations and
    // cannot be trusted.
    wal.rewind();
    let mut max_page: PageNumber = 1;
    while let Some(record) = wal.next()? {
        max_page = max_page.max(parse_record(&record)?.page());
    }
    pages.truncate_to(max_page)?;
    info!(pages = max_page, "truncated page file");

    redo(ledger, wal, pages)?;
    undo(ledger, wal, pages)?;

    info!("recovery complete");
    Ok(())
}

fn redo(ledger: &TransactionLedger, wal: &Wal, pages: &PageCache) -> Result<()> {
    wal.rewind();
    while let Some(raw) = wal.next()? {
        match parse_record(&raw)? {
            LogRecord::Insert {
                xid,
                page,
                offset,
                mut raw,
            } => {
                if ledger.is_active(xid)? {
                    continue;
                }
                // An insert from a rolled-back transaction is replayed in
                // its undone form, so rerunning recovery converges instead
                // of reviving the record.
                if ledger.is_aborted(xid)? {
                    DataItem::set_raw_invalid(&mut raw);
                }
                apply(pages, page, |p| data_page::recover_insert(p, &raw, offset))?;
            }
            LogRecord::Update {
                xid,
                page,
                offset,
                new,
                ..
            } => {
                if !ledger.is_aborted(xid)? {
                    apply(pages, page, |p| data_page::recover_update(p, &new, offset))?;
                }
            }
        }
    }
    Ok(())
}

fn undo(ledger: &TransactionLedger, wal: &Wal, pages: &PageCache) -> Result<()> {
    let mut pending: HashMap<Xid, Vec<LogRecord>> = HashMap::new();
    wal.rewind();
    while let Some(raw) = wal.next()? {
        let record = parse_record(&raw)?;
        if ledger.is_active(record.xid())? {
            pending.entry(record.xid()).or_default().push(record);
        }
    }

    for (xid, records) in pending {
        for record in records.iter().rev() {
            match record {
                LogRecord::Insert {
                    page, offset, raw, ..
                } => {
                    let mut raw = raw.clone();
                    DataItem::set_raw_invalid(&mut raw);
                    apply(pages, *page, |p| data_page::recover_insert(p, &raw, *offset))?;
                }
                LogRecord::Update {
                    page, offset, old, ..
                } => {
                    apply(pages, *page, |p| data_page::recover_update(p, old, *offset))?;
                }
            }
        }
        ledger.abort(xid)?;
        info!(xid, records = records.len(), "rolled back interrupted transaction");
    }
    Ok(())
}

fn apply(
    pages: &PageCache,
    number: PageNumber,
    replay: impl FnOnce(&crate::storage::page::Page),
) -> Result<()> {
    let page = pages.get_page(number)?;
    replay(&page);
    pages.release_page(&page)
}
