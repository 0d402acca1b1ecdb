use crate::ledger::TransactionLedger;
use crate::types::error::Result;
use crate::version::entry::Entry;
use crate::version::transaction::{IsolationLevel, Transaction};

/// Decide whether `entry` is visible to `txn` under its isolation level.
pub fn is_visible(ledger: &TransactionLedger, txn: &Transaction, entry: &Entry) -> Result<bool> {
    match txn.level {
        IsolationLevel::ReadCommitted => read_committed(ledger, txn, entry),
        IsolationLevel::RepeatableRead => repeatable_read(ledger, txn, entry),
    }
}

/// A version has been "skipped" when a transaction not yet visible to `txn`
/// already deleted it: its deleter committed but either started after `txn`
/// or was still active when `txn` began. Acting on such a version under
/// repeatable read would silently overwrite the newer state, so the caller
/// must abort instead.
pub fn is_version_skip(
    ledger: &TransactionLedger,
    txn: &Transaction,
    entry: &Entry,
) -> Result<bool> {
    if txn.level == IsolationLevel::ReadCommitted {
        return Ok(false);
    }
    let xmax = entry.xmax();
    Ok(ledger.is_committed(xmax)? && (xmax > txn.xid || txn.in_snapshot(xmax)))
}

// Visible when created by me and not deleted, or created by a committed
// transaction and not (visibly) deleted.
fn read_committed(ledger: &TransactionLedger, txn: &Transaction, entry: &Entry) -> Result<bool> {
    let xid = txn.xid;
    let xmin = entry.xmin();
    let xmax = entry.xmax();
    if xmin == xid && xmax == 0 {
        return Ok(true);
    }
    if ledger.is_committed(xmin)? {
        if xmax == 0 {
            return Ok(true);
        }
        if xmax != xid && !ledger.is_committed(xmax)? {
            return Ok(true);
        }
    }
    Ok(false)
}

// As read committed, but the creator must additionally have committed before
// this transaction began, and a deletion only counts once its transaction
// is both committed and part of this transaction's past.
fn repeatable_read(ledger: &TransactionLedger, txn: &Transaction, entry: &Entry) -> Result<bool> {
    let xid = txn.xid;
    let xmin = entry.xmin();
    let xmax = entry.xmax();
    if xmin == xid && xmax == 0 {
        return Ok(true);
    }
    if ledger.is_committed(xmin)? && xmin < xid && !txn.in_snapshot(xmin) {
        if xmax == 0 {
            return Ok(true);
        }
        if xmax != xid
            && (!ledger.is_committed(xmax)? || xmax > xid || txn.in_snapshot(xmax))
        {
            return Ok(true);
        }
    }
    Ok(false)
}
