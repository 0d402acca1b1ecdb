use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::ledger::SUPER_XID;
use crate::types::error::EngineError;
use crate::types::Xid;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
}

/// Why a transaction was force-aborted. Kept on the transaction so every
/// later operation fails with the same conflict.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Conflict {
    Deadlock,
    VersionSkip,
}

impl Conflict {
    pub(crate) fn into_error(self) -> EngineError {
        match self {
            Conflict::Deadlock => EngineError::Deadlock,
            Conflict::VersionSkip => EngineError::ConcurrentUpdate,
        }
    }
}

/// The version manager's view of one running transaction.
///
/// Repeatable-read transactions carry a snapshot of the XIDs that were
/// active when they began; versions created by those XIDs are never visible
/// to them, no matter when they commit.
pub struct Transaction {
    pub xid: Xid,
    pub level: IsolationLevel,
    snapshot: Option<HashSet<Xid>>,
    state: Mutex<TxnState>,
}

#[derive(Default)]
struct TxnState {
    conflict: Option<Conflict>,
    auto_aborted: bool,
}

impl Transaction {
    pub(crate) fn new<T>(xid: Xid, level: IsolationLevel, active: &HashMap<Xid, T>) -> Self {
        let snapshot = match level {
            IsolationLevel::ReadCommitted => None,
            IsolationLevel::RepeatableRead => Some(active.keys().copied().collect()),
        };
        Self {
            xid,
            level,
            snapshot,
            state: Mutex::new(TxnState::default()),
        }
    }

    pub fn in_snapshot(&self, xid: Xid) -> bool {
        if xid == SUPER_XID {
            return false;
        }
        self.snapshot
            .as_ref()
            .is_some_and(|snapshot| snapshot.contains(&xid))
    }

    /// Fail fast when a previous conflict already killed this transaction.
    pub(crate) fn check_conflict(&self) -> Result<(), EngineError> {
        match self.state.lock().conflict {
            Some(conflict) => Err(conflict.into_error()),
            None => Ok(()),
        }
    }

    pub(crate) fn set_conflict(&self, conflict: Conflict) {
        self.state.lock().conflict = Some(conflict);
    }

    /// Mark the transaction auto-aborted; returns false if it already was,
    /// so the abort work runs at most once.
    pub(crate) fn claim_abort(&self, auto: bool) -> bool {
        let mut state = self.state.lock();
        if state.auto_aborted {
            return false;
        }
        if auto {
            state.auto_aborted = true;
        }
        true
    }
}
