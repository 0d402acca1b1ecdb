use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::types::error::{EngineError, Result};
use crate::types::{Uid, Xid};

/// Wait-for graph over (transaction, resource) pairs with deadlock
/// detection.
///
/// A transaction asks to `acquire` a UID before stamping it; if the UID is
/// held elsewhere the edge is added and the graph checked for a cycle. On a
/// cycle the edge is rolled back and the acquire fails; otherwise the caller
/// blocks on the returned handle until `release_all` on the holder passes
/// the resource over.
pub struct LockTable {
    state: Mutex<LockState>,
}

#[derive(Default)]
struct LockState {
    // Which transaction holds each resource, and the reverse.
    held_by: HashMap<Uid, Xid>,
    holds: HashMap<Xid, Vec<Uid>>,
    // Who is queued on each resource, and what each transaction waits on.
    waiters: HashMap<Uid, VecDeque<Xid>>,
    waiting_on: HashMap<Xid, Uid>,
    handles: HashMap<Xid, Arc<WaitHandle>>,
}

/// Private blocker for one waiting transaction.
pub struct WaitHandle {
    granted: Mutex<bool>,
    signal: Condvar,
}

impl WaitHandle {
    fn new() -> Self {
        Self {
            granted: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    /// Block until the resource has been handed to this transaction.
    pub fn wait(&self) {
        let mut granted = self.granted.lock();
        while !*granted {
            self.signal.wait(&mut granted);
        }
    }

    fn grant(&self) {
        *self.granted.lock() = true;
        self.signal.notify_one();
    }
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState::default()),
        }
    }

    /// Claim `uid` for `xid`. Returns None when the claim succeeds at once
    /// (already held, or unheld), a handle to block on when someone else
    /// holds it, or a deadlock error when waiting would close a cycle.
    pub fn acquire(&self, xid: Xid, uid: Uid) -> Result<Option<Arc<WaitHandle>>> {
        let mut state = self.state.lock();
        if state.holds.get(&xid).is_some_and(|held| held.contains(&uid)) {
            return Ok(None);
        }
        if !state.held_by.contains_key(&uid) {
            state.held_by.insert(uid, xid);
            state.holds.entry(xid).or_default().push(uid);
            return Ok(None);
        }

        state.waiting_on.insert(xid, uid);
        state.waiters.entry(uid).or_default().push_back(xid);
        if state.has_cycle() {
            // Adding this edge would deadlock; take it back out.
            state.waiting_on.remove(&xid);
            if let Some(queue) = state.waiters.get_mut(&uid) {
                queue.retain(|&waiter| waiter != xid);
                if queue.is_empty() {
                    state.waiters.remove(&uid);
                }
            }
            return Err(EngineError::Deadlock);
        }

        let handle = Arc::new(WaitHandle::new());
        state.handles.insert(xid, handle.clone());
        Ok(Some(handle))
    }

    /// Release everything `xid` holds, waking the first still-interested
    /// waiter of each resource, and forget any wait it had outstanding.
    pub fn release_all(&self, xid: Xid) {
        let mut state = self.state.lock();
        if let Some(held) = state.holds.remove(&xid) {
            for uid in held {
                state.pass_on(uid);
            }
        }
        state.waiting_on.remove(&xid);
        state.handles.remove(&xid);
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LockState {
    /// Hand `uid` to the next queued transaction that is still waiting.
    fn pass_on(&mut self, uid: Uid) {
        self.held_by.remove(&uid);
        loop {
            let next = self.waiters.get_mut(&uid).and_then(VecDeque::pop_front);
            let Some(next) = next else {
                break;
            };
            // A waiter whose handle is gone already gave up (deadlock or
            // abort); skip it.
            let Some(handle) = self.handles.remove(&next) else {
                continue;
            };
            self.held_by.insert(uid, next);
            self.holds.entry(next).or_default().push(uid);
            self.waiting_on.remove(&next);
            handle.grant();
            break;
        }
        if self.waiters.get(&uid).is_some_and(VecDeque::is_empty) {
            self.waiters.remove(&uid);
        }
    }

    // Stamp-per-root walk of the wait-for graph. Each transaction waits on
    // at most one resource, so every walk is a simple chain: seeing the
    // current root's stamp again means a cycle, an older stamp means we
    // merged into a component already proven acyclic.
    fn has_cycle(&self) -> bool {
        let mut stamps: HashMap<Xid, u32> = HashMap::new();
        let mut stamp = 0u32;
        for &root in self.holds.keys() {
            if stamps.contains_key(&root) {
                continue;
            }
            stamp += 1;
            let mut current = root;
            loop {
                match stamps.get(&current) {
                    Some(&seen) if seen == stamp => return true,
                    Some(_) => break,
                    None => {}
                }
                stamps.insert(current, stamp);
                let Some(&uid) = self.waiting_on.get(&current) else {
                    break;
                };
                let Some(&holder) = self.held_by.get(&uid) else {
                    break;
                };
                current = holder;
            }
        }
        false
    }
}
