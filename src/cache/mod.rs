use std::collections::{HashMap, HashSet};

use parking_lot::{Condvar, Mutex};

use crate::types::error::{EngineError, Result};

/// Bounded cache keyed by u64 with per-key reference counts.
///
/// A `get` loads through the caller-supplied loader on a miss and hands back
/// the cached instance with its count incremented; concurrent misses on the
/// same key perform exactly one load. A resource becomes evictable only once
/// its count returns to zero, and is evicted through the handler installed at
/// construction (for pages this is flush-if-dirty). Capacity 0 disables the
/// bound.
pub struct RefCountCache<V: Clone> {
    capacity: usize,
    evict: Box<dyn Fn(&V) -> Result<()> + Send + Sync>,
    state: Mutex<CacheState<V>>,
    loaded: Condvar,
}

struct CacheState<V> {
    entries: HashMap<u64, V>,
    refs: HashMap<u64, usize>,
    loading: HashSet<u64>,
}

impl<V: Clone> RefCountCache<V> {
    pub fn new(
        capacity: usize,
        evict: impl Fn(&V) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            capacity,
            evict: Box::new(evict),
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                refs: HashMap::new(),
                loading: HashSet::new(),
            }),
            loaded: Condvar::new(),
        }
    }

    /// Fetch the resource for `key`, loading it if absent.
    ///
    /// Fails with `CacheExhausted` when the cache is full and every entry is
    /// still checked out.
    pub fn get(&self, key: u64, load: impl FnOnce() -> Result<V>) -> Result<V> {
        let mut state = self.state.lock();
        loop {
            if state.loading.contains(&key) {
                // Another caller is loading this key; wait for its result.
                self.loaded.wait(&mut state);
                continue;
            }
            if let Some(value) = state.entries.get(&key) {
                let value = value.clone();
                *state.refs.entry(key).or_insert(0) += 1;
                return Ok(value);
            }
            break;
        }

        if self.capacity > 0 && state.entries.len() + state.loading.len() >= self.capacity {
            self.evict_idle(&mut state)?;
        }

        state.loading.insert(key);
        drop(state);

        let outcome = load();

        let mut state = self.state.lock();
        state.loading.remove(&key);
        self.loaded.notify_all();
        let value = outcome?;
        state.entries.insert(key, value.clone());
        state.refs.insert(key, 1);
        Ok(value)
    }

    /// Drop one reference to `key`. An entry whose count reaches zero is
    /// evicted once the cache sits above its capacity; an unbounded cache
    /// evicts at zero immediately, it only ever holds checked-out entries.
    pub fn release(&self, key: u64) -> Result<()> {
        let mut state = self.state.lock();
        let Some(count) = state.refs.get_mut(&key) else {
            return Ok(());
        };
        if *count > 0 {
            *count -= 1;
        }
        if *count == 0 && state.entries.len() > self.capacity {
            state.refs.remove(&key);
            if let Some(value) = state.entries.remove(&key) {
                (self.evict)(&value)?;
            }
        }
        Ok(())
    }

    /// Evict every entry regardless of reference count. Callers must ensure
    /// nothing is still checked out.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        let entries = std::mem::take(&mut state.entries);
        state.refs.clear();
        for value in entries.values() {
            (self.evict)(value)?;
        }
        Ok(())
    }

    fn evict_idle(&self, state: &mut CacheState<V>) -> Result<()> {
        let CacheState { entries, refs, .. } = state;
        let idle = entries
            .keys()
            .find(|&key| refs.get(key).is_none_or(|&count| count == 0))
            .copied();
        match idle.and_then(|key| {
            refs.remove(&key);
            entries.remove(&key)
        }) {
            Some(value) => (self.evict)(&value),
            None => Err(EngineError::CacheExhausted),
        }
    }
}
