use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::{PageNumber, PAGE_SIZE};

/// An 8 KiB page checked out of the page cache.
///
/// The buffer is shared between readers and the flush path; mutation goes
/// through the write guard and must be paired with `set_dirty` so eviction
/// knows to write the page back.
pub struct Page {
    number: PageNumber,
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
    dirty: AtomicBool,
}

impl Page {
    pub fn new(number: PageNumber, data: Box<[u8; PAGE_SIZE]>) -> Self {
        Self {
            number,
            data: RwLock::new(data),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn number(&self) -> PageNumber {
        self.number
    }

    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.read()
    }

    pub fn data_mut(&self) -> RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.write()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn set_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }
}
