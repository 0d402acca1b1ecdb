use std::ops::Range;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::storage::page::Page;
use crate::types::error::{EngineError, Result};
use crate::types::{uid_from_parts, Uid, PAGE_SIZE};

// On-page layout: [valid:1][size:2][payload]. The valid byte is 0 for a live
// item and 1 once the item has been logically deleted in place.
const OF_VALID: usize = 0;
const OF_SIZE: usize = 1;
pub const HEADER_SIZE: usize = 3;

/// A byte-array record checked out of the data manager, pinned to the page
/// that stores it.
///
/// Readers share the item lock; an in-place update takes it exclusively for
/// the duration of the pre-image/mutate/log bracket.
pub struct DataItem {
    uid: Uid,
    page: Arc<Page>,
    offset: usize,
    len: usize,
    lock: RwLock<()>,
}

impl DataItem {
    /// Parse the item starting at `offset` on `page`. The caller transfers
    /// its page checkout to the item; it is given back when the item drops
    /// out of the cache.
    pub fn parse(page: Arc<Page>, offset: u16) -> Result<Self> {
        let uid = uid_from_parts(page.number(), offset);
        let start = offset as usize;
        if start + HEADER_SIZE > PAGE_SIZE {
            return Err(EngineError::DataNotFound(uid));
        }
        let len = {
            let data = page.data();
            let size = u16::from_be_bytes([data[start + OF_SIZE], data[start + OF_SIZE + 1]]);
            HEADER_SIZE + size as usize
        };
        if start + len > PAGE_SIZE {
            return Err(EngineError::DataNotFound(uid));
        }
        Ok(Self {
            uid,
            page,
            offset: start,
            len,
            lock: RwLock::new(()),
        })
    }

    /// Wrap a payload into on-page form with a live valid byte.
    pub fn wrap_raw(data: &[u8]) -> Vec<u8> {
        let mut raw = Vec::with_capacity(HEADER_SIZE + data.len());
        raw.push(0);
        raw.extend_from_slice(&(data.len() as u16).to_be_bytes());
        raw.extend_from_slice(data);
        raw
    }

    /// Flip a wrapped item's valid byte off, marking it deleted.
    pub fn set_raw_invalid(raw: &mut [u8]) {
        raw[OF_VALID] = 1;
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }

    pub fn is_valid(&self) -> bool {
        let _shared = self.lock.read();
        self.page.data()[self.offset + OF_VALID] == 0
    }

    /// Copy of the payload bytes.
    pub fn data(&self) -> Vec<u8> {
        let _shared = self.lock.read();
        let data = self.page.data();
        data[self.offset + HEADER_SIZE..self.offset + self.len].to_vec()
    }

    pub(crate) fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }

    pub(crate) fn payload_range(&self) -> Range<usize> {
        self.offset + HEADER_SIZE..self.offset + self.len
    }

    pub(crate) fn raw_bytes(&self) -> Vec<u8> {
        self.page.data()[self.range()].to_vec()
    }

    pub(crate) fn read_lock(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read()
    }

    pub(crate) fn write_lock(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write()
    }
}
