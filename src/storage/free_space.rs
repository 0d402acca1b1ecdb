use parking_lot::Mutex;

use crate::types::{PageNumber, PAGE_SIZE};

const BUCKETS: usize = 40;
const BUCKET_WIDTH: usize = PAGE_SIZE / BUCKETS;

#[derive(Clone, Copy, Debug)]
pub struct PageSpace {
    pub page: PageNumber,
    pub free: usize,
}

/// Buckets of page numbers keyed by approximate free-byte count, so an
/// insert can pick a page with enough room without scanning the file.
///
/// A page lives in at most one bucket and is removed by `select`; callers
/// must `add` it back with its new free-space measure once they are done
/// with it, whether or not the insert succeeded.
pub struct FreeSpaceIndex {
    buckets: Mutex<Vec<Vec<PageSpace>>>,
}

impl FreeSpaceIndex {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(vec![Vec::new(); BUCKETS + 1]),
        }
    }

    pub fn add(&self, page: PageNumber, free: usize) {
        let mut buckets = self.buckets.lock();
        buckets[free / BUCKET_WIDTH].push(PageSpace { page, free });
    }

    /// Take a page with at least `size` free bytes, or None when no tracked
    /// page is large enough.
    pub fn select(&self, size: usize) -> Option<PageSpace> {
        let mut buckets = self.buckets.lock();
        let mut bucket = size / BUCKET_WIDTH;
        // Rounding down can land in a bucket whose pages are smaller than
        // `size`; starting one bucket up keeps the pick safe.
        if bucket < BUCKETS {
            bucket += 1;
        }
        for list in buckets[bucket..].iter_mut() {
            // The top bucket is open-ended, so its pages still need an
            // exact room check.
            if let Some(found) = list.iter().position(|space| space.free >= size) {
                return Some(list.remove(found));
            }
        }
        None
    }
}

impl Default for FreeSpaceIndex {
    fn default() -> Self {
        Self::new()
    }
}
