use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::RefCountCache;
use crate::storage::page::Page;
use crate::types::error::{EngineError, Result};
use crate::types::{PageNumber, PAGE_SIZE};

pub const DB_SUFFIX: &str = ".db";

const MIN_CACHE_PAGES: usize = 10;

/// Paged view of the database file with reference-counted checkout.
///
/// Freshly allocated pages are flushed immediately so they are durable as
/// soon as their number is handed out; checked-out pages are flushed lazily,
/// on eviction or at close. Durability of record payloads comes from the
/// write-ahead log, not from page flush timing.
pub struct PageCache {
    store: Arc<PageStore>,
    cache: RefCountCache<Arc<Page>>,
}

struct PageStore {
    file: Mutex<File>,
    page_count: AtomicU32,
}

impl PageCache {
    pub fn create<P: AsRef<Path>>(base: P, memory: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(db_path(base.as_ref()))?;
        Self::with_file(file, memory)
    }

    pub fn open<P: AsRef<Path>>(base: P, memory: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(db_path(base.as_ref()))?;
        Self::with_file(file, memory)
    }

    fn with_file(file: File, memory: u64) -> Result<Self> {
        let capacity = (memory as usize) / PAGE_SIZE;
        if capacity < MIN_CACHE_PAGES {
            return Err(EngineError::CacheTooSmall {
                pages: capacity,
                min: MIN_CACHE_PAGES,
            });
        }
        let len = file.metadata()?.len();
        let store = Arc::new(PageStore {
            file: Mutex::new(file),
            page_count: AtomicU32::new((len / PAGE_SIZE as u64) as u32),
        });
        let flush_store = Arc::clone(&store);
        let cache = RefCountCache::new(capacity, move |page: &Arc<Page>| {
            if page.is_dirty() {
                flush_store.flush_page(page)?;
                page.clear_dirty();
            }
            Ok(())
        });
        Ok(Self { store, cache })
    }

    /// Allocate the next page number and write `init` to it durably.
    pub fn new_page(&self, init: &[u8; PAGE_SIZE]) -> Result<PageNumber> {
        let number = self.store.page_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.store.write_page(number, init)?;
        Ok(number)
    }

    pub fn get_page(&self, number: PageNumber) -> Result<Arc<Page>> {
        self.cache.get(number as u64, || {
            let data = self.store.read_page(number)?;
            Ok(Arc::new(Page::new(number, data)))
        })
    }

    pub fn release_page(&self, page: &Page) -> Result<()> {
        self.cache.release(page.number() as u64)
    }

    pub fn flush_page(&self, page: &Page) -> Result<()> {
        self.store.flush_page(page)?;
        page.clear_dirty();
        Ok(())
    }

    /// Clip the file to `pages` pages and reset the counter. Recovery only;
    /// never safe concurrently with normal traffic.
    pub fn truncate_to(&self, pages: PageNumber) -> Result<()> {
        let file = self.store.file.lock();
        file.set_len(pages as u64 * PAGE_SIZE as u64)?;
        file.sync_all()?;
        self.store.page_count.store(pages, Ordering::SeqCst);
        Ok(())
    }

    pub fn page_count(&self) -> PageNumber {
        self.store.page_count.load(Ordering::SeqCst)
    }

    /// Evict and flush everything. No page may still be checked out.
    pub fn close(&self) -> Result<()> {
        self.cache.close()?;
        self.store.file.lock().sync_all()?;
        Ok(())
    }
}

impl PageStore {
    fn offset(number: PageNumber) -> u64 {
        (number as u64 - 1) * PAGE_SIZE as u64
    }

    fn read_page(&self, number: PageNumber) -> Result<Box<[u8; PAGE_SIZE]>> {
        if number == 0 || number > self.page_count.load(Ordering::SeqCst) {
            return Err(EngineError::CorruptPage {
                page: number,
                reason: "page number out of range".to_string(),
            });
        }
        let mut data = Box::new([0u8; PAGE_SIZE]);
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(Self::offset(number)))?;
        // A torn trailing page may be shorter than PAGE_SIZE; the remainder
        // stays zeroed and recovery overwrites whatever matters.
        let mut filled = 0;
        while filled < PAGE_SIZE {
            let n = file.read(&mut data[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(data)
    }

    fn write_page(&self, number: PageNumber, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(Self::offset(number)))?;
        file.write_all(data)?;
        file.sync_data()?;
        Ok(())
    }

    fn flush_page(&self, page: &Page) -> Result<()> {
        let data = page.data();
        self.write_page(page.number(), &data)
    }
}

pub fn db_path(base: &Path) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(DB_SUFFIX);
    PathBuf::from(name)
}
