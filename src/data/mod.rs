pub mod item;
pub mod recovery;

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::cache::RefCountCache;
use crate::data::item::DataItem;
use crate::ledger::TransactionLedger;
use crate::storage::data_page;
use crate::storage::page::Page;
use crate::storage::page_cache::PageCache;
use crate::storage::page_one;
use crate::storage::free_space::FreeSpaceIndex;
use crate::types::error::{EngineError, Result};
use crate::types::{uid_from_parts, uid_offset, uid_page, Uid, Xid};
use crate::wal::Wal;

// Attempts to find or allocate a page with room before giving up busy.
const INSERT_ATTEMPTS: usize = 5;

/// Byte-array record storage addressed by UID, composing the page cache, the
/// write-ahead log and the transaction ledger.
///
/// Every page mutation is preceded by an appended-and-fsynced log record, so
/// the log is ground truth after a crash; `open` replays it when page one
/// shows an unclean shutdown.
pub struct DataManager {
    ledger: Arc<TransactionLedger>,
    pages: Arc<PageCache>,
    wal: Wal,
    free_index: FreeSpaceIndex,
    items: RefCountCache<Arc<DataItem>>,
    page_one: Mutex<Option<Arc<Page>>>,
}

impl DataManager {
    pub fn create<P: AsRef<Path>>(
        base: P,
        memory: u64,
        ledger: Arc<TransactionLedger>,
    ) -> Result<Self> {
        let pages = Arc::new(PageCache::create(&base, memory)?);
        let wal = Wal::create(&base)?;
        let dm = Self::compose(ledger, pages, wal);

        let number = dm.pages.new_page(&page_one::init_raw())?;
        debug_assert_eq!(number, 1);
        let one = dm.pages.get_page(1)?;
        dm.pages.flush_page(&one)?;
        *dm.page_one.lock() = Some(one);
        Ok(dm)
    }

    pub fn open<P: AsRef<Path>>(
        base: P,
        memory: u64,
        ledger: Arc<TransactionLedger>,
    ) -> Result<Self> {
        let pages = Arc::new(PageCache::open(&base, memory)?);
        let wal = Wal::open(&base)?;
        let dm = Self::compose(ledger, pages, wal);

        let one = dm.pages.get_page(1)?;
        if !page_one::is_clean(&one) {
            info!("page one markers mismatch, last shutdown was unclean");
            recovery::recover(&dm.ledger, &dm.wal, &dm.pages)?;
        }
        dm.fill_free_index()?;
        page_one::stamp_open(&one);
        dm.pages.flush_page(&one)?;
        *dm.page_one.lock() = Some(one);
        Ok(dm)
    }

    fn compose(ledger: Arc<TransactionLedger>, pages: Arc<PageCache>, wal: Wal) -> Self {
        let release_pages = Arc::clone(&pages);
        let items = RefCountCache::new(0, move |item: &Arc<DataItem>| {
            release_pages.release_page(item.page())
        });
        Self {
            ledger,
            pages,
            wal,
            free_index: FreeSpaceIndex::new(),
            items,
            page_one: Mutex::new(None),
        }
    }

    /// Store `data` on behalf of `xid` and return its handle. The insert log
    /// record is durable before the page is touched.
    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        let raw = DataItem::wrap_raw(data);
        if raw.len() > data_page::MAX_FREE_SPACE {
            return Err(EngineError::RecordTooLarge {
                size: raw.len(),
                max: data_page::MAX_FREE_SPACE,
            });
        }

        let mut selected = None;
        for _ in 0..INSERT_ATTEMPTS {
            if let Some(space) = self.free_index.select(raw.len()) {
                selected = Some(space);
                break;
            }
            let number = self.pages.new_page(&data_page::init_raw())?;
            self.free_index.add(number, data_page::MAX_FREE_SPACE);
        }
        let Some(space) = selected else {
            return Err(EngineError::Busy);
        };

        let page = match self.pages.get_page(space.page) {
            Ok(page) => page,
            Err(err) => {
                // The page stays allocatable even though this insert failed.
                self.free_index.add(space.page, space.free);
                return Err(err);
            }
        };

        let result = (|| {
            let offset = data_page::free_space_offset(&page);
            self.wal
                .append(&recovery::insert_record(xid, space.page, offset, &raw))?;
            let offset = data_page::insert(&page, &raw);
            Ok(uid_from_parts(space.page, offset))
        })();

        // Return the page to the index with its fresh measure even on the
        // failure path, or it would be lost to future inserts.
        self.free_index.add(space.page, data_page::free_space(&page));
        self.pages.release_page(&page)?;
        result
    }

    /// Check out the item at `uid`, or None when the slot was deleted.
    pub fn read(&self, uid: Uid) -> Result<Option<Arc<DataItem>>> {
        let item = self.items.get(uid, || self.load_item(uid))?;
        if item.is_valid() {
            Ok(Some(item))
        } else {
            self.release_item(&item)?;
            Ok(None)
        }
    }

    /// Mutate `item`'s payload in place under its exclusive lock, logging
    /// the pre- and post-image as one update record.
    pub fn update_item(
        &self,
        xid: Xid,
        item: &DataItem,
        mutate: impl FnOnce(&mut [u8]),
    ) -> Result<()> {
        let _exclusive = item.write_lock();
        let old = item.raw_bytes();
        {
            let mut data = item.page().data_mut();
            mutate(&mut data[item.payload_range()]);
        }
        item.page().set_dirty();
        let new = item.raw_bytes();
        self.wal
            .append(&recovery::update_record(xid, item.uid(), &old, &new))
    }

    pub fn release_item(&self, item: &DataItem) -> Result<()> {
        self.items.release(item.uid())
    }

    /// Evict caches, stamp the clean-shutdown marker and flush page one.
    pub fn close(&self) -> Result<()> {
        self.items.close()?;
        self.wal.close()?;
        if let Some(one) = self.page_one.lock().take() {
            page_one::stamp_close(&one);
            self.pages.flush_page(&one)?;
            self.pages.release_page(&one)?;
        }
        self.pages.close()
    }

    fn load_item(&self, uid: Uid) -> Result<Arc<DataItem>> {
        let page = self.pages.get_page(uid_page(uid))?;
        match DataItem::parse(Arc::clone(&page), uid_offset(uid)) {
            Ok(item) => Ok(Arc::new(item)),
            Err(err) => {
                self.pages.release_page(&page)?;
                Err(err)
            }
        }
    }

    fn fill_free_index(&self) -> Result<()> {
        for number in 2..=self.pages.page_count() {
            let page = self.pages.get_page(number)?;
            self.free_index.add(number, data_page::free_space(&page));
            self.pages.release_page(&page)?;
        }
        Ok(())
    }
}
