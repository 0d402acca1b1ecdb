use std::sync::Arc;

use crate::data::item::DataItem;
use crate::data::DataManager;
use crate::types::error::Result;
use crate::types::{Uid, Xid};

// Entry payload layout inside a data item: [xmin:8][xmax:8][data].
// xmin is the creating transaction, xmax the deleting one (0 = live).
const OF_XMAX: usize = 8;
const OF_DATA: usize = 16;

/// One version of a record. Deletion is logical: the deleting transaction
/// stamps its XID into xmax and the bytes stay where they are.
pub struct Entry {
    uid: Uid,
    item: Arc<DataItem>,
}

impl Entry {
    pub fn new(uid: Uid, item: Arc<DataItem>) -> Self {
        Self { uid, item }
    }

    pub fn wrap_raw(xid: Xid, data: &[u8]) -> Vec<u8> {
        let mut raw = Vec::with_capacity(OF_DATA + data.len());
        raw.extend_from_slice(&xid.to_be_bytes());
        raw.extend_from_slice(&0u64.to_be_bytes());
        raw.extend_from_slice(data);
        raw
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub(crate) fn item(&self) -> &Arc<DataItem> {
        &self.item
    }

    /// Copy of the record bytes behind the version header.
    pub fn data(&self) -> Vec<u8> {
        self.item.data()[OF_DATA..].to_vec()
    }

    pub fn xmin(&self) -> Xid {
        let payload = self.item.data();
        u64::from_be_bytes(payload[..OF_XMAX].try_into().unwrap())
    }

    pub fn xmax(&self) -> Xid {
        let payload = self.item.data();
        u64::from_be_bytes(payload[OF_XMAX..OF_DATA].try_into().unwrap())
    }

    /// Stamp `xid` as the deleting transaction, logging pre- and post-image
    /// through the data manager.
    pub fn set_xmax(&self, dm: &DataManager, xid: Xid) -> Result<()> {
        dm.update_item(xid, &self.item, |payload| {
            payload[OF_XMAX..OF_DATA].copy_from_slice(&xid.to_be_bytes());
        })
    }
}
