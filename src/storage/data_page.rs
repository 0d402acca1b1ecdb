use crate::storage::page::Page;
use crate::types::PAGE_SIZE;

// Every page other than page one is a dense append-only slab:
// [free-space-offset:2][items]. The offset points at the first free byte.
pub const HEADER_SIZE: usize = 2;
pub const MAX_FREE_SPACE: usize = PAGE_SIZE - HEADER_SIZE;

pub fn init_raw() -> Box<[u8; PAGE_SIZE]> {
    let mut raw = Box::new([0u8; PAGE_SIZE]);
    set_free_space_offset(&mut raw[..], HEADER_SIZE as u16);
    raw
}

pub fn free_space_offset(page: &Page) -> u16 {
    let data = page.data();
    u16::from_be_bytes([data[0], data[1]])
}

pub fn free_space(page: &Page) -> usize {
    PAGE_SIZE - free_space_offset(page) as usize
}

/// Append `raw` at the free-space offset and advance it. The caller has
/// already checked that the page has room.
pub fn insert(page: &Page, raw: &[u8]) -> u16 {
    let mut data = page.data_mut();
    let offset = u16::from_be_bytes([data[0], data[1]]);
    let start = offset as usize;
    data[start..start + raw.len()].copy_from_slice(raw);
    set_free_space_offset(&mut data[..], offset + raw.len() as u16);
    drop(data);
    page.set_dirty();
    offset
}

/// Redo/undo helper: write `raw` at a recorded offset, extending the
/// free-space offset only if the write lands beyond it. Idempotent against
/// replaying the same record twice.
pub fn recover_insert(page: &Page, raw: &[u8], offset: u16) {
    let mut data = page.data_mut();
    let start = offset as usize;
    data[start..start + raw.len()].copy_from_slice(raw);
    let current = u16::from_be_bytes([data[0], data[1]]);
    let end = offset + raw.len() as u16;
    if current < end {
        set_free_space_offset(&mut data[..], end);
    }
    drop(data);
    page.set_dirty();
}

/// Redo/undo helper: plain overwrite at a recorded offset.
pub fn recover_update(page: &Page, raw: &[u8], offset: u16) {
    let mut data = page.data_mut();
    let start = offset as usize;
    data[start..start + raw.len()].copy_from_slice(raw);
    drop(data);
    page.set_dirty();
}

fn set_free_space_offset(raw: &mut [u8], offset: u16) {
    raw[0..2].copy_from_slice(&offset.to_be_bytes());
}
