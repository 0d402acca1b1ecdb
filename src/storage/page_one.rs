use rand::RngCore;

use crate::storage::page::Page;
use crate::types::PAGE_SIZE;

// Page one carries no records, only a pair of 8-byte markers. A fresh random
// marker is written at offset 100 on every startup; a clean shutdown copies
// it to offset 108. If the two differ on open, the last shutdown was unclean
// and recovery must run.
const MARKER_OFFSET: usize = 100;
const MARKER_LEN: usize = 8;

pub fn init_raw() -> Box<[u8; PAGE_SIZE]> {
    let mut raw = Box::new([0u8; PAGE_SIZE]);
    write_open_marker(&mut raw[..]);
    raw
}

pub fn stamp_open(page: &Page) {
    let mut data = page.data_mut();
    write_open_marker(&mut data[..]);
    page.set_dirty();
}

pub fn stamp_close(page: &Page) {
    let mut data = page.data_mut();
    data.copy_within(
        MARKER_OFFSET..MARKER_OFFSET + MARKER_LEN,
        MARKER_OFFSET + MARKER_LEN,
    );
    page.set_dirty();
}

pub fn is_clean(page: &Page) -> bool {
    let data = page.data();
    data[MARKER_OFFSET..MARKER_OFFSET + MARKER_LEN]
        == data[MARKER_OFFSET + MARKER_LEN..MARKER_OFFSET + 2 * MARKER_LEN]
}

fn write_open_marker(raw: &mut [u8]) {
    rand::thread_rng().fill_bytes(&mut raw[MARKER_OFFSET..MARKER_OFFSET + MARKER_LEN]);
}
