use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, PAGE_SIZE};

/// The header page lives at the well-known page id 0 and maps index names
/// to their root page ids. Trees insert a record on creation and update it
/// on every root change.
pub const HEADER_PAGE_ID: PageId = 0;

// Layout: record_count:u32, then fixed records of [name: 32 bytes,
// root_page_id: u32].
const COUNT_SIZE: usize = 4;
const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;
const MAX_RECORDS: usize = (PAGE_SIZE - COUNT_SIZE) / RECORD_SIZE;

pub struct HeaderPage;

impl HeaderPage {
    pub fn record_count(page: &Page) -> u32 {
        LittleEndian::read_u32(&page.data[0..COUNT_SIZE])
    }

    /// Find the root page id registered under `name`.
    pub fn lookup(page: &Page, name: &str) -> Option<PageId> {
        let count = Self::record_count(page) as usize;
        for slot in 0..count {
            let offset = COUNT_SIZE + slot * RECORD_SIZE;
            if record_name(&page.data[offset..offset + NAME_SIZE]) == name.as_bytes() {
                return Some(LittleEndian::read_u32(
                    &page.data[offset + NAME_SIZE..offset + RECORD_SIZE],
                ));
            }
        }
        None
    }

    /// Register a new `name -> root` record. Fails on a duplicate name, a
    /// name longer than the fixed slot, or a full directory.
    pub fn insert_record(page: &mut Page, name: &str, root_page_id: PageId) -> bool {
        if name.len() > NAME_SIZE || Self::lookup(page, name).is_some() {
            return false;
        }

        let count = Self::record_count(page) as usize;
        if count >= MAX_RECORDS {
            return false;
        }

        let offset = COUNT_SIZE + count * RECORD_SIZE;
        page.data[offset..offset + NAME_SIZE].fill(0);
        page.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        LittleEndian::write_u32(
            &mut page.data[offset + NAME_SIZE..offset + RECORD_SIZE],
            root_page_id,
        );
        LittleEndian::write_u32(&mut page.data[0..COUNT_SIZE], (count + 1) as u32);

        true
    }

    /// Update the root page id of an existing record.
    pub fn update_record(page: &mut Page, name: &str, root_page_id: PageId) -> bool {
        let count = Self::record_count(page) as usize;
        for slot in 0..count {
            let offset = COUNT_SIZE + slot * RECORD_SIZE;
            if record_name(&page.data[offset..offset + NAME_SIZE]) == name.as_bytes() {
                LittleEndian::write_u32(
                    &mut page.data[offset + NAME_SIZE..offset + RECORD_SIZE],
                    root_page_id,
                );
                return true;
            }
        }
        false
    }
}

/// A record name is the slot contents up to the first NUL.
fn record_name(slot: &[u8]) -> &[u8] {
    let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
    &slot[..end]
}
