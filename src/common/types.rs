use std::sync::Arc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type
pub type PageId = u32;

/// Buffer pool frame ID type
pub type FrameId = u32;

/// Transaction ID type
pub type TxnId = u32;

/// Table object ID type
pub type TableOid = u32;

/// LSN (Log Sequence Number) type
pub type Lsn = u32;

/// Sentinel for "no page"
pub const INVALID_PAGE_ID: PageId = u32::MAX;

/// Sentinel for "no transaction"
pub const INVALID_TXN_ID: TxnId = u32::MAX;

/// Record ID: the location of a tuple, and the resource id of a row lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rid {
    pub page_id: PageId,
    pub slot_num: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot_num: u32) -> Self {
        Self { page_id, slot_num }
    }
}

/// Page structure: a fixed-size byte array plus its identity.
///
/// The `RwLock` around a page in [`PagePtr`] is the page latch; pin counts
/// and the dirty flag live in the buffer pool's frame metadata.
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
        }
    }

    /// Zero the contents and drop the page identity.
    pub fn reset(&mut self) {
        self.data.fill(0);
        self.page_id = INVALID_PAGE_ID;
    }
}

/// Smart pointer to a latched page
pub type PagePtr = Arc<RwLock<Page>>;
