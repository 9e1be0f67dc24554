pub mod types;

pub use types::{Page, PagePtr, Rid};
pub use types::{FrameId, Lsn, PageId, TableOid, TxnId};
pub use types::{INVALID_PAGE_ID, INVALID_TXN_ID, PAGE_SIZE};
