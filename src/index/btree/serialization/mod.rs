mod decoding;
mod encoding;
mod order;
#[cfg(test)]
mod tests;

pub use decoding::decode_node;
pub(crate) use decoding::page_is_leaf;
pub use encoding::encode_node;
pub(crate) use encoding::write_parent_id;
pub use order::{internal_capacity, leaf_capacity};

/// On-page node kind tags, the `type` field of the common header.
pub(crate) const NODE_TYPE_LEAF: u32 = 1;
pub(crate) const NODE_TYPE_INTERNAL: u32 = 2;

// Common header layout (LittleEndian):
//   type:u32, size:u32, max_size:u32, parent_id:u32, page_id:u32, lsn:u32
pub(crate) const HEADER_SIZE: usize = 24;
pub(crate) const TYPE_OFFSET: usize = 0;
pub(crate) const SIZE_OFFSET: usize = 4;
pub(crate) const MAX_SIZE_OFFSET: usize = 8;
pub(crate) const PARENT_ID_OFFSET: usize = 12;
pub(crate) const PAGE_ID_OFFSET: usize = 16;
pub(crate) const LSN_OFFSET: usize = 20;

/// A leaf page carries the sibling link right after the header.
pub(crate) const NEXT_LEAF_OFFSET: usize = HEADER_SIZE;
pub(crate) const LEAF_ENTRIES_OFFSET: usize = HEADER_SIZE + 4;
pub(crate) const INTERNAL_ENTRIES_OFFSET: usize = HEADER_SIZE;
