use std::mem;

use crate::common::types::{Rid, PAGE_SIZE};
use super::{HEADER_SIZE, LEAF_ENTRIES_OFFSET};

// Worst-case bincode expansion over the in-memory size for fixed-width
// keys, plus the u16 length prefix.
const KEY_OVERHEAD: usize = 2 + 8;

/// Entries a leaf page can hold for the given key type. A rough bound
/// derived from the page size; variable-length keys that blow past it fail
/// at encode time with `NodeTooLarge`.
pub fn leaf_capacity<K>() -> usize {
    let entry_size = mem::size_of::<K>() + KEY_OVERHEAD + mem::size_of::<Rid>();
    let capacity = (PAGE_SIZE - LEAF_ENTRIES_OFFSET) / entry_size;
    capacity.max(3)
}

/// Children an internal page can hold for the given key type.
pub fn internal_capacity<K>() -> usize {
    let entry_size = mem::size_of::<K>() + KEY_OVERHEAD + mem::size_of::<u32>();
    let capacity = (PAGE_SIZE - HEADER_SIZE) / entry_size;
    capacity.max(3)
}
