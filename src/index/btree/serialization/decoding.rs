use byteorder::{ByteOrder, LittleEndian};
use serde::de::DeserializeOwned;

use crate::common::types::{Page, Rid, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, InternalNode, LeafNode};
use super::*;

/// Deserialize a node from its page, discriminating on the header's `type`
/// field. Pages that were never initialized as tree nodes decode to
/// `InvalidPageFormat`.
pub fn decode_node<K>(page: &Page) -> Result<BTreeNode<K>, BTreeError>
where
    K: DeserializeOwned + Ord + Clone,
{
    let node_type = LittleEndian::read_u32(&page.data[TYPE_OFFSET..TYPE_OFFSET + 4]);
    let size = LittleEndian::read_u32(&page.data[SIZE_OFFSET..SIZE_OFFSET + 4]) as usize;
    let max_size = LittleEndian::read_u32(&page.data[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 4]) as usize;
    let parent_id = LittleEndian::read_u32(&page.data[PARENT_ID_OFFSET..PARENT_ID_OFFSET + 4]);
    let page_id = LittleEndian::read_u32(&page.data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4]);

    match node_type {
        NODE_TYPE_LEAF => {
            let next_page_id =
                LittleEndian::read_u32(&page.data[NEXT_LEAF_OFFSET..NEXT_LEAF_OFFSET + 4]);

            let mut leaf = LeafNode {
                page_id,
                parent_page_id: parent_id,
                next_page_id,
                max_size,
                entries: Vec::with_capacity(size),
            };

            let mut offset = LEAF_ENTRIES_OFFSET;
            for _ in 0..size {
                let (key, next) = read_key::<K>(page, offset)?;
                let key = key.ok_or(BTreeError::InvalidPageFormat)?;
                offset = next;

                if offset + 8 > PAGE_SIZE {
                    return Err(BTreeError::InvalidPageFormat);
                }
                let rid = Rid::new(
                    LittleEndian::read_u32(&page.data[offset..offset + 4]),
                    LittleEndian::read_u32(&page.data[offset + 4..offset + 8]),
                );
                offset += 8;

                leaf.entries.push((key, rid));
            }

            Ok(BTreeNode::Leaf(leaf))
        }
        NODE_TYPE_INTERNAL => {
            let mut internal = InternalNode {
                page_id,
                parent_page_id: parent_id,
                max_size,
                keys: Vec::with_capacity(size.saturating_sub(1)),
                children: Vec::with_capacity(size),
            };

            let mut offset = INTERNAL_ENTRIES_OFFSET;
            for slot in 0..size {
                let (key, next) = read_key::<K>(page, offset)?;
                offset = next;

                if slot > 0 {
                    internal.keys.push(key.ok_or(BTreeError::InvalidPageFormat)?);
                }

                if offset + 4 > PAGE_SIZE {
                    return Err(BTreeError::InvalidPageFormat);
                }
                internal
                    .children
                    .push(LittleEndian::read_u32(&page.data[offset..offset + 4]));
                offset += 4;
            }

            Ok(BTreeNode::Internal(internal))
        }
        _ => Err(BTreeError::InvalidPageFormat),
    }
}

/// Cheap peek at the header's `type` field, used by descents to pick the
/// child latch mode before decoding the whole node.
pub(crate) fn page_is_leaf(page: &Page) -> bool {
    LittleEndian::read_u32(&page.data[TYPE_OFFSET..TYPE_OFFSET + 4]) == NODE_TYPE_LEAF
}

/// Read one length-prefixed key; a zero length means the undefined slot-0
/// separator and yields `None`.
fn read_key<K: DeserializeOwned>(
    page: &Page,
    offset: usize,
) -> Result<(Option<K>, usize), BTreeError> {
    if offset + 2 > PAGE_SIZE {
        return Err(BTreeError::InvalidPageFormat);
    }
    let key_len = LittleEndian::read_u16(&page.data[offset..offset + 2]) as usize;
    let offset = offset + 2;

    if key_len == 0 {
        return Ok((None, offset));
    }
    if offset + key_len > PAGE_SIZE {
        return Err(BTreeError::InvalidPageFormat);
    }

    let key = bincode::deserialize(&page.data[offset..offset + key_len])
        .map_err(|_| BTreeError::DeserializationError("failed to deserialize key".to_string()))?;

    Ok((Some(key), offset + key_len))
}
