use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::common::types::{Page, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::BTreeNode;
use super::*;

/// Serialize a node into its page, honoring the binary layout: the common
/// header, the leaf sibling link, then the ordered entry array with
/// length-prefixed keys. Slot 0 of an internal page gets a zero-length key
/// (its separator is undefined).
pub fn encode_node<K>(node: &BTreeNode<K>, page: &mut Page) -> Result<(), BTreeError>
where
    K: Serialize + Ord + Clone,
{
    page.data.fill(0);

    match node {
        BTreeNode::Leaf(leaf) => {
            write_header(
                page,
                NODE_TYPE_LEAF,
                leaf.size() as u32,
                leaf.max_size as u32,
                leaf.parent_page_id,
                leaf.page_id,
            );
            LittleEndian::write_u32(
                &mut page.data[NEXT_LEAF_OFFSET..NEXT_LEAF_OFFSET + 4],
                leaf.next_page_id,
            );

            let mut offset = LEAF_ENTRIES_OFFSET;
            for (key, rid) in &leaf.entries {
                offset = write_key(page, offset, key)?;
                if offset + 8 > PAGE_SIZE {
                    return Err(BTreeError::NodeTooLarge);
                }
                LittleEndian::write_u32(&mut page.data[offset..offset + 4], rid.page_id);
                LittleEndian::write_u32(&mut page.data[offset + 4..offset + 8], rid.slot_num);
                offset += 8;
            }
        }
        BTreeNode::Internal(internal) => {
            write_header(
                page,
                NODE_TYPE_INTERNAL,
                internal.size() as u32,
                internal.max_size as u32,
                internal.parent_page_id,
                internal.page_id,
            );

            let mut offset = INTERNAL_ENTRIES_OFFSET;
            for (slot, &child) in internal.children.iter().enumerate() {
                offset = match slot.checked_sub(1) {
                    // Slot 0's key is unused; encoded as a zero-length key.
                    None => write_empty_key(page, offset)?,
                    Some(key_index) => write_key(page, offset, &internal.keys[key_index])?,
                };
                if offset + 4 > PAGE_SIZE {
                    return Err(BTreeError::NodeTooLarge);
                }
                LittleEndian::write_u32(&mut page.data[offset..offset + 4], child);
                offset += 4;
            }
        }
    }

    Ok(())
}

fn write_header(
    page: &mut Page,
    node_type: u32,
    size: u32,
    max_size: u32,
    parent_id: u32,
    page_id: u32,
) {
    LittleEndian::write_u32(&mut page.data[TYPE_OFFSET..TYPE_OFFSET + 4], node_type);
    LittleEndian::write_u32(&mut page.data[SIZE_OFFSET..SIZE_OFFSET + 4], size);
    LittleEndian::write_u32(&mut page.data[MAX_SIZE_OFFSET..MAX_SIZE_OFFSET + 4], max_size);
    LittleEndian::write_u32(&mut page.data[PARENT_ID_OFFSET..PARENT_ID_OFFSET + 4], parent_id);
    LittleEndian::write_u32(&mut page.data[PAGE_ID_OFFSET..PAGE_ID_OFFSET + 4], page_id);
    LittleEndian::write_u32(&mut page.data[LSN_OFFSET..LSN_OFFSET + 4], 0);
}

fn write_key<K: Serialize>(page: &mut Page, offset: usize, key: &K) -> Result<usize, BTreeError> {
    let key_bytes = bincode::serialize(key)
        .map_err(|_| BTreeError::SerializationError("failed to serialize key".to_string()))?;

    if key_bytes.len() > u16::MAX as usize || offset + 2 + key_bytes.len() > PAGE_SIZE {
        return Err(BTreeError::NodeTooLarge);
    }

    LittleEndian::write_u16(&mut page.data[offset..offset + 2], key_bytes.len() as u16);
    page.data[offset + 2..offset + 2 + key_bytes.len()].copy_from_slice(&key_bytes);

    Ok(offset + 2 + key_bytes.len())
}

fn write_empty_key(page: &mut Page, offset: usize) -> Result<usize, BTreeError> {
    if offset + 2 > PAGE_SIZE {
        return Err(BTreeError::NodeTooLarge);
    }
    LittleEndian::write_u16(&mut page.data[offset..offset + 2], 0);
    Ok(offset + 2)
}

/// Write an encoded node's `parent_id` header field in place, leaving the
/// rest of the page untouched. Used when reparenting children during
/// splits and merges.
pub(crate) fn write_parent_id(page: &mut Page, parent_id: u32) {
    LittleEndian::write_u32(&mut page.data[PARENT_ID_OFFSET..PARENT_ID_OFFSET + 4], parent_id);
}
