use std::sync::Arc;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::storage::buffer::BufferPoolManager;
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::decode_node;
use super::base::BPlusTree;
use super::latch::ReadLatchedPage;

/// Ordered iteration over the leaf chain.
///
/// Each leaf is decoded as a consistent snapshot under its read latch, and
/// the pin is dropped before the sibling link is followed; iteration across
/// leaves is therefore not snapshot-isolated. The iterator ends at the
/// super-tail of the rightmost leaf.
pub struct BPlusTreeIter<K> {
    buffer_pool: Arc<BufferPoolManager>,
    entries: std::vec::IntoIter<(K, Rid)>,
    next_page_id: PageId,
}

impl<K> BPlusTreeIter<K>
where
    K: Ord + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn empty(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            entries: Vec::new().into_iter(),
            next_page_id: INVALID_PAGE_ID,
        }
    }

    fn load_leaf(&mut self, page_id: PageId) -> Result<(), BTreeError> {
        let pin = self.buffer_pool.fetch_page_pinned(page_id)?;
        let leaf = {
            let guard = pin.page().read();
            match decode_node::<K>(&guard)? {
                BTreeNode::Leaf(leaf) => leaf,
                _ => return Err(BTreeError::InvalidPageFormat),
            }
        };
        self.entries = leaf.entries.into_iter();
        self.next_page_id = leaf.next_page_id;
        Ok(())
    }
}

impl<K> Iterator for BPlusTreeIter<K>
where
    K: Ord + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Item = (K, Rid);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.entries.next() {
                return Some(entry);
            }
            if self.next_page_id == INVALID_PAGE_ID {
                return None;
            }
            let next = self.next_page_id;
            if let Err(e) = self.load_leaf(next) {
                log::warn!("iteration stopped at page {}: {}", next, e);
                self.next_page_id = INVALID_PAGE_ID;
                return None;
            }
        }
    }
}

impl<K> BPlusTree<K>
where
    K: Ord + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Iterate the whole tree in key order, starting at the leftmost leaf.
    pub fn iter(&self) -> Result<BPlusTreeIter<K>, BTreeError> {
        let mut iter = BPlusTreeIter::empty(Arc::clone(&self.buffer_pool));

        let mut current = match self.latch_root_read()? {
            Some(latched) => latched,
            None => return Ok(iter),
        };

        loop {
            let node = decode_node::<K>(&current.guard)?;
            match node {
                BTreeNode::Leaf(leaf) => {
                    iter.entries = leaf.entries.into_iter();
                    iter.next_page_id = leaf.next_page_id;
                    return Ok(iter);
                }
                BTreeNode::Internal(internal) => {
                    let child_id = internal.children[0];
                    let child_pin = self.buffer_pool.fetch_page_pinned(child_id)?;
                    let child = ReadLatchedPage::acquire(child_pin);
                    current = child;
                }
            }
        }
    }

    /// Iterate from the first entry with `key >= start`.
    pub fn iter_from(&self, start: &K) -> Result<BPlusTreeIter<K>, BTreeError> {
        let mut iter = BPlusTreeIter::empty(Arc::clone(&self.buffer_pool));

        let leaf_page = match self.find_leaf_read(start)? {
            Some(latched) => latched,
            None => return Ok(iter),
        };

        let node = decode_node::<K>(&leaf_page.guard)?;
        let leaf = match node {
            BTreeNode::Leaf(leaf) => leaf,
            _ => return Err(BTreeError::InvalidPageFormat),
        };

        let from = leaf.index_of_lower_bound(start);
        let mut entries = leaf.entries;
        entries.drain(..from);
        iter.entries = entries.into_iter();
        iter.next_page_id = leaf.next_page_id;
        Ok(iter)
    }
}
