use std::marker::PhantomData;
use std::sync::Arc;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::{HeaderPage, HEADER_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, LeafNode};
use crate::index::btree::serialization::{
    decode_node, encode_node, internal_capacity, leaf_capacity, page_is_leaf, write_parent_id,
};
use super::latch::{LatchStack, ReadLatchedPage, WriteLatchedPage};

/// Which structural policy a pessimistic descent enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum TreeOp {
    Insert,
    Remove,
}

/// A concurrent B+Tree index over the buffer pool.
///
/// Traversals follow latch crabbing: the child's latch is taken before the
/// parent's is released. Point operations first run an optimistic pass
/// (read latches down, write latch only on the leaf) and fall back to a
/// pessimistic pass that write-latches the path top-down, releasing
/// ancestors above each safe node.
///
/// Nodes refer to each other by page id only; every page reference goes
/// through the buffer pool and is pinned for exactly as long as it is used.
pub struct BPlusTree<K> {
    index_name: String,
    pub(super) buffer_pool: Arc<BufferPoolManager>,
    pub(super) root_page_id: RwLock<PageId>,
    pub(super) leaf_max_size: usize,
    pub(super) internal_max_size: usize,
    _phantom: PhantomData<K>,
}

impl<K> BPlusTree<K>
where
    K: Ord + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Open (or register) the named index, with node capacities derived
    /// from the key size.
    pub fn new(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
    ) -> Result<Self, BTreeError> {
        let leaf_max = leaf_capacity::<K>();
        let internal_max = internal_capacity::<K>();
        Self::with_capacities(index_name, buffer_pool, leaf_max, internal_max)
    }

    /// Open (or register) the named index with explicit node capacities.
    /// Small capacities keep trees shallow enough to exercise splits and
    /// merges deliberately.
    pub fn with_capacities(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        assert!(leaf_max_size >= 3, "leaf capacity too small to split");
        assert!(internal_max_size >= 3, "internal capacity too small to split");

        let index_name = index_name.into();

        // The header page maps index names to roots; adopt a registered
        // root or claim a fresh record for this name.
        let header = buffer_pool.fetch_page_pinned(HEADER_PAGE_ID)?;
        let root_page_id = {
            let mut page = header.page().write();
            match HeaderPage::lookup(&page, &index_name) {
                Some(root) => root,
                None => {
                    if !HeaderPage::insert_record(&mut page, &index_name, INVALID_PAGE_ID) {
                        return Err(BTreeError::IndexNameRejected(index_name));
                    }
                    header.mark_dirty();
                    INVALID_PAGE_ID
                }
            }
        };

        Ok(Self {
            index_name,
            buffer_pool,
            root_page_id: RwLock::new(root_page_id),
            leaf_max_size,
            internal_max_size,
            _phantom: PhantomData,
        })
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.read() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    /// Point lookup under read-latch crabbing.
    pub fn get(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        match self.find_leaf_read(key)? {
            None => Ok(None),
            Some(leaf_page) => {
                let node = decode_node::<K>(&leaf_page.guard)?;
                Ok(node.as_leaf().search(key))
            }
        }
    }

    /// Create the first root: a leaf, registered under the root latch with
    /// a double-check so concurrent first inserts race safely.
    pub(super) fn create_tree(&self) -> Result<(), BTreeError> {
        let mut root_guard = self.root_page_id.write();
        if *root_guard != INVALID_PAGE_ID {
            return Ok(());
        }

        let pin = self.buffer_pool.new_page_pinned()?;
        let leaf = LeafNode::<K>::new(pin.page_id(), INVALID_PAGE_ID, self.leaf_max_size);
        {
            let mut page = pin.page().write();
            encode_node(&BTreeNode::Leaf(leaf), &mut page)?;
        }
        pin.mark_dirty();

        *root_guard = pin.page_id();
        self.update_root_record(pin.page_id())
    }

    /// Push the current root id into the header-page directory. Callers
    /// hold the root latch.
    pub(super) fn update_root_record(&self, new_root: PageId) -> Result<(), BTreeError> {
        let header = self.buffer_pool.fetch_page_pinned(HEADER_PAGE_ID)?;
        {
            let mut page = header.page().write();
            HeaderPage::update_record(&mut page, &self.index_name, new_root);
        }
        header.mark_dirty();
        Ok(())
    }

    /// Latch the root for reading, retrying while the root id moves under
    /// the latch wait.
    pub(super) fn latch_root_read(&self) -> Result<Option<ReadLatchedPage>, BTreeError> {
        loop {
            let root_id = *self.root_page_id.read();
            if root_id == INVALID_PAGE_ID {
                return Ok(None);
            }
            let pin = self.buffer_pool.fetch_page_pinned(root_id)?;
            let latched = ReadLatchedPage::acquire(pin);
            if *self.root_page_id.read() == root_id {
                return Ok(Some(latched));
            }
        }
    }

    /// Descend to the leaf owning `key` under read latches, hand over
    /// hand. Returns the read-latched, pinned leaf.
    pub(super) fn find_leaf_read(
        &self,
        key: &K,
    ) -> Result<Option<ReadLatchedPage>, BTreeError> {
        let mut current = match self.latch_root_read()? {
            Some(latched) => latched,
            None => return Ok(None),
        };

        loop {
            if page_is_leaf(&current.guard) {
                return Ok(Some(current));
            }
            let node = decode_node::<K>(&current.guard)?;
            let child_id = node.as_internal().child_for(key);

            let child_pin = self.buffer_pool.fetch_page_pinned(child_id)?;
            let child = ReadLatchedPage::acquire(child_pin);
            // Child latched; the parent's latch releases on reassignment.
            current = child;
        }
    }

    /// Descend to the leaf owning `key` under read latches, taking a
    /// *write* latch on the leaf itself. The parent's read latch is held
    /// until the leaf's write latch is acquired, so the leaf's key range
    /// cannot shift in the window.
    pub(super) fn find_leaf_write(
        &self,
        key: &K,
    ) -> Result<Option<WriteLatchedPage>, BTreeError> {
        // Root acquisition: when the root itself is a leaf there is no
        // parent latch to shield us, so re-check the root id after the
        // write latch is granted.
        let mut current = loop {
            let root_id = *self.root_page_id.read();
            if root_id == INVALID_PAGE_ID {
                return Ok(None);
            }
            let pin = self.buffer_pool.fetch_page_pinned(root_id)?;

            let root_is_leaf = page_is_leaf(&pin.page().read());
            if root_is_leaf {
                let latched = WriteLatchedPage::acquire(pin);
                if *self.root_page_id.read() == root_id {
                    return Ok(Some(latched));
                }
                continue;
            }

            let latched = ReadLatchedPage::acquire(pin);
            if *self.root_page_id.read() == root_id {
                break latched;
            }
        };

        loop {
            let node = decode_node::<K>(&current.guard)?;
            let child_id = node.as_internal().child_for(key);
            let child_pin = self.buffer_pool.fetch_page_pinned(child_id)?;

            let child_is_leaf = page_is_leaf(&child_pin.page().read());
            if child_is_leaf {
                // Parent read latch still held across this acquisition.
                let leaf = WriteLatchedPage::acquire(child_pin);
                return Ok(Some(leaf));
            }

            let child = ReadLatchedPage::acquire(child_pin);
            current = child;
        }
    }

    /// Pessimistic descent: write latches top-down, releasing everything
    /// above each safe node. The returned stack holds the deepest safe
    /// node (or the root) down to the target leaf.
    pub(super) fn descend_pessimistic(
        &self,
        key: &K,
        op: TreeOp,
    ) -> Result<LatchStack, BTreeError> {
        let mut stack = LatchStack::new();

        loop {
            let root_id = *self.root_page_id.read();
            if root_id == INVALID_PAGE_ID {
                return Ok(stack);
            }
            let pin = self.buffer_pool.fetch_page_pinned(root_id)?;
            let latched = WriteLatchedPage::acquire(pin);
            if *self.root_page_id.read() == root_id {
                stack.push(latched);
                break;
            }
        }

        loop {
            let level = stack.len() - 1;
            let node = decode_node::<K>(&stack.entry_at(level).guard)?;

            if Self::is_safe(&node, op) {
                stack.release_ancestors();
            }

            match node {
                BTreeNode::Leaf(_) => return Ok(stack),
                BTreeNode::Internal(internal) => {
                    let child_id = internal.child_for(key);
                    let child_pin = self.buffer_pool.fetch_page_pinned(child_id)?;
                    stack.push(WriteLatchedPage::acquire(child_pin));
                }
            }
        }
    }

    /// A node is safe when the current operation cannot propagate past it:
    /// inserts need room for one more entry; removals need slack above the
    /// half-full bound.
    fn is_safe(node: &BTreeNode<K>, op: TreeOp) -> bool {
        match op {
            TreeOp::Insert => match node {
                BTreeNode::Leaf(leaf) => leaf.size() + 1 < leaf.max_size,
                BTreeNode::Internal(internal) => !internal.is_full(),
            },
            TreeOp::Remove => node.size() > node.min_size(),
        }
    }

    /// Patch a node's parent pointer, through the latch this path already
    /// holds when the node is on it, otherwise under a brief write latch.
    pub(super) fn set_parent_pointer(
        &self,
        stack: &mut LatchStack,
        page_id: PageId,
        parent_id: PageId,
    ) -> Result<(), BTreeError> {
        if let Some(entry) = stack.entry_for(page_id) {
            write_parent_id(&mut entry.guard, parent_id);
            entry.pin.mark_dirty();
            return Ok(());
        }

        let pin = self.buffer_pool.fetch_page_pinned(page_id)?;
        {
            let mut page = pin.page().write();
            write_parent_id(&mut page, parent_id);
        }
        pin.mark_dirty();
        Ok(())
    }

    /// Best-effort deallocation of pages orphaned by merges and root
    /// lowering. A page still pinned elsewhere stays allocated.
    pub(super) fn deallocate_pages(&self, page_ids: Vec<PageId>) {
        for page_id in page_ids {
            if let Err(e) = self.buffer_pool.delete_page(page_id) {
                log::debug!("deferred delete of page {} skipped: {}", page_id, e);
            }
        }
    }
}
