use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, InternalNode, LeafNode};
use crate::index::btree::serialization::{decode_node, encode_node};
use super::base::{BPlusTree, TreeOp};
use super::latch::{LatchStack, WriteLatchedPage};

impl<K> BPlusTree<K>
where
    K: Ord + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Insert a key/rid pair. Duplicate keys are rejected with `Ok(false)`.
    pub fn insert(&self, key: K, rid: Rid) -> Result<bool, BTreeError> {
        if self.is_empty() {
            self.create_tree()?;
        }

        // Optimistic pass: read-crab down, write-latch only the leaf, and
        // insert in place when the leaf stays below the split threshold.
        if let Some(mut leaf_page) = self.find_leaf_write(&key)? {
            let mut node = decode_node::<K>(&leaf_page.guard)?;
            let leaf = node.as_leaf_mut();
            if leaf.size() + 1 < leaf.max_size {
                let inserted = leaf.insert(key, rid);
                if inserted {
                    encode_node(&node, &mut leaf_page.guard)?;
                    leaf_page.pin.mark_dirty();
                }
                return Ok(inserted);
            }
        }

        // The insert may split: retry with write latches held top-down.
        self.insert_pessimistic(key, rid)
    }

    fn insert_pessimistic(&self, key: K, rid: Rid) -> Result<bool, BTreeError> {
        if self.is_empty() {
            self.create_tree()?;
        }
        let mut stack = self.descend_pessimistic(&key, TreeOp::Insert)?;
        debug_assert!(!stack.is_empty());
        let leaf_level = stack.len() - 1;

        let mut node = decode_node::<K>(&stack.entry_at(leaf_level).guard)?;

        if node.as_leaf().is_full() {
            // A merge can leave a leaf exactly full; split it first, then
            // place the new entry in whichever half owns the key.
            let (separator, right_id) = self.split_leaf(&mut stack, &mut node)?;
            if key >= separator {
                return self.insert_into_right_sibling(right_id, key, rid);
            }
            let leaf = node.as_leaf_mut();
            let inserted = leaf.insert(key, rid);
            if inserted {
                let entry = stack.entry_at(leaf_level);
                encode_node(&node, &mut entry.guard)?;
                entry.pin.mark_dirty();
            }
            return Ok(inserted);
        }

        let inserted = node.as_leaf_mut().insert(key, rid);
        if !inserted {
            return Ok(false);
        }
        stack.entry_at(leaf_level).pin.mark_dirty();

        if node.as_leaf().is_full() {
            self.split_leaf(&mut stack, &mut node)?;
        } else {
            let entry = stack.entry_at(leaf_level);
            encode_node(&node, &mut entry.guard)?;
        }

        Ok(true)
    }

    /// Insert into the freshly created right sibling of a just-split leaf.
    /// Ancestors are still latched by the caller's stack, and the sibling
    /// has half a page of room, so this cannot propagate.
    fn insert_into_right_sibling(
        &self,
        right_id: PageId,
        key: K,
        rid: Rid,
    ) -> Result<bool, BTreeError> {
        let pin = self.buffer_pool.fetch_page_pinned(right_id)?;
        let mut latched = WriteLatchedPage::acquire(pin);

        let mut node = decode_node::<K>(&latched.guard)?;
        let inserted = node.as_leaf_mut().insert(key, rid);
        if inserted {
            encode_node(&node, &mut latched.guard)?;
            latched.pin.mark_dirty();
        }
        Ok(inserted)
    }

    /// Split the full leaf at the top of the stack: the upper half moves to
    /// a new sibling, the leaf chain is relinked, and the separator is
    /// pushed into the parent. Returns the separator and the sibling's
    /// page id; `node` is left holding the lower half, already encoded.
    pub(super) fn split_leaf(
        &self,
        stack: &mut LatchStack,
        node: &mut BTreeNode<K>,
    ) -> Result<(K, PageId), BTreeError> {
        let leaf_level = stack.len() - 1;
        debug_assert_eq!(stack.page_id_at(leaf_level), node.page_id());

        let right_pin = self.buffer_pool.new_page_pinned()?;
        let right_id = right_pin.page_id();

        let leaf = node.as_leaf_mut();
        let upper = leaf.split();
        let separator = upper[0].0.clone();
        log::debug!(
            "splitting leaf {} at size {}, new sibling {}",
            leaf.page_id,
            leaf.size() + upper.len(),
            right_id
        );

        let right = LeafNode {
            page_id: right_id,
            parent_page_id: leaf.parent_page_id,
            next_page_id: leaf.next_page_id,
            max_size: leaf.max_size,
            entries: upper,
        };
        leaf.next_page_id = right_id;

        // The sibling must be complete before the left leaf publishes the
        // chain link to it.
        {
            let mut page = right_pin.page().write();
            encode_node(&BTreeNode::Leaf(right), &mut page)?;
        }
        right_pin.mark_dirty();
        {
            let entry = stack.entry_at(leaf_level);
            encode_node(node, &mut entry.guard)?;
            entry.pin.mark_dirty();
        }
        drop(right_pin);

        self.insert_into_parent(stack, leaf_level, separator.clone(), right_id)?;
        Ok((separator, right_id))
    }

    /// Thread a new (separator, child) pair upward from a split at
    /// `child_level`. Parents that overflow split in turn; a split of the
    /// stack's top grows the tree with a new root. Every node this walk
    /// can touch is already write-latched by the stack.
    fn insert_into_parent(
        &self,
        stack: &mut LatchStack,
        mut child_level: usize,
        mut separator: K,
        mut new_child_id: PageId,
    ) -> Result<(), BTreeError> {
        loop {
            if child_level == 0 {
                // The split node was the root: grow the tree by one level.
                let root_pin = self.buffer_pool.new_page_pinned()?;
                let root_id = root_pin.page_id();
                let left_id = stack.page_id_at(0);
                log::debug!("root {} split, new root {}", left_id, root_id);

                let mut root =
                    InternalNode::<K>::new(root_id, INVALID_PAGE_ID, self.internal_max_size);
                root.init_root(left_id, separator, new_child_id);
                {
                    let mut page = root_pin.page().write();
                    encode_node(&BTreeNode::Internal(root), &mut page)?;
                }
                root_pin.mark_dirty();

                self.set_parent_pointer(stack, left_id, root_id)?;
                self.set_parent_pointer(stack, new_child_id, root_id)?;

                let mut root_guard = self.root_page_id.write();
                *root_guard = root_id;
                return self.update_root_record(root_id);
            }

            let parent_level = child_level - 1;
            let mut parent_node = decode_node::<K>(&stack.entry_at(parent_level).guard)?;
            let parent = parent_node.as_internal_mut();
            parent.insert_child(separator, new_child_id);
            stack.entry_at(parent_level).pin.mark_dirty();

            let parent_node_ref = &parent_node;
            if parent_node_ref.as_internal().size() <= parent_node_ref.as_internal().max_size {
                let entry = stack.entry_at(parent_level);
                encode_node(parent_node_ref, &mut entry.guard)?;
                return Ok(());
            }

            // Parent overflowed: split around the median and continue up.
            let parent = parent_node.as_internal_mut();
            let (push_up, right_keys, right_children) = parent.split();

            let right_pin = self.buffer_pool.new_page_pinned()?;
            let right_id = right_pin.page_id();
            log::debug!("splitting internal {} into {}", parent.page_id, right_id);

            let right = InternalNode {
                page_id: right_id,
                parent_page_id: parent.parent_page_id,
                max_size: parent.max_size,
                keys: right_keys,
                children: right_children.clone(),
            };
            {
                let mut page = right_pin.page().write();
                encode_node(&BTreeNode::Internal(right), &mut page)?;
            }
            right_pin.mark_dirty();
            {
                let entry = stack.entry_at(parent_level);
                encode_node(&parent_node, &mut entry.guard)?;
            }

            // Children that moved to the sibling hang under it now.
            for child in right_children {
                self.set_parent_pointer(stack, child, right_id)?;
            }
            drop(right_pin);

            separator = push_up;
            new_child_id = right_id;
            child_level = parent_level;
        }
    }
}
