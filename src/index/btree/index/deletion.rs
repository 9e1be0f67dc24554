use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, InternalNode};
use crate::index::btree::serialization::{decode_node, encode_node};
use super::base::{BPlusTree, TreeOp};
use super::latch::{LatchStack, WriteLatchedPage};

impl<K> BPlusTree<K>
where
    K: Ord + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Delete a key. A missing key is a negative result, not an error.
    pub fn remove(&self, key: &K) -> Result<bool, BTreeError> {
        if self.is_empty() {
            return Ok(false);
        }

        // Optimistic pass: delete in place when the leaf is the root or
        // stays at least half full afterwards.
        if let Some(mut leaf_page) = self.find_leaf_write(key)? {
            let mut node = decode_node::<K>(&leaf_page.guard)?;
            let leaf = node.as_leaf_mut();
            if leaf.parent_page_id == INVALID_PAGE_ID || leaf.size() > leaf.min_size() {
                let removed = leaf.remove(key);
                if removed {
                    encode_node(&node, &mut leaf_page.guard)?;
                    leaf_page.pin.mark_dirty();
                }
                return Ok(removed);
            }
        }

        // The delete may underflow: retry with write latches held top-down.
        self.remove_pessimistic(key)
    }

    fn remove_pessimistic(&self, key: &K) -> Result<bool, BTreeError> {
        let mut stack = self.descend_pessimistic(key, TreeOp::Remove)?;
        if stack.is_empty() {
            return Ok(false);
        }
        let leaf_level = stack.len() - 1;

        let mut node = decode_node::<K>(&stack.entry_at(leaf_level).guard)?;
        if !node.as_leaf_mut().remove(key) {
            return Ok(false);
        }
        {
            let entry = stack.entry_at(leaf_level);
            encode_node(&node, &mut entry.guard)?;
            entry.pin.mark_dirty();
        }

        let leaf = node.as_leaf();
        let underflowed = leaf.parent_page_id != INVALID_PAGE_ID && leaf.size() < leaf.min_size();
        let orphaned = if underflowed {
            self.repair_underflow(&mut stack)?
        } else {
            Vec::new()
        };

        // Merged-away pages can only be deallocated once this path's
        // latches and pins are gone.
        drop(stack);
        self.deallocate_pages(orphaned);

        Ok(true)
    }

    /// Repair an underflow at the bottom of the stack: borrow from a
    /// sibling when one has slack, otherwise merge (preferring the left
    /// sibling) and walk the underflow up. A root left with a single child
    /// lowers the tree. Returns the pages orphaned along the way.
    fn repair_underflow(&self, stack: &mut LatchStack) -> Result<Vec<PageId>, BTreeError> {
        let mut orphaned = Vec::new();
        let mut level = stack.len() - 1;

        loop {
            debug_assert!(level > 0, "the root cannot underflow");
            let parent_level = level - 1;
            let node_id = stack.page_id_at(level);

            let mut parent_node = decode_node::<K>(&stack.entry_at(parent_level).guard)?;
            let parent = parent_node.as_internal_mut();
            let node_index = parent
                .index_of_child(node_id)
                .ok_or(BTreeError::InvalidPageFormat)?;

            if self.try_borrow(stack, level, parent, node_index)? {
                let entry = stack.entry_at(parent_level);
                encode_node(&parent_node, &mut entry.guard)?;
                entry.pin.mark_dirty();
                return Ok(orphaned);
            }

            let merged_away = self.merge_with_sibling(stack, level, parent, node_index)?;
            orphaned.push(merged_away);
            log::debug!("merged page {} away under parent {}", merged_away, parent.page_id);

            let parent_is_root = parent.parent_page_id == INVALID_PAGE_ID;
            let parent_size = parent.size();
            let sole_child = parent.children.first().copied();
            let parent_id = parent.page_id;
            {
                let entry = stack.entry_at(parent_level);
                encode_node(&parent_node, &mut entry.guard)?;
                entry.pin.mark_dirty();
            }

            if parent_is_root {
                if parent_size == 1 {
                    // The root forwards to a single child: lower the tree.
                    let new_root = sole_child.expect("root with one child");
                    log::debug!("lowering tree: new root {}", new_root);
                    self.set_parent_pointer(stack, new_root, INVALID_PAGE_ID)?;

                    let mut root_guard = self.root_page_id.write();
                    *root_guard = new_root;
                    self.update_root_record(new_root)?;
                    orphaned.push(parent_id);
                }
                return Ok(orphaned);
            }

            if parent_size < parent_node.min_size() {
                level = parent_level;
                continue;
            }
            return Ok(orphaned);
        }
    }

    /// Try to borrow one entry from the left, then the right sibling.
    /// Borrowing transfers an entry and rewrites the parent separator; the
    /// caller re-encodes the parent.
    fn try_borrow(
        &self,
        stack: &mut LatchStack,
        level: usize,
        parent: &mut InternalNode<K>,
        node_index: usize,
    ) -> Result<bool, BTreeError> {
        let mut node = decode_node::<K>(&stack.entry_at(level).guard)?;

        if node_index > 0 {
            let left_id = parent.children[node_index - 1];
            let pin = self.buffer_pool.fetch_page_pinned(left_id)?;
            let mut left_latched = WriteLatchedPage::acquire(pin);
            let mut left = decode_node::<K>(&left_latched.guard)?;

            if left.size() > left.min_size() {
                match (&mut node, &mut left) {
                    (BTreeNode::Leaf(node), BTreeNode::Leaf(left)) => {
                        let moved = left.entries.pop().expect("donor leaf is not empty");
                        node.entries.insert(0, moved);
                        parent.set_separator_of(node_index, node.entries[0].0.clone());
                    }
                    (BTreeNode::Internal(node), BTreeNode::Internal(left)) => {
                        // The separator rotates down; the donor's last
                        // child moves over and its key rotates up.
                        let moved_child = left.children.pop().expect("donor has children");
                        let moved_key = left.keys.pop().expect("donor has separators");
                        let down_key = parent
                            .separator_of(node_index)
                            .expect("non-first child has a separator")
                            .clone();
                        node.keys.insert(0, down_key);
                        node.children.insert(0, moved_child);
                        parent.set_separator_of(node_index, moved_key);
                        let node_id = node.page_id;
                        self.set_parent_pointer(stack, moved_child, node_id)?;
                    }
                    _ => return Err(BTreeError::InvalidPageFormat),
                }

                encode_node(&left, &mut left_latched.guard)?;
                left_latched.pin.mark_dirty();
                let entry = stack.entry_at(level);
                encode_node(&node, &mut entry.guard)?;
                entry.pin.mark_dirty();
                return Ok(true);
            }
        }

        if node_index + 1 < parent.children.len() {
            let right_id = parent.children[node_index + 1];
            let pin = self.buffer_pool.fetch_page_pinned(right_id)?;
            let mut right_latched = WriteLatchedPage::acquire(pin);
            let mut right = decode_node::<K>(&right_latched.guard)?;

            if right.size() > right.min_size() {
                match (&mut node, &mut right) {
                    (BTreeNode::Leaf(node), BTreeNode::Leaf(right)) => {
                        let moved = right.entries.remove(0);
                        node.entries.push(moved);
                        parent.set_separator_of(node_index + 1, right.entries[0].0.clone());
                    }
                    (BTreeNode::Internal(node), BTreeNode::Internal(right)) => {
                        let moved_child = right.children.remove(0);
                        let moved_key = right.keys.remove(0);
                        let down_key = parent
                            .separator_of(node_index + 1)
                            .expect("right sibling has a separator")
                            .clone();
                        node.keys.push(down_key);
                        node.children.push(moved_child);
                        parent.set_separator_of(node_index + 1, moved_key);
                        let node_id = node.page_id;
                        self.set_parent_pointer(stack, moved_child, node_id)?;
                    }
                    _ => return Err(BTreeError::InvalidPageFormat),
                }

                encode_node(&right, &mut right_latched.guard)?;
                right_latched.pin.mark_dirty();
                let entry = stack.entry_at(level);
                encode_node(&node, &mut entry.guard)?;
                entry.pin.mark_dirty();
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Merge the underflowed node with a sibling, preferring to fold the
    /// node into its left sibling; the leftmost child instead absorbs its
    /// right sibling. Removes the dead child's separator from the parent
    /// (the caller re-encodes the parent) and returns the dead page id.
    fn merge_with_sibling(
        &self,
        stack: &mut LatchStack,
        level: usize,
        parent: &mut InternalNode<K>,
        node_index: usize,
    ) -> Result<PageId, BTreeError> {
        let mut node = decode_node::<K>(&stack.entry_at(level).guard)?;
        let node_id = node.page_id();

        if node_index > 0 {
            // Fold the node into its left sibling.
            let left_id = parent.children[node_index - 1];
            let pin = self.buffer_pool.fetch_page_pinned(left_id)?;
            let mut left_latched = WriteLatchedPage::acquire(pin);
            let mut left = decode_node::<K>(&left_latched.guard)?;

            match (&mut left, &mut node) {
                (BTreeNode::Leaf(left), BTreeNode::Leaf(node)) => {
                    left.entries.append(&mut node.entries);
                    left.next_page_id = node.next_page_id;
                }
                (BTreeNode::Internal(left), BTreeNode::Internal(node)) => {
                    let down_key = parent
                        .separator_of(node_index)
                        .expect("non-first child has a separator")
                        .clone();
                    left.keys.push(down_key);
                    left.keys.append(&mut node.keys);
                    for &child in &node.children {
                        self.set_parent_pointer(stack, child, left_id)?;
                    }
                    left.children.append(&mut node.children);
                }
                _ => return Err(BTreeError::InvalidPageFormat),
            }

            parent.remove_child_at(node_index);
            encode_node(&left, &mut left_latched.guard)?;
            left_latched.pin.mark_dirty();
            return Ok(node_id);
        }

        // Leftmost child: absorb the right sibling instead.
        let right_id = parent.children[node_index + 1];
        let pin = self.buffer_pool.fetch_page_pinned(right_id)?;
        let mut right_latched = WriteLatchedPage::acquire(pin);
        let mut right = decode_node::<K>(&right_latched.guard)?;

        match (&mut node, &mut right) {
            (BTreeNode::Leaf(node), BTreeNode::Leaf(right)) => {
                node.entries.append(&mut right.entries);
                node.next_page_id = right.next_page_id;
            }
            (BTreeNode::Internal(node), BTreeNode::Internal(right)) => {
                let down_key = parent
                    .separator_of(node_index + 1)
                    .expect("right sibling has a separator")
                    .clone();
                node.keys.push(down_key);
                node.keys.append(&mut right.keys);
                let node_id = node.page_id;
                for &child in &right.children {
                    self.set_parent_pointer(stack, child, node_id)?;
                }
                node.children.append(&mut right.children);
            }
            _ => return Err(BTreeError::InvalidPageFormat),
        }

        parent.remove_child_at(node_index + 1);
        {
            let entry = stack.entry_at(level);
            encode_node(&node, &mut entry.guard)?;
            entry.pin.mark_dirty();
        }
        drop(right_latched);
        Ok(right_id)
    }
}
