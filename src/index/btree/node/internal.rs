use crate::common::types::PageId;
use super::min_size_for;

/// A decoded internal page. `children[i]` holds keys `k` with
/// `keys[i-1] <= k < keys[i]`; the first child has no lower separator (the
/// on-page slot-0 key is undefined). `size()` counts child pointers;
/// `max_size` is the child capacity.
pub struct InternalNode<K> {
    pub page_id: PageId,
    pub parent_page_id: PageId,
    pub max_size: usize,
    /// Separators; `keys[i]` guards `children[i + 1]`.
    pub keys: Vec<K>,
    pub children: Vec<PageId>,
}

impl<K: Ord + Clone> InternalNode<K> {
    pub fn new(page_id: PageId, parent_page_id: PageId, max_size: usize) -> Self {
        Self {
            page_id,
            parent_page_id,
            max_size,
            keys: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.children.len()
    }

    pub fn min_size(&self) -> usize {
        min_size_for(self.max_size)
    }

    pub fn is_full(&self) -> bool {
        self.children.len() >= self.max_size
    }

    /// Index of the child whose range contains `key`: the rightmost child
    /// whose separator is `<= key` (equal keys route right).
    pub fn child_index_for(&self, key: &K) -> usize {
        self.keys.partition_point(|separator| separator <= key)
    }

    pub fn child_for(&self, key: &K) -> PageId {
        self.children[self.child_index_for(key)]
    }

    /// Position of a child page id, if present.
    pub fn index_of_child(&self, child: PageId) -> Option<usize> {
        self.children.iter().position(|&id| id == child)
    }

    /// Left and right neighbors of `child` under this node.
    pub fn siblings_of(&self, child: PageId) -> (Option<PageId>, Option<PageId>) {
        match self.index_of_child(child) {
            Some(index) => {
                let left = index.checked_sub(1).map(|i| self.children[i]);
                let right = self.children.get(index + 1).copied();
                (left, right)
            }
            None => (None, None),
        }
    }

    /// Separator guarding `children[index]`; none for the first child.
    pub fn separator_of(&self, index: usize) -> Option<&K> {
        index.checked_sub(1).map(|i| &self.keys[i])
    }

    pub fn set_separator_of(&mut self, index: usize, key: K) {
        debug_assert!(index >= 1, "the first child has no separator");
        self.keys[index - 1] = key;
    }

    /// Insert `child` guarded by `key`, keeping separators sorted.
    pub fn insert_child(&mut self, key: K, child: PageId) {
        let index = self.keys.partition_point(|separator| separator < &key);
        self.keys.insert(index, key);
        self.children.insert(index + 1, child);
    }

    /// Seed a fresh root with two children split around `key`.
    pub fn init_root(&mut self, left: PageId, key: K, right: PageId) {
        debug_assert!(self.children.is_empty());
        self.children.push(left);
        self.keys.push(key);
        self.children.push(right);
    }

    /// Remove `children[index]` and the separator guarding it, compacting.
    /// The first child is never removed this way.
    pub fn remove_child_at(&mut self, index: usize) {
        debug_assert!(index >= 1, "cannot drop the first child's slot");
        self.keys.remove(index - 1);
        self.children.remove(index);
    }

    /// Split around the median: the returned key moves up to the parent,
    /// and the upper children move to the returned sibling. The caller
    /// assigns the sibling's identity and reparents the moved children.
    pub fn split(&mut self) -> (K, Vec<K>, Vec<PageId>) {
        let mid = self.children.len() / 2;
        let push_up = self.keys[mid - 1].clone();

        let right_children = self.children.split_off(mid);
        let right_keys = self.keys.split_off(mid);
        self.keys.pop();

        (push_up, right_keys, right_children)
    }
}
