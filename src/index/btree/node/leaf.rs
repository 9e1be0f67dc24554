use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use super::min_size_for;

/// A decoded leaf page: an ordered run of `(key, rid)` entries plus the
/// sibling link. Keys are strictly increasing. A leaf holding `max_size`
/// entries is full and must split.
pub struct LeafNode<K> {
    pub page_id: PageId,
    pub parent_page_id: PageId,
    pub next_page_id: PageId,
    pub max_size: usize,
    pub entries: Vec<(K, Rid)>,
}

impl<K: Ord + Clone> LeafNode<K> {
    pub fn new(page_id: PageId, parent_page_id: PageId, max_size: usize) -> Self {
        Self {
            page_id,
            parent_page_id,
            next_page_id: INVALID_PAGE_ID,
            max_size,
            entries: Vec::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn min_size(&self) -> usize {
        min_size_for(self.max_size)
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_size
    }

    /// Point lookup by binary search.
    pub fn search(&self, key: &K) -> Option<Rid> {
        self.entries
            .binary_search_by(|(k, _)| k.cmp(key))
            .ok()
            .map(|index| self.entries[index].1)
    }

    /// Ordered insert; rejects duplicates and full pages.
    pub fn insert(&mut self, key: K, rid: Rid) -> bool {
        if self.is_full() {
            return false;
        }
        match self.entries.binary_search_by(|(k, _)| k.cmp(&key)) {
            Ok(_) => false,
            Err(index) => {
                self.entries.insert(index, (key, rid));
                true
            }
        }
    }

    /// Remove in order, compacting. False when the key is absent.
    pub fn remove(&mut self, key: &K) -> bool {
        match self.entries.binary_search_by(|(k, _)| k.cmp(key)) {
            Ok(index) => {
                self.entries.remove(index);
                true
            }
            Err(_) => false,
        }
    }

    /// Index of the first entry with `key >= target`; `size()` when every
    /// key is smaller.
    pub fn index_of_lower_bound(&self, target: &K) -> usize {
        self.entries.partition_point(|(k, _)| k < target)
    }

    pub fn first_key(&self) -> &K {
        &self.entries[0].0
    }

    /// Split off the upper half into a fresh sibling; `self` keeps
    /// `min_size` entries. The caller assigns the sibling's identity and
    /// threads the leaf chain.
    pub fn split(&mut self) -> Vec<(K, Rid)> {
        self.entries.split_off(self.min_size())
    }
}
