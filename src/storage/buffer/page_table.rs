use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use parking_lot::RwLock;

/// Bounded associative mapping backed by extendible hashing.
///
/// A directory of bucket references is indexed by the low `global_depth`
/// bits of the key's hash. Each bucket carries a `local_depth <=
/// global_depth` and a fixed capacity. Overflowing a bucket whose local
/// depth equals the global depth doubles the directory first; the bucket
/// then splits, redistributing its entries by the next hash bit.
///
/// The buffer pool instantiates this as its page table
/// (`PageId -> FrameId`).
pub struct ExtendibleHashTable<K, V> {
    inner: RwLock<TableInner<K, V>>,
    bucket_size: usize,
}

struct TableInner<K, V> {
    global_depth: usize,
    num_buckets: usize,
    dir: Vec<Arc<RwLock<Bucket<K, V>>>>,
}

struct Bucket<K, V> {
    local_depth: usize,
    items: Vec<(K, V)>,
}

impl<K, V> Bucket<K, V>
where
    K: PartialEq + Clone,
    V: Clone,
{
    fn new(local_depth: usize, capacity: usize) -> Self {
        Self {
            local_depth,
            items: Vec::with_capacity(capacity),
        }
    }

    fn find(&self, key: &K) -> Option<V> {
        self.items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    fn remove(&mut self, key: &K) -> bool {
        if let Some(pos) = self.items.iter().position(|(k, _)| k == key) {
            self.items.swap_remove(pos);
            return true;
        }
        false
    }

    /// Insert or update in place; returns false when the bucket is full.
    fn insert(&mut self, key: K, value: V, capacity: usize) -> bool {
        if let Some(pos) = self.items.iter().position(|(k, _)| *k == key) {
            self.items[pos].1 = value;
            return true;
        }
        if self.items.len() >= capacity {
            return false;
        }
        self.items.push((key, value));
        true
    }
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + PartialEq + Clone,
    V: Clone,
{
    pub fn new(bucket_size: usize) -> Self {
        let bucket = Arc::new(RwLock::new(Bucket::new(0, bucket_size)));
        Self {
            inner: RwLock::new(TableInner {
                global_depth: 0,
                num_buckets: 1,
                dir: vec![bucket],
            }),
            bucket_size,
        }
    }

    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.read();
        let index = dir_index(key, inner.global_depth);
        let bucket = inner.dir[index].read();
        bucket.find(key)
    }

    pub fn remove(&self, key: &K) -> bool {
        let inner = self.inner.read();
        let index = dir_index(key, inner.global_depth);
        let mut bucket = inner.dir[index].write();
        bucket.remove(key)
    }

    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.write();

        loop {
            let index = dir_index(&key, inner.global_depth);
            let bucket_ref = Arc::clone(&inner.dir[index]);
            if bucket_ref.write().insert(key.clone(), value.clone(), self.bucket_size) {
                return;
            }

            // The bucket is full. If its local depth has caught up with the
            // global depth, the directory doubles before the split.
            let local_depth = bucket_ref.read().local_depth;
            if local_depth == inner.global_depth {
                inner.global_depth += 1;
                let dir_size = inner.dir.len();
                for i in 0..dir_size {
                    let dup = Arc::clone(&inner.dir[i]);
                    inner.dir.push(dup);
                }
            }

            Self::split_bucket(&mut inner, index, self.bucket_size);
        }
    }

    /// Split the full bucket designated by `dir[index]`, redistributing its
    /// entries by bit `local_depth` of the hash, and rewire every directory
    /// slot whose masked index matches one of the two new prefixes.
    fn split_bucket(inner: &mut TableInner<K, V>, index: usize, bucket_size: usize) {
        let old_bucket = Arc::clone(&inner.dir[index]);
        let local_depth = old_bucket.read().local_depth;

        let old_prefix = index & ((1 << local_depth) - 1);
        let new_prefix = old_prefix | (1 << local_depth);

        let low = Arc::new(RwLock::new(Bucket::new(local_depth + 1, bucket_size)));
        let high = Arc::new(RwLock::new(Bucket::new(local_depth + 1, bucket_size)));

        {
            let old = old_bucket.read();
            let mut low_guard = low.write();
            let mut high_guard = high.write();
            let mask = (1 << (local_depth + 1)) - 1;
            for (k, v) in &old.items {
                if hash_of(k) & mask == new_prefix as u64 {
                    high_guard.items.push((k.clone(), v.clone()));
                } else {
                    low_guard.items.push((k.clone(), v.clone()));
                }
            }
        }

        let mask = (1 << (local_depth + 1)) - 1;
        for slot in 0..inner.dir.len() {
            if slot & mask == old_prefix {
                inner.dir[slot] = Arc::clone(&low);
            } else if slot & mask == new_prefix {
                inner.dir[slot] = Arc::clone(&high);
            }
        }

        inner.num_buckets += 1;
    }

    pub fn global_depth(&self) -> usize {
        self.inner.read().global_depth
    }

    pub fn local_depth(&self, dir_index: usize) -> usize {
        let inner = self.inner.read();
        let local_depth = inner.dir[dir_index].read().local_depth;
        local_depth
    }

    pub fn num_buckets(&self) -> usize {
        self.inner.read().num_buckets
    }
}

fn hash_of<K: Hash>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

fn dir_index<K: Hash>(key: &K, global_depth: usize) -> usize {
    let mask = (1u64 << global_depth) - 1;
    (hash_of(key) & mask) as usize
}
