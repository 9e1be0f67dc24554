use std::collections::{BTreeSet, VecDeque};
use parking_lot::Mutex;

use crate::common::types::FrameId;

/// LRU-K replacement policy.
///
/// Frames with fewer than `k` recorded accesses live in the *new list*,
/// evicted FIFO by first access (their backward k-distance is infinite).
/// Frames with at least `k` accesses live in the *cache list*, evicted in
/// ascending order of their kth-most-recent access timestamp. Only
/// evictable frames sit in either list; `size()` counts exactly those.
pub struct LruKReplacer {
    inner: Mutex<ReplacerInner>,
    k: usize,
}

struct ReplacerInner {
    current_timestamp: u64,
    evictable_count: usize,
    frames: Vec<FrameStatus>,
    /// FIFO among evictable frames with fewer than k accesses.
    new_list: VecDeque<FrameId>,
    /// Evictable frames with >= k accesses, keyed by kth-back timestamp.
    cache_list: BTreeSet<(u64, FrameId)>,
}

struct FrameStatus {
    /// Most recent accesses, oldest first; at most k timestamps kept.
    history: VecDeque<u64>,
    access_count: usize,
    evictable: bool,
}

impl FrameStatus {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            access_count: 0,
            evictable: false,
        }
    }

    /// Timestamp of the kth most recent access; only meaningful once
    /// `access_count >= k`, when the history holds exactly k entries.
    fn kth_back(&self) -> u64 {
        self.history[0]
    }

    fn reset(&mut self) {
        self.history.clear();
        self.access_count = 0;
        self.evictable = false;
    }
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k >= 1, "LRU-K requires k >= 1");
        let frames = (0..num_frames).map(|_| FrameStatus::new()).collect();
        Self {
            inner: Mutex::new(ReplacerInner {
                current_timestamp: 0,
                evictable_count: 0,
                frames,
                new_list: VecDeque::with_capacity(num_frames),
                cache_list: BTreeSet::new(),
            }),
            k,
        }
    }

    /// Evict the frame with the largest backward k-distance: the head of
    /// the new list if any, else the cache-list frame with the smallest
    /// kth-back timestamp. The victim's history is cleared.
    pub fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();

        if let Some(frame_id) = inner.new_list.pop_front() {
            inner.frames[frame_id as usize].reset();
            inner.evictable_count -= 1;
            log::debug!("lru-k evict {} from new list", frame_id);
            return Some(frame_id);
        }

        if let Some(&(ts, frame_id)) = inner.cache_list.iter().next() {
            inner.cache_list.remove(&(ts, frame_id));
            inner.frames[frame_id as usize].reset();
            inner.evictable_count -= 1;
            log::debug!("lru-k evict {} from cache list", frame_id);
            return Some(frame_id);
        }

        None
    }

    /// Record an access, moving the frame between lists when it is
    /// evictable and its access count crosses k.
    pub fn record_access(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        let k = self.k;

        let timestamp = inner.current_timestamp;
        inner.current_timestamp += 1;

        let status = &mut inner.frames[frame_id as usize];
        let old_count = status.access_count;
        let old_kth = if old_count >= k { Some(status.kth_back()) } else { None };

        status.access_count += 1;
        status.history.push_back(timestamp);
        if status.history.len() > k {
            status.history.pop_front();
        }

        if !status.evictable {
            return;
        }

        let new_count = old_count + 1;
        if new_count < k {
            // Still in the new list; FIFO position is unchanged.
        } else if new_count == k {
            // Graduates from the new list to the cache list.
            let new_kth = inner.frames[frame_id as usize].kth_back();
            if let Some(pos) = inner.new_list.iter().position(|&id| id == frame_id) {
                inner.new_list.remove(pos);
            }
            inner.cache_list.insert((new_kth, frame_id));
        } else {
            // Reposition within the cache list under the new kth timestamp.
            let new_kth = inner.frames[frame_id as usize].kth_back();
            if let Some(old_kth) = old_kth {
                inner.cache_list.remove(&(old_kth, frame_id));
            }
            inner.cache_list.insert((new_kth, frame_id));
        }
    }

    /// Flip a frame's evictable flag, inserting into or removing from
    /// whichever list applies. A frame with no recorded access cannot be
    /// made evictable.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut inner = self.inner.lock();
        let k = self.k;

        let status = &inner.frames[frame_id as usize];
        if status.evictable == evictable {
            return;
        }

        if !evictable {
            let count = status.access_count;
            let kth = if count >= k { Some(status.kth_back()) } else { None };
            inner.frames[frame_id as usize].evictable = false;
            inner.evictable_count -= 1;

            if let Some(kth) = kth {
                inner.cache_list.remove(&(kth, frame_id));
            } else if let Some(pos) = inner.new_list.iter().position(|&id| id == frame_id) {
                inner.new_list.remove(pos);
            }
            return;
        }

        if status.access_count == 0 {
            return;
        }

        let count = status.access_count;
        let kth = if count >= k { Some(status.kth_back()) } else { None };
        inner.frames[frame_id as usize].evictable = true;
        inner.evictable_count += 1;

        match kth {
            Some(kth) => {
                inner.cache_list.insert((kth, frame_id));
            }
            None => inner.new_list.push_back(frame_id),
        }
    }

    /// Remove an evictable frame outright, clearing its history. A no-op
    /// for frames that are not evictable.
    pub fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        let k = self.k;

        let status = &inner.frames[frame_id as usize];
        if !status.evictable {
            return;
        }

        let count = status.access_count;
        let kth = if count >= k { Some(status.kth_back()) } else { None };

        if let Some(kth) = kth {
            inner.cache_list.remove(&(kth, frame_id));
        } else if let Some(pos) = inner.new_list.iter().position(|&id| id == frame_id) {
            inner.new_list.remove(pos);
        }

        inner.frames[frame_id as usize].reset();
        inner.evictable_count -= 1;
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.inner.lock().evictable_count
    }
}
