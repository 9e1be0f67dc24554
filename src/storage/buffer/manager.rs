use std::cell::Cell;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::page_table::ExtendibleHashTable;
use crate::storage::buffer::replacer::LruKReplacer;
use crate::storage::disk::DiskManager;

/// Directory slots per page-table bucket.
const PAGE_TABLE_BUCKET_SIZE: usize = 4;

/// Per-frame bookkeeping, guarded by the pool mutex. Page *contents* are
/// guarded by the per-page latch inside [`PagePtr`].
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl FrameMeta {
    fn reset(&mut self) {
        self.page_id = INVALID_PAGE_ID;
        self.pin_count = 0;
        self.is_dirty = false;
    }
}

struct PoolInner {
    free_list: VecDeque<FrameId>,
    meta: Vec<FrameMeta>,
}

/// Bounded, page-addressable cache over the disk file.
///
/// Frames hold at most one page each; residency changes only when a frame's
/// pin count is zero. Victims come from the free list first, then from the
/// LRU-K replacer; dirty victims are written back before reuse. A single
/// pool mutex guards the free list, the page table, replacer calls, and
/// frame metadata.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<PagePtr>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruKReplacer,
    inner: Mutex<PoolInner>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(
        pool_size: usize,
        db_path: impl AsRef<Path>,
        replacer_k: usize,
    ) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(pool_size, disk_manager, replacer_k))
    }

    pub fn with_disk_manager(
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        replacer_k: usize,
    ) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        let mut meta = Vec::with_capacity(pool_size);

        for i in 0..pool_size {
            frames.push(Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))));
            free_list.push_back(i as FrameId);
            meta.push(FrameMeta {
                page_id: INVALID_PAGE_ID,
                pin_count: 0,
                is_dirty: false,
            });
        }

        Self {
            pool_size,
            frames,
            page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
            replacer: LruKReplacer::new(pool_size, replacer_k),
            inner: Mutex::new(PoolInner { free_list, meta }),
            disk_manager,
        }
    }

    /// Allocate a fresh page id, claim a frame for it, and hand the page
    /// back pinned. Fails with `BufferPoolFull` when every frame is pinned.
    pub fn new_page(&self) -> Result<(PageId, PagePtr), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = self.take_victim_frame(&mut inner)?;
        let page_id = match self.disk_manager.allocate_page() {
            Ok(id) => id,
            Err(e) => {
                inner.free_list.push_back(frame_id);
                return Err(e.into());
            }
        };

        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        {
            let mut page = self.frames[frame_id as usize].write();
            page.reset();
            page.page_id = page_id;
        }

        let meta = &mut inner.meta[frame_id as usize];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        self.page_table.insert(page_id, frame_id);

        Ok((page_id, Arc::clone(&self.frames[frame_id as usize])))
    }

    /// Return the page pinned, reading it from disk into a victim frame if
    /// it is not resident.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot fetch the invalid page id".to_string(),
            ));
        }

        let mut inner = self.inner.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            inner.meta[frame_id as usize].pin_count += 1;
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Ok(Arc::clone(&self.frames[frame_id as usize]));
        }

        let frame_id = self.take_victim_frame(&mut inner)?;

        {
            let mut page = self.frames[frame_id as usize].write();
            if let Err(e) = self.disk_manager.read_page(page_id, &mut page) {
                drop(page);
                inner.free_list.push_back(frame_id);
                return Err(e.into());
            }
        }

        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        let meta = &mut inner.meta[frame_id as usize];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        self.page_table.insert(page_id, frame_id);

        Ok(Arc::clone(&self.frames[frame_id as usize]))
    }

    /// Drop one pin. The dirty bit is sticky; a dirty release is charged to
    /// the replacer as the write access. When the pin count reaches zero
    /// the frame becomes evictable. Returns false (and does nothing) if the
    /// page is not resident or not pinned; the pin count never underflows.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut inner = self.inner.lock();

        let frame_id = match self.page_table.find(&page_id) {
            Some(id) => id,
            None => return false,
        };

        let meta = &mut inner.meta[frame_id as usize];
        if meta.pin_count == 0 {
            return false;
        }

        meta.is_dirty |= is_dirty;
        meta.pin_count -= 1;
        let now_evictable = meta.pin_count == 0;

        if is_dirty {
            self.replacer.record_access(frame_id);
        }
        if now_evictable {
            self.replacer.set_evictable(frame_id, true);
        }

        true
    }

    /// Write the page through to disk and clear its dirty bit.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = self
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        {
            let page = self.frames[frame_id as usize].read();
            self.disk_manager.write_page(&page)?;
        }
        inner.meta[frame_id as usize].is_dirty = false;

        Ok(())
    }

    /// Flush every resident page.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let resident: Vec<PageId> = {
            let inner = self.inner.lock();
            inner
                .meta
                .iter()
                .filter(|m| m.page_id != INVALID_PAGE_ID)
                .map(|m| m.page_id)
                .collect()
        };

        for page_id in resident {
            match self.flush_page(page_id) {
                Ok(()) | Err(BufferPoolError::PageNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Release a page from the pool. Succeeds trivially when the page is
    /// not resident; fails with `PagePinned` while anyone holds a pin.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = match self.page_table.find(&page_id) {
            Some(id) => id,
            None => return Ok(()),
        };

        if inner.meta[frame_id as usize].pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        self.replacer.remove(frame_id);
        self.page_table.remove(&page_id);

        self.frames[frame_id as usize].write().reset();
        inner.meta[frame_id as usize].reset();
        inner.free_list.push_back(frame_id);

        Ok(())
    }

    /// Claim a frame: free list first, else evict. The victim's dirty
    /// content is written back and its page-table entry dropped.
    fn take_victim_frame(&self, inner: &mut PoolInner) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self
            .replacer
            .evict()
            .ok_or(BufferPoolError::BufferPoolFull)?;

        let meta = &mut inner.meta[frame_id as usize];
        debug_assert_eq!(meta.pin_count, 0, "evicted a pinned frame");

        if meta.page_id != INVALID_PAGE_ID {
            if meta.is_dirty {
                log::debug!("writing back dirty page {} on eviction", meta.page_id);
                let page = self.frames[frame_id as usize].read();
                if let Err(e) = self.disk_manager.write_page(&page) {
                    drop(page);
                    inner.free_list.push_back(frame_id);
                    return Err(e.into());
                }
            }
            self.page_table.remove(&meta.page_id);
        }
        meta.reset();

        Ok(frame_id)
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn free_frame_count(&self) -> usize {
        self.inner.lock().free_list.len()
    }

    pub fn evictable_count(&self) -> usize {
        self.replacer.size()
    }

    /// Current pin count of a resident page, for tests and assertions.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.inner.lock();
        self.page_table
            .find(&page_id)
            .map(|frame_id| inner.meta[frame_id as usize].pin_count)
    }

    /// Whether a page currently occupies a frame.
    pub fn is_resident(&self, page_id: PageId) -> bool {
        let _inner = self.inner.lock();
        self.page_table.find(&page_id).is_some()
    }

    pub fn disk_manager(&self) -> Arc<DiskManager> {
        Arc::clone(&self.disk_manager)
    }

    /// Fetch a page wrapped in a [`PinnedPage`] guard that releases the pin
    /// when dropped.
    pub fn fetch_page_pinned(
        self: &Arc<Self>,
        page_id: PageId,
    ) -> Result<PinnedPage, BufferPoolError> {
        let page = self.fetch_page(page_id)?;
        Ok(PinnedPage::new(Arc::clone(self), page_id, page))
    }

    /// Allocate a new page wrapped in a [`PinnedPage`] guard.
    pub fn new_page_pinned(self: &Arc<Self>) -> Result<PinnedPage, BufferPoolError> {
        let (page_id, page) = self.new_page()?;
        Ok(PinnedPage::new(Arc::clone(self), page_id, page))
    }
}

/// A counted reservation of a frame. Holding the guard keeps the page
/// resident; dropping it releases the pin on every exit path, carrying the
/// accumulated dirty hint.
pub struct PinnedPage {
    bpm: Arc<BufferPoolManager>,
    page: PagePtr,
    page_id: PageId,
    dirty: Cell<bool>,
}

impl PinnedPage {
    fn new(bpm: Arc<BufferPoolManager>, page_id: PageId, page: PagePtr) -> Self {
        Self {
            bpm,
            page,
            page_id,
            dirty: Cell::new(false),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn page(&self) -> &PagePtr {
        &self.page
    }

    /// Record that the holder modified the page; the eventual unpin carries
    /// the dirty hint.
    pub fn mark_dirty(&self) {
        self.dirty.set(true);
    }
}

impl Drop for PinnedPage {
    fn drop(&mut self) {
        self.bpm.unpin_page(self.page_id, self.dirty.get());
    }
}
