use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;

use crate::common::types::{Page, PageId};
use crate::storage::buffer::PinnedPage;

/// Owned page-latch guards. Crabbing hands latches from parent to child
/// across call frames, so the guards must not borrow from a local
/// `PagePtr`; the `arc_lock` guards own their lock handle.
pub type PageReadGuard = ArcRwLockReadGuard<RawRwLock, Page>;
pub type PageWriteGuard = ArcRwLockWriteGuard<RawRwLock, Page>;

/// A page held under a read latch together with its pin. Latch releases
/// before pin, as with the write-side twin.
pub struct ReadLatchedPage {
    pub guard: PageReadGuard,
    pub pin: PinnedPage,
}

impl ReadLatchedPage {
    pub fn acquire(pin: PinnedPage) -> Self {
        let guard = pin.page().read_arc();
        Self { guard, pin }
    }
}

/// A page held under a write latch together with its pin.
///
/// Field order matters: the latch releases before the pin, so a page is
/// never unpinned while still latched by this holder.
pub struct WriteLatchedPage {
    pub guard: PageWriteGuard,
    pub pin: PinnedPage,
}

impl WriteLatchedPage {
    pub fn acquire(pin: PinnedPage) -> Self {
        let guard = pin.page().write_arc();
        Self { guard, pin }
    }

    pub fn page_id(&self) -> PageId {
        self.pin.page_id()
    }
}

/// The write-latched path retained by a pessimistic descent: the deepest
/// safe ancestor (or the root) first, the target leaf last. Dropping the
/// stack releases every latch and pin, so all exit paths unwind cleanly.
pub struct LatchStack {
    pages: Vec<WriteLatchedPage>,
}

impl LatchStack {
    pub fn new() -> Self {
        Self { pages: Vec::new() }
    }

    pub fn push(&mut self, page: WriteLatchedPage) {
        self.pages.push(page);
    }

    /// Release every latched ancestor of the most recent page. Called when
    /// a safe node is reached: nothing above it can be touched by this
    /// operation anymore.
    pub fn release_ancestors(&mut self) {
        let keep = self.pages.pop();
        self.pages.clear();
        if let Some(keep) = keep {
            self.pages.push(keep);
        }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn page_id_at(&self, level: usize) -> PageId {
        self.pages[level].page_id()
    }

    pub fn entry_at(&mut self, level: usize) -> &mut WriteLatchedPage {
        &mut self.pages[level]
    }

    /// The stack entry holding `page_id`, if this path latched it.
    pub fn entry_for(&mut self, page_id: PageId) -> Option<&mut WriteLatchedPage> {
        self.pages.iter_mut().find(|entry| entry.page_id() == page_id)
    }
}

impl Default for LatchStack {
    fn default() -> Self {
        Self::new()
    }
}
