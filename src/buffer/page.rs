use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// Raw contents of one page.
pub type PageData = Box<[u8; PAGE_SIZE]>;

/// A buffer frame: one page worth of bytes plus the bookkeeping the pool
/// needs to decide when the frame may be reused.
///
/// Metadata is only changed by the buffer pool while it holds its own lock;
/// the atomics let callers read it without taking that lock.
pub struct Page {
    frame_id: FrameId,
    page_id: RwLock<PageId>,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
    data: RwLock<PageData>,
}

impl Page {
    pub(crate) fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: RwLock::new(INVALID_PAGE_ID),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Logical page held by this frame, or `INVALID_PAGE_ID` when empty.
    pub fn page_id(&self) -> PageId {
        *self.page_id.read()
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    /// Shared access to the page bytes.
    pub fn data(&self) -> RwLockReadGuard<'_, PageData> {
        self.data.read()
    }

    /// Exclusive access to the page bytes. Callers that change the page must
    /// report it dirty when unpinning.
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, PageData> {
        self.data.write()
    }

    pub(crate) fn set_page_id(&self, page_id: PageId) {
        *self.page_id.write() = page_id;
    }

    pub(crate) fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// Increments the pin count and returns the new value.
    pub(crate) fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count, returning the new value, or `None` if the
    /// page was not pinned.
    pub(crate) fn unpin(&self) -> Option<u32> {
        self.pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .ok()
            .map(|prev| prev - 1)
    }

    /// Installs `page_id` with a single pin and clean contents.
    pub(crate) fn install(&self, page_id: PageId) {
        self.set_page_id(page_id);
        self.pin_count.store(1, Ordering::Release);
        self.set_dirty(false);
    }

    /// Returns the frame to its empty state.
    pub(crate) fn reset(&self) {
        self.set_page_id(INVALID_PAGE_ID);
        self.pin_count.store(0, Ordering::Release);
        self.set_dirty(false);
        self.data.write().fill(0);
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("frame_id", &self.frame_id)
            .field("page_id", &self.page_id())
            .field("pin_count", &self.pin_count())
            .field("is_dirty", &self.is_dirty())
            .finish()
    }
}
