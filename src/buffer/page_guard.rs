use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::common::PageId;

use super::{BufferPoolManager, Page, PageData};

/// RAII pin on a buffer pool page.
///
/// The page stays pinned for the guard's lifetime and is unpinned on drop,
/// reported dirty if it was ever written through the guard. Content locks
/// are taken per access with `read`/`write`, so several guards can be held
/// at once as long as no content lock outlives a call back into the pool.
pub struct PageGuard {
    bpm: Arc<BufferPoolManager>,
    page: Arc<Page>,
    page_id: PageId,
    is_dirty: bool,
}

impl PageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page: Arc<Page>) -> Self {
        let page_id = page.page_id();
        Self {
            bpm,
            page,
            page_id,
            is_dirty: false,
        }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Shared access to the page bytes.
    pub fn read(&self) -> RwLockReadGuard<'_, PageData> {
        self.page.data()
    }

    /// Exclusive access to the page bytes; marks the page dirty.
    pub fn write(&mut self) -> RwLockWriteGuard<'_, PageData> {
        self.is_dirty = true;
        self.page.data_mut()
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.bpm.unpin_page(self.page_id, self.is_dirty);
    }
}

impl std::fmt::Debug for PageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("page_id", &self.page_id)
            .field("is_dirty", &self.is_dirty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::DiskManager;
    use tempfile::NamedTempFile;

    fn create_bpm(pool_size: usize) -> (Arc<BufferPoolManager>, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        (Arc::new(BufferPoolManager::new(pool_size, dm)), temp_file)
    }

    #[test]
    fn test_guard_unpins_on_drop() {
        let (bpm, _temp) = create_bpm(4);

        let page_id = {
            let guard = bpm.new_page_guarded().unwrap().unwrap();
            assert_eq!(bpm.pin_count(guard.page_id()), Some(1));
            guard.page_id()
        };

        assert_eq!(bpm.pin_count(page_id), Some(0));
        assert!(bpm.check_all_unpinned());
    }

    #[test]
    fn test_guard_write_marks_dirty() {
        let (bpm, _temp) = create_bpm(4);
        let page_id = bpm.new_page_guarded().unwrap().unwrap().page_id();
        bpm.flush_page(page_id).unwrap();

        {
            let mut guard = bpm.fetch_page_guarded(page_id).unwrap().unwrap();
            assert!(!guard.is_dirty());
            guard.write()[0] = 42;
            assert!(guard.is_dirty());
        }

        let page = bpm.fetch_page(page_id).unwrap().unwrap();
        assert!(page.is_dirty());
        assert_eq!(page.data()[0], 42);
        bpm.unpin_page(page_id, false);
    }

    #[test]
    fn test_guard_survives_eviction_of_others() {
        let (bpm, _temp) = create_bpm(2);
        let mut keep = bpm.new_page_guarded().unwrap().unwrap();
        keep.write()[7] = 7;

        for _ in 0..5 {
            let mut other = bpm.new_page_guarded().unwrap().unwrap();
            other.write()[0] = 1;
        }

        assert_eq!(keep.read()[7], 7);
    }
}
