use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::common::{
    BasaltError, FrameId, PageId, ReplacerPolicy, Result, StorageConfig, PAGE_SIZE,
};
use crate::storage::disk::DiskManager;

use super::{ClockReplacer, LruReplacer, Page, PageGuard, Replacer};

/// State guarded by the pool-wide latch.
struct PoolInner {
    /// Page table: maps resident page IDs to frame IDs
    page_table: HashMap<PageId, FrameId>,
    /// Frames that hold no page
    free_list: VecDeque<FrameId>,
    /// Eviction policy over unpinned frames
    replacer: Box<dyn Replacer>,
}

/// BufferPoolManager caches disk pages in a fixed array of frames.
///
/// Every `fetch_page`/`new_page` pins the returned page and must be matched
/// by one `unpin_page`; a pinned page is never evicted. When every frame is
/// pinned, fetching a non-resident page returns `Ok(None)`.
pub struct BufferPoolManager {
    /// Number of frames in the buffer pool
    pool_size: usize,
    /// The buffer pool frames, indexed by frame id
    frames: Vec<Arc<Page>>,
    inner: Mutex<PoolInner>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    /// Creates a pool of `pool_size` frames using LRU replacement.
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self::with_replacer(pool_size, disk_manager, Box::new(LruReplacer::new(pool_size)))
    }

    /// Creates a pool sized and configured from `config`.
    pub fn from_config(config: &StorageConfig, disk_manager: Arc<DiskManager>) -> Self {
        let replacer: Box<dyn Replacer> = match config.replacer {
            ReplacerPolicy::Lru => Box::new(LruReplacer::new(config.pool_size)),
            ReplacerPolicy::Clock => Box::new(ClockReplacer::new(config.pool_size)),
        };
        Self::with_replacer(config.pool_size, disk_manager, replacer)
    }

    /// Creates a pool with a caller-supplied replacement policy.
    pub fn with_replacer(
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        replacer: Box<dyn Replacer>,
    ) -> Self {
        let frames = (0..pool_size)
            .map(|i| Arc::new(Page::new(FrameId::new(i as u32))))
            .collect();
        let free_list = (0..pool_size).map(|i| FrameId::new(i as u32)).collect();

        Self {
            pool_size,
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::with_capacity(pool_size),
                free_list,
                replacer,
            }),
            disk_manager,
        }
    }

    /// Pins `page_id` in the pool, reading it from disk if it is not
    /// resident. Returns `Ok(None)` when every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Option<Arc<Page>>> {
        if !page_id.is_valid() {
            return Err(BasaltError::InvalidPageId(page_id));
        }

        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let page = &self.frames[frame_id.as_usize()];
            if page.pin() == 1 {
                inner.replacer.pin(frame_id);
            }
            return Ok(Some(Arc::clone(page)));
        }

        let Some(frame_id) = self.acquire_frame(&mut inner)? else {
            warn!(%page_id, "buffer pool exhausted, cannot fetch page");
            return Ok(None);
        };
        let page = &self.frames[frame_id.as_usize()];

        let read = {
            let mut data = page.data_mut();
            self.disk_manager.read_page(page_id, &mut data[..])
        };
        if let Err(e) = read {
            inner.free_list.push_back(frame_id);
            return Err(e);
        }

        page.install(page_id);
        inner.page_table.insert(page_id, frame_id);
        inner.replacer.pin(frame_id);
        trace!(%page_id, %frame_id, "fetched page from disk");
        Ok(Some(Arc::clone(page)))
    }

    /// Allocates a fresh page on disk and pins a zeroed frame for it.
    /// Returns `Ok(None)` when every frame is pinned.
    pub fn new_page(&self) -> Result<Option<Arc<Page>>> {
        let mut inner = self.inner.lock();

        let Some(frame_id) = self.acquire_frame(&mut inner)? else {
            warn!("buffer pool exhausted, cannot create page");
            return Ok(None);
        };
        let page = &self.frames[frame_id.as_usize()];

        let page_id = match self.disk_manager.allocate_page() {
            Ok(page_id) => page_id,
            Err(e) => {
                inner.free_list.push_back(frame_id);
                return Err(e);
            }
        };

        page.data_mut().fill(0);
        page.install(page_id);
        // The zeroed contents replace whatever a previous owner of this id left on disk
        page.set_dirty(true);
        inner.page_table.insert(page_id, frame_id);
        inner.replacer.pin(frame_id);
        trace!(%page_id, %frame_id, "created page");
        Ok(Some(Arc::clone(page)))
    }

    /// Drops one pin on `page_id`, recording whether the caller modified it.
    ///
    /// Unpinning a page that is not resident is a no-op and returns true.
    /// Returns false if the page is resident but was not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut inner = self.inner.lock();

        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return true;
        };
        let page = &self.frames[frame_id.as_usize()];

        match page.unpin() {
            None => {
                debug!(%page_id, "unpin of a page that is not pinned");
                false
            }
            Some(remaining) => {
                if is_dirty {
                    page.set_dirty(true);
                }
                if remaining == 0 {
                    inner.replacer.unpin(frame_id);
                }
                true
            }
        }
    }

    /// Removes `page_id` from the pool and frees it on disk.
    ///
    /// Returns false, changing nothing, if the page is pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        if !page_id.is_valid() {
            return Ok(true);
        }
        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let page = &self.frames[frame_id.as_usize()];
            if page.pin_count() > 0 {
                debug!(%page_id, pin_count = page.pin_count(), "refusing to delete pinned page");
                return Ok(false);
            }
            if page.is_dirty() {
                self.write_back(page)?;
            }

            inner.page_table.remove(&page_id);
            inner.replacer.pin(frame_id);
            page.reset();
            inner.free_list.push_back(frame_id);
            self.disk_manager.deallocate_page(page_id)?;
        } else if !self.disk_manager.is_page_free(page_id)? {
            self.disk_manager.deallocate_page(page_id)?;
        }

        trace!(%page_id, "deleted page");
        Ok(true)
    }

    /// Writes a resident page to disk whether or not it is dirty.
    /// Returns false if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        if !page_id.is_valid() {
            return Err(BasaltError::InvalidPageId(page_id));
        }

        let inner = self.inner.lock();
        match inner.page_table.get(&page_id) {
            Some(&frame_id) => {
                self.write_back(&self.frames[frame_id.as_usize()])?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Writes every dirty resident page to disk.
    pub fn flush_all_pages(&self) -> Result<()> {
        let inner = self.inner.lock();
        for &frame_id in inner.page_table.values() {
            let page = &self.frames[frame_id.as_usize()];
            if page.is_dirty() {
                self.write_back(page)?;
            }
        }
        Ok(())
    }

    /// Applies `f` to the bytes of `page_id` without taking a frame.
    ///
    /// A resident page is changed in place and marked dirty; any other page
    /// is patched directly on disk. The caller must not hold the page's
    /// content lock.
    pub fn update_page<F>(&self, page_id: PageId, f: F) -> Result<()>
    where
        F: FnOnce(&mut [u8]),
    {
        if !page_id.is_valid() {
            return Err(BasaltError::InvalidPageId(page_id));
        }

        // The latch stays held so the page cannot be loaded behind our back
        let inner = self.inner.lock();
        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let page = &self.frames[frame_id.as_usize()];
            f(&mut page.data_mut()[..]);
            page.set_dirty(true);
            return Ok(());
        }

        let mut buf = vec![0u8; PAGE_SIZE];
        self.disk_manager.read_page(page_id, &mut buf)?;
        f(&mut buf);
        self.disk_manager.write_page(page_id, &buf)?;
        trace!(%page_id, "patched page on disk");
        Ok(())
    }

    /// Allocates a page id on disk without bringing it into the pool.
    pub fn allocate_page(&self) -> Result<PageId> {
        self.disk_manager.allocate_page()
    }

    pub fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        self.disk_manager.deallocate_page(page_id)
    }

    pub fn is_page_free(&self, page_id: PageId) -> Result<bool> {
        self.disk_manager.is_page_free(page_id)
    }

    /// True if no frame is pinned. Every pinned frame is logged.
    pub fn check_all_unpinned(&self) -> bool {
        let mut all_unpinned = true;
        for page in &self.frames {
            let pin_count = page.pin_count();
            if pin_count != 0 {
                all_unpinned = false;
                error!(page_id = %page.page_id(), pin_count, "page still pinned");
            }
        }
        all_unpinned
    }

    /// Returns the pin count for a resident page.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.inner.lock();
        inner
            .page_table
            .get(&page_id)
            .map(|&frame_id| self.frames[frame_id.as_usize()].pin_count())
    }

    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.inner.lock().page_table.contains_key(&page_id)
    }

    /// Returns the pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Returns the number of frames holding no page.
    pub fn free_frame_count(&self) -> usize {
        self.inner.lock().free_list.len()
    }

    /// Number of frames the replacer could evict right now.
    pub fn evictable_count(&self) -> usize {
        self.inner.lock().replacer.size()
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    /// Like `fetch_page`, but the returned guard unpins on drop.
    pub fn fetch_page_guarded(self: &Arc<Self>, page_id: PageId) -> Result<Option<PageGuard>> {
        Ok(self
            .fetch_page(page_id)?
            .map(|page| PageGuard::new(Arc::clone(self), page)))
    }

    /// Like `new_page`, but the returned guard unpins on drop.
    pub fn new_page_guarded(self: &Arc<Self>) -> Result<Option<PageGuard>> {
        Ok(self
            .new_page()?
            .map(|page| PageGuard::new(Arc::clone(self), page)))
    }

    /// Finds a frame to hold a new page: a free frame if there is one,
    /// otherwise a victim from the replacer, written back first if dirty.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<Option<FrameId>> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(Some(frame_id));
        }

        let Some(frame_id) = inner.replacer.victim() else {
            return Ok(None);
        };
        let page = &self.frames[frame_id.as_usize()];
        let old_page_id = page.page_id();

        if page.is_dirty() {
            if let Err(e) = self.write_back(page) {
                inner.replacer.unpin(frame_id);
                return Err(e);
            }
            debug!(page_id = %old_page_id, %frame_id, "wrote back dirty victim");
        }

        inner.page_table.remove(&old_page_id);
        page.reset();
        Ok(Some(frame_id))
    }

    fn write_back(&self, page: &Page) -> Result<()> {
        {
            let data = page.data();
            self.disk_manager.write_page(page.page_id(), &data[..])?;
        }
        page.set_dirty(false);
        Ok(())
    }
}

impl Drop for BufferPoolManager {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all_pages() {
            error!(error = %e, "failed to flush buffer pool on shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_bpm(pool_size: usize) -> (BufferPoolManager, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
        let bpm = BufferPoolManager::new(pool_size, dm);
        (bpm, temp_file)
    }

    #[test]
    fn test_buffer_pool_manager_new() {
        let (bpm, _temp) = create_bpm(10);
        assert_eq!(bpm.pool_size(), 10);
        assert_eq!(bpm.free_frame_count(), 10);
        assert!(bpm.check_all_unpinned());
    }

    #[test]
    fn test_new_page_is_pinned() {
        let (bpm, _temp) = create_bpm(10);

        let page = bpm.new_page().unwrap().unwrap();
        assert_eq!(page.page_id(), PageId::new(0));
        assert_eq!(bpm.pin_count(page.page_id()), Some(1));
        assert_eq!(bpm.free_frame_count(), 9);
        assert!(!bpm.check_all_unpinned());

        assert!(bpm.unpin_page(page.page_id(), false));
        assert!(bpm.check_all_unpinned());
    }

    #[test]
    fn test_fetch_hit_increments_pin_count() {
        let (bpm, _temp) = create_bpm(2);
        let page_id = bpm.new_page().unwrap().unwrap().page_id();

        let again = bpm.fetch_page(page_id).unwrap().unwrap();
        assert_eq!(again.pin_count(), 2);
        assert!(bpm.unpin_page(page_id, false));
        assert!(bpm.unpin_page(page_id, false));
        assert!(!bpm.unpin_page(page_id, false));
        assert_eq!(bpm.evictable_count(), 1);
    }

    #[test]
    fn test_unpin_untracked_page_is_noop() {
        let (bpm, _temp) = create_bpm(2);
        assert!(bpm.unpin_page(PageId::new(42), true));
    }

    #[test]
    fn test_invalid_page_id() {
        let (bpm, _temp) = create_bpm(2);
        assert!(matches!(
            bpm.fetch_page(crate::common::INVALID_PAGE_ID),
            Err(BasaltError::InvalidPageId(_))
        ));
    }

    #[test]
    fn test_pool_full_returns_none() {
        let (bpm, _temp) = create_bpm(2);
        let p0 = bpm.new_page().unwrap().unwrap();
        let _p1 = bpm.new_page().unwrap().unwrap();

        assert!(bpm.new_page().unwrap().is_none());

        bpm.unpin_page(p0.page_id(), false);
        let p2 = bpm.new_page().unwrap().unwrap();
        assert_eq!(p2.frame_id(), p0.frame_id());
        assert!(!bpm.is_resident(PageId::new(0)));
    }

    #[test]
    fn test_delete_page() {
        let (bpm, _temp) = create_bpm(4);
        let page_id = bpm.new_page().unwrap().unwrap().page_id();

        // Cannot delete while pinned
        assert!(!bpm.delete_page(page_id).unwrap());

        bpm.unpin_page(page_id, true);
        assert!(bpm.delete_page(page_id).unwrap());
        assert_eq!(bpm.pin_count(page_id), None);
        assert!(bpm.is_page_free(page_id).unwrap());
        assert_eq!(bpm.free_frame_count(), 4);
        assert_eq!(bpm.evictable_count(), 0);
    }

    #[test]
    fn test_delete_page_writes_back_dirty_contents() {
        let (bpm, _temp) = create_bpm(2);
        let page = bpm.new_page().unwrap().unwrap();
        let page_id = page.page_id();
        page.data_mut()[..3].copy_from_slice(b"old");
        bpm.unpin_page(page_id, true);

        assert!(bpm.delete_page(page_id).unwrap());
        let mut buf = vec![0u8; PAGE_SIZE];
        bpm.disk_manager().read_page(page_id, &mut buf).unwrap();
        assert_eq!(&buf[..3], b"old");
    }

    #[test]
    fn test_delete_invalid_page_is_trivial() {
        let (bpm, _temp) = create_bpm(2);
        assert!(bpm.delete_page(crate::common::INVALID_PAGE_ID).unwrap());
        assert!(bpm.delete_page(PageId::new(7)).unwrap());
    }

    #[test]
    fn test_update_page_needs_no_frame() {
        let (bpm, _temp) = create_bpm(1);
        let evicted = bpm.new_page().unwrap().unwrap().page_id();
        bpm.unpin_page(evicted, false);
        let pinned = bpm.new_page().unwrap().unwrap();
        assert!(!bpm.is_resident(evicted));

        // Resident: changed in the frame and marked dirty
        bpm.update_page(pinned.page_id(), |data| data[0] = 0xAB).unwrap();
        assert_eq!(pinned.data()[0], 0xAB);
        assert!(pinned.is_dirty());

        // Not resident: patched on disk while the only frame stays pinned
        bpm.update_page(evicted, |data| data[1] = 0xCD).unwrap();
        assert!(!bpm.is_resident(evicted));
        let mut buf = vec![0u8; PAGE_SIZE];
        bpm.disk_manager().read_page(evicted, &mut buf).unwrap();
        assert_eq!(buf[1], 0xCD);
    }
}
