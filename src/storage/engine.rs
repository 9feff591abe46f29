use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::buffer::{BufferPoolManager, PageGuard};
use crate::common::{
    BasaltError, IndexId, PageId, Result, StorageConfig, CATALOG_META_PAGE_ID,
    INDEX_ROOTS_PAGE_ID,
};
use crate::index::{BPlusTree, KeyManager};
use crate::storage::disk::DiskManager;
use crate::storage::page::{CatalogMeta, IndexRootsPage};

/// A database file opened together with its buffer pool.
///
/// Logical page 0 holds the catalog meta page and logical page 1 the index
/// roots registry. Both are created when the file is new.
pub struct StorageEngine {
    bpm: Arc<BufferPoolManager>,
    disk_manager: Arc<DiskManager>,
}

impl StorageEngine {
    pub fn open<P: AsRef<Path>>(path: P, config: StorageConfig) -> Result<Self> {
        let disk_manager = Arc::new(DiskManager::new(path)?);
        let bpm = Arc::new(BufferPoolManager::from_config(
            &config,
            Arc::clone(&disk_manager),
        ));
        let engine = Self { bpm, disk_manager };

        if engine.disk_manager.is_page_free(CATALOG_META_PAGE_ID)? {
            engine.bootstrap()?;
        } else {
            if engine.disk_manager.is_page_free(INDEX_ROOTS_PAGE_ID)? {
                return Err(BasaltError::IndexRootsMissing(INDEX_ROOTS_PAGE_ID));
            }
            // Fail early on a file that is not ours
            engine.load_catalog_meta()?;
        }

        debug!(
            path = %engine.disk_manager.db_path().display(),
            pool_size = config.pool_size,
            replacer = ?config.replacer,
            "opened storage engine"
        );
        Ok(engine)
    }

    /// Lays out the reserved pages of a fresh database file.
    fn bootstrap(&self) -> Result<()> {
        let mut catalog = self.new_reserved_page(CATALOG_META_PAGE_ID)?;
        {
            let mut data = catalog.write();
            CatalogMeta::new().serialize_to(&mut data[..])?;
        }
        drop(catalog);

        let mut roots = self.new_reserved_page(INDEX_ROOTS_PAGE_ID)?;
        {
            let mut data = roots.write();
            IndexRootsPage::new(&mut data[..]).init();
        }
        drop(roots);

        self.bpm.flush_all_pages()?;
        info!(path = %self.disk_manager.db_path().display(), "initialized new database");
        Ok(())
    }

    fn new_reserved_page(&self, expected: PageId) -> Result<PageGuard> {
        let guard = self
            .bpm
            .new_page_guarded()?
            .ok_or(BasaltError::BufferPoolFull)?;
        if guard.page_id() != expected {
            return Err(BasaltError::InvalidDatabaseFile(format!(
                "reserved page landed on {}, expected {}",
                guard.page_id(),
                expected
            )));
        }
        Ok(guard)
    }

    fn fetch(&self, page_id: PageId) -> Result<PageGuard> {
        self.bpm
            .fetch_page_guarded(page_id)?
            .ok_or(BasaltError::BufferPoolFull)
    }

    pub fn bpm(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    pub fn load_catalog_meta(&self) -> Result<CatalogMeta> {
        let guard = self.fetch(CATALOG_META_PAGE_ID)?;
        let data = guard.read();
        CatalogMeta::deserialize_from(&data[..])
    }

    pub fn store_catalog_meta(&self, meta: &CatalogMeta) -> Result<()> {
        let mut guard = self.fetch(CATALOG_META_PAGE_ID)?;
        let mut data = guard.write();
        data.fill(0);
        meta.serialize_to(&mut data[..])
    }

    /// Every `(index_id, root_page_id)` pair in the registry.
    pub fn index_roots(&self) -> Result<Vec<(IndexId, PageId)>> {
        let guard = self.fetch(INDEX_ROOTS_PAGE_ID)?;
        let data = guard.read();
        Ok(IndexRootsPage::new(&data[..]).entries())
    }

    /// Opens (or starts) the B+ tree registered under `index_id`.
    pub fn open_index(&self, index_id: IndexId, km: KeyManager) -> Result<BPlusTree> {
        BPlusTree::new(index_id, Arc::clone(&self.bpm), km)
    }

    /// Like `open_index` with explicit page fan-outs.
    pub fn open_index_with_max_sizes(
        &self,
        index_id: IndexId,
        km: KeyManager,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<BPlusTree> {
        BPlusTree::with_max_sizes(
            index_id,
            Arc::clone(&self.bpm),
            km,
            leaf_max_size,
            internal_max_size,
        )
    }

    /// Writes every resident page and syncs the file.
    pub fn flush(&self) -> Result<()> {
        self.bpm.flush_all_pages()?;
        self.disk_manager.sync()
    }
}
