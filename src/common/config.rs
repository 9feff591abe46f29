use super::types::{FrameId, PageId};

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Invalid page ID constant
pub const INVALID_PAGE_ID: PageId = PageId(u32::MAX);

/// Invalid frame ID constant
pub const INVALID_FRAME_ID: FrameId = FrameId(u32::MAX);

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 1024;

/// Physical page holding the disk manager's allocation metadata
pub const META_PAGE_ID: u32 = 0;

/// Logical page holding the catalog meta page
pub const CATALOG_META_PAGE_ID: PageId = PageId(0);

/// Logical page holding the index roots registry
pub const INDEX_ROOTS_PAGE_ID: PageId = PageId(1);

/// Page replacement policy used by the buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplacerPolicy {
    #[default]
    Lru,
    Clock,
}

/// Runtime configuration for a storage engine instance
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Number of frames in the buffer pool
    pub pool_size: usize,
    /// Eviction policy
    pub replacer: ReplacerPolicy,
}

impl StorageConfig {
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_replacer(mut self, replacer: ReplacerPolicy) -> Self {
        self.replacer = replacer;
        self
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_BUFFER_POOL_SIZE,
            replacer: ReplacerPolicy::default(),
        }
    }
}
