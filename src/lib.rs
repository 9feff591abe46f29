//! Basalt - a disk-backed page store with a buffer pool and a B+ tree index
//!
//! This crate manages fixed-size pages in a single database file, caches
//! them in a bounded buffer pool and builds an ordered index over them.
//!
//! # Architecture
//!
//! The system is organized into layers, lowest first:
//!
//! - **Storage Layer** (`storage`): Disk I/O and on-disk page formats
//!   - `DiskManager`: Maps logical page ids to file offsets and allocates
//!     pages from bitmap extents
//!   - `BitmapPage`, `DiskFileMetaPage`: Allocation metadata
//!   - `CatalogMeta`, `IndexRootsPage`: Reserved pages 0 and 1
//!   - `StorageEngine`: Opens a file and lays out the reserved pages
//!
//! - **Buffer Pool** (`buffer`): Memory management for database pages
//!   - `BufferPoolManager`: Fetches pages from disk and caches them in frames
//!   - `LruReplacer`/`ClockReplacer`: Pluggable eviction policies
//!   - `PageGuard`: RAII pin that unpins on drop
//!
//! - **Index** (`index`): B+ tree over fixed-size keys
//!   - `BPlusTree`: Lookup, insert, remove with split and merge
//!   - `IndexIterator`: Ordered scan along the leaf chain
//!   - `KeyManager`: Key width and comparator
//!
//! # Example
//!
//! ```rust,no_run
//! use basalt::common::{RowId, StorageConfig};
//! use basalt::index::KeyManager;
//! use basalt::storage::StorageEngine;
//! use basalt::PageId;
//!
//! let engine = StorageEngine::open("test.db", StorageConfig::default()).unwrap();
//!
//! let km = KeyManager::integer(4);
//! let mut tree = engine.open_index(1, km.clone()).unwrap();
//! tree.insert(&km.encode_i32(7), RowId::new(PageId::new(12), 0)).unwrap();
//!
//! assert_eq!(
//!     tree.get_value(&km.encode_i32(7)).unwrap(),
//!     Some(RowId::new(PageId::new(12), 0))
//! );
//! engine.flush().unwrap();
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{BasaltError, FrameId, IndexId, PageId, Result, RowId};
