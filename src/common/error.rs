use thiserror::Error;

use super::types::PageId;

/// Storage error types
#[derive(Error, Debug)]
pub enum BasaltError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Buffer pool is full, no evictable frames available")]
    BufferPoolFull,

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Page {0} is not allocated")]
    PageNotAllocated(PageId),

    #[error("No addressable extent left in the database file")]
    OutOfDiskSpace,

    #[error("Invalid database file: {0}")]
    InvalidDatabaseFile(String),

    #[error("Bad magic number {found:#x}, expected {expected:#x}")]
    InvalidMagic { found: u32, expected: u32 },

    #[error("Catalog metadata needs {size} bytes, more than one page")]
    CatalogMetaTooLarge { size: usize },

    #[error("Key is {actual} bytes, index expects {expected}")]
    KeyLengthMismatch { expected: usize, actual: usize },

    #[error("Max size {max_size} does not fit a page holding at most {capacity} entries")]
    InvalidMaxSize { max_size: usize, capacity: usize },

    #[error("Index corrupted: {0}")]
    IndexCorrupted(String),

    #[error("Index roots page is full")]
    IndexRootsFull,

    #[error("Index roots page {0} has not been allocated")]
    IndexRootsMissing(PageId),
}

pub type Result<T> = std::result::Result<T, BasaltError>;
