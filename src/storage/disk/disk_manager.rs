use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, error, trace};

use crate::common::{BasaltError, PageId, Result, META_PAGE_ID, PAGE_SIZE};
use crate::storage::page::{BitmapPage, DiskFileMetaPage};

/// Bitmap page type used for extents on disk.
pub type ExtentBitmap = BitmapPage<PAGE_SIZE>;

/// Number of data pages tracked by one extent.
pub const BITMAP_SIZE: u32 = ExtentBitmap::max_supported_size() as u32;

/// Maps a logical page id to its physical page number in the file.
///
/// Physical page 0 is the meta page, then each extent is one bitmap page
/// followed by `BITMAP_SIZE` data pages.
pub fn physical_page_id(logical: PageId) -> u32 {
    let id = logical.as_u32();
    id + id / BITMAP_SIZE + 2
}

/// Physical page number of the bitmap for extent `extent`.
pub fn bitmap_physical_page_id(extent: u32) -> u32 {
    1 + extent * (BITMAP_SIZE + 1)
}

/// DiskManager owns the database file. It hands out logical page ids from a
/// chain of bitmap extents and performs raw page reads and writes.
pub struct DiskManager {
    /// The database file. Reentrant so an allocation can hold it across
    /// its bitmap and meta page writes.
    db_file: ReentrantMutex<File>,
    /// Path to the database file
    db_path: PathBuf,
    /// Allocation counters mirrored from physical page 0
    meta: Mutex<DiskFileMetaPage>,
    /// Number of logical page reads performed
    num_reads: AtomicU32,
    /// Number of logical page writes performed
    num_writes: AtomicU32,
}

impl DiskManager {
    /// Opens the database file at `db_path`, creating it (and any missing
    /// parent directories) if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&db_path)?;
        let file_size = file.metadata()?.len();

        let mut buf = vec![0u8; PAGE_SIZE];
        read_at(&file, META_PAGE_ID, &mut buf)?;
        let meta = DiskFileMetaPage::from_bytes(&buf)?;

        let dm = Self {
            db_file: ReentrantMutex::new(file),
            db_path,
            meta: Mutex::new(meta),
            num_reads: AtomicU32::new(0),
            num_writes: AtomicU32::new(0),
        };

        debug!(
            path = %dm.db_path.display(),
            file_size,
            allocated = dm.num_allocated_pages(),
            extents = dm.num_extents(),
            "opened database file"
        );
        Ok(dm)
    }

    /// Reads a logical page into `data`. Pages past the end of the file read
    /// as zeros.
    pub fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        if !page_id.is_valid() {
            return Err(BasaltError::InvalidPageId(page_id));
        }

        self.read_physical_page(physical_page_id(page_id), data)?;
        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes `data` to a logical page.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        if !page_id.is_valid() {
            return Err(BasaltError::InvalidPageId(page_id));
        }

        self.write_physical_page(physical_page_id(page_id), data)?;
        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Allocates the lowest free page of the first extent with room,
    /// appending a new extent when every existing one is full.
    pub fn allocate_page(&self) -> Result<PageId> {
        let mut meta = self.meta.lock();
        let _file = self.db_file.lock();

        let existing = (0..meta.num_extents())
            .find(|&k| meta.extent_used_page(k).is_some_and(|used| used < BITMAP_SIZE));

        let (extent, mut bitmap) = match existing {
            Some(extent) => (extent, self.read_bitmap(extent)?),
            None => {
                let extent = meta.push_extent()?;
                debug!(extent, "created extent");
                (extent, ExtentBitmap::new())
            }
        };

        let offset = bitmap.allocate_page().ok_or_else(|| {
            BasaltError::InvalidDatabaseFile(format!(
                "extent {} is full but the meta page counts free pages",
                extent
            ))
        })?;

        self.write_bitmap(extent, &bitmap)?;
        meta.record_allocation(extent);
        self.write_meta(&meta)?;

        let page_id = PageId::new(extent * BITMAP_SIZE + offset);
        trace!(%page_id, "allocated page");
        Ok(page_id)
    }

    /// Returns a page to its extent. Fails if the page is not allocated.
    pub fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        let mut meta = self.meta.lock();
        let _file = self.db_file.lock();

        let extent = page_id.as_u32() / BITMAP_SIZE;
        if !page_id.is_valid() || extent >= meta.num_extents() {
            return Err(BasaltError::PageNotAllocated(page_id));
        }

        let mut bitmap = self.read_bitmap(extent)?;
        if !bitmap.deallocate_page(page_id.as_u32() % BITMAP_SIZE) {
            return Err(BasaltError::PageNotAllocated(page_id));
        }

        self.write_bitmap(extent, &bitmap)?;
        meta.record_deallocation(extent);
        self.write_meta(&meta)?;

        trace!(%page_id, "deallocated page");
        Ok(())
    }

    /// True if the page's extent does not exist yet or its bit is clear.
    pub fn is_page_free(&self, page_id: PageId) -> Result<bool> {
        if !page_id.is_valid() {
            return Ok(false);
        }
        let meta = self.meta.lock();
        let extent = page_id.as_u32() / BITMAP_SIZE;
        if extent >= meta.num_extents() {
            return Ok(true);
        }
        let bitmap = self.read_bitmap(extent)?;
        Ok(bitmap.is_page_free(page_id.as_u32() % BITMAP_SIZE))
    }

    /// Persists the meta page and syncs the file. Safe to call repeatedly.
    pub fn close(&self) -> Result<()> {
        let meta = self.meta.lock();
        let file = self.db_file.lock();
        self.write_meta(&meta)?;
        file.sync_all()?;
        Ok(())
    }

    /// Flushes any buffered writes to disk.
    pub fn sync(&self) -> Result<()> {
        let file = self.db_file.lock();
        file.sync_all()?;
        Ok(())
    }

    pub fn num_allocated_pages(&self) -> u32 {
        self.meta.lock().num_allocated_pages()
    }

    pub fn num_extents(&self) -> u32 {
        self.meta.lock().num_extents()
    }

    pub fn extent_used_pages(&self, extent: u32) -> Option<u32> {
        self.meta.lock().extent_used_page(extent)
    }

    /// Returns the number of logical page reads performed.
    pub fn num_reads(&self) -> u32 {
        self.num_reads.load(Ordering::Relaxed)
    }

    /// Returns the number of logical page writes performed.
    pub fn num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn read_bitmap(&self, extent: u32) -> Result<ExtentBitmap> {
        let mut buf = vec![0u8; PAGE_SIZE];
        self.read_physical_page(bitmap_physical_page_id(extent), &mut buf)?;
        Ok(ExtentBitmap::from_bytes(&buf))
    }

    fn write_bitmap(&self, extent: u32, bitmap: &ExtentBitmap) -> Result<()> {
        let mut buf = vec![0u8; PAGE_SIZE];
        bitmap.write_to(&mut buf);
        self.write_physical_page(bitmap_physical_page_id(extent), &buf)
    }

    fn write_meta(&self, meta: &DiskFileMetaPage) -> Result<()> {
        let mut buf = vec![0u8; PAGE_SIZE];
        meta.write_to(&mut buf);
        self.write_physical_page(META_PAGE_ID, &buf)
    }

    fn read_physical_page(&self, physical: u32, data: &mut [u8]) -> Result<()> {
        let guard = self.db_file.lock();
        read_at(&guard, physical, data)
    }

    fn write_physical_page(&self, physical: u32, data: &[u8]) -> Result<()> {
        let offset = (physical as u64) * (PAGE_SIZE as u64);

        let guard = self.db_file.lock();
        let mut file: &File = &guard;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }
}

/// Reads one physical page, zero-filling whatever lies past end of file.
fn read_at(mut file: &File, physical: u32, data: &mut [u8]) -> Result<()> {
    let offset = (physical as u64) * (PAGE_SIZE as u64);
    file.seek(SeekFrom::Start(offset))?;

    let mut bytes_read = 0;
    while bytes_read < data.len() {
        match file.read(&mut data[bytes_read..]) {
            Ok(0) => break,
            Ok(n) => bytes_read += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    if bytes_read < data.len() {
        trace!(physical, bytes_read, "short read, zero-filling page");
        data[bytes_read..].fill(0);
    }
    Ok(())
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(path = %self.db_path.display(), error = %e, "failed to persist meta page on close");
        }
    }
}
