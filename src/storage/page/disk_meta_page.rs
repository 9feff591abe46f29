use crate::common::{BasaltError, Result, PAGE_SIZE};

use super::{read_u32, write_u32};

const NUM_ALLOCATED_PAGES_OFFSET: usize = 0;
const NUM_EXTENTS_OFFSET: usize = 4;
const EXTENT_USED_PAGE_OFFSET: usize = 8;

/// Maximum number of extents the meta page can describe.
pub const MAX_EXTENTS: usize = (PAGE_SIZE - EXTENT_USED_PAGE_OFFSET) / 4;

/// Contents of physical page 0: allocation counters for the whole file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskFileMetaPage {
    num_allocated_pages: u32,
    extent_used_page: Vec<u32>,
}

impl DiskFileMetaPage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes the meta page. An all-zero page decodes as an empty file.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");

        let num_allocated_pages = read_u32(data, NUM_ALLOCATED_PAGES_OFFSET);
        let num_extents = read_u32(data, NUM_EXTENTS_OFFSET) as usize;
        if num_extents > MAX_EXTENTS {
            return Err(BasaltError::InvalidDatabaseFile(format!(
                "meta page lists {} extents, at most {} fit",
                num_extents, MAX_EXTENTS
            )));
        }

        let extent_used_page: Vec<u32> = (0..num_extents)
            .map(|i| read_u32(data, EXTENT_USED_PAGE_OFFSET + i * 4))
            .collect();

        let total: u64 = extent_used_page.iter().map(|&n| n as u64).sum();
        if total != num_allocated_pages as u64 {
            return Err(BasaltError::InvalidDatabaseFile(format!(
                "meta page counts {} allocated pages but extents hold {}",
                num_allocated_pages, total
            )));
        }

        Ok(Self {
            num_allocated_pages,
            extent_used_page,
        })
    }

    pub fn write_to(&self, data: &mut [u8]) {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");
        data.fill(0);
        write_u32(data, NUM_ALLOCATED_PAGES_OFFSET, self.num_allocated_pages);
        write_u32(data, NUM_EXTENTS_OFFSET, self.num_extents());
        for (i, used) in self.extent_used_page.iter().enumerate() {
            write_u32(data, EXTENT_USED_PAGE_OFFSET + i * 4, *used);
        }
    }

    pub fn num_allocated_pages(&self) -> u32 {
        self.num_allocated_pages
    }

    pub fn num_extents(&self) -> u32 {
        self.extent_used_page.len() as u32
    }

    pub fn extent_used_page(&self, extent: u32) -> Option<u32> {
        self.extent_used_page.get(extent as usize).copied()
    }

    /// Appends a new, empty extent and returns its index.
    pub fn push_extent(&mut self) -> Result<u32> {
        if self.extent_used_page.len() >= MAX_EXTENTS {
            return Err(BasaltError::OutOfDiskSpace);
        }
        self.extent_used_page.push(0);
        Ok(self.num_extents() - 1)
    }

    pub(crate) fn record_allocation(&mut self, extent: u32) {
        self.extent_used_page[extent as usize] += 1;
        self.num_allocated_pages += 1;
    }

    pub(crate) fn record_deallocation(&mut self, extent: u32) {
        self.extent_used_page[extent as usize] -= 1;
        self.num_allocated_pages -= 1;
    }
}
