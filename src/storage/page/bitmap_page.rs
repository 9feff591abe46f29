use super::{read_u32, write_u32};

const PAGE_ALLOCATED_OFFSET: usize = 0;
const NEXT_FREE_PAGE_OFFSET: usize = 4;
const BITMAP_OFFSET: usize = 8;

/// Bytes of a bitmap page taken by its two counters.
pub const BITMAP_METADATA_SIZE: usize = BITMAP_OFFSET;

/// An extent bitmap tracking which data pages of one extent are in use.
///
/// `SIZE` is the on-disk page size. The first 8 bytes hold the number of
/// allocated pages and the lowest offset that may still be free; the rest is
/// the bitmap itself, bit `i` living in byte `i / 8` at position `i % 8`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitmapPage<const SIZE: usize> {
    page_allocated: u32,
    next_free_page: u32,
    bytes: Box<[u8]>,
}

impl<const SIZE: usize> BitmapPage<SIZE> {
    const MAX_CHARS: usize = SIZE - BITMAP_METADATA_SIZE;

    /// Number of data pages a single bitmap page can track.
    pub const fn max_supported_size() -> usize {
        8 * (SIZE - BITMAP_METADATA_SIZE)
    }

    /// Creates an empty bitmap with every page free.
    pub fn new() -> Self {
        Self {
            page_allocated: 0,
            next_free_page: 0,
            bytes: vec![0u8; Self::MAX_CHARS].into_boxed_slice(),
        }
    }

    /// Decodes a bitmap page from a raw page buffer.
    pub fn from_bytes(data: &[u8]) -> Self {
        assert_eq!(data.len(), SIZE, "Buffer must be {} bytes", SIZE);
        Self {
            page_allocated: read_u32(data, PAGE_ALLOCATED_OFFSET),
            next_free_page: read_u32(data, NEXT_FREE_PAGE_OFFSET),
            bytes: data[BITMAP_OFFSET..].to_vec().into_boxed_slice(),
        }
    }

    /// Encodes the bitmap page into a raw page buffer.
    pub fn write_to(&self, data: &mut [u8]) {
        assert_eq!(data.len(), SIZE, "Buffer must be {} bytes", SIZE);
        write_u32(data, PAGE_ALLOCATED_OFFSET, self.page_allocated);
        write_u32(data, NEXT_FREE_PAGE_OFFSET, self.next_free_page);
        data[BITMAP_OFFSET..].copy_from_slice(&self.bytes);
    }

    /// Marks the lowest free offset as used and returns it, or `None` when
    /// the extent is full.
    pub fn allocate_page(&mut self) -> Option<u32> {
        if self.page_allocated as usize >= Self::max_supported_size() {
            return None;
        }

        let start = self.next_free_page as usize;
        let offset = (start..Self::max_supported_size()).find(|&i| self.is_free(i))?;

        self.bytes[offset / 8] |= 1 << (offset % 8);
        self.page_allocated += 1;
        self.next_free_page = offset as u32 + 1;
        Some(offset as u32)
    }

    /// Clears the bit for `offset`. Returns false if it was already free or
    /// out of range.
    pub fn deallocate_page(&mut self, offset: u32) -> bool {
        let offset = offset as usize;
        if offset >= Self::max_supported_size() || self.is_free(offset) {
            return false;
        }

        self.bytes[offset / 8] &= !(1 << (offset % 8));
        self.page_allocated -= 1;
        if (offset as u32) < self.next_free_page {
            self.next_free_page = offset as u32;
        }
        true
    }

    /// Whether `offset` is free. Offsets beyond capacity are reported as not free.
    pub fn is_page_free(&self, offset: u32) -> bool {
        let offset = offset as usize;
        offset < Self::max_supported_size() && self.is_free(offset)
    }

    pub fn page_allocated(&self) -> u32 {
        self.page_allocated
    }

    pub fn next_free_page(&self) -> u32 {
        self.next_free_page
    }

    pub fn is_full(&self) -> bool {
        self.page_allocated as usize >= Self::max_supported_size()
    }

    #[inline]
    fn is_free(&self, offset: usize) -> bool {
        self.bytes[offset / 8] & (1 << (offset % 8)) == 0
    }
}

impl<const SIZE: usize> Default for BitmapPage<SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PAGE_SIZE;

    #[test]
    fn test_bitmap_capacity() {
        assert_eq!(BitmapPage::<PAGE_SIZE>::max_supported_size(), 32704);
        assert_eq!(BitmapPage::<128>::max_supported_size(), 960);
    }

    #[test]
    fn test_bitmap_allocate_until_full() {
        let mut page = BitmapPage::<64>::new();
        let capacity = BitmapPage::<64>::max_supported_size() as u32;

        for expected in 0..capacity {
            assert_eq!(page.allocate_page(), Some(expected));
        }
        assert!(page.is_full());
        assert_eq!(page.allocate_page(), None);

        assert!(page.deallocate_page(17));
        assert!(!page.deallocate_page(17));
        assert!(page.is_page_free(17));
        assert_eq!(page.allocate_page(), Some(17));
        assert_eq!(page.allocate_page(), None);
    }

    #[test]
    fn test_bitmap_reuses_lowest_free_offset() {
        let mut page = BitmapPage::<PAGE_SIZE>::new();
        for _ in 0..10 {
            page.allocate_page().unwrap();
        }
        page.deallocate_page(7);
        page.deallocate_page(3);
        assert_eq!(page.next_free_page(), 3);
        assert_eq!(page.allocate_page(), Some(3));
        assert_eq!(page.allocate_page(), Some(7));
        assert_eq!(page.allocate_page(), Some(10));
        assert_eq!(page.page_allocated(), 11);
    }

    #[test]
    fn test_bitmap_out_of_range() {
        let mut page = BitmapPage::<64>::new();
        let capacity = BitmapPage::<64>::max_supported_size() as u32;
        assert!(!page.is_page_free(capacity));
        assert!(!page.deallocate_page(capacity));
    }

    #[test]
    fn test_bitmap_bytes_round_trip() {
        let mut page = BitmapPage::<PAGE_SIZE>::new();
        page.allocate_page();
        page.allocate_page();
        page.deallocate_page(0);

        let mut buf = vec![0u8; PAGE_SIZE];
        page.write_to(&mut buf);
        assert_eq!(&buf[0..4], &1u32.to_le_bytes());
        assert_eq!(buf[BITMAP_OFFSET], 0b10);

        let decoded = BitmapPage::<PAGE_SIZE>::from_bytes(&buf);
        assert_eq!(decoded, page);
        assert!(decoded.is_page_free(0));
        assert!(!decoded.is_page_free(1));
    }
}
