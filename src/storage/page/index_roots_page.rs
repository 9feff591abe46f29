use crate::common::{BasaltError, IndexId, PageId, Result, PAGE_SIZE};

use super::{read_u32, write_u32};

const COUNT_OFFSET: usize = 0;
const ENTRIES_OFFSET: usize = 4;
const ENTRY_SIZE: usize = 8; // index_id (4) + root_page_id (4)

/// Maximum number of index roots one registry page can hold.
pub const MAX_INDEX_ROOTS: usize = (PAGE_SIZE - ENTRIES_OFFSET) / ENTRY_SIZE;

/// Registry mapping each index id to the page id of its B+ tree root.
///
/// Entries are kept sorted by index id.
pub struct IndexRootsPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> IndexRootsPage<B> {
    pub fn new(data: B) -> Self {
        assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data }
    }

    pub fn count(&self) -> usize {
        read_u32(self.data.as_ref(), COUNT_OFFSET) as usize
    }

    pub fn get_root_id(&self, index_id: IndexId) -> Option<PageId> {
        self.find(index_id)
            .ok()
            .map(|slot| PageId::new(read_u32(self.data.as_ref(), Self::entry(slot) + 4)))
    }

    /// All `(index_id, root_page_id)` pairs in index id order.
    pub fn entries(&self) -> Vec<(IndexId, PageId)> {
        let data = self.data.as_ref();
        (0..self.count())
            .map(|slot| {
                let off = Self::entry(slot);
                (read_u32(data, off), PageId::new(read_u32(data, off + 4)))
            })
            .collect()
    }

    fn index_id_at(&self, slot: usize) -> IndexId {
        read_u32(self.data.as_ref(), Self::entry(slot))
    }

    fn find(&self, index_id: IndexId) -> std::result::Result<usize, usize> {
        let (mut lo, mut hi) = (0, self.count());
        while lo < hi {
            let mid = (lo + hi) / 2;
            match self.index_id_at(mid).cmp(&index_id) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }

    #[inline]
    fn entry(slot: usize) -> usize {
        ENTRIES_OFFSET + slot * ENTRY_SIZE
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> IndexRootsPage<B> {
    pub fn init(&mut self) {
        self.data.as_mut().fill(0);
    }

    /// Registers a new index. Returns false if it is already present.
    pub fn insert(&mut self, index_id: IndexId, root_id: PageId) -> Result<bool> {
        let slot = match self.find(index_id) {
            Ok(_) => return Ok(false),
            Err(slot) => slot,
        };
        let count = self.count();
        if count >= MAX_INDEX_ROOTS {
            return Err(BasaltError::IndexRootsFull);
        }

        let data = self.data.as_mut();
        data.copy_within(Self::entry(slot)..Self::entry(count), Self::entry(slot + 1));
        write_u32(data, Self::entry(slot), index_id);
        write_u32(data, Self::entry(slot) + 4, root_id.as_u32());
        write_u32(data, COUNT_OFFSET, count as u32 + 1);
        Ok(true)
    }

    /// Points an existing index at a new root. Returns false if unknown.
    pub fn update(&mut self, index_id: IndexId, root_id: PageId) -> bool {
        match self.find(index_id) {
            Ok(slot) => {
                write_u32(self.data.as_mut(), Self::entry(slot) + 4, root_id.as_u32());
                true
            }
            Err(_) => false,
        }
    }

    pub fn delete(&mut self, index_id: IndexId) -> bool {
        let slot = match self.find(index_id) {
            Ok(slot) => slot,
            Err(_) => return false,
        };
        let count = self.count();
        let data = self.data.as_mut();
        data.copy_within(Self::entry(slot + 1)..Self::entry(count), Self::entry(slot));
        write_u32(data, COUNT_OFFSET, count as u32 - 1);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_roots_insert_update_delete() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = IndexRootsPage::new(&mut buf[..]);
        page.init();

        assert!(page.insert(5, PageId::new(50)).unwrap());
        assert!(page.insert(1, PageId::new(10)).unwrap());
        assert!(page.insert(3, PageId::new(30)).unwrap());
        assert!(!page.insert(3, PageId::new(99)).unwrap());
        assert_eq!(page.count(), 3);
        assert_eq!(
            page.entries(),
            vec![(1, PageId::new(10)), (3, PageId::new(30)), (5, PageId::new(50))]
        );

        assert!(page.update(3, PageId::new(31)));
        assert!(!page.update(4, PageId::new(40)));
        assert_eq!(page.get_root_id(3), Some(PageId::new(31)));

        assert!(page.delete(1));
        assert!(!page.delete(1));
        assert_eq!(page.get_root_id(1), None);
        assert_eq!(page.get_root_id(5), Some(PageId::new(50)));
        assert_eq!(page.count(), 2);
    }

    #[test]
    fn test_index_roots_full() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = IndexRootsPage::new(&mut buf[..]);
        page.init();
        for i in 0..MAX_INDEX_ROOTS as u32 {
            page.insert(i, PageId::new(i)).unwrap();
        }
        assert!(matches!(
            page.insert(u32::MAX, PageId::new(0)),
            Err(BasaltError::IndexRootsFull)
        ));
    }
}
