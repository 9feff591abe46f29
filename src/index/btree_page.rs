use crate::common::{BasaltError, PageId, Result, PAGE_SIZE};
use crate::storage::page::{read_u32, write_u32};

const PAGE_TYPE_OFFSET: usize = 0;
const KEY_SIZE_OFFSET: usize = 4;
const SIZE_OFFSET: usize = 8;
const MAX_SIZE_OFFSET: usize = 12;
const PARENT_PAGE_OFFSET: usize = 16;
const PAGE_ID_OFFSET: usize = 20;

/// Header shared by internal and leaf pages.
pub const TREE_PAGE_HEADER_SIZE: usize = 24;

/// Kind of B+ tree page, stored in the first header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPageType {
    Internal,
    Leaf,
}

impl IndexPageType {
    fn as_u32(self) -> u32 {
        match self {
            IndexPageType::Internal => 1,
            IndexPageType::Leaf => 2,
        }
    }

    fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(IndexPageType::Internal),
            2 => Some(IndexPageType::Leaf),
            _ => None,
        }
    }
}

/// Read access to the common tree page header.
pub trait TreePageHeader {
    fn bytes(&self) -> &[u8];

    fn page_type(&self) -> Result<IndexPageType> {
        let raw = read_u32(self.bytes(), PAGE_TYPE_OFFSET);
        IndexPageType::from_u32(raw).ok_or_else(|| {
            BasaltError::IndexCorrupted(format!(
                "page {} has unknown tree page type {}",
                self.page_id(),
                raw
            ))
        })
    }

    fn is_leaf(&self) -> bool {
        read_u32(self.bytes(), PAGE_TYPE_OFFSET) == IndexPageType::Leaf.as_u32()
    }

    fn key_size(&self) -> usize {
        read_u32(self.bytes(), KEY_SIZE_OFFSET) as usize
    }

    /// Number of entries: key/value pairs on a leaf, children on an internal page.
    fn size(&self) -> usize {
        read_u32(self.bytes(), SIZE_OFFSET) as usize
    }

    fn max_size(&self) -> usize {
        read_u32(self.bytes(), MAX_SIZE_OFFSET) as usize
    }

    fn parent_page_id(&self) -> PageId {
        PageId::new(read_u32(self.bytes(), PARENT_PAGE_OFFSET))
    }

    fn page_id(&self) -> PageId {
        PageId::new(read_u32(self.bytes(), PAGE_ID_OFFSET))
    }

    fn is_root(&self) -> bool {
        !self.parent_page_id().is_valid()
    }

    /// Fewest entries the page may hold outside of an operation.
    fn min_size(&self) -> usize {
        let max = self.max_size();
        match (self.is_root(), self.is_leaf()) {
            (true, true) => 0,
            (true, false) => 2,
            (false, true) => max / 2,
            (false, false) => max.div_ceil(2),
        }
    }
}

/// Write access to the common tree page header.
pub trait TreePageHeaderMut: TreePageHeader {
    fn bytes_mut(&mut self) -> &mut [u8];

    fn init_header(
        &mut self,
        page_type: IndexPageType,
        page_id: PageId,
        parent_id: PageId,
        key_size: usize,
        max_size: usize,
    ) {
        let data = self.bytes_mut();
        write_u32(data, PAGE_TYPE_OFFSET, page_type.as_u32());
        write_u32(data, KEY_SIZE_OFFSET, key_size as u32);
        write_u32(data, SIZE_OFFSET, 0);
        write_u32(data, MAX_SIZE_OFFSET, max_size as u32);
        write_u32(data, PARENT_PAGE_OFFSET, parent_id.as_u32());
        write_u32(data, PAGE_ID_OFFSET, page_id.as_u32());
    }

    fn set_size(&mut self, size: usize) {
        write_u32(self.bytes_mut(), SIZE_OFFSET, size as u32);
    }

    fn set_parent_page_id(&mut self, parent_id: PageId) {
        write_u32(self.bytes_mut(), PARENT_PAGE_OFFSET, parent_id.as_u32());
    }
}

/// Header-only view, used to find out what kind of page a buffer holds.
pub struct TreePage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> TreePage<B> {
    pub fn new(data: B) -> Self {
        assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data }
    }
}

impl<B: AsRef<[u8]>> TreePageHeader for TreePage<B> {
    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> TreePageHeaderMut for TreePage<B> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }
}

/// Largest number of entries of `pair_size` bytes that fit after `header`.
pub(crate) fn slot_capacity(header: usize, pair_size: usize) -> usize {
    (PAGE_SIZE - header) / pair_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_fields() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = TreePage::new(&mut buf[..]);
        page.init_header(
            IndexPageType::Internal,
            PageId::new(7),
            PageId::new(3),
            16,
            10,
        );
        page.set_size(4);

        let page = TreePage::new(&buf[..]);
        assert_eq!(page.page_type().unwrap(), IndexPageType::Internal);
        assert!(!page.is_leaf());
        assert_eq!(page.key_size(), 16);
        assert_eq!(page.size(), 4);
        assert_eq!(page.max_size(), 10);
        assert_eq!(page.parent_page_id(), PageId::new(3));
        assert_eq!(page.page_id(), PageId::new(7));
        assert!(!page.is_root());
        assert_eq!(page.min_size(), 5);
    }

    #[test]
    fn test_min_size_rules() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = TreePage::new(&mut buf[..]);

        page.init_header(IndexPageType::Leaf, PageId::new(1), crate::common::INVALID_PAGE_ID, 4, 5);
        assert_eq!(page.min_size(), 0);
        page.init_header(IndexPageType::Internal, PageId::new(1), crate::common::INVALID_PAGE_ID, 4, 5);
        assert_eq!(page.min_size(), 2);
        page.init_header(IndexPageType::Leaf, PageId::new(1), PageId::new(0), 4, 5);
        assert_eq!(page.min_size(), 2);
        page.init_header(IndexPageType::Leaf, PageId::new(1), PageId::new(0), 4, 4);
        assert_eq!(page.min_size(), 2);
        page.init_header(IndexPageType::Internal, PageId::new(1), PageId::new(0), 4, 5);
        assert_eq!(page.min_size(), 3);
    }

    #[test]
    fn test_unknown_page_type() {
        let buf = vec![0u8; PAGE_SIZE];
        let page = TreePage::new(&buf[..]);
        assert!(matches!(page.page_type(), Err(BasaltError::IndexCorrupted(_))));
    }
}
