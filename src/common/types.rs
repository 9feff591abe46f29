use std::fmt;

/// Page identifier type - uniquely identifies a logical page on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u32);

impl PageId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        *self != super::INVALID_PAGE_ID
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageId({})", self.0)
    }
}

/// Frame identifier type - identifies a buffer frame in the buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u32);

impl FrameId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameId({})", self.0)
    }
}

/// Identifier of an index in the index roots registry
pub type IndexId = u32;

/// Identifier of a table in the catalog meta page
pub type TableId = u32;

/// Row identifier - physical location of a row (page + slot number)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId {
    pub page_id: PageId,
    pub slot_num: u32,
}

impl RowId {
    /// Serialized size of a row id inside leaf pages.
    pub const SIZE: usize = 8;

    pub fn new(page_id: PageId, slot_num: u32) -> Self {
        Self { page_id, slot_num }
    }

    /// Packs a 64-bit value into a row id: high half is the page, low half the slot.
    pub fn from_u64(value: u64) -> Self {
        Self {
            page_id: PageId::new((value >> 32) as u32),
            slot_num: value as u32,
        }
    }

    pub fn as_u64(&self) -> u64 {
        ((self.page_id.as_u32() as u64) << 32) | self.slot_num as u64
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowId({}, {})", self.page_id.0, self.slot_num)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_id_u64_packing() {
        let rid = RowId::new(PageId::new(7), 42);
        assert_eq!(RowId::from_u64(rid.as_u64()), rid);
        assert_eq!(RowId::from_u64(5), RowId::new(PageId::new(0), 5));
    }

    #[test]
    fn test_invalid_page_id() {
        assert!(!super::super::INVALID_PAGE_ID.is_valid());
        assert!(PageId::new(0).is_valid());
    }
}
