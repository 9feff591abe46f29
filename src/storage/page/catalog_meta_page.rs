use std::collections::BTreeMap;

use bytes::{Buf, BufMut};

use crate::common::{BasaltError, IndexId, PageId, Result, TableId, PAGE_SIZE};

/// Magic number stamped at the start of the catalog meta page.
pub const CATALOG_METADATA_MAGIC_NUM: u32 = 89849;

/// Table and index metadata page locations, stored in logical page 0.
///
/// Layout: magic, table count, index count, then `(table_id, page_id)`
/// pairs followed by `(index_id, page_id)` pairs, all little-endian u32.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogMeta {
    pub table_meta_pages: BTreeMap<TableId, PageId>,
    pub index_meta_pages: BTreeMap<IndexId, PageId>,
}

impl CatalogMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serialized_size(&self) -> usize {
        12 + 8 * (self.table_meta_pages.len() + self.index_meta_pages.len())
    }

    /// Writes the catalog into `buf`, which must be one page long.
    pub fn serialize_to(&self, mut buf: &mut [u8]) -> Result<()> {
        let size = self.serialized_size();
        if size > PAGE_SIZE || size > buf.len() {
            return Err(BasaltError::CatalogMetaTooLarge { size });
        }

        buf.put_u32_le(CATALOG_METADATA_MAGIC_NUM);
        buf.put_u32_le(self.table_meta_pages.len() as u32);
        buf.put_u32_le(self.index_meta_pages.len() as u32);
        for (table_id, page_id) in &self.table_meta_pages {
            buf.put_u32_le(*table_id);
            buf.put_u32_le(page_id.as_u32());
        }
        for (index_id, page_id) in &self.index_meta_pages {
            buf.put_u32_le(*index_id);
            buf.put_u32_le(page_id.as_u32());
        }
        Ok(())
    }

    /// Reads a catalog back, checking the magic number first.
    pub fn deserialize_from(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < 12 {
            return Err(BasaltError::InvalidDatabaseFile(
                "catalog meta page is truncated".to_string(),
            ));
        }

        let magic = buf.get_u32_le();
        if magic != CATALOG_METADATA_MAGIC_NUM {
            return Err(BasaltError::InvalidMagic {
                found: magic,
                expected: CATALOG_METADATA_MAGIC_NUM,
            });
        }

        let table_count = buf.get_u32_le() as usize;
        let index_count = buf.get_u32_le() as usize;
        if buf.remaining() < 8 * (table_count + index_count) {
            return Err(BasaltError::InvalidDatabaseFile(format!(
                "catalog meta page lists {} tables and {} indexes but is too short",
                table_count, index_count
            )));
        }

        let mut meta = CatalogMeta::new();
        for _ in 0..table_count {
            let table_id = buf.get_u32_le();
            let page_id = PageId::new(buf.get_u32_le());
            meta.table_meta_pages.insert(table_id, page_id);
        }
        for _ in 0..index_count {
            let index_id = buf.get_u32_le();
            let page_id = PageId::new(buf.get_u32_le());
            meta.index_meta_pages.insert(index_id, page_id);
        }
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_meta_round_trip() {
        let mut meta = CatalogMeta::new();
        meta.table_meta_pages.insert(0, PageId::new(2));
        meta.table_meta_pages.insert(1, PageId::new(5));
        meta.index_meta_pages.insert(7, PageId::new(9));

        let mut buf = vec![0u8; PAGE_SIZE];
        meta.serialize_to(&mut buf).unwrap();
        assert_eq!(&buf[0..4], &CATALOG_METADATA_MAGIC_NUM.to_le_bytes());

        let decoded = CatalogMeta::deserialize_from(&buf).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn test_catalog_meta_bad_magic() {
        let buf = vec![0u8; PAGE_SIZE];
        assert!(matches!(
            CatalogMeta::deserialize_from(&buf),
            Err(BasaltError::InvalidMagic { found: 0, .. })
        ));
    }

    #[test]
    fn test_catalog_meta_too_large() {
        let mut meta = CatalogMeta::new();
        for i in 0..600 {
            meta.table_meta_pages.insert(i, PageId::new(i));
        }
        let mut buf = vec![0u8; PAGE_SIZE];
        assert!(matches!(
            meta.serialize_to(&mut buf),
            Err(BasaltError::CatalogMetaTooLarge { .. })
        ));
    }
}
