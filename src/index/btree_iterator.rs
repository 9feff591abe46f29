use std::sync::Arc;

use crate::buffer::BufferPoolManager;
use crate::common::{BasaltError, PageId, Result, RowId, INVALID_PAGE_ID};

use super::btree_leaf_page::LeafPage;
use super::btree_page::TreePageHeader;

/// Forward cursor over the leaf chain of a B+ tree.
///
/// The cursor holds a page id and slot, not a pin, and re-fetches the leaf
/// on every step. Once the last entry has been returned it compares equal
/// to `BPlusTree::end()`.
pub struct IndexIterator {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    index: usize,
}

impl IndexIterator {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page_id: PageId, index: usize) -> Self {
        Self {
            bpm,
            page_id,
            index,
        }
    }

    pub(crate) fn end(bpm: Arc<BufferPoolManager>) -> Self {
        Self::new(bpm, INVALID_PAGE_ID, 0)
    }

    pub fn is_end(&self) -> bool {
        !self.page_id.is_valid()
    }

    /// Leaf page and slot the cursor points at.
    pub fn position(&self) -> (PageId, usize) {
        (self.page_id, self.index)
    }

    fn advance(&mut self) -> Result<Option<(Vec<u8>, RowId)>> {
        if self.is_end() {
            return Ok(None);
        }

        let guard = self
            .bpm
            .fetch_page_guarded(self.page_id)?
            .ok_or(BasaltError::BufferPoolFull)?;
        let data = guard.read();
        let leaf = LeafPage::new(&data[..]);

        if self.index >= leaf.size() {
            return Err(BasaltError::IndexCorrupted(format!(
                "iterator slot {} is past the end of leaf {}",
                self.index, self.page_id
            )));
        }

        let (key, value) = leaf.item(self.index);
        let item = (key.to_vec(), value);

        self.index += 1;
        if self.index == leaf.size() {
            self.page_id = leaf.next_page_id();
            self.index = 0;
        }
        Ok(Some(item))
    }
}

impl Iterator for IndexIterator {
    type Item = Result<(Vec<u8>, RowId)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                self.page_id = INVALID_PAGE_ID;
                Some(Err(e))
            }
        }
    }
}

impl PartialEq for IndexIterator {
    fn eq(&self, other: &Self) -> bool {
        self.page_id == other.page_id && self.index == other.index
    }
}

impl std::fmt::Debug for IndexIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexIterator")
            .field("page_id", &self.page_id)
            .field("index", &self.index)
            .finish()
    }
}
