use std::cmp::Ordering;

use crate::common::{PageId, RowId, PAGE_SIZE};
use crate::storage::page::{read_u32, write_u32};

use super::btree_page::{
    slot_capacity, IndexPageType, TreePageHeader, TreePageHeaderMut, TREE_PAGE_HEADER_SIZE,
};
use super::KeyManager;

const NEXT_PAGE_OFFSET: usize = TREE_PAGE_HEADER_SIZE;

/// Leaf header: the common header plus the right sibling link.
pub const LEAF_PAGE_HEADER_SIZE: usize = TREE_PAGE_HEADER_SIZE + 4;

/// Default leaf fan-out for `key_size`, keeping one spare slot for the entry
/// that overflows a page just before it splits.
pub fn leaf_max_size(key_size: usize) -> usize {
    leaf_capacity(key_size) - 1
}

pub(crate) fn leaf_capacity(key_size: usize) -> usize {
    slot_capacity(LEAF_PAGE_HEADER_SIZE, key_size + RowId::SIZE)
}

/// Leaf page: sorted `(key, RowId)` pairs chained left to right through
/// `next_page_id`.
pub struct LeafPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> TreePageHeader for LeafPage<B> {
    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> TreePageHeaderMut for LeafPage<B> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }
}

impl<B: AsRef<[u8]>> LeafPage<B> {
    pub fn new(data: B) -> Self {
        assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data }
    }

    pub fn next_page_id(&self) -> PageId {
        PageId::new(read_u32(self.bytes(), NEXT_PAGE_OFFSET))
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        let off = self.pair_offset(index);
        &self.bytes()[off..off + self.key_size()]
    }

    pub fn value_at(&self, index: usize) -> RowId {
        let off = self.pair_offset(index) + self.key_size();
        let data = self.bytes();
        RowId::new(PageId::new(read_u32(data, off)), read_u32(data, off + 4))
    }

    pub fn item(&self, index: usize) -> (&[u8], RowId) {
        (self.key_at(index), self.value_at(index))
    }

    /// First index whose key is `>= key`, or `size()` if there is none.
    pub fn key_index(&self, key: &[u8], km: &KeyManager) -> usize {
        let (mut lo, mut hi) = (0, self.size());
        while lo < hi {
            let mid = (lo + hi) / 2;
            if km.compare(self.key_at(mid), key) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    pub fn lookup(&self, key: &[u8], km: &KeyManager) -> Option<RowId> {
        let index = self.key_index(key, km);
        (index < self.size() && km.compare(self.key_at(index), key) == Ordering::Equal)
            .then(|| self.value_at(index))
    }

    fn pair_size(&self) -> usize {
        self.key_size() + RowId::SIZE
    }

    fn pair_offset(&self, index: usize) -> usize {
        LEAF_PAGE_HEADER_SIZE + index * self.pair_size()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> LeafPage<B> {
    pub fn init(&mut self, page_id: PageId, parent_id: PageId, key_size: usize, max_size: usize) {
        self.init_header(IndexPageType::Leaf, page_id, parent_id, key_size, max_size);
        self.set_next_page_id(crate::common::INVALID_PAGE_ID);
    }

    pub fn set_next_page_id(&mut self, next: PageId) {
        write_u32(self.bytes_mut(), NEXT_PAGE_OFFSET, next.as_u32());
    }

    fn set_pair_at(&mut self, index: usize, key: &[u8], value: RowId) {
        let off = self.pair_offset(index);
        let key_size = self.key_size();
        let data = self.bytes_mut();
        data[off..off + key_size].copy_from_slice(key);
        write_u32(data, off + key_size, value.page_id.as_u32());
        write_u32(data, off + key_size + 4, value.slot_num);
    }

    /// Moves pairs `[from, size)` by `shift` slots (positive is right).
    fn shift_pairs(&mut self, from: usize, shift: isize) {
        let start = self.pair_offset(from);
        let end = self.pair_offset(self.size());
        let dest = (start as isize + shift * self.pair_size() as isize) as usize;
        self.bytes_mut().copy_within(start..end, dest);
    }

    /// Inserts in key order and returns the new size. The key must not
    /// already be present.
    pub fn insert(&mut self, key: &[u8], value: RowId, km: &KeyManager) -> usize {
        let index = self.key_index(key, km);
        let size = self.size();
        self.shift_pairs(index, 1);
        self.set_pair_at(index, key, value);
        self.set_size(size + 1);
        size + 1
    }

    fn remove_at(&mut self, index: usize) {
        let size = self.size();
        self.shift_pairs(index + 1, -1);
        self.set_size(size - 1);
    }

    /// Removes `key` if present and returns the size afterwards.
    pub fn remove_and_delete_record(&mut self, key: &[u8], km: &KeyManager) -> usize {
        let index = self.key_index(key, km);
        if index < self.size() && km.compare(self.key_at(index), key) == Ordering::Equal {
            self.remove_at(index);
        }
        self.size()
    }

    fn copy_n_from(&mut self, src: &[u8], count: usize) {
        let size = self.size();
        let start = self.pair_offset(size);
        self.bytes_mut()[start..start + src.len()].copy_from_slice(src);
        self.set_size(size + count);
    }

    /// Moves the upper half of the pairs into the empty `recipient` and
    /// links it in as this page's right sibling.
    pub fn move_half_to<R: AsRef<[u8]> + AsMut<[u8]>>(&mut self, recipient: &mut LeafPage<R>) {
        let size = self.size();
        let keep = size / 2;
        let (start, end) = (self.pair_offset(keep), self.pair_offset(size));
        recipient.copy_n_from(&self.bytes()[start..end], size - keep);
        self.set_size(keep);

        recipient.set_next_page_id(self.next_page_id());
        self.set_next_page_id(recipient.page_id());
    }

    /// Appends every pair to the left sibling `recipient` and hands over
    /// this page's right link.
    pub fn move_all_to<R: AsRef<[u8]> + AsMut<[u8]>>(&mut self, recipient: &mut LeafPage<R>) {
        let size = self.size();
        let end = self.pair_offset(size);
        recipient.copy_n_from(&self.bytes()[LEAF_PAGE_HEADER_SIZE..end], size);
        recipient.set_next_page_id(self.next_page_id());
        self.set_size(0);
    }

    /// Moves the first pair to the end of the left sibling and returns this
    /// page's new first key.
    pub fn move_first_to_end_of<R: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut LeafPage<R>,
    ) -> Vec<u8> {
        let value = self.value_at(0);
        let size = recipient.size();
        recipient.set_pair_at(size, self.key_at(0), value);
        recipient.set_size(size + 1);
        self.remove_at(0);
        self.key_at(0).to_vec()
    }

    /// Moves the last pair to the front of the right sibling and returns
    /// the sibling's new first key.
    pub fn move_last_to_front_of<R: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut LeafPage<R>,
    ) -> Vec<u8> {
        let last = self.size() - 1;
        let key = self.key_at(last).to_vec();
        let value = self.value_at(last);

        let size = recipient.size();
        recipient.shift_pairs(0, 1);
        recipient.set_pair_at(0, &key, value);
        recipient.set_size(size + 1);

        self.set_size(last);
        key
    }
}
