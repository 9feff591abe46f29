use std::cmp::Ordering;

use crate::common::{PageId, PAGE_SIZE};
use crate::storage::page::{read_u32, write_u32};

use super::btree_page::{
    slot_capacity, IndexPageType, TreePageHeader, TreePageHeaderMut, TREE_PAGE_HEADER_SIZE,
};
use super::KeyManager;

const CHILD_SIZE: usize = 4;

/// Default internal fan-out for `key_size`, keeping one spare slot for the
/// child that overflows a page just before it splits.
pub fn internal_max_size(key_size: usize) -> usize {
    internal_capacity(key_size) - 1
}

pub(crate) fn internal_capacity(key_size: usize) -> usize {
    slot_capacity(TREE_PAGE_HEADER_SIZE, key_size + CHILD_SIZE)
}

/// Internal page: `size` children separated by `size - 1` keys.
///
/// Entry `i` is `(key_i, child_i)`; `key_0` is never compared. Every key in
/// the subtree of `child_i` is `>= key_i` and `< key_{i+1}`.
pub struct InternalPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> TreePageHeader for InternalPage<B> {
    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> TreePageHeaderMut for InternalPage<B> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }
}

impl<B: AsRef<[u8]>> InternalPage<B> {
    pub fn new(data: B) -> Self {
        assert_eq!(data.as_ref().len(), PAGE_SIZE);
        Self { data }
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        let off = self.pair_offset(index);
        &self.bytes()[off..off + self.key_size()]
    }

    pub fn value_at(&self, index: usize) -> PageId {
        PageId::new(read_u32(self.bytes(), self.pair_offset(index) + self.key_size()))
    }

    /// Index of the entry pointing at `child`.
    pub fn value_index(&self, child: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.value_at(i) == child)
    }

    /// Child whose subtree covers `key`: the last separator `<= key`.
    pub fn lookup(&self, key: &[u8], km: &KeyManager) -> PageId {
        let (mut lo, mut hi) = (1, self.size());
        while lo < hi {
            let mid = (lo + hi) / 2;
            if km.compare(self.key_at(mid), key) == Ordering::Greater {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        self.value_at(lo - 1)
    }

    /// All child page ids, left to right.
    pub fn children(&self) -> Vec<PageId> {
        (0..self.size()).map(|i| self.value_at(i)).collect()
    }

    fn pair_size(&self) -> usize {
        self.key_size() + CHILD_SIZE
    }

    fn pair_offset(&self, index: usize) -> usize {
        TREE_PAGE_HEADER_SIZE + index * self.pair_size()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> InternalPage<B> {
    pub fn init(&mut self, page_id: PageId, parent_id: PageId, key_size: usize, max_size: usize) {
        self.init_header(IndexPageType::Internal, page_id, parent_id, key_size, max_size);
    }

    pub fn set_key_at(&mut self, index: usize, key: &[u8]) {
        let off = self.pair_offset(index);
        let key_size = self.key_size();
        self.bytes_mut()[off..off + key_size].copy_from_slice(key);
    }

    /// Zeroes the unused key in slot 0.
    pub fn clear_first_key(&mut self) {
        let off = self.pair_offset(0);
        let key_size = self.key_size();
        self.bytes_mut()[off..off + key_size].fill(0);
    }

    pub fn set_value_at(&mut self, index: usize, child: PageId) {
        let off = self.pair_offset(index) + self.key_size();
        write_u32(self.bytes_mut(), off, child.as_u32());
    }

    fn shift_pairs(&mut self, from: usize, shift: isize) {
        let start = self.pair_offset(from);
        let end = self.pair_offset(self.size());
        let dest = (start as isize + shift * self.pair_size() as isize) as usize;
        self.bytes_mut().copy_within(start..end, dest);
    }

    /// Turns an empty page into a root with two children.
    pub fn populate_new_root(&mut self, left: PageId, key: &[u8], right: PageId) {
        self.clear_first_key();
        self.set_value_at(0, left);
        self.set_key_at(1, key);
        self.set_value_at(1, right);
        self.set_size(2);
    }

    /// Inserts `(key, new_child)` right after the entry for `old_child` and
    /// returns the new size.
    pub fn insert_node_after(&mut self, old_child: PageId, key: &[u8], new_child: PageId) -> Option<usize> {
        let index = self.value_index(old_child)? + 1;
        let size = self.size();
        self.shift_pairs(index, 1);
        self.set_key_at(index, key);
        self.set_value_at(index, new_child);
        self.set_size(size + 1);
        Some(size + 1)
    }

    pub fn remove(&mut self, index: usize) {
        let size = self.size();
        self.shift_pairs(index + 1, -1);
        self.set_size(size - 1);
    }

    /// Empties a page with a single child and returns that child.
    pub fn remove_and_return_only_child(&mut self) -> PageId {
        let child = self.value_at(0);
        self.set_size(0);
        child
    }

    fn copy_n_from(&mut self, src: &[u8], count: usize) {
        let size = self.size();
        let start = self.pair_offset(size);
        self.bytes_mut()[start..start + src.len()].copy_from_slice(src);
        self.set_size(size + count);
    }

    /// Moves the upper half of the entries into the empty `recipient`.
    ///
    /// The recipient's first key is the separator to push up. Returns the
    /// moved children, whose parent link must now point at the recipient.
    pub fn move_half_to<R: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut InternalPage<R>,
    ) -> Vec<PageId> {
        let size = self.size();
        let keep = size / 2;
        let (start, end) = (self.pair_offset(keep), self.pair_offset(size));
        recipient.copy_n_from(&self.bytes()[start..end], size - keep);
        self.set_size(keep);
        recipient.children()
    }

    /// Appends every entry to the left sibling, bringing `middle_key` down
    /// from the parent as the separator. Returns the moved children.
    pub fn move_all_to<R: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut InternalPage<R>,
        middle_key: &[u8],
    ) -> Vec<PageId> {
        let moved = self.children();
        self.set_key_at(0, middle_key);
        let size = self.size();
        let (start, end) = (self.pair_offset(0), self.pair_offset(size));
        recipient.copy_n_from(&self.bytes()[start..end], size);
        self.set_size(0);
        moved
    }

    /// Moves the first child to the end of the left sibling under
    /// `middle_key`. Returns the moved child and the separator that replaces
    /// `middle_key` in the parent.
    pub fn move_first_to_end_of<R: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut InternalPage<R>,
        middle_key: &[u8],
    ) -> (PageId, Vec<u8>) {
        let child = self.value_at(0);
        let new_separator = self.key_at(1).to_vec();

        let size = recipient.size();
        recipient.set_key_at(size, middle_key);
        recipient.set_value_at(size, child);
        recipient.set_size(size + 1);

        self.remove(0);
        self.clear_first_key();
        (child, new_separator)
    }

    /// Moves the last child to the front of the right sibling, whose old
    /// first child now sits under `middle_key`. Returns the moved child and
    /// the separator that replaces `middle_key` in the parent.
    pub fn move_last_to_front_of<R: AsRef<[u8]> + AsMut<[u8]>>(
        &mut self,
        recipient: &mut InternalPage<R>,
        middle_key: &[u8],
    ) -> (PageId, Vec<u8>) {
        let last = self.size() - 1;
        let child = self.value_at(last);
        let new_separator = self.key_at(last).to_vec();

        let size = recipient.size();
        recipient.shift_pairs(0, 1);
        recipient.set_size(size + 1);
        recipient.set_key_at(1, middle_key);
        recipient.clear_first_key();
        recipient.set_value_at(0, child);

        self.set_size(last);
        (child, new_separator)
    }
}
