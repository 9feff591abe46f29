use std::io::Write;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::buffer::{BufferPoolManager, PageGuard};
use crate::common::{
    BasaltError, IndexId, PageId, Result, RowId, INDEX_ROOTS_PAGE_ID, INVALID_PAGE_ID,
};
use crate::storage::page::IndexRootsPage;

use super::btree_internal_page::{internal_capacity, internal_max_size, InternalPage};
use super::btree_iterator::IndexIterator;
use super::btree_leaf_page::{leaf_capacity, leaf_max_size, LeafPage};
use super::btree_page::{IndexPageType, TreePage, TreePageHeader, TreePageHeaderMut};
use super::KeyManager;

/// Header fields the rebalancing code needs about one page.
#[derive(Debug, Clone, Copy)]
struct NodeInfo {
    is_leaf: bool,
    is_root: bool,
    size: usize,
    max_size: usize,
    min_size: usize,
    parent: PageId,
}

impl NodeInfo {
    fn read(guard: &PageGuard) -> Self {
        let data = guard.read();
        let page = TreePage::new(&data[..]);
        Self {
            is_leaf: page.is_leaf(),
            is_root: page.is_root(),
            size: page.size(),
            max_size: page.max_size(),
            min_size: page.min_size(),
            parent: page.parent_page_id(),
        }
    }

    fn is_full(&self) -> bool {
        self.size >= self.max_size
    }

    /// Whether the page would underflow at `size` entries.
    fn underflows_at(&self, size: usize) -> bool {
        size < self.min_size || size == 0
    }
}

/// One level of a pending rebalance after a removal, lowest level first.
struct Rebalance {
    /// Position of the underflowing page in its parent
    index: usize,
    neighbor: PageGuard,
    redistribute: bool,
}

/// Everything a removal needs pinned before the tree is touched.
struct RemovePlan {
    levels: Vec<Rebalance>,
    /// Registry page, present when the root shrinks
    roots: Option<PageGuard>,
}

fn set_parent(guard: &mut PageGuard, parent: PageId) {
    let mut data = guard.write();
    TreePage::new(&mut data[..]).set_parent_page_id(parent);
}

fn corrupted(msg: impl Into<String>) -> BasaltError {
    BasaltError::IndexCorrupted(msg.into())
}

/// Disk-resident B+ tree with unique fixed-size keys mapping to row ids.
///
/// Every page is reached through the buffer pool and pinned only for the
/// duration of one operation. The root page id is kept in the index roots
/// registry page so the tree can be reopened after a restart.
///
/// Structural changes pin every frame they need before the first page is
/// modified, so a full pool fails the operation with `BufferPoolFull` and
/// leaves the tree as it was.
pub struct BPlusTree {
    index_id: IndexId,
    root_page_id: PageId,
    bpm: Arc<BufferPoolManager>,
    km: KeyManager,
    leaf_max_size: usize,
    internal_max_size: usize,
}

impl BPlusTree {
    /// Opens index `index_id` with page fan-outs derived from the key size.
    pub fn new(index_id: IndexId, bpm: Arc<BufferPoolManager>, km: KeyManager) -> Result<Self> {
        let leaf_max = leaf_max_size(km.key_size());
        let internal_max = internal_max_size(km.key_size());
        Self::with_max_sizes(index_id, bpm, km, leaf_max, internal_max)
    }

    /// Opens index `index_id`, reloading its root from the registry if the
    /// index already exists.
    pub fn with_max_sizes(
        index_id: IndexId,
        bpm: Arc<BufferPoolManager>,
        km: KeyManager,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        let leaf_slots = leaf_capacity(km.key_size());
        if leaf_max_size < 2 || leaf_max_size >= leaf_slots {
            return Err(BasaltError::InvalidMaxSize {
                max_size: leaf_max_size,
                capacity: leaf_slots.saturating_sub(1),
            });
        }
        let internal_slots = internal_capacity(km.key_size());
        if internal_max_size < 3 || internal_max_size >= internal_slots {
            return Err(BasaltError::InvalidMaxSize {
                max_size: internal_max_size,
                capacity: internal_slots.saturating_sub(1),
            });
        }

        if bpm.is_page_free(INDEX_ROOTS_PAGE_ID)? {
            return Err(BasaltError::IndexRootsMissing(INDEX_ROOTS_PAGE_ID));
        }

        let root_page_id = {
            let guard = bpm
                .fetch_page_guarded(INDEX_ROOTS_PAGE_ID)?
                .ok_or(BasaltError::BufferPoolFull)?;
            let data = guard.read();
            IndexRootsPage::new(&data[..])
                .get_root_id(index_id)
                .unwrap_or(INVALID_PAGE_ID)
        };

        debug!(index_id, root = %root_page_id, leaf_max_size, internal_max_size, "opened index");
        Ok(Self {
            index_id,
            root_page_id,
            bpm,
            km,
            leaf_max_size,
            internal_max_size,
        })
    }

    pub fn index_id(&self) -> IndexId {
        self.index_id
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    pub fn key_manager(&self) -> &KeyManager {
        &self.km
    }

    pub fn is_empty(&self) -> bool {
        !self.root_page_id.is_valid()
    }

    /// Point lookup.
    pub fn get_value(&self, key: &[u8]) -> Result<Option<RowId>> {
        self.km.check(key)?;
        if self.is_empty() {
            return Ok(None);
        }

        let guard = self.find_leaf_page(Some(key))?;
        let data = guard.read();
        Ok(LeafPage::new(&data[..]).lookup(key, &self.km))
    }

    /// Inserts a new key. Returns false, leaving the tree unchanged, if the
    /// key is already present.
    pub fn insert(&mut self, key: &[u8], value: RowId) -> Result<bool> {
        self.km.check(key)?;
        if self.is_empty() {
            self.start_new_tree(key, value)?;
            return Ok(true);
        }
        self.insert_into_leaf(key, value)
    }

    /// Removes `key` if present. Returns whether anything was removed.
    pub fn remove(&mut self, key: &[u8]) -> Result<bool> {
        self.km.check(key)?;
        if self.is_empty() {
            return Ok(false);
        }

        let mut path = self.find_path(key)?;
        let Some(leaf_guard) = path.last() else {
            return Err(corrupted("empty search path"));
        };
        let present = {
            let data = leaf_guard.read();
            LeafPage::new(&data[..]).lookup(key, &self.km).is_some()
        };
        if !present {
            return Ok(false);
        }

        let plan = self.plan_rebalance(&path)?;
        if let Some(leaf_guard) = path.last_mut() {
            let mut data = leaf_guard.write();
            LeafPage::new(&mut data[..]).remove_and_delete_record(key, &self.km);
        }
        let doomed = self.rebalance(&mut path, plan)?;

        drop(path);
        for page_id in doomed {
            self.delete_page(page_id)?;
            trace!(page = %page_id, "freed tree page");
        }
        Ok(true)
    }

    /// Iterator positioned at the smallest key.
    pub fn begin(&self) -> Result<IndexIterator> {
        if self.is_empty() {
            return Ok(self.end());
        }
        let leaf = self.find_leaf_page(None)?;
        Ok(IndexIterator::new(Arc::clone(&self.bpm), leaf.page_id(), 0))
    }

    /// Iterator positioned at the first key `>= key`.
    pub fn begin_at(&self, key: &[u8]) -> Result<IndexIterator> {
        self.km.check(key)?;
        if self.is_empty() {
            return Ok(self.end());
        }

        let leaf = self.find_leaf_page(Some(key))?;
        let data = leaf.read();
        let page = LeafPage::new(&data[..]);
        let index = page.key_index(key, &self.km);
        if index < page.size() {
            Ok(IndexIterator::new(Arc::clone(&self.bpm), leaf.page_id(), index))
        } else {
            Ok(IndexIterator::new(Arc::clone(&self.bpm), page.next_page_id(), 0))
        }
    }

    /// The past-the-end iterator.
    pub fn end(&self) -> IndexIterator {
        IndexIterator::end(Arc::clone(&self.bpm))
    }

    /// Frees every page of the tree and unregisters it.
    pub fn destroy(&mut self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        let mut roots = self.fetch(INDEX_ROOTS_PAGE_ID)?;
        let mut pages = Vec::new();
        self.collect_pages(self.root_page_id, &mut pages)?;

        self.root_page_id = INVALID_PAGE_ID;
        self.record_root(&mut roots)?;
        drop(roots);

        for page_id in pages {
            self.delete_page(page_id)?;
        }
        debug!(index_id = self.index_id, "destroyed index");
        Ok(())
    }

    /// True if the buffer pool holds no pinned page.
    pub fn check(&self) -> bool {
        self.bpm.check_all_unpinned()
    }

    /// Descends to the leaf that covers `key`, or to the leftmost leaf when
    /// `key` is `None`. The returned leaf stays pinned by its guard.
    pub fn find_leaf_page(&self, key: Option<&[u8]>) -> Result<PageGuard> {
        let mut page_id = self.root_page_id;
        loop {
            let guard = self.fetch(page_id)?;
            let Some(child) = self.child_for(&guard, key)? else {
                return Ok(guard);
            };
            page_id = child;
        }
    }

    /// Pins every page from the root down to the leaf covering `key`.
    fn find_path(&self, key: &[u8]) -> Result<Vec<PageGuard>> {
        let mut path = Vec::new();
        let mut page_id = self.root_page_id;
        loop {
            let guard = self.fetch(page_id)?;
            let next = self.child_for(&guard, Some(key))?;
            path.push(guard);
            match next {
                Some(child) => page_id = child,
                None => return Ok(path),
            }
        }
    }

    /// The child to descend into, or `None` at a leaf.
    fn child_for(&self, guard: &PageGuard, key: Option<&[u8]>) -> Result<Option<PageId>> {
        let data = guard.read();
        Ok(match TreePage::new(&data[..]).page_type()? {
            IndexPageType::Leaf => None,
            IndexPageType::Internal => {
                let node = InternalPage::new(&data[..]);
                Some(match key {
                    Some(key) => node.lookup(key, &self.km),
                    None => node.value_at(0),
                })
            }
        })
    }

    fn fetch(&self, page_id: PageId) -> Result<PageGuard> {
        self.bpm
            .fetch_page_guarded(page_id)?
            .ok_or(BasaltError::BufferPoolFull)
    }

    fn allocate(&self) -> Result<PageGuard> {
        self.bpm
            .new_page_guarded()?
            .ok_or(BasaltError::BufferPoolFull)
    }

    /// Allocates `count` pinned pages, or none at all.
    fn reserve(&self, count: usize) -> Result<Vec<PageGuard>> {
        let mut pages = Vec::with_capacity(count);
        while pages.len() < count {
            match self.bpm.new_page_guarded() {
                Ok(Some(guard)) => pages.push(guard),
                failed => {
                    let allocated: Vec<PageId> = pages.iter().map(PageGuard::page_id).collect();
                    drop(pages);
                    for page_id in allocated {
                        self.delete_page(page_id)?;
                    }
                    debug!(count, "could not reserve pages for a split");
                    return Err(match failed {
                        Err(e) => e,
                        Ok(_) => BasaltError::BufferPoolFull,
                    });
                }
            }
        }
        Ok(pages)
    }

    fn start_new_tree(&mut self, key: &[u8], value: RowId) -> Result<()> {
        let mut roots = self.fetch(INDEX_ROOTS_PAGE_ID)?;
        let mut guard = self.allocate()?;
        let page_id = guard.page_id();
        {
            let mut data = guard.write();
            let mut leaf = LeafPage::new(&mut data[..]);
            leaf.init(page_id, INVALID_PAGE_ID, self.km.key_size(), self.leaf_max_size);
            leaf.insert(key, value, &self.km);
        }

        self.root_page_id = page_id;
        if let Err(e) = self.record_root(&mut roots) {
            self.root_page_id = INVALID_PAGE_ID;
            drop(guard);
            self.delete_page(page_id)?;
            return Err(e);
        }
        debug!(index_id = self.index_id, root = %page_id, "started new tree");
        Ok(())
    }

    /// Inserts into the covering leaf, splitting full pages bottom-up.
    ///
    /// Only the pages that will split and the ancestor that absorbs the last
    /// separator stay pinned. Their new siblings, and a new root if the
    /// split reaches the top, are allocated before the leaf changes.
    fn insert_into_leaf(&mut self, key: &[u8], value: RowId) -> Result<bool> {
        let mut path = self.find_path(key)?;
        let Some(leaf_guard) = path.last() else {
            return Err(corrupted("empty search path"));
        };
        {
            let data = leaf_guard.read();
            if LeafPage::new(&data[..]).lookup(key, &self.km).is_some() {
                return Ok(false);
            }
        }

        let splits = path
            .iter()
            .rev()
            .take_while(|guard| NodeInfo::read(guard).is_full())
            .count();
        let unaffected = path.len().saturating_sub(splits + 1);
        path.drain(..unaffected);
        let grows_root = splits == path.len();

        let mut roots = if grows_root {
            Some(self.fetch(INDEX_ROOTS_PAGE_ID)?)
        } else {
            None
        };
        let mut siblings = self.reserve(splits + usize::from(grows_root))?;
        let new_root = if grows_root { siblings.pop() } else { None };

        if let Some(leaf_guard) = path.last_mut() {
            let mut data = leaf_guard.write();
            LeafPage::new(&mut data[..]).insert(key, value, &self.km);
        }
        if splits == 0 {
            return Ok(true);
        }

        // (left page, separator, new right page) waiting to enter the level above
        let mut carry: Option<(PageId, Vec<u8>, PageGuard)> = None;
        for (node, mut sibling) in path.iter_mut().rev().zip(siblings) {
            let separator = match carry.take() {
                None => self.split_leaf(node, &mut sibling),
                Some((left, pending, right)) => {
                    self.insert_separator(node, left, &pending, right.page_id())?;
                    drop(right);
                    self.split_internal(node, &mut sibling)?
                }
            };
            carry = Some((node.page_id(), separator, sibling));
        }
        let Some((left, separator, mut right)) = carry else {
            return Err(corrupted("split produced no sibling"));
        };

        match (new_root, roots.as_mut()) {
            (Some(mut root_guard), Some(roots)) => {
                let root_id = root_guard.page_id();
                {
                    let mut data = root_guard.write();
                    let mut root = InternalPage::new(&mut data[..]);
                    root.init(root_id, INVALID_PAGE_ID, self.km.key_size(), self.internal_max_size);
                    root.populate_new_root(left, &separator, right.page_id());
                }
                set_parent(&mut path[0], root_id);
                set_parent(&mut right, root_id);

                self.root_page_id = root_id;
                self.record_root(roots)?;
                debug!(index_id = self.index_id, root = %root_id, "tree grew a level");
            }
            _ => self.insert_separator(&mut path[0], left, &separator, right.page_id())?,
        }
        Ok(true)
    }

    /// Adds `(key, right)` after `left` in an internal page.
    fn insert_separator(
        &self,
        parent_guard: &mut PageGuard,
        left: PageId,
        key: &[u8],
        right: PageId,
    ) -> Result<()> {
        let parent_id = parent_guard.page_id();
        let mut data = parent_guard.write();
        InternalPage::new(&mut data[..])
            .insert_node_after(left, key, right)
            .ok_or_else(|| corrupted(format!("page {} is not a child of {}", left, parent_id)))?;
        Ok(())
    }

    /// Moves the upper half of an overflowing leaf into the empty `sibling`
    /// and returns the sibling's first key.
    fn split_leaf(&self, guard: &mut PageGuard, sibling_guard: &mut PageGuard) -> Vec<u8> {
        let sibling_id = sibling_guard.page_id();

        let middle_key = {
            let mut data = guard.write();
            let mut sibling_data = sibling_guard.write();
            let mut leaf = LeafPage::new(&mut data[..]);
            let mut sibling = LeafPage::new(&mut sibling_data[..]);
            sibling.init(sibling_id, leaf.parent_page_id(), leaf.key_size(), leaf.max_size());
            leaf.move_half_to(&mut sibling);
            sibling.key_at(0).to_vec()
        };

        trace!(page = %guard.page_id(), sibling = %sibling_id, "split leaf");
        middle_key
    }

    /// Moves the upper half of an overflowing internal page into the empty
    /// `sibling` and returns the separator to push up.
    fn split_internal(
        &self,
        guard: &mut PageGuard,
        sibling_guard: &mut PageGuard,
    ) -> Result<Vec<u8>> {
        let sibling_id = sibling_guard.page_id();

        let (middle_key, moved) = {
            let mut data = guard.write();
            let mut sibling_data = sibling_guard.write();
            let mut node = InternalPage::new(&mut data[..]);
            let mut sibling = InternalPage::new(&mut sibling_data[..]);
            sibling.init(sibling_id, node.parent_page_id(), node.key_size(), node.max_size());
            let moved = node.move_half_to(&mut sibling);
            let middle_key = sibling.key_at(0).to_vec();
            sibling.clear_first_key();
            (middle_key, moved)
        };
        self.adopt(&moved, sibling_id)?;

        trace!(page = %guard.page_id(), sibling = %sibling_id, "split internal page");
        Ok(middle_key)
    }

    /// Points the parent link of each page in `children` at `parent`.
    ///
    /// Goes through `update_page`, so it never needs a free frame. None of
    /// the children may be content-locked by the caller.
    fn adopt(&self, children: &[PageId], parent: PageId) -> Result<()> {
        for &child in children {
            self.bpm.update_page(child, |data| {
                TreePage::new(data).set_parent_page_id(parent);
            })?;
        }
        Ok(())
    }

    /// Works out which levels a removal from the leaf at the end of `path`
    /// will rebalance, pinning each neighbor involved and the registry page
    /// if the root shrinks. Nothing is modified.
    fn plan_rebalance(&self, path: &[PageGuard]) -> Result<RemovePlan> {
        let mut plan = RemovePlan {
            levels: Vec::new(),
            roots: None,
        };
        let Some(leaf_guard) = path.last() else {
            return Ok(plan);
        };
        let mut size = NodeInfo::read(leaf_guard).size.saturating_sub(1);

        for level in (0..path.len()).rev() {
            let node_guard = &path[level];
            let node = NodeInfo::read(node_guard);
            if !node.underflows_at(size) {
                break;
            }
            if node.is_root {
                plan.roots = Some(self.fetch(INDEX_ROOTS_PAGE_ID)?);
                break;
            }

            let Some(parent_guard) = level.checked_sub(1).map(|l| &path[l]) else {
                return Err(corrupted(format!(
                    "page {} has no parent on the path",
                    node_guard.page_id()
                )));
            };
            if parent_guard.page_id() != node.parent {
                return Err(corrupted(format!(
                    "page {} has parent {}, reached from {}",
                    node_guard.page_id(),
                    node.parent,
                    parent_guard.page_id()
                )));
            }
            let (index, neighbor_id, parent_size) = {
                let data = parent_guard.read();
                let parent = InternalPage::new(&data[..]);
                if parent.size() < 2 {
                    return Err(corrupted(format!(
                        "parent {} of page {} has {} children",
                        node.parent,
                        node_guard.page_id(),
                        parent.size()
                    )));
                }
                let index = parent.value_index(node_guard.page_id()).ok_or_else(|| {
                    corrupted(format!(
                        "page {} is not a child of {}",
                        node_guard.page_id(),
                        node.parent
                    ))
                })?;
                let neighbor_index = if index == 0 { 1 } else { index - 1 };
                (index, parent.value_at(neighbor_index), parent.size())
            };

            let neighbor = self.fetch(neighbor_id)?;
            let redistribute = NodeInfo::read(&neighbor).size + size > node.max_size;
            plan.levels.push(Rebalance {
                index,
                neighbor,
                redistribute,
            });
            if redistribute {
                break;
            }
            // A merge takes one entry out of the parent
            size = parent_size - 1;
        }
        Ok(plan)
    }

    /// Carries out `plan` on the pinned `path` and returns the pages that
    /// left the tree. The caller frees them once every guard is dropped.
    fn rebalance(&mut self, path: &mut [PageGuard], plan: RemovePlan) -> Result<Vec<PageId>> {
        let mut doomed = Vec::new();
        let mut level = path.len() - 1;

        for step in plan.levels {
            let Rebalance {
                index,
                mut neighbor,
                redistribute,
            } = step;
            let (upper, lower) = path.split_at_mut(level);
            let (Some(parent), Some(node)) = (upper.last_mut(), lower.first_mut()) else {
                return Err(corrupted("rebalance ran past the root"));
            };
            let is_leaf = NodeInfo::read(node).is_leaf;

            if redistribute {
                self.redistribute(&mut neighbor, node, parent, index, is_leaf)?;
            } else {
                // Merge the right page of the pair into the left one
                let (left, right, right_index) = if index == 0 {
                    (node, &mut neighbor, 1)
                } else {
                    (&mut neighbor, node, index)
                };
                self.coalesce(left, right, parent, right_index, is_leaf)?;
                trace!(page = %right.page_id(), "coalesced page");
                doomed.push(right.page_id());
            }
            level -= 1;
        }

        if let Some(mut roots) = plan.roots {
            let old_root_id = path[0].page_id();
            self.adjust_root(&mut path[0])?;
            self.record_root(&mut roots)?;
            doomed.push(old_root_id);
        }
        Ok(doomed)
    }

    /// Moves every entry of `right` into `left` and drops `right` from the
    /// parent. The caller deletes `right`.
    fn coalesce(
        &self,
        left: &mut PageGuard,
        right: &mut PageGuard,
        parent_guard: &mut PageGuard,
        right_index: usize,
        is_leaf: bool,
    ) -> Result<()> {
        let left_id = left.page_id();
        let mut parent_data = parent_guard.write();
        let mut parent = InternalPage::new(&mut parent_data[..]);

        if is_leaf {
            let mut left_data = left.write();
            let mut right_data = right.write();
            LeafPage::new(&mut right_data[..]).move_all_to(&mut LeafPage::new(&mut left_data[..]));
            parent.remove(right_index);
            return Ok(());
        }

        let moved = {
            let mut left_data = left.write();
            let mut right_data = right.write();
            let middle_key = parent.key_at(right_index).to_vec();
            let moved = InternalPage::new(&mut right_data[..])
                .move_all_to(&mut InternalPage::new(&mut left_data[..]), &middle_key);
            parent.remove(right_index);
            moved
        };
        drop(parent_data);
        self.adopt(&moved, left_id)
    }

    /// Moves one entry from `neighbor` into `node` and fixes the separator
    /// between them. `index` is the position of `node` in the parent.
    fn redistribute(
        &self,
        neighbor: &mut PageGuard,
        node: &mut PageGuard,
        parent_guard: &mut PageGuard,
        index: usize,
        is_leaf: bool,
    ) -> Result<()> {
        let node_id = node.page_id();
        // Separator slot in the parent between node and neighbor
        let separator = if index == 0 { 1 } else { index };

        let mut parent_data = parent_guard.write();
        let mut parent = InternalPage::new(&mut parent_data[..]);
        let mut neighbor_data = neighbor.write();
        let mut node_data = node.write();

        if is_leaf {
            let mut neighbor_page = LeafPage::new(&mut neighbor_data[..]);
            let mut node_page = LeafPage::new(&mut node_data[..]);
            let new_key = if index == 0 {
                neighbor_page.move_first_to_end_of(&mut node_page)
            } else {
                neighbor_page.move_last_to_front_of(&mut node_page)
            };
            parent.set_key_at(separator, &new_key);
            return Ok(());
        }

        let middle_key = parent.key_at(separator).to_vec();
        let mut neighbor_page = InternalPage::new(&mut neighbor_data[..]);
        let mut node_page = InternalPage::new(&mut node_data[..]);
        let (child, new_key) = if index == 0 {
            neighbor_page.move_first_to_end_of(&mut node_page, &middle_key)
        } else {
            neighbor_page.move_last_to_front_of(&mut node_page, &middle_key)
        };
        parent.set_key_at(separator, &new_key);

        drop(node_data);
        drop(neighbor_data);
        drop(parent_data);
        self.adopt(&[child], node_id)
    }

    /// Shrinks the tree at an underflowing root: an empty leaf root removes
    /// the tree, an internal root with one child hands the root role to that
    /// child. The caller records the new root and frees the old one.
    fn adjust_root(&mut self, root_guard: &mut PageGuard) -> Result<()> {
        if NodeInfo::read(root_guard).is_leaf {
            self.root_page_id = INVALID_PAGE_ID;
            debug!(index_id = self.index_id, "tree is now empty");
            return Ok(());
        }

        let child_id = {
            let mut data = root_guard.write();
            InternalPage::new(&mut data[..]).remove_and_return_only_child()
        };
        self.adopt(&[child_id], INVALID_PAGE_ID)?;
        self.root_page_id = child_id;
        debug!(index_id = self.index_id, root = %child_id, "tree lost a level");
        Ok(())
    }

    fn delete_page(&self, page_id: PageId) -> Result<()> {
        if self.bpm.delete_page(page_id)? {
            Ok(())
        } else {
            Err(corrupted(format!("page {} is still pinned", page_id)))
        }
    }

    /// Appends `page_id` and every page below it, pinning one page at a time.
    fn collect_pages(&self, page_id: PageId, pages: &mut Vec<PageId>) -> Result<()> {
        let children = {
            let guard = self.fetch(page_id)?;
            let data = guard.read();
            match TreePage::new(&data[..]).page_type()? {
                IndexPageType::Leaf => Vec::new(),
                IndexPageType::Internal => InternalPage::new(&data[..]).children(),
            }
        };
        pages.push(page_id);
        for child in children {
            self.collect_pages(child, pages)?;
        }
        Ok(())
    }

    /// Records the current root in the pinned index roots registry, or
    /// removes the entry when the tree is empty.
    fn record_root(&self, roots_guard: &mut PageGuard) -> Result<()> {
        let mut data = roots_guard.write();
        let mut roots = IndexRootsPage::new(&mut data[..]);
        if self.root_page_id.is_valid() {
            if !roots.update(self.index_id, self.root_page_id) {
                roots.insert(self.index_id, self.root_page_id)?;
            }
        } else {
            roots.delete(self.index_id);
        }
        Ok(())
    }

    /// Walks the whole tree checking the structural invariants: page
    /// headers and parent links, per-page size bounds, key order against
    /// the separators above, uniform leaf depth, and a leaf chain that
    /// visits every leaf left to right.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        let mut leaves = Vec::new();
        let mut leaf_depth = None;
        self.validate_subtree(
            self.root_page_id,
            INVALID_PAGE_ID,
            None,
            None,
            0,
            &mut leaf_depth,
            &mut leaves,
        )?;

        let mut page_id = leaves[0];
        for (i, &expected) in leaves.iter().enumerate() {
            if page_id != expected {
                return Err(corrupted(format!(
                    "leaf chain reaches {} at position {}, expected {}",
                    page_id, i, expected
                )));
            }
            let guard = self.fetch(page_id)?;
            let data = guard.read();
            page_id = LeafPage::new(&data[..]).next_page_id();
        }
        if page_id.is_valid() {
            return Err(corrupted(format!("last leaf links to {}", page_id)));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn validate_subtree(
        &self,
        page_id: PageId,
        parent: PageId,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
        leaves: &mut Vec<PageId>,
    ) -> Result<()> {
        let guard = self.fetch(page_id)?;
        let data = guard.read();
        let header = TreePage::new(&data[..]);

        if header.page_id() != page_id {
            return Err(corrupted(format!(
                "page {} claims to be {}",
                page_id,
                header.page_id()
            )));
        }
        if header.parent_page_id() != parent {
            return Err(corrupted(format!(
                "page {} has parent {}, expected {}",
                page_id,
                header.parent_page_id(),
                parent
            )));
        }
        let size = header.size();
        let min = if header.is_root() { 1 } else { header.min_size() };
        if size < min.max(1) || size > header.max_size() {
            return Err(corrupted(format!(
                "page {} has size {} outside [{}, {}]",
                page_id,
                size,
                min,
                header.max_size()
            )));
        }

        let in_bounds = |key: &[u8]| {
            lower.map_or(true, |lo| self.km.compare(key, lo).is_ge())
                && upper.map_or(true, |hi| self.km.compare(key, hi).is_lt())
        };

        match header.page_type()? {
            IndexPageType::Leaf => {
                let leaf = LeafPage::new(&data[..]);
                for i in 0..size {
                    let key = leaf.key_at(i);
                    if !in_bounds(key) {
                        return Err(corrupted(format!(
                            "key {} in leaf {} is outside its separators",
                            self.km.format(key),
                            page_id
                        )));
                    }
                    if i > 0 && self.km.compare(leaf.key_at(i - 1), key).is_ge() {
                        return Err(corrupted(format!("keys out of order in leaf {}", page_id)));
                    }
                }
                match *leaf_depth {
                    None => *leaf_depth = Some(depth),
                    Some(d) if d != depth => {
                        return Err(corrupted(format!(
                            "leaf {} at depth {}, other leaves at {}",
                            page_id, depth, d
                        )))
                    }
                    Some(_) => {}
                }
                leaves.push(page_id);
            }
            IndexPageType::Internal => {
                if header.is_root() && size < 2 {
                    return Err(corrupted(format!("internal root {} has one child", page_id)));
                }
                let node = InternalPage::new(&data[..]);
                for i in 1..size {
                    if !in_bounds(node.key_at(i)) {
                        return Err(corrupted(format!(
                            "separator {} in page {} is outside its bounds",
                            self.km.format(node.key_at(i)),
                            page_id
                        )));
                    }
                    if i > 1 && self.km.compare(node.key_at(i - 1), node.key_at(i)).is_ge() {
                        return Err(corrupted(format!(
                            "separators out of order in page {}",
                            page_id
                        )));
                    }
                }
                for i in 0..size {
                    let child_lower = if i == 0 { lower } else { Some(node.key_at(i)) };
                    let child_upper = if i + 1 < size { Some(node.key_at(i + 1)) } else { upper };
                    self.validate_subtree(
                        node.value_at(i),
                        page_id,
                        child_lower,
                        child_upper,
                        depth + 1,
                        leaf_depth,
                        leaves,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Writes a Graphviz rendering of the tree.
    pub fn write_dot<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(out, "digraph G {{")?;
        writeln!(out, "  node [shape=record];")?;
        if !self.is_empty() {
            self.write_dot_subtree(self.root_page_id, out)?;
        }
        writeln!(out, "}}")?;
        Ok(())
    }

    fn write_dot_subtree<W: Write>(&self, page_id: PageId, out: &mut W) -> Result<()> {
        let children = {
            let guard = self.fetch(page_id)?;
            let data = guard.read();
            let id = page_id.as_u32();
            match TreePage::new(&data[..]).page_type()? {
                IndexPageType::Leaf => {
                    let leaf = LeafPage::new(&data[..]);
                    let keys: Vec<String> =
                        (0..leaf.size()).map(|i| self.km.format(leaf.key_at(i))).collect();
                    writeln!(
                        out,
                        "  page{} [label=\"L{} | {}\", style=filled, fillcolor=lightgreen];",
                        id,
                        id,
                        keys.join(" ")
                    )?;
                    if leaf.next_page_id().is_valid() {
                        writeln!(
                            out,
                            "  page{} -> page{} [style=dashed]; {{rank=same; page{}; page{};}}",
                            id,
                            leaf.next_page_id().as_u32(),
                            id,
                            leaf.next_page_id().as_u32()
                        )?;
                    }
                    Vec::new()
                }
                IndexPageType::Internal => {
                    let node = InternalPage::new(&data[..]);
                    let keys: Vec<String> =
                        (1..node.size()).map(|i| self.km.format(node.key_at(i))).collect();
                    writeln!(
                        out,
                        "  page{} [label=\"I{} | {}\", style=filled, fillcolor=pink];",
                        id,
                        id,
                        keys.join(" ")
                    )?;
                    for child in node.children() {
                        writeln!(out, "  page{} -> page{};", id, child.as_u32())?;
                    }
                    node.children()
                }
            }
        };
        for child in children {
            self.write_dot_subtree(child, out)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for BPlusTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPlusTree")
            .field("index_id", &self.index_id)
            .field("root_page_id", &self.root_page_id)
            .field("leaf_max_size", &self.leaf_max_size)
            .field("internal_max_size", &self.internal_max_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::StorageConfig;
    use crate::storage::StorageEngine;
    use tempfile::TempDir;

    fn setup(leaf_max: usize, internal_max: usize) -> (TempDir, StorageEngine, BPlusTree, KeyManager) {
        let dir = TempDir::new().unwrap();
        let engine = StorageEngine::open(
            dir.path().join("tree.db"),
            StorageConfig::default().with_pool_size(32),
        )
        .unwrap();
        let km = KeyManager::integer(4);
        let tree = engine
            .open_index_with_max_sizes(1, km.clone(), leaf_max, internal_max)
            .unwrap();
        (dir, engine, tree, km)
    }

    fn rid(n: i32) -> RowId {
        RowId::from_u64(n as u64)
    }

    fn collect(tree: &BPlusTree, km: &KeyManager) -> Vec<i32> {
        tree.begin()
            .unwrap()
            .map(|item| km.decode_i32(&item.unwrap().0))
            .collect()
    }

    #[test]
    fn test_root_leaf_splits_into_internal_root() {
        let (_dir, _engine, mut tree, km) = setup(4, 4);

        for k in 1..=4 {
            assert!(tree.insert(&km.encode_i32(k), rid(k)).unwrap());
        }
        assert_eq!(tree.root_page_id(), PageId::new(2));
        {
            let leaf = tree.find_leaf_page(None).unwrap();
            let data = leaf.read();
            let page = LeafPage::new(&data[..]);
            assert!(page.is_root());
            assert_eq!(page.size(), 4);
            assert_eq!(page.next_page_id(), INVALID_PAGE_ID);
        }

        assert!(tree.insert(&km.encode_i32(5), rid(5)).unwrap());
        let root = tree.fetch(tree.root_page_id()).unwrap();
        {
            let data = root.read();
            let page = InternalPage::new(&data[..]);
            assert_eq!(page.page_type().unwrap(), IndexPageType::Internal);
            assert_eq!(page.size(), 2);
            assert_eq!(km.decode_i32(page.key_at(1)), 3);
        }
        drop(root);

        tree.validate().unwrap();
        assert_eq!(collect(&tree, &km), vec![1, 2, 3, 4, 5]);
        assert!(tree.check());
    }

    #[test]
    fn test_duplicate_insert_is_rejected() {
        let (_dir, _engine, mut tree, km) = setup(4, 4);

        assert!(tree.insert(&km.encode_i32(9), rid(9)).unwrap());
        assert!(!tree.insert(&km.encode_i32(9), rid(100)).unwrap());
        assert_eq!(tree.get_value(&km.encode_i32(9)).unwrap(), Some(rid(9)));
        assert!(tree.check());
    }

    #[test]
    fn test_removing_every_key_empties_tree() {
        let (_dir, engine, mut tree, km) = setup(3, 3);

        for k in 0..30 {
            tree.insert(&km.encode_i32(k), rid(k)).unwrap();
        }
        for k in (0..30).rev() {
            assert!(tree.remove(&km.encode_i32(k)).unwrap());
            tree.validate().unwrap();
            assert!(tree.check());
        }

        assert!(tree.is_empty());
        assert!(!tree.remove(&km.encode_i32(1)).unwrap());
        assert!(engine.index_roots().unwrap().is_empty());
        assert_eq!(tree.begin().unwrap(), tree.end());
    }

    #[test]
    fn test_tree_reopens_from_registry() {
        let (_dir, engine, mut tree, km) = setup(4, 4);
        for k in 0..20 {
            tree.insert(&km.encode_i32(k), rid(k)).unwrap();
        }
        let root = tree.root_page_id();
        drop(tree);

        let reopened = engine.open_index_with_max_sizes(1, km.clone(), 4, 4).unwrap();
        assert_eq!(reopened.root_page_id(), root);
        assert_eq!(reopened.get_value(&km.encode_i32(13)).unwrap(), Some(rid(13)));

        let other = engine.open_index(2, km).unwrap();
        assert!(other.is_empty());
    }

    #[test]
    fn test_rejects_bad_arguments() {
        let (_dir, engine, mut tree, km) = setup(4, 4);

        assert!(matches!(
            tree.insert(&[1, 2], rid(1)),
            Err(BasaltError::KeyLengthMismatch { expected: 4, actual: 2 })
        ));
        assert!(matches!(
            engine.open_index_with_max_sizes(3, km.clone(), 1, 4),
            Err(BasaltError::InvalidMaxSize { max_size: 1, .. })
        ));
        assert!(matches!(
            engine.open_index_with_max_sizes(3, km, 4, 100_000),
            Err(BasaltError::InvalidMaxSize { max_size: 100_000, .. })
        ));
    }

    #[test]
    fn test_destroy_frees_pages() {
        let (_dir, engine, mut tree, km) = setup(4, 4);
        for k in 0..50 {
            tree.insert(&km.encode_i32(k), rid(k)).unwrap();
        }
        assert!(engine.disk_manager().num_allocated_pages() > 2);

        tree.destroy().unwrap();
        assert!(tree.is_empty());
        assert_eq!(engine.disk_manager().num_allocated_pages(), 2);
        assert!(engine.index_roots().unwrap().is_empty());
        assert!(tree.check());
    }

    #[test]
    fn test_write_dot() {
        let (_dir, _engine, mut tree, km) = setup(4, 4);
        for k in 1..=6 {
            tree.insert(&km.encode_i32(k), rid(k)).unwrap();
        }

        let mut out = Vec::new();
        tree.write_dot(&mut out).unwrap();
        let dot = String::from_utf8(out).unwrap();
        assert!(dot.starts_with("digraph G {"));
        assert!(dot.contains("fillcolor=pink"));
        assert!(dot.contains("1 2"));
        assert!(dot.trim_end().ends_with('}'));
    }
}
