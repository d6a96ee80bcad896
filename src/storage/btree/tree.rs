use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::node::{self, lookup_le};
use super::options::BTreeOptions;
use super::page::{BTreePageKind, Node};
use super::rewrite::Rewrite;
use super::stats::{BTreeStats, BTreeStatsSnapshot};
use crate::primitives::pager::{PageRef, PageStore};
use crate::types::{page::HEADER_LEN, page::PAGE_SIZE, PageId, Result, TreeError};

/// Copy-on-write B-tree over a [`PageStore`].
///
/// The tree itself only holds the root identifier; every page lives in the store and
/// is never modified once allocated. `insert` and `delete` rebuild the path from the
/// root to the affected leaf, install the new root, and only then release the pages
/// they replaced. Writers are serialized by an internal lock; `search` takes a
/// snapshot of the root and runs without it.
///
/// Lock-free readers are only safe while the pages of their snapshot stay readable. A
/// store that frees released pages at once, such as [`MemPager::new`], can make a
/// search racing a writer fail with [`TreeError::PageNotFound`]; use
/// [`MemPager::deferred`] and reclaim at a quiescent point instead.
///
/// [`MemPager::new`]: crate::primitives::pager::MemPager::new
/// [`MemPager::deferred`]: crate::primitives::pager::MemPager::deferred
pub struct BTree {
    store: Arc<dyn PageStore>,
    root: AtomicU64,
    options: BTreeOptions,
    stats: Arc<BTreeStats>,
    writer: Mutex<()>,
}

/// Sibling chosen to absorb an underfull child after a delete.
enum MergeWith {
    Left(Node<PageRef>),
    Right(Node<PageRef>),
    None,
}

impl BTree {
    /// Opens the tree rooted at `opts.root_page`, or an empty tree when unset.
    pub fn open(store: &Arc<dyn PageStore>, opts: BTreeOptions) -> Result<Self> {
        opts.validate()?;
        if store.page_size() != PAGE_SIZE {
            return Err(TreeError::Invalid("store page size differs from the tree page size"));
        }
        let root = opts.root_page.unwrap_or(PageId::NULL);
        if !root.is_null() {
            Node::parse(store.read_page(root)?)?;
        }
        tracing::debug!(target: "pagetree::root", root = root.0, "opened btree");
        Ok(Self {
            store: Arc::clone(store),
            root: AtomicU64::new(root.0),
            options: opts,
            stats: Arc::new(BTreeStats::default()),
            writer: Mutex::new(()),
        })
    }

    /// Return the root page identifier; `PageId::NULL` for an empty tree.
    pub fn root_page(&self) -> PageId {
        PageId(self.root.load(AtomicOrdering::SeqCst))
    }

    /// Returns true when the tree holds no pages.
    pub fn is_empty(&self) -> bool {
        self.root_page().is_null()
    }

    /// The options the tree was opened with.
    pub fn options(&self) -> &BTreeOptions {
        &self.options
    }

    /// The store pages are read from and written to.
    pub fn store(&self) -> &Arc<dyn PageStore> {
        &self.store
    }

    /// Access the live statistics counters for this tree.
    pub fn stats(&self) -> Arc<BTreeStats> {
        Arc::clone(&self.stats)
    }

    /// Snapshot the current statistics counters.
    pub fn stats_snapshot(&self) -> BTreeStatsSnapshot {
        self.stats.snapshot()
    }

    /// Emit the current statistics to the tracing sink.
    pub fn emit_stats(&self) {
        self.stats.emit_tracing();
    }

    /// Looks up `key`, returning a copy of its value.
    ///
    /// The empty key is an ordinary key: on a non-empty tree it finds the sentinel
    /// record, whose value is empty until written by `insert`.
    pub fn search(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut current = self.root_page();
        if current.is_null() {
            return Ok(None);
        }
        loop {
            let node = Node::parse(self.store.read_page(current)?)?;
            match node.kind()? {
                BTreePageKind::Leaf => {
                    self.stats.inc_leaf_searches();
                    tracing::trace!(
                        target: "pagetree::search",
                        page = current.0,
                        kind = "leaf",
                        "located target leaf"
                    );
                    let found = lookup_le(&node, key)
                        .filter(|&idx| node.key(idx) == key)
                        .map(|idx| node.value(idx).to_vec());
                    return Ok(found);
                }
                BTreePageKind::Internal => {
                    self.stats.inc_internal_searches();
                    tracing::trace!(
                        target: "pagetree::search",
                        page = current.0,
                        kind = "internal",
                        "descending through internal node"
                    );
                    current = node.ptr(route(&node, key)?);
                }
            }
        }
    }

    /// Returns true if `key` is present.
    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.search(key)?.is_some())
    }

    /// Inserts `key` or replaces its value.
    ///
    /// Keys and values longer than the configured limits are rejected without touching
    /// the tree. The empty key is accepted and overwrites the value of the sentinel
    /// record the leftmost leaf starts with.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.len() > self.options.max_key_size {
            return Err(TreeError::KeyTooLarge {
                len: key.len(),
                max: self.options.max_key_size,
            });
        }
        if value.len() > self.options.max_value_size {
            return Err(TreeError::ValueTooLarge {
                len: value.len(),
                max: self.options.max_value_size,
            });
        }

        let _writer = self.writer.lock();
        let root = self.root_page();
        let mut rw = Rewrite::new(self.store.as_ref());
        match self.insert_from_root(&mut rw, root, key, value) {
            Ok(new_root) => self.install(rw, root, new_root),
            Err(err) => {
                tracing::debug!(target: "pagetree::root", error = %err, "insert aborted");
                rw.abort();
                Err(err)
            }
        }
    }

    /// Removes `key`, returning whether it was present.
    ///
    /// A missing key leaves the tree untouched and releases nothing.
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        if key.len() > self.options.max_key_size {
            return Ok(false);
        }
        let _writer = self.writer.lock();
        let root = self.root_page();
        if root.is_null() {
            return Ok(false);
        }
        let mut rw = Rewrite::new(self.store.as_ref());
        match self.delete_from_root(&mut rw, root, key) {
            Ok(Some(new_root)) => {
                self.stats.inc_deletes();
                self.install(rw, root, new_root)?;
                Ok(true)
            }
            Ok(None) => {
                rw.abort();
                Ok(false)
            }
            Err(err) => {
                tracing::debug!(target: "pagetree::root", error = %err, "delete aborted");
                rw.abort();
                Err(err)
            }
        }
    }

    /// Visits every record in key order, skipping the sentinel.
    ///
    /// A record with an empty key is the sentinel as long as its value is empty too.
    pub fn for_each<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        let root = self.root_page();
        if root.is_null() {
            return Ok(());
        }
        self.visit_page(root, &mut visit)
    }

    /// Number of levels from the root to the leaves; 0 for an empty tree.
    pub fn height(&self) -> Result<usize> {
        let mut current = self.root_page();
        let mut height = 0;
        while !current.is_null() {
            let node = Node::parse(self.store.read_page(current)?)?;
            height += 1;
            current = match node.kind()? {
                BTreePageKind::Leaf => PageId::NULL,
                BTreePageKind::Internal if node.nkeys() > 0 => node.ptr(0),
                BTreePageKind::Internal => {
                    return Err(TreeError::Corruption("internal page without children"))
                }
            };
        }
        Ok(height)
    }

    fn visit_page<F>(&self, id: PageId, visit: &mut F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        let node = Node::parse(self.store.read_page(id)?)?;
        match node.kind()? {
            BTreePageKind::Leaf => {
                for idx in 0..node.nkeys() {
                    if !is_sentinel(&node, idx) {
                        visit(node.key(idx), node.value(idx))?;
                    }
                }
            }
            BTreePageKind::Internal => {
                for idx in 0..node.nkeys() {
                    self.visit_page(node.ptr(idx), visit)?;
                }
            }
        }
        Ok(())
    }

    fn install(&self, rw: Rewrite<'_>, old_root: PageId, new_root: PageId) -> Result<()> {
        self.root.store(new_root.0, AtomicOrdering::SeqCst);
        tracing::trace!(
            target: "pagetree::root",
            old = old_root.0,
            new = new_root.0,
            pages_written = rw.allocated(),
            "installed new root"
        );
        rw.commit()
    }

    fn insert_from_root(
        &self,
        rw: &mut Rewrite<'_>,
        root: PageId,
        key: &[u8],
        value: &[u8],
    ) -> Result<PageId> {
        if root.is_null() {
            let mut leaf = Node::page();
            if key.is_empty() {
                leaf.set_header(BTreePageKind::Leaf, 1);
                leaf.append_kv(0, PageId::NULL, key, value);
            } else {
                leaf.set_header(BTreePageKind::Leaf, 2);
                leaf.append_kv(0, PageId::NULL, &[], &[]);
                leaf.append_kv(1, PageId::NULL, key, value);
            }
            self.stats.inc_inserts();
            return rw.alloc(&leaf);
        }
        let node = rw.read(root)?;
        let updated = self.tree_insert(rw, &node, key, value)?;
        rw.retire(root);
        self.alloc_root(rw, updated)
    }

    /// Persists a rewritten root, adding a level above it if it had to be split.
    fn alloc_root(&self, rw: &mut Rewrite<'_>, updated: Node) -> Result<PageId> {
        let kind = updated.kind()?;
        let pages = node::split3(updated);
        if pages.len() == 1 {
            return rw.alloc(&pages[0]);
        }
        self.record_split(kind);
        let mut root = Node::page();
        root.set_header(BTreePageKind::Internal, pages.len());
        for (idx, page) in pages.iter().enumerate() {
            let id = rw.alloc(page)?;
            root.append_kv(idx, id, page.key(0), &[]);
        }
        self.stats.inc_root_splits();
        tracing::debug!(target: "pagetree::root", children = pages.len(), "root split, tree grew a level");
        rw.alloc(&root)
    }

    fn tree_insert<B: AsRef<[u8]>>(
        &self,
        rw: &mut Rewrite<'_>,
        node: &Node<B>,
        key: &[u8],
        value: &[u8],
    ) -> Result<Node> {
        match node.kind()? {
            BTreePageKind::Leaf => match lookup_le(node, key) {
                Some(idx) if node.key(idx) == key => {
                    self.stats.inc_updates();
                    Ok(node::leaf_update(node, idx, key, value))
                }
                found => {
                    self.stats.inc_inserts();
                    let idx = found.map_or(0, |idx| idx + 1);
                    Ok(node::leaf_insert(node, idx, key, value))
                }
            },
            BTreePageKind::Internal => {
                let idx = route(node, key)?;
                let child_id = node.ptr(idx);
                let child = rw.read(child_id)?;
                let updated = self.tree_insert(rw, &child, key, value)?;
                rw.retire(child_id);
                self.replace_child(rw, node, idx, updated)
            }
        }
    }

    /// Splits `updated` as needed, persists the pieces and links them in place of `idx`.
    fn replace_child<B: AsRef<[u8]>>(
        &self,
        rw: &mut Rewrite<'_>,
        parent: &Node<B>,
        idx: usize,
        updated: Node,
    ) -> Result<Node> {
        let kind = updated.kind()?;
        let pages = node::split3(updated);
        if pages.len() > 1 {
            self.record_split(kind);
        }
        let mut ids = Vec::with_capacity(pages.len());
        for page in pages.iter() {
            ids.push(rw.alloc(page)?);
        }
        let kids: Vec<(PageId, &[u8])> = ids
            .iter()
            .zip(pages.iter())
            .map(|(&id, page)| (id, page.key(0)))
            .collect();
        Ok(node::replace_children(parent, idx, &kids))
    }

    fn delete_from_root(
        &self,
        rw: &mut Rewrite<'_>,
        root: PageId,
        key: &[u8],
    ) -> Result<Option<PageId>> {
        let node = rw.read(root)?;
        let Some(updated) = self.tree_delete(rw, &node, key)? else {
            return Ok(None);
        };
        rw.retire(root);
        match updated.kind()? {
            BTreePageKind::Internal if updated.nkeys() == 0 => Ok(Some(PageId::NULL)),
            BTreePageKind::Internal if updated.nkeys() == 1 => {
                self.collapse_root(rw, updated.ptr(0)).map(Some)
            }
            BTreePageKind::Leaf if is_sentinel_only(&updated) => {
                tracing::debug!(target: "pagetree::root", "last key deleted, tree is empty");
                Ok(Some(PageId::NULL))
            }
            _ => self.alloc_root(rw, updated).map(Some),
        }
    }

    /// Promotes the only child of the root, repeating while the new root has one child.
    fn collapse_root(&self, rw: &mut Rewrite<'_>, mut child: PageId) -> Result<PageId> {
        loop {
            self.stats.inc_root_collapses();
            tracing::debug!(target: "pagetree::root", new_root = child.0, "root collapsed into its only child");
            let node = rw.read(child)?;
            match node.kind()? {
                BTreePageKind::Internal if node.nkeys() == 1 => {
                    rw.retire(child);
                    child = node.ptr(0);
                }
                BTreePageKind::Leaf if is_sentinel_only(&node) => {
                    rw.retire(child);
                    return Ok(PageId::NULL);
                }
                _ => return Ok(child),
            }
        }
    }

    fn tree_delete<B: AsRef<[u8]>>(
        &self,
        rw: &mut Rewrite<'_>,
        node: &Node<B>,
        key: &[u8],
    ) -> Result<Option<Node>> {
        match node.kind()? {
            BTreePageKind::Leaf => Ok(lookup_le(node, key)
                .filter(|&idx| node.key(idx) == key)
                .map(|idx| node::remove_record(node, idx))),
            BTreePageKind::Internal => {
                let idx = route(node, key)?;
                let child_id = node.ptr(idx);
                let child = rw.read(child_id)?;
                let Some(updated) = self.tree_delete(rw, &child, key)? else {
                    return Ok(None);
                };
                rw.retire(child_id);
                self.rebalance_child(rw, node, idx, updated).map(Some)
            }
        }
    }

    /// Links a shrunken child back into `parent`, merging it with a sibling when small.
    fn rebalance_child<B: AsRef<[u8]>>(
        &self,
        rw: &mut Rewrite<'_>,
        parent: &Node<B>,
        idx: usize,
        updated: Node,
    ) -> Result<Node> {
        match self.should_merge(rw, parent, idx, &updated)? {
            MergeWith::Left(sibling) => {
                let merged = node::merge(&sibling, &updated);
                rw.retire(parent.ptr(idx - 1));
                let id = rw.alloc(&merged)?;
                self.record_merge(&merged, parent.ptr(idx - 1), "left")?;
                Ok(node::replace_two_children(parent, idx - 1, id, merged.key(0)))
            }
            MergeWith::Right(sibling) => {
                let merged = node::merge(&updated, &sibling);
                rw.retire(parent.ptr(idx + 1));
                let id = rw.alloc(&merged)?;
                self.record_merge(&merged, parent.ptr(idx + 1), "right")?;
                Ok(node::replace_two_children(parent, idx, id, merged.key(0)))
            }
            MergeWith::None if updated.nkeys() == 0 => {
                // Only reachable when the emptied child has no sibling.
                Ok(node::remove_record(parent, idx))
            }
            MergeWith::None => self.replace_child(rw, parent, idx, updated),
        }
    }

    /// Picks a sibling to merge an updated child with, preferring the left one.
    fn should_merge<B: AsRef<[u8]>>(
        &self,
        rw: &Rewrite<'_>,
        parent: &Node<B>,
        idx: usize,
        updated: &Node,
    ) -> Result<MergeWith> {
        if updated.nbytes() > self.options.merge_threshold {
            return Ok(MergeWith::None);
        }
        if idx > 0 {
            let sibling = rw.read(parent.ptr(idx - 1))?;
            if sibling.nbytes() + updated.nbytes() - HEADER_LEN <= PAGE_SIZE {
                return Ok(MergeWith::Left(sibling));
            }
        }
        if idx + 1 < parent.nkeys() {
            let sibling = rw.read(parent.ptr(idx + 1))?;
            if sibling.nbytes() + updated.nbytes() - HEADER_LEN <= PAGE_SIZE {
                return Ok(MergeWith::Right(sibling));
            }
        }
        Ok(MergeWith::None)
    }

    fn record_split(&self, kind: BTreePageKind) {
        match kind {
            BTreePageKind::Leaf => self.stats.inc_leaf_splits(),
            BTreePageKind::Internal => self.stats.inc_internal_splits(),
        }
        tracing::trace!(target: "pagetree::split", kind = ?kind, "split oversized page");
    }

    fn record_merge(&self, merged: &Node, sibling: PageId, direction: &'static str) -> Result<()> {
        match merged.kind()? {
            BTreePageKind::Leaf => self.stats.inc_leaf_merges(),
            BTreePageKind::Internal => self.stats.inc_internal_merges(),
        }
        tracing::trace!(
            target: "pagetree::merge",
            sibling = sibling.0,
            direction,
            nbytes = merged.nbytes(),
            "merged page with sibling"
        );
        Ok(())
    }
}

/// Child slot to descend into for `key`.
///
/// Slot 0 covers every key below the second separator, including keys that sort
/// before its own separator once the sentinel has been deleted.
fn route<B: AsRef<[u8]>>(node: &Node<B>, key: &[u8]) -> Result<usize> {
    if node.nkeys() == 0 {
        return Err(TreeError::Corruption("internal page without children"));
    }
    Ok(lookup_le(node, key).unwrap_or(0))
}

/// The sentinel is an empty key carrying an empty value.
fn is_sentinel<B: AsRef<[u8]>>(node: &Node<B>, idx: usize) -> bool {
    node.key(idx).is_empty() && node.value(idx).is_empty()
}

/// A root leaf in this state holds no user data and the tree becomes empty.
fn is_sentinel_only<B: AsRef<[u8]>>(node: &Node<B>) -> bool {
    node.nkeys() == 0 || (node.nkeys() == 1 && is_sentinel(node, 0))
}
