use std::borrow::Cow;

use super::page::Node;
use crate::primitives::pager::{PageRef, PageStore};
use crate::types::{page::PAGE_SIZE, PageId, Result, TreeError};

/// Bookkeeping for one copy-on-write operation.
///
/// New pages are allocated as the rewritten path is built, but pages they replace are
/// only released by [`commit`](Rewrite::commit), once the caller has installed the new
/// root. [`abort`](Rewrite::abort) hands back everything allocated so far and leaves
/// the previous tree untouched.
pub(crate) struct Rewrite<'s> {
    store: &'s dyn PageStore,
    allocated: Vec<PageId>,
    retired: Vec<PageId>,
}

impl<'s> Rewrite<'s> {
    pub(crate) fn new(store: &'s dyn PageStore) -> Self {
        Self {
            store,
            allocated: Vec::new(),
            retired: Vec::new(),
        }
    }

    pub(crate) fn read(&self, id: PageId) -> Result<Node<PageRef>> {
        Node::parse(self.store.read_page(id)?)
    }

    pub(crate) fn alloc<B: AsRef<[u8]>>(&mut self, node: &Node<B>) -> Result<PageId> {
        if node.nbytes() > PAGE_SIZE {
            return Err(TreeError::Invalid("page exceeds the page size"));
        }
        let bytes = node.as_bytes();
        let page: Cow<'_, [u8]> = if bytes.len() >= PAGE_SIZE {
            Cow::Borrowed(&bytes[..PAGE_SIZE])
        } else {
            let mut padded = bytes.to_vec();
            padded.resize(PAGE_SIZE, 0);
            Cow::Owned(padded)
        };
        let id = self.store.allocate_page(&page)?;
        self.allocated.push(id);
        Ok(id)
    }

    /// Schedules `id` for release once the operation commits.
    pub(crate) fn retire(&mut self, id: PageId) {
        self.retired.push(id);
    }

    pub(crate) fn allocated(&self) -> usize {
        self.allocated.len()
    }

    /// Releases every retired page. Call only after the new root is visible.
    pub(crate) fn commit(self) -> Result<()> {
        let mut first_err = None;
        for id in self.retired {
            if let Err(err) = self.store.release_page(id) {
                tracing::warn!(target: "pagetree::store", page = id.0, error = %err, "failed to release retired page");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Releases every page allocated by this operation.
    pub(crate) fn abort(self) {
        for id in self.allocated.into_iter().rev() {
            if let Err(err) = self.store.release_page(id) {
                tracing::warn!(target: "pagetree::store", page = id.0, error = %err, "failed to release page from aborted rewrite");
            }
        }
    }
}
