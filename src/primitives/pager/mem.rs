use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;

use super::{PageRef, PageStore};
use crate::types::{page::PAGE_SIZE, PageId, Result, TreeError};

/// Counters describing the traffic a [`MemPager`] has served.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct PagerStats {
    /// Pages currently stored.
    pub live_pages: u64,
    /// Released pages still readable until the next [`MemPager::reclaim`].
    pub retired_pages: u64,
    /// Total `allocate_page` calls that succeeded.
    pub allocations: u64,
    /// Total `release_page` calls that succeeded.
    pub releases: u64,
    /// Total `read_page` calls that succeeded.
    pub reads: u64,
}

struct MemState {
    pages: FxHashMap<PageId, PageRef>,
    retired: FxHashMap<PageId, PageRef>,
    next_id: u64,
}

/// In-memory page table keyed by [`PageId`].
///
/// Identifiers start at 1 and are never handed out twice, so a released identifier
/// can not alias a newer page.
///
/// A store built with [`MemPager::new`] drops a page as soon as it is released. One
/// built with [`MemPager::deferred`] keeps released pages readable until
/// [`reclaim`](MemPager::reclaim) is called, which lets searches holding an older
/// root run alongside a writer.
pub struct MemPager {
    page_size: usize,
    defer_release: bool,
    state: Mutex<MemState>,
    allocations: AtomicU64,
    releases: AtomicU64,
    reads: AtomicU64,
}

impl Default for MemPager {
    fn default() -> Self {
        Self::new()
    }
}

impl MemPager {
    /// Creates an empty store with the standard page size.
    pub fn new() -> Self {
        Self::with_release_mode(false)
    }

    /// Creates an empty store that keeps released pages until [`reclaim`](Self::reclaim).
    pub fn deferred() -> Self {
        Self::with_release_mode(true)
    }

    fn with_release_mode(defer_release: bool) -> Self {
        Self {
            page_size: PAGE_SIZE,
            defer_release,
            state: Mutex::new(MemState {
                pages: FxHashMap::default(),
                retired: FxHashMap::default(),
                next_id: 1,
            }),
            allocations: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            reads: AtomicU64::new(0),
        }
    }

    /// Convenience constructor for sharing the store between a tree and its callers.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of pages currently held, retired pages excluded.
    pub fn live_pages(&self) -> usize {
        self.state.lock().pages.len()
    }

    /// Number of released pages waiting for [`reclaim`](Self::reclaim).
    pub fn retired_pages(&self) -> usize {
        self.state.lock().retired.len()
    }

    /// Drops every retired page and returns how many were dropped.
    ///
    /// Call only when no reader holds a root older than the current one.
    pub fn reclaim(&self) -> usize {
        let dropped = std::mem::take(&mut self.state.lock().retired).len();
        if dropped > 0 {
            tracing::debug!(target: "pagetree::store", pages = dropped, "reclaimed retired pages");
        }
        dropped
    }

    /// Returns true if `id` is currently stored.
    pub fn contains(&self, id: PageId) -> bool {
        self.state.lock().pages.contains_key(&id)
    }

    /// Identifiers of every stored page, sorted.
    pub fn page_ids(&self) -> Vec<PageId> {
        let mut ids: Vec<PageId> = self.state.lock().pages.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Snapshot of the traffic counters.
    pub fn stats(&self) -> PagerStats {
        PagerStats {
            live_pages: self.live_pages() as u64,
            retired_pages: self.retired_pages() as u64,
            allocations: self.allocations.load(AtomicOrdering::Relaxed),
            releases: self.releases.load(AtomicOrdering::Relaxed),
            reads: self.reads.load(AtomicOrdering::Relaxed),
        }
    }
}

impl PageStore for MemPager {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&self, id: PageId) -> Result<PageRef> {
        let page = {
            let state = self.state.lock();
            state
                .pages
                .get(&id)
                .or_else(|| state.retired.get(&id))
                .cloned()
                .ok_or(TreeError::PageNotFound(id))?
        };
        self.reads.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(page)
    }

    fn allocate_page(&self, page: &[u8]) -> Result<PageId> {
        if page.len() != self.page_size {
            return Err(TreeError::Invalid("page buffer length differs from page size"));
        }
        let id = {
            let mut state = self.state.lock();
            let id = PageId(state.next_id);
            state.next_id += 1;
            state.pages.insert(id, Arc::from(page));
            id
        };
        self.allocations.fetch_add(1, AtomicOrdering::Relaxed);
        tracing::trace!(target: "pagetree::store", page = id.0, "allocated page");
        Ok(id)
    }

    fn release_page(&self, id: PageId) -> Result<()> {
        {
            let mut state = self.state.lock();
            let page = state.pages.remove(&id).ok_or(TreeError::PageNotFound(id))?;
            if self.defer_release {
                state.retired.insert(id, page);
            }
        }
        self.releases.fetch_add(1, AtomicOrdering::Relaxed);
        tracing::trace!(target: "pagetree::store", page = id.0, "released page");
        Ok(())
    }
}
