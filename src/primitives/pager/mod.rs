#![forbid(unsafe_code)]

mod mem;

use std::sync::Arc;

use crate::types::{page::PAGE_SIZE, PageId, Result};

pub use mem::{MemPager, PagerStats};

/// Immutable bytes of a persisted page.
///
/// Stores hand out shared buffers: once allocated, a page's bytes never change, so a
/// reader holding a `PageRef` observes the same contents for as long as it keeps it.
pub type PageRef = Arc<[u8]>;

/// Storage collaborator the B-tree reads and writes pages through.
///
/// Implementations own the page bytes; the tree only ever holds identifiers.
pub trait PageStore: Send + Sync + 'static {
    /// Returns the page size in bytes.
    fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    /// Returns the exact bytes previously stored under `id`.
    fn read_page(&self, id: PageId) -> Result<PageRef>;

    /// Stores `page` and returns a fresh identifier for it.
    ///
    /// Identifiers must not be reused while any live page references them.
    fn allocate_page(&self, page: &[u8]) -> Result<PageId>;

    /// Marks `id` as reclaimable.
    fn release_page(&self, id: PageId) -> Result<()>;
}

impl<S: PageStore + ?Sized> PageStore for Arc<S> {
    fn page_size(&self) -> usize {
        (**self).page_size()
    }

    fn read_page(&self, id: PageId) -> Result<PageRef> {
        (**self).read_page(id)
    }

    fn allocate_page(&self, page: &[u8]) -> Result<PageId> {
        (**self).allocate_page(page)
    }

    fn release_page(&self, id: PageId) -> Result<()> {
        (**self).release_page(id)
    }
}
