//! Low-level primitives the storage layer is built on.

/// Page storage collaborators.
///
/// The [`PageStore`](pager::PageStore) contract and an in-memory implementation.
pub mod pager;
