//! Tree storage built on top of a page store.

/// B-tree data structure implementation.
pub mod btree;
