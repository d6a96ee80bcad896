//! Page-oriented, copy-on-write B-tree.
//!
//! Keys and values are byte strings stored in 4 KiB pages. Every update writes a new
//! path from the root down to the affected leaf and leaves the old pages untouched
//! until the new root is installed, so a reader holding the previous root keeps a
//! consistent view. Pages come from a [`PageStore`]; [`MemPager`] keeps them in memory.
//!
//! ```
//! use std::sync::Arc;
//! use pagetree::{BTree, BTreeOptions, MemPager, PageStore};
//!
//! # fn main() -> pagetree::Result<()> {
//! let store: Arc<dyn PageStore> = MemPager::shared();
//! let tree = BTree::open(&store, BTreeOptions::default())?;
//! tree.insert(b"k1", b"hi")?;
//! assert_eq!(tree.search(b"k1")?, Some(b"hi".to_vec()));
//! assert!(tree.delete(b"k1")?);
//! assert!(tree.is_empty());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod primitives;
pub mod storage;
pub mod types;

pub use primitives::pager::{MemPager, PageRef, PageStore, PagerStats};
pub use storage::btree::{
    verify_tree, BTree, BTreeOptions, BTreeStats, BTreeStatsSnapshot, VerifyReport,
};
pub use types::{PageId, Result, TreeError};
