#![forbid(unsafe_code)]

//! Copy-on-write B-tree over fixed-size pages.

/// Page format and the typed view over a page buffer.
pub mod page;

/// Pure page rewrites: insert, update, remove, split and merge.
pub mod node;

/// Structural checks over a whole tree.
pub mod verify;

mod options;
mod rewrite;
mod stats;
mod tree;

pub use options::BTreeOptions;
pub use stats::{BTreeStats, BTreeStatsSnapshot};
pub use tree::BTree;
pub use verify::{verify_tree, VerifyCounts, VerifyFinding, VerifyReport, VerifySeverity};
