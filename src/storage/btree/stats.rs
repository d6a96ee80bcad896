use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use serde::Serialize;

/// Snapshot of B-tree statistics at a point in time.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BTreeStatsSnapshot {
    /// Leaf pages reached by `search`.
    pub leaf_searches: u64,
    /// Internal pages descended through by `search`.
    pub internal_searches: u64,
    /// Inserts that added a new key.
    pub inserts: u64,
    /// Inserts that replaced the value of an existing key.
    pub updates: u64,
    /// Deletes that removed a key.
    pub deletes: u64,
    /// Leaf pages split into two or three.
    pub leaf_splits: u64,
    /// Internal pages split into two or three.
    pub internal_splits: u64,
    /// Leaf pages merged with a sibling.
    pub leaf_merges: u64,
    /// Internal pages merged with a sibling.
    pub internal_merges: u64,
    /// Times the tree grew a level.
    pub root_splits: u64,
    /// Times the tree lost a level.
    pub root_collapses: u64,
}

/// Thread-safe statistics tracking for B-tree operations.
#[derive(Default)]
pub struct BTreeStats {
    leaf_searches: AtomicU64,
    internal_searches: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    leaf_splits: AtomicU64,
    internal_splits: AtomicU64,
    leaf_merges: AtomicU64,
    internal_merges: AtomicU64,
    root_splits: AtomicU64,
    root_collapses: AtomicU64,
}

impl BTreeStats {
    /// Returns the current count of leaf page searches.
    pub fn leaf_searches(&self) -> u64 {
        self.leaf_searches.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of internal page searches.
    pub fn internal_searches(&self) -> u64 {
        self.internal_searches.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of inserts that added a key.
    pub fn inserts(&self) -> u64 {
        self.inserts.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of inserts that overwrote a key.
    pub fn updates(&self) -> u64 {
        self.updates.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of successful deletes.
    pub fn deletes(&self) -> u64 {
        self.deletes.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of leaf page splits.
    pub fn leaf_splits(&self) -> u64 {
        self.leaf_splits.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of internal page splits.
    pub fn internal_splits(&self) -> u64 {
        self.internal_splits.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of leaf page merges.
    pub fn leaf_merges(&self) -> u64 {
        self.leaf_merges.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of internal page merges.
    pub fn internal_merges(&self) -> u64 {
        self.internal_merges.load(AtomicOrdering::Relaxed)
    }

    /// Returns how many times a new root was added above a split root.
    pub fn root_splits(&self) -> u64 {
        self.root_splits.load(AtomicOrdering::Relaxed)
    }

    /// Returns how many times a single-child root was replaced by its child.
    pub fn root_collapses(&self) -> u64 {
        self.root_collapses.load(AtomicOrdering::Relaxed)
    }

    pub(crate) fn inc_leaf_searches(&self) {
        self.leaf_searches.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_internal_searches(&self) {
        self.internal_searches.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_inserts(&self) {
        self.inserts.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_updates(&self) {
        self.updates.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_deletes(&self) {
        self.deletes.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_leaf_splits(&self) {
        self.leaf_splits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_internal_splits(&self) {
        self.internal_splits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_leaf_merges(&self) {
        self.leaf_merges.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_internal_merges(&self) {
        self.internal_merges.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_root_splits(&self) {
        self.root_splits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_root_collapses(&self) {
        self.root_collapses.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Creates a snapshot of all current statistics.
    pub fn snapshot(&self) -> BTreeStatsSnapshot {
        BTreeStatsSnapshot {
            leaf_searches: self.leaf_searches(),
            internal_searches: self.internal_searches(),
            inserts: self.inserts(),
            updates: self.updates(),
            deletes: self.deletes(),
            leaf_splits: self.leaf_splits(),
            internal_splits: self.internal_splits(),
            leaf_merges: self.leaf_merges(),
            internal_merges: self.internal_merges(),
            root_splits: self.root_splits(),
            root_collapses: self.root_collapses(),
        }
    }

    /// Emits current statistics to the tracing infrastructure.
    pub fn emit_tracing(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            target: "pagetree::stats",
            leaf_searches = snapshot.leaf_searches,
            internal_searches = snapshot.internal_searches,
            inserts = snapshot.inserts,
            updates = snapshot.updates,
            deletes = snapshot.deletes,
            leaf_splits = snapshot.leaf_splits,
            internal_splits = snapshot.internal_splits,
            leaf_merges = snapshot.leaf_merges,
            internal_merges = snapshot.internal_merges,
            root_splits = snapshot.root_splits,
            root_collapses = snapshot.root_collapses,
            "btree stats snapshot"
        );
    }
}
