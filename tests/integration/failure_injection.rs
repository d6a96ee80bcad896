#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use pagetree::{
    BTree, BTreeOptions, MemPager, PageId, PageRef, PageStore, Result, TreeError,
};

/// Store that starts failing allocations or releases on demand.
struct FlakyStore {
    inner: MemPager,
    allocations_left: AtomicUsize,
    fail_releases: AtomicBool,
}

impl FlakyStore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemPager::new(),
            allocations_left: AtomicUsize::new(usize::MAX),
            fail_releases: AtomicBool::new(false),
        })
    }

    fn allow_allocations(&self, n: usize) {
        self.allocations_left.store(n, Ordering::SeqCst);
    }
}

impl PageStore for FlakyStore {
    fn read_page(&self, id: PageId) -> Result<PageRef> {
        self.inner.read_page(id)
    }

    fn allocate_page(&self, page: &[u8]) -> Result<PageId> {
        let left = self.allocations_left.load(Ordering::SeqCst);
        if left == 0 {
            return Err(TreeError::Storage("allocation budget exhausted".into()));
        }
        self.allocations_left.store(left.saturating_sub(1), Ordering::SeqCst);
        self.inner.allocate_page(page)
    }

    fn release_page(&self, id: PageId) -> Result<()> {
        if self.fail_releases.load(Ordering::SeqCst) {
            return Err(TreeError::Storage("release refused".into()));
        }
        self.inner.release_page(id)
    }
}

fn filled_tree(store: &Arc<FlakyStore>, count: usize) -> Result<BTree> {
    let dyn_store: Arc<dyn PageStore> = store.clone();
    let tree = BTree::open(&dyn_store, BTreeOptions::default())?;
    for i in 0..count {
        tree.insert(format!("key{i:04}").as_bytes(), &[b'v'; 300])?;
    }
    Ok(tree)
}

#[test]
fn failed_allocation_rolls_back_every_page() -> Result<()> {
    let store = FlakyStore::new();
    let tree = filled_tree(&store, 200)?;
    let root = tree.root_page();
    let live = store.inner.live_pages();
    let pages_before = store.inner.page_ids();

    // Splitting the target leaf and rewriting the root takes at least three allocations.
    for budget in 0..3 {
        store.allow_allocations(budget);
        let err = tree.insert(b"key0100x", &[b'n'; 3000]).unwrap_err();
        assert!(matches!(err, TreeError::Storage(_)), "budget {budget}: {err}");
        assert_eq!(tree.root_page(), root);
        assert_eq!(store.inner.live_pages(), live);
        assert_eq!(store.inner.page_ids(), pages_before);
    }

    store.allow_allocations(usize::MAX);
    assert_eq!(tree.search(b"key0100x")?, None);
    assert_eq!(tree.search(b"key0100")?, Some(vec![b'v'; 300]));
    tree.insert(b"key0100x", &[b'n'; 3000])?;
    assert_eq!(tree.search(b"key0100x")?, Some(vec![b'n'; 3000]));
    Ok(())
}

#[test]
fn failed_delete_leaves_key_in_place() -> Result<()> {
    let store = FlakyStore::new();
    let tree = filled_tree(&store, 120)?;
    let root = tree.root_page();
    let live = store.inner.live_pages();

    store.allow_allocations(0);
    assert!(tree.delete(b"key0050").is_err());
    assert_eq!(tree.root_page(), root);
    assert_eq!(store.inner.live_pages(), live);
    assert!(tree.contains_key(b"key0050")?);

    // Absent keys never reach the store.
    assert!(!tree.delete(b"missing")?);

    store.allow_allocations(usize::MAX);
    assert!(tree.delete(b"key0050")?);
    assert!(!tree.contains_key(b"key0050")?);
    Ok(())
}

#[test]
fn release_failure_after_install_is_reported() -> Result<()> {
    let store = FlakyStore::new();
    let tree = filled_tree(&store, 10)?;
    let root = tree.root_page();

    store.fail_releases.store(true, Ordering::SeqCst);
    let err = tree.insert(b"late", b"write").unwrap_err();
    assert!(matches!(err, TreeError::Storage(_)));
    assert_ne!(tree.root_page(), root);
    assert_eq!(tree.search(b"late")?, Some(b"write".to_vec()));
    assert!(store.inner.contains(root));
    Ok(())
}
