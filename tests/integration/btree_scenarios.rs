#![allow(missing_docs)]

use std::sync::Arc;

use pagetree::{
    storage::btree::page::{BTreePageKind, Node},
    verify_tree, BTree, BTreeOptions, MemPager, PageStore, Result,
};

fn open() -> Result<(Arc<MemPager>, BTree)> {
    let pager = MemPager::shared();
    let store: Arc<dyn PageStore> = pager.clone();
    let tree = BTree::open(&store, BTreeOptions::default())?;
    Ok((pager, tree))
}

fn root_kind(pager: &MemPager, tree: &BTree) -> Result<BTreePageKind> {
    Node::parse(pager.read_page(tree.root_page())?)?.kind()
}

#[test]
fn single_insert_into_empty_tree() -> Result<()> {
    let (pager, tree) = open()?;
    tree.insert(b"first", b"value")?;
    let root = Node::parse(pager.read_page(tree.root_page())?)?;
    assert_eq!(root.kind()?, BTreePageKind::Leaf);
    assert_eq!(root.nkeys(), 2);
    assert_eq!(tree.search(b"first")?, Some(b"value".to_vec()));
    Ok(())
}

#[test]
fn unordered_inserts_traverse_in_order() -> Result<()> {
    let (_, tree) = open()?;
    for key in ["z", "a", "c", "b", "d"] {
        tree.insert(key.as_bytes(), b"value")?;
    }
    let mut keys = Vec::new();
    tree.for_each(|key, value| {
        assert_eq!(value, b"value");
        keys.push(String::from_utf8_lossy(key).into_owned());
        Ok(())
    })?;
    assert_eq!(keys, ["a", "b", "c", "d", "z"]);
    Ok(())
}

#[test]
fn fifty_half_kilobyte_values_grow_the_tree() -> Result<()> {
    let (pager, tree) = open()?;
    assert_eq!(tree.height()?, 0);
    for i in 0..50 {
        tree.insert(format!("key{i:03}").as_bytes(), &[i as u8; 500])?;
    }
    assert_eq!(root_kind(&pager, &tree)?, BTreePageKind::Internal);
    assert!(tree.height()? >= 2);
    for i in 0..50 {
        assert_eq!(
            tree.search(format!("key{i:03}").as_bytes())?,
            Some(vec![i as u8; 500])
        );
    }
    Ok(())
}

#[test]
fn delete_one_of_a_thousand() -> Result<()> {
    let (pager, tree) = open()?;
    for i in 0..1000 {
        let key = format!("key{i:03}");
        tree.insert(key.as_bytes(), key.to_uppercase().as_bytes())?;
    }
    assert!(tree.delete(b"key500")?);
    assert_eq!(tree.search(b"key500")?, None);
    for i in (0..1000).filter(|&i| i != 500) {
        let key = format!("key{i:03}");
        assert_eq!(
            tree.search(key.as_bytes())?,
            Some(key.to_uppercase().into_bytes())
        );
    }
    let report = verify_tree(&tree)?;
    assert!(report.success, "{:?}", report.findings);
    assert_eq!(report.counts.keys, 999);
    assert_eq!(report.counts.pages as usize, pager.live_pages());
    Ok(())
}

#[test]
fn empty_key_is_an_ordinary_key() -> Result<()> {
    let (pager, tree) = open()?;
    for i in 0..300 {
        tree.insert(format!("key{i:03}").as_bytes(), &[b'e'; 90])?;
    }
    assert_eq!(tree.search(b"")?, Some(Vec::new()));
    tree.insert(b"", b"empty")?;
    assert_eq!(tree.search(b"")?, Some(b"empty".to_vec()));

    assert!(tree.delete(b"")?);
    assert_eq!(tree.search(b"")?, None);
    assert!(!tree.delete(b"")?);
    assert_eq!(tree.search(b"key000")?, Some(vec![b'e'; 90]));
    let report = verify_tree(&tree)?;
    assert!(report.success, "{:?}", report.findings);
    assert_eq!(report.counts.keys, 300);
    assert_eq!(report.counts.pages as usize, pager.live_pages());
    Ok(())
}

#[test]
fn options_load_from_toml() -> Result<()> {
    let opts = BTreeOptions::from_toml_str(
        r#"
        max_key_size = 32
        merge_threshold = 512
        "#,
    )?;
    let store: Arc<dyn PageStore> = MemPager::shared();
    let tree = BTree::open(&store, opts)?;
    assert_eq!(tree.options().max_key_size, 32);
    assert!(tree.insert(&[b'k'; 33], b"").is_err());
    tree.insert(&[b'k'; 32], b"ok")?;
    Ok(())
}
