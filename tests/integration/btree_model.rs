#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Arc;

use pagetree::{verify_tree, BTree, BTreeOptions, MemPager, PageStore};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Insert(Vec<u8>, usize),
    Delete(Vec<u8>),
}

fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(b'a'..=b'f', 1..6)
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (key_strategy(), 0usize..1200).prop_map(|(k, len)| Op::Insert(k, len)),
        2 => key_strategy().prop_map(Op::Delete),
    ]
}

fn value_for(key: &[u8], len: usize) -> Vec<u8> {
    key.iter().copied().cycle().take(len).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]
    #[test]
    fn btree_matches_btreemap_random_ops(ops in prop::collection::vec(op_strategy(), 1..200)) {
        let pager = MemPager::shared();
        let store: Arc<dyn PageStore> = pager.clone();
        let tree = BTree::open(&store, BTreeOptions::default()).expect("open tree");
        let mut reference = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(key, len) => {
                    let value = value_for(&key, len);
                    tree.insert(&key, &value).expect("insert");
                    reference.insert(key, value);
                }
                Op::Delete(key) => {
                    let expected = reference.remove(&key).is_some();
                    let removed = tree.delete(&key).expect("delete");
                    prop_assert_eq!(removed, expected);
                }
            }
        }

        for (key, value) in &reference {
            prop_assert_eq!(tree.search(key).expect("search"), Some(value.clone()));
        }
        let mut seen = Vec::new();
        tree.for_each(|key, _| {
            seen.push(key.to_vec());
            Ok(())
        })
        .expect("for_each");
        prop_assert_eq!(seen, reference.keys().cloned().collect::<Vec<_>>());

        let report = verify_tree(&tree).expect("verify");
        prop_assert!(report.success, "{:?}", report.findings);
        prop_assert_eq!(report.counts.pages as usize, pager.live_pages());
        if reference.is_empty() {
            prop_assert!(tree.is_empty());
        }
    }
}
