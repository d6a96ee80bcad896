//! Pure page-to-page rewrites.
//!
//! Every function here reads one or two existing pages and returns a freshly built
//! page; inputs are never modified. Outputs are built in scratch buffers that may hold
//! up to two pages of data, and [`split3`] brings an oversized result back under the
//! page size.

use smallvec::{smallvec, SmallVec};

use super::page::{BTreePageKind, Node};
use crate::types::{
    page::{HEADER_LEN, OFFSET_LEN, PAGE_SIZE, POINTER_LEN},
    PageId,
};

/// Pages produced by [`split3`].
pub type SplitPages = SmallVec<[Node; 3]>;

/// Largest `idx` with `key(idx) <= key`, or `None` when `key` sorts before every record.
///
/// Comparison is byte-lexicographic. When several records compare equal the first one
/// wins.
pub fn lookup_le<B: AsRef<[u8]>>(node: &Node<B>, key: &[u8]) -> Option<usize> {
    // First slot whose key is >= `key`.
    let (mut lo, mut hi) = (0usize, node.nkeys());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if node.key(mid) < key {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    if lo < node.nkeys() && node.key(lo) == key {
        Some(lo)
    } else {
        lo.checked_sub(1)
    }
}

/// Leaf with `(key, value)` inserted at `idx`; `key` must be absent.
pub fn leaf_insert<B: AsRef<[u8]>>(old: &Node<B>, idx: usize, key: &[u8], value: &[u8]) -> Node {
    let mut new = Node::scratch();
    new.set_header(BTreePageKind::Leaf, old.nkeys() + 1);
    new.append_range(old, 0, 0, idx);
    new.append_kv(idx, PageId::NULL, key, value);
    new.append_range(old, idx + 1, idx, old.nkeys() - idx);
    new
}

/// Leaf with record `idx` replaced by `(key, value)`.
pub fn leaf_update<B: AsRef<[u8]>>(old: &Node<B>, idx: usize, key: &[u8], value: &[u8]) -> Node {
    let mut new = Node::scratch();
    new.set_header(BTreePageKind::Leaf, old.nkeys());
    new.append_range(old, 0, 0, idx);
    new.append_kv(idx, PageId::NULL, key, value);
    new.append_range(old, idx + 1, idx + 1, old.nkeys() - idx - 1);
    new
}

/// Page of the same kind with record `idx` removed.
pub fn remove_record<B: AsRef<[u8]>>(old: &Node<B>, idx: usize) -> Node {
    let mut new = Node::scratch();
    new.set_header_like(old, old.nkeys() - 1);
    new.append_range(old, 0, 0, idx);
    new.append_range(old, idx, idx + 1, old.nkeys() - idx - 1);
    new
}

/// Internal page with the link at `idx` replaced by `kids` (one to three links).
pub fn replace_children<B: AsRef<[u8]>>(old: &Node<B>, idx: usize, kids: &[(PageId, &[u8])]) -> Node {
    let inc = kids.len();
    let mut new = Node::scratch();
    new.set_header(BTreePageKind::Internal, old.nkeys() + inc - 1);
    new.append_range(old, 0, 0, idx);
    for (i, (ptr, key)) in kids.iter().enumerate() {
        new.append_kv(idx + i, *ptr, key, &[]);
    }
    new.append_range(old, idx + inc, idx + 1, old.nkeys() - (idx + 1));
    new
}

/// Internal page with the two links at `idx` and `idx + 1` replaced by one.
pub fn replace_two_children<B: AsRef<[u8]>>(old: &Node<B>, idx: usize, ptr: PageId, key: &[u8]) -> Node {
    let mut new = Node::scratch();
    new.set_header(BTreePageKind::Internal, old.nkeys() - 1);
    new.append_range(old, 0, 0, idx);
    new.append_kv(idx, ptr, key, &[]);
    new.append_range(old, idx + 1, idx + 2, old.nkeys() - (idx + 2));
    new
}

/// Concatenates two sibling pages.
///
/// Callers must check that `left.nbytes() + right.nbytes() - HEADER_LEN <= PAGE_SIZE`.
pub fn merge<L: AsRef<[u8]>, R: AsRef<[u8]>>(left: &Node<L>, right: &Node<R>) -> Node {
    assert!(
        left.nbytes() + right.nbytes() - HEADER_LEN <= PAGE_SIZE,
        "merged page would exceed the page size"
    );
    let mut new = Node::page();
    new.set_header_like(left, left.nkeys() + right.nkeys());
    new.append_range(left, 0, 0, left.nkeys());
    new.append_range(right, left.nkeys(), 0, right.nkeys());
    new
}

/// Size a page would have if it held the first `n` records of `node`.
fn prefix_bytes<B: AsRef<[u8]>>(node: &Node<B>, n: usize) -> usize {
    HEADER_LEN + (POINTER_LEN + OFFSET_LEN) * n + node.offset(n)
}

/// Splits `old` into a left and a right page.
///
/// The right page always fits in one page. The left one fits whenever `old` holds at
/// most two pages of data; [`split3`] handles the remaining case.
pub fn split2<B: AsRef<[u8]>>(old: &Node<B>) -> (Node, Node) {
    let nkeys = old.nkeys();
    assert!(nkeys >= 2, "cannot split a page with fewer than two records");
    let mut nleft = nkeys / 2;
    while nleft > 1 && prefix_bytes(old, nleft) > PAGE_SIZE {
        nleft -= 1;
    }
    let right_bytes = |nleft: usize| old.nbytes() - prefix_bytes(old, nleft) + HEADER_LEN;
    while nleft < nkeys - 1 && right_bytes(nleft) > PAGE_SIZE {
        nleft += 1;
    }
    let nright = nkeys - nleft;

    let mut left = Node::scratch();
    let mut right = Node::scratch();
    left.set_header_like(old, nleft);
    right.set_header_like(old, nright);
    left.append_range(old, 0, 0, nleft);
    right.append_range(old, 0, nleft, nright);
    debug_assert!(right.nbytes() <= PAGE_SIZE);
    (left, right)
}

/// Brings a possibly oversized page back under the page size.
///
/// Returns `old` untouched when it already fits, otherwise two or three pages that
/// together hold exactly the records of `old`, in order.
pub fn split3(old: Node) -> SplitPages {
    if old.nbytes() <= PAGE_SIZE {
        return smallvec![old];
    }
    let (left, right) = split2(&old);
    if left.nbytes() <= PAGE_SIZE {
        return smallvec![left, right];
    }
    let (leftleft, middle) = split2(&left);
    debug_assert!(leftleft.nbytes() <= PAGE_SIZE);
    smallvec![leftleft, middle, right]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::page::{MAX_KEY_SIZE, MAX_VALUE_SIZE};

    fn leaf(records: &[(&[u8], &[u8])]) -> Node {
        let mut node = Node::scratch();
        node.set_header(BTreePageKind::Leaf, records.len());
        for (idx, (key, value)) in records.iter().enumerate() {
            node.append_kv(idx, PageId::NULL, key, value);
        }
        node
    }

    fn keys_of<B: AsRef<[u8]>>(node: &Node<B>) -> Vec<Vec<u8>> {
        node.keys().map(<[u8]>::to_vec).collect()
    }

    /// Leaf whose records are `key{i:04}` with `value_len` byte values.
    fn sized_leaf(count: usize, value_len: usize) -> Node {
        let value = vec![b'x'; value_len];
        let mut node = Node::scratch();
        node.set_header(BTreePageKind::Leaf, count);
        for idx in 0..count {
            let key = format!("key{idx:04}");
            node.append_kv(idx, PageId::NULL, key.as_bytes(), &value);
        }
        node
    }

    #[test]
    fn append_then_read_back() {
        let node = leaf(&[(b"", b""), (b"a", b"1"), (b"bb", b"22")]);
        assert_eq!(node.nkeys(), 3);
        assert_eq!(node.key(0), b"");
        assert_eq!(node.value(1), b"1");
        assert_eq!(node.key(2), b"bb");
        assert_eq!(node.value(2), b"22");
    }

    #[test]
    fn lookup_le_finds_floor() {
        let node = leaf(&[(b"b", b""), (b"d", b""), (b"f", b"")]);
        assert_eq!(lookup_le(&node, b"a"), None);
        assert_eq!(lookup_le(&node, b"b"), Some(0));
        assert_eq!(lookup_le(&node, b"c"), Some(0));
        assert_eq!(lookup_le(&node, b"d"), Some(1));
        assert_eq!(lookup_le(&node, b"e"), Some(1));
        assert_eq!(lookup_le(&node, b"zzz"), Some(2));
        assert_eq!(lookup_le(&Node::empty(BTreePageKind::Leaf), b"a"), None);
    }

    #[test]
    fn lookup_le_prefers_first_duplicate() {
        let node = leaf(&[(b"a", b"0"), (b"k", b"1"), (b"k", b"2"), (b"k", b"3")]);
        assert_eq!(lookup_le(&node, b"k"), Some(1));
        assert_eq!(lookup_le(&node, b"l"), Some(3));
    }

    #[test]
    fn sentinel_is_below_every_key() {
        let node = leaf(&[(b"", b""), (b"m", b"")]);
        assert_eq!(lookup_le(&node, b"\x00"), Some(0));
        assert_eq!(lookup_le(&node, b""), Some(0));
    }

    #[test]
    fn leaf_insert_places_record_in_the_middle() {
        let old = leaf(&[(b"a", b"1"), (b"c", b"3")]);
        let new = leaf_insert(&old, 1, b"b", b"2");
        assert_eq!(keys_of(&new), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(new.value(1), b"2");
        assert_eq!(new.value(2), b"3");
        assert_eq!(keys_of(&old), vec![b"a".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn leaf_insert_at_both_ends() {
        let old = leaf(&[(b"m", b"1")]);
        let front = leaf_insert(&old, 0, b"a", b"0");
        let back = leaf_insert(&old, 1, b"z", b"2");
        assert_eq!(keys_of(&front), vec![b"a".to_vec(), b"m".to_vec()]);
        assert_eq!(keys_of(&back), vec![b"m".to_vec(), b"z".to_vec()]);
    }

    #[test]
    fn leaf_update_keeps_the_record_count() {
        let old = leaf(&[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")]);
        let new = leaf_update(&old, 1, b"b", b"a much longer value");
        assert_eq!(new.nkeys(), 3);
        assert_eq!(new.value(1), b"a much longer value");
        assert_eq!(new.value(2), b"3");
        assert!(new.nbytes() > old.nbytes());
    }

    #[test]
    fn remove_record_splices() {
        let old = leaf(&[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")]);
        let new = remove_record(&old, 1);
        assert_eq!(new.kind().ok(), Some(BTreePageKind::Leaf));
        assert_eq!(keys_of(&new), vec![b"a".to_vec(), b"c".to_vec()]);
        assert_eq!(new.value(1), b"3");
        let emptied = remove_record(&remove_record(&new, 0), 0);
        assert_eq!(emptied.nkeys(), 0);
        assert_eq!(emptied.nbytes(), HEADER_LEN);
    }

    #[test]
    fn replace_children_expands_one_link() {
        let mut parent = Node::page();
        parent.set_header(BTreePageKind::Internal, 3);
        parent.append_kv(0, PageId(1), b"", b"");
        parent.append_kv(1, PageId(2), b"g", b"");
        parent.append_kv(2, PageId(3), b"p", b"");

        let new = replace_children(
            &parent,
            1,
            &[(PageId(10), b"g"), (PageId(11), b"j"), (PageId(12), b"m")],
        );
        assert_eq!(new.kind().ok(), Some(BTreePageKind::Internal));
        assert_eq!(new.nkeys(), 5);
        let ptrs: Vec<PageId> = (0..new.nkeys()).map(|i| new.ptr(i)).collect();
        assert_eq!(ptrs, vec![PageId(1), PageId(10), PageId(11), PageId(12), PageId(3)]);
        assert_eq!(new.key(3), b"m");
        assert_eq!(new.key(4), b"p");

        let collapsed = replace_two_children(&new, 1, PageId(20), b"g");
        let ptrs: Vec<PageId> = (0..collapsed.nkeys()).map(|i| collapsed.ptr(i)).collect();
        assert_eq!(ptrs, vec![PageId(1), PageId(20), PageId(12), PageId(3)]);
    }

    #[test]
    fn merge_concatenates_siblings() {
        let left = leaf(&[(b"a", b"1"), (b"b", b"2")]);
        let right = leaf(&[(b"c", b"3")]);
        let merged = merge(&left, &right);
        assert_eq!(merged.nkeys(), 3);
        assert_eq!(merged.nbytes(), left.nbytes() + right.nbytes() - HEADER_LEN);
        assert_eq!(merged.value(2), b"3");
    }

    #[test]
    #[should_panic(expected = "exceed the page size")]
    fn merge_rejects_oversized_pairs() {
        let left = sized_leaf(3, 1000);
        let right = sized_leaf(2, 1000);
        merge(&left, &right);
    }

    #[test]
    fn split3_leaves_small_pages_alone() {
        let node = sized_leaf(4, 100);
        let before = node.nbytes();
        let pages = split3(node);
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].nbytes(), before);
    }

    #[test]
    fn split2_produces_two_fitting_pages() {
        let node = sized_leaf(12, 500);
        assert!(node.nbytes() > PAGE_SIZE);
        let (left, right) = split2(&node);
        assert!(left.nbytes() <= PAGE_SIZE);
        assert!(right.nbytes() <= PAGE_SIZE);
        assert_eq!(left.nkeys() + right.nkeys(), 12);
        assert_eq!(left.key(left.nkeys() - 1), b"key0005");
        assert_eq!(right.key(0), b"key0006");
    }

    #[test]
    fn split3_needs_three_pages_when_a_large_record_lands_between_two() {
        let old = leaf(&[(b"a", &[b'v'; 1490]), (b"c", &[b'v'; 2490])]);
        assert!(old.nbytes() <= PAGE_SIZE);
        let grown = leaf_insert(&old, 1, b"b", &[b'v'; 2990]);
        let total = grown.nkeys();
        let pages = split3(grown);
        assert_eq!(pages.len(), 3);
        assert!(pages.iter().all(|p| p.nbytes() <= PAGE_SIZE));
        assert_eq!(pages.iter().map(|p| p.nkeys()).sum::<usize>(), total);
        let flattened: Vec<Vec<u8>> = pages.iter().flat_map(|p| keys_of(p)).collect();
        assert_eq!(flattened, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn split_handles_two_max_size_records() {
        let key = vec![b'k'; MAX_KEY_SIZE];
        let mut other = key.clone();
        other.push(b'2');
        let value = vec![b'v'; MAX_VALUE_SIZE];
        let node = leaf(&[(&key, &value), (&other, &value)]);
        let pages = split3(node);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].nkeys(), 1);
        assert_eq!(pages[1].key(0), other.as_slice());
    }
}
