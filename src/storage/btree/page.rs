use crate::types::{
    page::{
        HEADER_LEN, OFFSET_LEN, PAGE_SIZE, POINTER_LEN, RECORD_HEADER_LEN, SCRATCH_SIZE,
    },
    PageId, Result, TreeError,
};

const KIND_OFFSET: usize = 0;
const NKEYS_OFFSET: usize = 2;

/// Logical kind for a B-tree page, stored in the first two bytes.
#[repr(u16)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BTreePageKind {
    /// Separator keys with child pointers.
    Internal = 1,
    /// Key-value records.
    Leaf = 2,
}

impl BTreePageKind {
    /// Converts the on-page tag to a kind.
    pub fn from_u16(value: u16) -> Result<Self> {
        match value {
            1 => Ok(Self::Internal),
            2 => Ok(Self::Leaf),
            _ => Err(TreeError::Corruption("unknown btree page kind")),
        }
    }

    /// The on-page tag.
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Typed view over a page buffer.
///
/// Layout (little-endian):
///
/// ```text
/// | kind | nkeys | pointers   | offsets    | key-values                     |
/// | 2B   | 2B    | nkeys × 8B | nkeys × 2B | klen:2 vlen:2 key value ...    |
/// ```
///
/// `offsets[i]` holds the end of record `i` relative to the start of the key-value
/// region. The start of record 0 is implicit, so `offset(0)` is always 0 and only
/// `offset(1..=nkeys)` is stored.
///
/// Reads work over any `AsRef<[u8]>` buffer (a shared [`PageRef`] from a store, or a
/// scratch `Vec<u8>`); writes need `AsMut<[u8]>` and are only used while a fresh page
/// is being built.
///
/// [`PageRef`]: crate::primitives::pager::PageRef
#[derive(Clone, Debug)]
pub struct Node<B = Vec<u8>> {
    buf: B,
}

impl Node<Vec<u8>> {
    /// Zeroed buffer large enough for a page that may temporarily hold two pages of data.
    pub fn scratch() -> Self {
        Self {
            buf: vec![0u8; SCRATCH_SIZE],
        }
    }

    /// Zeroed buffer of exactly one page.
    pub fn page() -> Self {
        Self {
            buf: vec![0u8; PAGE_SIZE],
        }
    }

    /// Empty page of `kind` with no records.
    pub fn empty(kind: BTreePageKind) -> Self {
        let mut node = Self::page();
        node.set_header(kind, 0);
        node
    }

    /// Returns the page-sized buffer to hand to a store.
    ///
    /// The caller must already have checked `nbytes() <= PAGE_SIZE`.
    pub fn into_page_bytes(mut self) -> Vec<u8> {
        debug_assert!(self.nbytes() <= PAGE_SIZE);
        self.buf.resize(PAGE_SIZE, 0);
        self.buf
    }
}

impl<B: AsRef<[u8]>> Node<B> {
    /// Wraps `buf` without validating it.
    pub fn new(buf: B) -> Self {
        Self { buf }
    }

    /// Wraps `buf`, checking that the header, offsets and record lengths are coherent.
    pub fn parse(buf: B) -> Result<Self> {
        let node = Self { buf };
        node.check_layout()?;
        Ok(node)
    }

    /// Underlying bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_ref()
    }

    /// Raw kind tag, without validation.
    pub fn raw_kind(&self) -> u16 {
        read_u16(self.as_bytes(), KIND_OFFSET)
    }

    /// Decoded kind tag.
    pub fn kind(&self) -> Result<BTreePageKind> {
        BTreePageKind::from_u16(self.raw_kind())
    }

    /// Number of records.
    pub fn nkeys(&self) -> usize {
        read_u16(self.as_bytes(), NKEYS_OFFSET) as usize
    }

    /// Child pointer of record `idx`; `PageId::NULL` on leaves.
    pub fn ptr(&self, idx: usize) -> PageId {
        assert!(idx < self.nkeys(), "pointer index {idx} out of range");
        let pos = HEADER_LEN + POINTER_LEN * idx;
        PageId(u64::from_le_bytes(
            self.as_bytes()[pos..pos + POINTER_LEN]
                .try_into()
                .expect("pointer slot is 8 bytes"),
        ))
    }

    /// End of record `idx - 1` relative to the key-value region; 0 for `idx == 0`.
    pub fn offset(&self, idx: usize) -> usize {
        if idx == 0 {
            return 0;
        }
        assert!(idx <= self.nkeys(), "offset index {idx} out of range");
        read_u16(self.as_bytes(), self.offset_pos(idx)) as usize
    }

    /// Absolute position of record `idx`; `kv_pos(nkeys())` is the end of the last record.
    pub fn kv_pos(&self, idx: usize) -> usize {
        assert!(idx <= self.nkeys(), "record index {idx} out of range");
        self.kv_region_start() + self.offset(idx)
    }

    /// Key of record `idx`, borrowed from the page.
    pub fn key(&self, idx: usize) -> &[u8] {
        assert!(idx < self.nkeys(), "key index {idx} out of range");
        let pos = self.kv_pos(idx);
        let buf = self.as_bytes();
        let klen = read_u16(buf, pos) as usize;
        let start = pos + RECORD_HEADER_LEN;
        &buf[start..start + klen]
    }

    /// Value of record `idx`, borrowed from the page.
    pub fn value(&self, idx: usize) -> &[u8] {
        assert!(idx < self.nkeys(), "value index {idx} out of range");
        let pos = self.kv_pos(idx);
        let buf = self.as_bytes();
        let klen = read_u16(buf, pos) as usize;
        let vlen = read_u16(buf, pos + 2) as usize;
        let start = pos + RECORD_HEADER_LEN + klen;
        &buf[start..start + vlen]
    }

    /// Bytes in use, header included.
    pub fn nbytes(&self) -> usize {
        self.kv_pos(self.nkeys())
    }

    /// Iterates over the keys in slot order.
    pub fn keys(&self) -> impl Iterator<Item = &[u8]> + '_ {
        (0..self.nkeys()).map(move |idx| self.key(idx))
    }

    fn kv_region_start(&self) -> usize {
        HEADER_LEN + (POINTER_LEN + OFFSET_LEN) * self.nkeys()
    }

    fn offset_pos(&self, idx: usize) -> usize {
        HEADER_LEN + POINTER_LEN * self.nkeys() + OFFSET_LEN * (idx - 1)
    }

    fn check_layout(&self) -> Result<()> {
        let buf = self.as_bytes();
        if buf.len() < HEADER_LEN {
            return Err(TreeError::Corruption("page shorter than header"));
        }
        self.kind()?;
        let nkeys = self.nkeys();
        let region = self.kv_region_start();
        if region > buf.len() {
            return Err(TreeError::Corruption("pointer and offset arrays exceed page"));
        }
        let mut prev = 0usize;
        for idx in 0..nkeys {
            let start = region + prev;
            if start + RECORD_HEADER_LEN > buf.len() {
                return Err(TreeError::Corruption("record header beyond page"));
            }
            let klen = read_u16(buf, start) as usize;
            let vlen = read_u16(buf, start + 2) as usize;
            let end = read_u16(buf, self.offset_pos(idx + 1)) as usize;
            if end != prev + RECORD_HEADER_LEN + klen + vlen {
                return Err(TreeError::Corruption("record offset disagrees with lengths"));
            }
            if region + end > buf.len() {
                return Err(TreeError::Corruption("record extends beyond page"));
            }
            prev = end;
        }
        Ok(())
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Node<B> {
    /// Writes the kind and record count. Only used on pages under construction.
    pub fn set_header(&mut self, kind: BTreePageKind, nkeys: usize) {
        let nkeys = u16::try_from(nkeys).expect("record count fits in u16");
        let buf = self.buf.as_mut();
        write_u16(buf, KIND_OFFSET, kind.as_u16());
        write_u16(buf, NKEYS_OFFSET, nkeys);
    }

    /// Copies the kind tag of `src` verbatim and sets the record count.
    pub(crate) fn set_header_like<S: AsRef<[u8]>>(&mut self, src: &Node<S>, nkeys: usize) {
        let nkeys = u16::try_from(nkeys).expect("record count fits in u16");
        let kind = src.raw_kind();
        let buf = self.buf.as_mut();
        write_u16(buf, KIND_OFFSET, kind);
        write_u16(buf, NKEYS_OFFSET, nkeys);
    }

    /// Sets the child pointer of record `idx`.
    pub fn set_ptr(&mut self, idx: usize, ptr: PageId) {
        assert!(idx < self.nkeys(), "pointer index {idx} out of range");
        let pos = HEADER_LEN + POINTER_LEN * idx;
        self.buf.as_mut()[pos..pos + POINTER_LEN].copy_from_slice(&ptr.0.to_le_bytes());
    }

    /// Sets the end offset stored for `idx`; writes to `idx == 0` are ignored.
    pub fn set_offset(&mut self, idx: usize, value: usize) {
        if idx == 0 {
            return;
        }
        assert!(idx <= self.nkeys(), "offset index {idx} out of range");
        let value = u16::try_from(value).expect("record offset fits in u16");
        let pos = self.offset_pos(idx);
        write_u16(self.buf.as_mut(), pos, value);
    }

    /// Writes record `idx` right after record `idx - 1`.
    ///
    /// Records must be appended in increasing `idx` order starting at 0, since the
    /// position of each record comes from the offset the previous append stored.
    pub fn append_kv(&mut self, idx: usize, ptr: PageId, key: &[u8], value: &[u8]) {
        self.set_ptr(idx, ptr);
        let pos = self.kv_pos(idx);
        let klen = u16::try_from(key.len()).expect("key length fits in u16");
        let vlen = u16::try_from(value.len()).expect("value length fits in u16");
        {
            let buf = self.buf.as_mut();
            write_u16(buf, pos, klen);
            write_u16(buf, pos + 2, vlen);
            let key_start = pos + RECORD_HEADER_LEN;
            buf[key_start..key_start + key.len()].copy_from_slice(key);
            let val_start = key_start + key.len();
            buf[val_start..val_start + value.len()].copy_from_slice(value);
        }
        let end = self.offset(idx) + RECORD_HEADER_LEN + key.len() + value.len();
        self.set_offset(idx + 1, end);
    }

    /// Copies `n` records from `src[src_start..]` into `self[dst_start..]`.
    pub fn append_range<S: AsRef<[u8]>>(
        &mut self,
        src: &Node<S>,
        dst_start: usize,
        src_start: usize,
        n: usize,
    ) {
        for i in 0..n {
            let (dst, from) = (dst_start + i, src_start + i);
            self.append_kv(dst, src.ptr(from), src.key(from), src.value(from));
        }
    }
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}
