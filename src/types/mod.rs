#![forbid(unsafe_code)]

//! Identifiers, errors and on-disk page constants shared by the tree and its stores.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a page handed out by a [`PageStore`](crate::primitives::pager::PageStore).
///
/// `PageId(0)` is the null page: an empty tree's root and every leaf pointer slot.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub u64);

impl PageId {
    /// The null page identifier.
    pub const NULL: PageId = PageId(0);

    /// Returns true for the null identifier.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PageId {
    fn from(value: u64) -> Self {
        PageId(value)
    }
}

impl From<PageId> for u64 {
    fn from(value: PageId) -> Self {
        value.0
    }
}

/// Errors surfaced by the tree and the page stores it drives.
#[derive(thiserror::Error, Debug)]
pub enum TreeError {
    /// I/O failure inside a storage collaborator.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// A page failed to decode (unknown kind tag, inconsistent layout).
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// The caller passed an argument the tree cannot accept.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Key longer than the configured maximum.
    #[error("key of {len} bytes exceeds the {max} byte limit")]
    KeyTooLarge {
        /// Length of the rejected key.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
    /// Value longer than the configured maximum.
    #[error("value of {len} bytes exceeds the {max} byte limit")]
    ValueTooLarge {
        /// Length of the rejected value.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
    /// The store holds no page under this identifier.
    #[error("page {0} not found")]
    PageNotFound(PageId),
    /// Any other failure reported by a storage collaborator.
    #[error("storage: {0}")]
    Storage(String),
    /// Options could not be parsed from TOML.
    #[error("failed to parse options: {0}")]
    ConfigParse(#[from] toml::de::Error),
    /// Options could not be rendered as TOML.
    #[error("failed to serialize options: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TreeError>;

pub mod page {
    //! Fixed page geometry shared by the codec, the tree and the stores.

    /// Size of every persisted page.
    pub const PAGE_SIZE: usize = 4096;
    /// `page_type:u16` + `nkeys:u16`.
    pub const HEADER_LEN: usize = 4;
    /// Width of one child pointer slot.
    pub const POINTER_LEN: usize = 8;
    /// Width of one offset slot.
    pub const OFFSET_LEN: usize = 2;
    /// `key_len:u16` + `value_len:u16` in front of every record.
    pub const RECORD_HEADER_LEN: usize = 4;
    /// Largest key the on-page format accepts.
    pub const MAX_KEY_SIZE: usize = 1000;
    /// Largest value the on-page format accepts.
    pub const MAX_VALUE_SIZE: usize = 3000;
    /// Capacity of a page under construction, before it is split.
    pub const SCRATCH_SIZE: usize = 2 * PAGE_SIZE;

    const _: () = {
        assert!(SCRATCH_SIZE <= u16::MAX as usize + 1, "offsets are 16 bits wide");
        assert!(
            HEADER_LEN + POINTER_LEN + OFFSET_LEN + RECORD_HEADER_LEN + MAX_KEY_SIZE + MAX_VALUE_SIZE
                <= PAGE_SIZE,
            "a single max-size record must fit in one page"
        );
        assert!(
            HEADER_LEN + 3 * (POINTER_LEN + OFFSET_LEN + RECORD_HEADER_LEN + MAX_KEY_SIZE)
                <= PAGE_SIZE,
            "a new root listing three max-size separators must fit in one page"
        );
    };
}
