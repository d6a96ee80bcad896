use serde::{Deserialize, Serialize};

use crate::types::{
    page::{HEADER_LEN, MAX_KEY_SIZE, MAX_VALUE_SIZE, PAGE_SIZE},
    PageId, Result, TreeError,
};

/// Configuration knobs for the B-tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BTreeOptions {
    /// Longest key `insert` accepts (at most 1000).
    pub max_key_size: usize,
    /// Longest value `insert` accepts (at most 3000).
    pub max_value_size: usize,
    /// Pages at or below this many bytes look for a sibling to merge with after a delete.
    pub merge_threshold: usize,
    /// Root of an existing tree to reopen; `None` starts empty.
    pub root_page: Option<PageId>,
}

impl Default for BTreeOptions {
    fn default() -> Self {
        Self {
            max_key_size: MAX_KEY_SIZE,
            max_value_size: MAX_VALUE_SIZE,
            merge_threshold: PAGE_SIZE / 4,
            root_page: None,
        }
    }
}

impl BTreeOptions {
    /// Checks the limits against what the page format can hold.
    pub fn validate(&self) -> Result<()> {
        if self.max_key_size == 0 || self.max_key_size > MAX_KEY_SIZE {
            return Err(TreeError::Invalid("max_key_size must be within 1..=1000"));
        }
        if self.max_value_size > MAX_VALUE_SIZE {
            return Err(TreeError::Invalid("max_value_size must be at most 3000"));
        }
        // An emptied page is HEADER_LEN bytes and must always qualify for a merge.
        if self.merge_threshold < HEADER_LEN || self.merge_threshold > PAGE_SIZE / 2 {
            return Err(TreeError::Invalid(
                "merge_threshold must be between the header size and half a page",
            ));
        }
        Ok(())
    }

    /// Parses options from TOML; missing fields take their defaults.
    pub fn from_toml_str(src: &str) -> Result<Self> {
        let opts: Self = toml::from_str(src)?;
        opts.validate()?;
        Ok(opts)
    }

    /// Renders the options as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
