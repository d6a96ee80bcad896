use serde::Serialize;

use super::page::{BTreePageKind, Node};
use super::tree::BTree;
use crate::primitives::pager::{PageRef, PageStore};
use crate::types::{page::PAGE_SIZE, PageId, Result, TreeError};

const MAX_FINDINGS: usize = 32;

/// Severity of a verification finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Page that is legal but would normally have been merged.
    Warning,
    /// Structural violation; the tree cannot be trusted.
    Error,
}

/// Represents a single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// Page the finding is about.
    pub page: PageId,
    /// Human-readable description of the issue.
    pub message: String,
}

/// Totals gathered while walking the tree.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct VerifyCounts {
    /// Pages visited.
    pub pages: u64,
    /// Leaf pages visited.
    pub leaf_pages: u64,
    /// Internal pages visited.
    pub internal_pages: u64,
    /// User records, sentinel excluded.
    pub keys: u64,
    /// Levels from the root to the leaves.
    pub depth: u64,
    /// Error findings raised, stored or not.
    pub errors: u64,
    /// Warning findings raised, stored or not.
    pub warnings: u64,
}

/// Result of [`verify_tree`].
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// Root the walk started from.
    pub root: PageId,
    /// True when no error-level finding was recorded.
    pub success: bool,
    /// Up to 32 findings, in walk order. Errors displace warnings once the list is full.
    pub findings: Vec<VerifyFinding>,
    /// Findings raised but not stored in `findings`.
    pub dropped_findings: u64,
    /// Totals gathered during the walk.
    pub counts: VerifyCounts,
}

impl VerifyReport {
    /// Findings of error severity.
    pub fn errors(&self) -> impl Iterator<Item = &VerifyFinding> {
        self.findings
            .iter()
            .filter(|f| f.severity == VerifySeverity::Error)
    }
}

/// Walks every page reachable from the root of `tree` and checks its structure.
///
/// Checked per page: the layout decodes, the page fits, keys are strictly ascending,
/// leaf pointers are null and internal pointers are not, and no page other than the
/// root is empty. Across pages: every separator equals its child's first key, keys
/// ascend from one leaf to the next, all leaves sit at the same depth, and the empty
/// key appears nowhere but the leftmost page of a level. Pages at or below the merge
/// threshold are reported as warnings.
///
/// The whole tree is always walked; only the stored findings are capped, and the
/// counts cover every finding. Problems with the tree are reported as findings.
/// Errors from the store other than a missing page are returned.
pub fn verify_tree(tree: &BTree) -> Result<VerifyReport> {
    let root = tree.root_page();
    let mut walk = Walk {
        tree,
        findings: Vec::new(),
        dropped: 0,
        counts: VerifyCounts::default(),
        leaf_depth: None,
        last_key: None,
    };
    if !root.is_null() {
        walk.visit(root, 1, None, true, true)?;
    }
    let counts = walk.counts;
    let counts = VerifyCounts {
        depth: walk.leaf_depth.unwrap_or(0),
        ..counts
    };
    let success = counts.errors == 0;
    tracing::debug!(
        target: "pagetree::verify",
        root = root.0,
        success,
        pages = counts.pages,
        errors = counts.errors,
        warnings = counts.warnings,
        "verified btree"
    );
    Ok(VerifyReport {
        root,
        success,
        findings: walk.findings,
        dropped_findings: walk.dropped,
        counts,
    })
}

struct Walk<'t> {
    tree: &'t BTree,
    findings: Vec<VerifyFinding>,
    dropped: u64,
    counts: VerifyCounts,
    leaf_depth: Option<u64>,
    last_key: Option<Vec<u8>>,
}

impl Walk<'_> {
    fn push(&mut self, severity: VerifySeverity, page: PageId, message: impl Into<String>) {
        match severity {
            VerifySeverity::Error => self.counts.errors += 1,
            VerifySeverity::Warning => self.counts.warnings += 1,
        }
        if self.findings.len() >= MAX_FINDINGS {
            let displaced = match severity {
                VerifySeverity::Error => self
                    .findings
                    .iter()
                    .rposition(|f| f.severity == VerifySeverity::Warning),
                VerifySeverity::Warning => None,
            };
            self.dropped += 1;
            match displaced {
                Some(pos) => {
                    self.findings.remove(pos);
                }
                None => return,
            }
        }
        self.findings.push(VerifyFinding {
            severity,
            page,
            message: message.into(),
        });
    }

    fn error(&mut self, page: PageId, message: impl Into<String>) {
        self.push(VerifySeverity::Error, page, message);
    }

    fn load(&mut self, id: PageId) -> Result<Option<Node<PageRef>>> {
        let bytes = match self.tree.store().read_page(id) {
            Ok(bytes) => bytes,
            Err(TreeError::PageNotFound(_)) => {
                self.error(id, "page referenced by the tree is missing");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        match Node::parse(bytes) {
            Ok(node) => Ok(Some(node)),
            Err(TreeError::Corruption(msg)) => {
                self.error(id, format!("page does not decode: {msg}"));
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn visit(
        &mut self,
        id: PageId,
        depth: u64,
        separator: Option<&[u8]>,
        leftmost: bool,
        is_root: bool,
    ) -> Result<()> {
        let Some(node) = self.load(id)? else {
            return Ok(());
        };
        self.counts.pages += 1;
        let kind = match node.kind() {
            Ok(kind) => kind,
            Err(_) => {
                self.error(id, "unknown page kind");
                return Ok(());
            }
        };
        self.check_page(id, &node, kind, separator, leftmost, is_root);

        match kind {
            BTreePageKind::Leaf => {
                self.counts.leaf_pages += 1;
                match self.leaf_depth {
                    None => self.leaf_depth = Some(depth),
                    Some(expected) if expected != depth => {
                        self.error(id, format!("leaf at depth {depth}, expected {expected}"));
                    }
                    Some(_) => {}
                }
                for idx in 0..node.nkeys() {
                    let key = node.key(idx);
                    if key.is_empty() && node.value(idx).is_empty() {
                        continue;
                    }
                    self.counts.keys += 1;
                    let ascending = self.last_key.as_deref().map_or(true, |prev| prev < key);
                    if !ascending {
                        self.error(id, "keys do not ascend across leaves");
                    }
                    self.last_key = Some(key.to_vec());
                }
            }
            BTreePageKind::Internal => {
                self.counts.internal_pages += 1;
                for idx in 0..node.nkeys() {
                    let child = node.ptr(idx);
                    if child.is_null() {
                        continue;
                    }
                    self.visit(child, depth + 1, Some(node.key(idx)), leftmost && idx == 0, false)?;
                }
            }
        }
        Ok(())
    }

    fn check_page(
        &mut self,
        id: PageId,
        node: &Node<PageRef>,
        kind: BTreePageKind,
        separator: Option<&[u8]>,
        leftmost: bool,
        is_root: bool,
    ) {
        let nkeys = node.nkeys();
        if node.nbytes() > PAGE_SIZE {
            self.error(id, format!("page uses {} bytes", node.nbytes()));
        }
        if nkeys == 0 {
            if !is_root {
                self.error(id, "non-root page holds no records");
            }
            return;
        }
        for idx in 1..nkeys {
            if node.key(idx - 1) >= node.key(idx) {
                self.error(id, format!("keys not strictly ascending at slot {idx}"));
                break;
            }
        }
        for idx in 0..nkeys {
            let ptr = node.ptr(idx);
            match kind {
                BTreePageKind::Leaf if !ptr.is_null() => {
                    self.error(id, format!("leaf slot {idx} carries a child pointer"));
                    break;
                }
                BTreePageKind::Internal if ptr.is_null() => {
                    self.error(id, format!("internal slot {idx} has a null child pointer"));
                    break;
                }
                _ => {}
            }
        }
        let first = node.key(0);
        if !leftmost && first.is_empty() {
            self.error(id, "empty key outside the leftmost page of its level");
        }
        if let Some(separator) = separator {
            if separator != first {
                self.error(id, "separator in parent differs from first key");
            }
        }
        if !is_root && node.nbytes() <= self.tree.options().merge_threshold {
            self.push(
                VerifySeverity::Warning,
                id,
                format!("page holds {} bytes, at or below the merge threshold", node.nbytes()),
            );
        }
    }
}
