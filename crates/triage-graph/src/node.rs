//! Graph node model

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// One file in the import graph
///
/// Paths are repo-relative and canonical; `imports` and `imported_by` only
/// reference files that exist in the same graph. Cycles are permitted —
/// traversal is always bounded by a visited set and a depth cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportNode {
    /// Repo-relative path of this file
    pub file: PathBuf,

    /// Files this file imports (forward edges)
    pub imports: BTreeSet<PathBuf>,

    /// Files that import this file (reverse edges, derived second pass)
    pub imported_by: BTreeSet<PathBuf>,

    /// Hash of the file content at scan time
    pub content_hash: ContentHash,

    /// On-disk modification time at scan time (epoch millis)
    pub modified_ms: i64,
}

impl ImportNode {
    /// Create a node with no edges
    #[must_use]
    pub fn new(file: impl Into<PathBuf>, content_hash: ContentHash, modified_ms: i64) -> Self {
        Self {
            file: file.into(),
            imports: BTreeSet::new(),
            imported_by: BTreeSet::new(),
            content_hash,
            modified_ms,
        }
    }

    /// Fan-in (number of importers)
    #[inline]
    #[must_use]
    pub fn fan_in(&self) -> usize {
        self.imported_by.len()
    }

    /// Fan-out (number of imports)
    #[inline]
    #[must_use]
    pub fn fan_out(&self) -> usize {
        self.imports.len()
    }
}
