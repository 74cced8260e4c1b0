//! Run snapshots and change detection
//!
//! A [`RunSnapshot`] is a hashed summary of one run's outcome: status,
//! the failed-test name set, per-category tallies and the fixable count.
//! [`diff`] compares the current snapshot's hash against the previous
//! run's; identical hashes short-circuit to `unchanged` and suppress all
//! further detail.

use crate::status::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Schema version of the persisted snapshot document
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Errors from snapshot persistence
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Snapshot file could not be read or written
    #[error("snapshot io at {path}: {source}")]
    Io {
        /// Snapshot file path
        path: PathBuf,
        /// Underlying io error
        #[source]
        source: std::io::Error,
    },

    /// Snapshot file could not be decoded
    #[error("snapshot decode: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Per-category failure tally
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTally {
    /// Failures in this category
    pub count: usize,

    /// Of those, how many have an auto fix available
    pub fixable: usize,
}

/// Hashed summary of one test run's outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// Persisted document schema version
    pub schema_version: u32,

    /// Four-code status
    pub status: StatusCode,

    /// Tests executed
    pub total: usize,

    /// Names of failed tests
    pub failed_tests: BTreeSet<String>,

    /// Per-category tallies, category id → tally
    pub categories: BTreeMap<String, CategoryTally>,

    /// Failures with an auto fix available
    pub fixable_count: usize,

    /// Hash over the summary fields, used for change detection
    pub hash: String,

    /// Capture time (epoch millis)
    pub captured_at_ms: i64,
}

impl RunSnapshot {
    /// Capture a snapshot, deriving the status code and hash
    ///
    /// Status: no tests at all is `Blocked`; no failures is `Pass`;
    /// failures with at least one auto fix is `Fixable`; otherwise `Fail`.
    #[must_use]
    pub fn capture(
        total: usize,
        failed_tests: BTreeSet<String>,
        categories: BTreeMap<String, CategoryTally>,
        fixable_count: usize,
    ) -> Self {
        let status = if total == 0 {
            StatusCode::Blocked
        } else if failed_tests.is_empty() {
            StatusCode::Pass
        } else if fixable_count > 0 {
            StatusCode::Fixable
        } else {
            StatusCode::Fail
        };
        let hash = Self::compute_hash(status, total, &failed_tests, &categories, fixable_count);
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            status,
            total,
            failed_tests,
            categories,
            fixable_count,
            hash,
            captured_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Number of failed tests
    #[inline]
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failed_tests.len()
    }

    /// Hash over the summary fields (capture time excluded).
    fn compute_hash(
        status: StatusCode,
        total: usize,
        failed_tests: &BTreeSet<String>,
        categories: &BTreeMap<String, CategoryTally>,
        fixable_count: usize,
    ) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(status.as_str().as_bytes());
        hasher.update(&total.to_le_bytes());
        for name in failed_tests {
            hasher.update(name.as_bytes());
            hasher.update(b"\0");
        }
        for (category, tally) in categories {
            hasher.update(category.as_bytes());
            hasher.update(&tally.count.to_le_bytes());
            hasher.update(&tally.fixable.to_le_bytes());
        }
        hasher.update(&fixable_count.to_le_bytes());
        hex::encode(hasher.finalize().as_bytes())
    }
}

/// Field-by-field delta between two snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffReport {
    /// Identical hashes; every other field is empty
    pub unchanged: bool,

    /// Tests that failed previously and pass now
    pub fixed_tests: Vec<String>,

    /// Tests that fail now and did not before
    pub new_failures: Vec<String>,

    /// Per-category count deltas (current minus previous), zero omitted
    pub category_deltas: BTreeMap<String, i64>,

    /// Status transition, when the status changed
    pub status_transition: Option<(StatusCode, StatusCode)>,
}

impl DiffReport {
    /// The no-change report
    #[must_use]
    pub fn unchanged() -> Self {
        Self {
            unchanged: true,
            fixed_tests: Vec::new(),
            new_failures: Vec::new(),
            category_deltas: BTreeMap::new(),
            status_transition: None,
        }
    }
}

/// Diff the current snapshot against the previous run's
///
/// With no previous snapshot every current failure is new. An identical
/// hash yields [`DiffReport::unchanged`] and suppresses all detail.
#[must_use]
pub fn diff(current: &RunSnapshot, previous: Option<&RunSnapshot>) -> DiffReport {
    let Some(previous) = previous else {
        return DiffReport {
            unchanged: false,
            fixed_tests: Vec::new(),
            new_failures: current.failed_tests.iter().cloned().collect(),
            category_deltas: category_deltas(current, None),
            status_transition: None,
        };
    };

    if current.hash == previous.hash {
        return DiffReport::unchanged();
    }

    let fixed_tests: Vec<String> = previous
        .failed_tests
        .difference(&current.failed_tests)
        .cloned()
        .collect();
    let new_failures: Vec<String> = current
        .failed_tests
        .difference(&previous.failed_tests)
        .cloned()
        .collect();

    let status_transition = if current.status == previous.status {
        None
    } else {
        Some((previous.status, current.status))
    };

    DiffReport {
        unchanged: false,
        fixed_tests,
        new_failures,
        category_deltas: category_deltas(current, Some(previous)),
        status_transition,
    }
}

/// Current-minus-previous category counts with zero deltas omitted.
fn category_deltas(
    current: &RunSnapshot,
    previous: Option<&RunSnapshot>,
) -> BTreeMap<String, i64> {
    let mut deltas: BTreeMap<String, i64> = BTreeMap::new();
    for (category, tally) in &current.categories {
        *deltas.entry(category.clone()).or_insert(0) += tally.count as i64;
    }
    if let Some(previous) = previous {
        for (category, tally) in &previous.categories {
            *deltas.entry(category.clone()).or_insert(0) -= tally.count as i64;
        }
    }
    deltas.retain(|_, delta| *delta != 0);
    deltas
}

/// Persists the last run's snapshot
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Store backed by the given file
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store file path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the previous snapshot
    ///
    /// A missing, undecodable or schema-mismatched file is `None`.
    #[must_use]
    pub fn load(&self) -> Option<RunSnapshot> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<RunSnapshot>(&raw) {
            Ok(snapshot) if snapshot.schema_version == SNAPSHOT_SCHEMA_VERSION => Some(snapshot),
            Ok(snapshot) => {
                tracing::warn!(
                    cached = snapshot.schema_version,
                    expected = SNAPSHOT_SCHEMA_VERSION,
                    "discarding snapshot with wrong schema"
                );
                None
            }
            Err(err) => {
                tracing::warn!(%err, "discarding undecodable snapshot");
                None
            }
        }
    }

    /// Persist the snapshot, replacing the previous one
    ///
    /// # Errors
    /// Returns [`SnapshotError::Io`] when the file cannot be written
    pub fn store(&self, snapshot: &RunSnapshot) -> Result<(), SnapshotError> {
        let json = serde_json::to_string_pretty(snapshot)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SnapshotError::Io {
                path: self.path.clone(),
                source,
            })?;
        }
        std::fs::write(&self.path, json).map_err(|source| SnapshotError::Io {
            path: self.path.clone(),
            source,
        })
    }
}
