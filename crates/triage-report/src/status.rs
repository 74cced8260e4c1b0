//! Status compression
//!
//! Reduces a run to one of four codes and a pipe-delimited token stream
//! (`status:failed/total|category:count@fix|action`) sized for an
//! automated consumer that pays per byte.

use crate::snapshot::RunSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Four-code run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    /// Every test passed
    Pass,
    /// Failures with no auto fix available
    Fail,
    /// Failures, and at least one auto fix exists
    Fixable,
    /// No run data
    Blocked,
}

impl StatusCode {
    /// Stable identifier
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Fixable => "FIXABLE",
            Self::Blocked => "BLOCKED",
        }
    }
}

impl Display for StatusCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Next action implied by a snapshot
#[must_use]
pub const fn suggested_action(snapshot: &RunSnapshot) -> &'static str {
    match snapshot.status {
        StatusCode::Pass => "none",
        StatusCode::Fixable => "fix",
        StatusCode::Fail => "investigate",
        StatusCode::Blocked => "rerun",
    }
}

/// Compress a snapshot into the pipe-delimited token stream
///
/// Categories with zero failures are omitted; a fully passing run
/// compresses to just `PASS:0/<total>|none`.
#[must_use]
pub fn compress(snapshot: &RunSnapshot) -> String {
    let mut tokens = vec![format!(
        "{}:{}/{}",
        snapshot.status,
        snapshot.failed_count(),
        snapshot.total
    )];
    for (category, tally) in snapshot.categories.iter().filter(|(_, t)| t.count > 0) {
        tokens.push(format!("{category}:{}@{}", tally.count, tally.fixable));
    }
    tokens.push(suggested_action(snapshot).to_string());
    tokens.join("|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::CategoryTally;
    use pretty_assertions::assert_eq;
    use std::collections::{BTreeMap, BTreeSet};

    fn snapshot(
        total: usize,
        failed: &[&str],
        categories: &[(&str, usize, usize)],
        fixable: usize,
    ) -> RunSnapshot {
        RunSnapshot::capture(
            total,
            failed.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            categories
                .iter()
                .map(|(id, count, fix)| {
                    (
                        id.to_string(),
                        CategoryTally {
                            count: *count,
                            fixable: *fix,
                        },
                    )
                })
                .collect::<BTreeMap<_, _>>(),
            fixable,
        )
    }

    #[test]
    fn passing_run_compresses_to_one_token_pair() {
        let compressed = compress(&snapshot(120, &[], &[], 0));
        assert_eq!(compressed, "PASS:0/120|none");
    }

    #[test]
    fn fixable_run_lists_categories_with_fix_counts() {
        let compressed = compress(&snapshot(
            120,
            &["t1", "t2", "t3"],
            &[("browser_compat", 2, 2), ("timeout", 1, 0)],
            2,
        ));
        assert_eq!(compressed, "FIXABLE:3/120|browser_compat:2@2|timeout:1@0|fix");
    }

    #[test]
    fn failing_run_without_fixes_suggests_investigation() {
        let compressed = compress(&snapshot(50, &["t1"], &[("unknown", 1, 0)], 0));
        assert_eq!(compressed, "FAIL:1/50|unknown:1@0|investigate");
    }

    #[test]
    fn blocked_run_suggests_rerun() {
        let compressed = compress(&snapshot(0, &[], &[], 0));
        assert_eq!(compressed, "BLOCKED:0/0|rerun");
    }

    #[test]
    fn zero_count_categories_are_omitted() {
        let compressed = compress(&snapshot(10, &["t1"], &[("timeout", 1, 0), ("network", 0, 0)], 0));
        assert!(!compressed.contains("network"));
    }
}
