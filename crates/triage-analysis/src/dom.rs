//! DOM-snapshot collaborator interface
//!
//! The synthesizer consults an external DOM-snapshot analyzer for
//! UI-category failures. It is a collaborator, not part of the core:
//! the pipeline degrades gracefully when none is installed.

/// Findings extracted from a rendered DOM snapshot
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DomFindings {
    /// Error-ish strings found in the snapshot
    pub issues: Vec<String>,

    /// Whether the page was in a visible error state
    pub has_error_state: bool,

    /// Text visible to the user at capture time
    pub visible_text: String,
}

/// External analyzer of captured DOM snapshots
pub trait DomSnapshotAnalyzer: Send + Sync {
    /// Findings for a test, or `None` when no snapshot exists
    fn analyze(&self, test_name: &str) -> Option<DomFindings>;
}

/// The absent collaborator: never has findings
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDomAnalyzer;

impl DomSnapshotAnalyzer for NoDomAnalyzer {
    fn analyze(&self, _test_name: &str) -> Option<DomFindings> {
        None
    }
}
