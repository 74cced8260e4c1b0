//! Test-harness input model
//!
//! [`TestResult`] is one entry of the harness result stream; [`TestError`]
//! carries the failure message plus a parsed stack. Both are immutable:
//! created once per failing test, consumed, never mutated.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One parsed stack frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Function or method name (`<anonymous>` when absent)
    pub function: String,

    /// Source file, when the frame names one
    pub file: Option<PathBuf>,

    /// 1-based line number
    pub line: Option<u32>,

    /// 1-based column number
    pub column: Option<u32>,
}

impl StackFrame {
    /// Parse a single frame line in the common `at fn (file:line:col)` shape.
    ///
    /// Also accepts the bare `at file:line:col` form. Returns `None` for
    /// lines that are not frames (the message line, blank lines).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let rest = trimmed.strip_prefix("at ")?;

        // `fn (file:line:col)` — location inside parentheses
        let (function, location) = match (rest.find('('), rest.rfind(')')) {
            (Some(open), Some(close)) if open < close => {
                (rest[..open].trim().to_string(), &rest[open + 1..close])
            }
            _ => (String::from("<anonymous>"), rest),
        };

        let (file, line, column) = split_location(location);
        Some(Self {
            function: if function.is_empty() {
                String::from("<anonymous>")
            } else {
                function
            },
            file,
            line,
            column,
        })
    }

    /// Whether this frame points into the project rather than runner plumbing
    #[must_use]
    pub fn is_project_frame(&self) -> bool {
        match &self.file {
            Some(file) => {
                let s = file.to_string_lossy();
                !s.contains("node_modules") && !s.starts_with("node:") && !s.starts_with("internal/")
            }
            None => false,
        }
    }
}

/// Split `file:line:col` into components, tolerating missing positions.
fn split_location(location: &str) -> (Option<PathBuf>, Option<u32>, Option<u32>) {
    let location = location.trim();
    if location.is_empty() || location == "<anonymous>" {
        return (None, None, None);
    }

    let mut parts: Vec<&str> = location.rsplitn(3, ':').collect();
    parts.reverse();
    match parts.as_slice() {
        [file, line, column] => {
            let line_no = line.parse::<u32>().ok();
            let col_no = column.parse::<u32>().ok();
            if line_no.is_some() {
                (Some(PathBuf::from(file)), line_no, col_no)
            } else {
                // Not positional, e.g. a windows drive letter confused the split
                (Some(PathBuf::from(location)), None, None)
            }
        }
        [file, line] => (Some(PathBuf::from(*file)), line.parse::<u32>().ok(), None),
        _ => (Some(PathBuf::from(location)), None, None),
    }
}

/// A failing test's error payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestError {
    /// Raw failure message
    pub message: String,

    /// Parsed stack frames, outermost first
    #[serde(default)]
    pub stack: Vec<StackFrame>,

    /// File the failure was attributed to by the harness, if any
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl TestError {
    /// Create an error with no stack
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: Vec::new(),
            file: None,
        }
    }

    /// Create an error from a message and a raw multi-line stack blob
    #[must_use]
    pub fn with_stack_text(message: impl Into<String>, stack_text: &str) -> Self {
        let stack = stack_text.lines().filter_map(StackFrame::parse).collect();
        Self {
            message: message.into(),
            stack,
            file: None,
        }
    }

    /// Attach the attributed file
    #[must_use]
    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Deepest stack frame that points into the project
    ///
    /// Frames are outermost-first, so this is the last project frame —
    /// the closest one to the actual failure site.
    #[must_use]
    pub fn deepest_project_frame(&self) -> Option<&StackFrame> {
        self.stack.iter().rev().find(|f| f.is_project_frame())
    }

    /// All project files named by this error (attributed file + frames)
    #[must_use]
    pub fn implicated_files(&self) -> Vec<&Path> {
        let mut files: Vec<&Path> = Vec::new();
        if let Some(file) = &self.file {
            files.push(file.as_path());
        }
        for frame in self.stack.iter().filter(|f| f.is_project_frame()) {
            if let Some(file) = &frame.file {
                if !files.contains(&file.as_path()) {
                    files.push(file.as_path());
                }
            }
        }
        files
    }
}

/// Pass/fail status of one test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    /// Test passed
    Passed,
    /// Test failed
    Failed,
}

/// One entry of the harness result stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Test name as reported by the harness
    pub name: String,

    /// Test file
    pub file: PathBuf,

    /// Outcome
    pub status: TestStatus,

    /// Failure payload, present iff `status == Failed`
    #[serde(default)]
    pub error: Option<TestError>,

    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

impl TestResult {
    /// Whether this result is a failure
    #[inline]
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == TestStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn frame_parse_full_shape() {
        let frame = StackFrame::parse("    at loadDeals (src/services/deals.ts:42:17)").unwrap();
        assert_eq!(frame.function, "loadDeals");
        assert_eq!(frame.file.as_deref(), Some(Path::new("src/services/deals.ts")));
        assert_eq!(frame.line, Some(42));
        assert_eq!(frame.column, Some(17));
    }

    #[test]
    fn frame_parse_bare_location() {
        let frame = StackFrame::parse("at src/app.ts:7:1").unwrap();
        assert_eq!(frame.function, "<anonymous>");
        assert_eq!(frame.file.as_deref(), Some(Path::new("src/app.ts")));
        assert_eq!(frame.line, Some(7));
    }

    #[test]
    fn frame_parse_rejects_non_frames() {
        assert!(StackFrame::parse("TypeError: x is not a function").is_none());
        assert!(StackFrame::parse("").is_none());
    }

    #[test]
    fn project_frame_excludes_runner_internals() {
        let internal = StackFrame::parse("at run (node_modules/vitest/dist/run.js:10:2)").unwrap();
        assert!(!internal.is_project_frame());

        let node = StackFrame::parse("at process (node:internal/task_queues:95:5)").unwrap();
        assert!(!node.is_project_frame());

        let project = StackFrame::parse("at init (src/db.ts:3:1)").unwrap();
        assert!(project.is_project_frame());
    }

    #[test]
    fn deepest_project_frame_skips_trailing_internals() {
        let stack = "\
at outer (src/pages/deals.tsx:12:3)
at inner (src/services/deal-service.ts:5:10)
at run (node_modules/vitest/dist/run.js:10:2)";
        let error = TestError::with_stack_text("boom", stack);
        let deepest = error.deepest_project_frame().unwrap();
        assert_eq!(
            deepest.file.as_deref(),
            Some(Path::new("src/services/deal-service.ts"))
        );
    }

    #[test]
    fn implicated_files_are_deduplicated() {
        let stack = "\
at a (src/x.ts:1:1)
at b (src/x.ts:2:2)
at c (src/y.ts:3:3)";
        let error = TestError::with_stack_text("boom", stack).with_file("src/x.ts");
        let files = error.implicated_files();
        assert_eq!(files, vec![Path::new("src/x.ts"), Path::new("src/y.ts")]);
    }

    #[test]
    fn result_serde_round_trip() {
        let result = TestResult {
            name: "deals page renders".to_string(),
            file: PathBuf::from("tests/deals.spec.ts"),
            status: TestStatus::Failed,
            error: Some(TestError::new("expected 3, got 0")),
            duration_ms: 1520,
        };
        let json = serde_json::to_string(&result).unwrap();
        let decoded: TestResult = serde_json::from_str(&json).unwrap();
        assert_eq!(result, decoded);
        assert!(decoded.is_failed());
    }
}
