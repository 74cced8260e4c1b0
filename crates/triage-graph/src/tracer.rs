//! Import tracing toward problematic modules
//!
//! Depth-bounded, cycle-safe depth-first walk from a failing test (or the
//! deepest in-repo stack frame) along import edges. At each node the file
//! content is scanned against a registry of problematic patterns; the walk
//! terminates the instant a node matches either the caller-supplied target
//! pattern or any registry pattern — that node is the reported root cause.
//! Cap or exhaustion without a match is a valid `found: false` result with
//! the partial chain kept for diagnostics, never an error.

use crate::graph::ImportGraph;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use triage_failure::StackFrame;

/// Hard cap on trace depth
pub const MAX_TRACE_DEPTH: usize = 20;

/// Longest excerpt carried in a chain entry
const EXCERPT_LIMIT: usize = 120;

/// Errors from building a custom pattern registry
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// Problematic pattern failed to compile
    #[error("invalid problematic pattern '{id}': {source}")]
    InvalidPattern {
        /// Offending pattern id
        id: String,
        /// Compile error
        source: regex::Error,
    },
}

/// One named problematic pattern
#[derive(Debug, Clone)]
pub struct ProblematicPattern {
    /// Stable pattern id
    pub id: String,

    /// What a match means
    pub description: String,

    pattern: Regex,
}

impl ProblematicPattern {
    /// Compile a pattern
    ///
    /// # Errors
    /// Returns [`TraceError::InvalidPattern`] when the regex fails to compile
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        pattern: &str,
    ) -> Result<Self, TraceError> {
        let id = id.into();
        let compiled = Regex::new(pattern).map_err(|source| TraceError::InvalidPattern {
            id: id.clone(),
            source,
        })?;
        Ok(Self {
            id,
            description: description.into(),
            pattern: compiled,
        })
    }

    fn find<'a>(&self, content: &'a str) -> Option<regex::Match<'a>> {
        self.pattern.find(content)
    }
}

/// Registry of problematic patterns, compiled once
#[derive(Debug, Clone)]
pub struct ProblematicPatterns {
    patterns: Vec<ProblematicPattern>,
}

impl ProblematicPatterns {
    /// Empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// The builtin registry
    #[must_use]
    pub fn builtin() -> Self {
        let patterns = [
            (
                "module-scope-singleton",
                "stateful service constructed at module scope",
                r"(?m)^\s*export\s+(?:const|let)\s+\w+\s*=\s*new\s+[A-Z][A-Za-z0-9_]*\s*\(",
            ),
            (
                "module-scope-datasource",
                "database client constructed at module scope",
                r"(?m)^\s*(?:export\s+)?const\s+\w+\s*=\s*new\s+(?:DataSource|PrismaClient|Pool)\s*\(",
            ),
            (
                "top-level-initialize",
                "connection initialized at module scope",
                r"(?m)^\s*(?:await\s+)?[A-Za-z_]\w*\.initialize\s*\(\s*\)",
            ),
        ]
        .iter()
        .map(|(id, description, pattern)| {
            ProblematicPattern::new(*id, *description, pattern).expect("builtin pattern")
        })
        .collect();
        Self { patterns }
    }

    /// Append a pattern
    #[inline]
    pub fn push(&mut self, pattern: ProblematicPattern) {
        self.patterns.push(pattern);
    }

    /// Registered patterns
    #[inline]
    #[must_use]
    pub fn patterns(&self) -> &[ProblematicPattern] {
        &self.patterns
    }

    /// Description for a pattern id
    #[must_use]
    pub fn describe(&self, id: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.description.as_str())
    }
}

impl Default for ProblematicPatterns {
    fn default() -> Self {
        Self::builtin()
    }
}

/// One step of a trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEntry {
    /// File visited
    pub file: PathBuf,

    /// Depth from the start file (start is 0)
    pub depth: usize,

    /// Pattern id that matched here, if any
    pub matched: Option<String>,

    /// Matched source line, trimmed
    pub excerpt: Option<String>,
}

/// Result of one trace operation
///
/// Ephemeral: scoped to one analysis call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportChain {
    /// Whether a root-cause node was found
    pub found: bool,

    /// The offending file, when found
    pub root_cause_file: Option<PathBuf>,

    /// Pattern id that terminated the walk, when found
    pub matched_pattern: Option<String>,

    /// Path taken, start first; on a miss this is the partial chain
    pub entries: Vec<ChainEntry>,

    /// Whether the depth cap cut any branch short
    pub truncated: bool,
}

impl ImportChain {
    /// The no-result chain (start file absent from the graph)
    #[must_use]
    pub fn empty() -> Self {
        Self {
            found: false,
            root_cause_file: None,
            matched_pattern: None,
            entries: Vec::new(),
            truncated: false,
        }
    }
}

/// Walks import edges from a start file toward a problematic module
#[derive(Debug)]
pub struct ImportTracer<'g> {
    graph: &'g ImportGraph,
    patterns: ProblematicPatterns,
    max_depth: usize,
}

impl<'g> ImportTracer<'g> {
    /// Tracer over a graph with the builtin pattern registry
    #[must_use]
    pub fn new(graph: &'g ImportGraph) -> Self {
        Self {
            graph,
            patterns: ProblematicPatterns::builtin(),
            max_depth: MAX_TRACE_DEPTH,
        }
    }

    /// Replace the pattern registry
    #[must_use]
    pub fn with_patterns(mut self, patterns: ProblematicPatterns) -> Self {
        self.patterns = patterns;
        self
    }

    /// Override the depth cap (clamped to [`MAX_TRACE_DEPTH`])
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.min(MAX_TRACE_DEPTH);
        self
    }

    /// Pattern registry in use
    #[inline]
    #[must_use]
    pub fn patterns(&self) -> &ProblematicPatterns {
        &self.patterns
    }

    /// Trace from a start file
    ///
    /// `target` is an optional caller-supplied pattern checked before the
    /// registry at every node.
    #[must_use]
    pub fn trace(&self, start: &Path, target: Option<&Regex>) -> ImportChain {
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut entries: Vec<ChainEntry> = Vec::new();
        let mut truncated = false;

        let hit = self.walk(start, 0, target, &mut visited, &mut entries, &mut truncated);
        match hit {
            Some((file, pattern)) => ImportChain {
                found: true,
                root_cause_file: Some(file),
                matched_pattern: Some(pattern),
                entries,
                truncated,
            },
            None => ImportChain {
                found: false,
                root_cause_file: None,
                matched_pattern: None,
                entries,
                truncated,
            },
        }
    }

    /// Trace from the deepest in-repo stack frame
    ///
    /// Frames that do not resolve to a graph node are skipped; when none
    /// resolve the result is an empty `found: false` chain.
    #[must_use]
    pub fn trace_from_stack(&self, frames: &[StackFrame]) -> ImportChain {
        for frame in frames.iter().rev().filter(|f| f.is_project_frame()) {
            if let Some(start) = frame.file.as_deref().and_then(|f| self.resolve_frame(f)) {
                return self.trace(&start, None);
            }
        }
        ImportChain::empty()
    }

    /// Direct importers of a file
    #[must_use]
    pub fn find_importers(&self, target: &Path) -> Vec<PathBuf> {
        self.graph
            .node(target)
            .map(|node| node.imported_by.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Map a stack-frame path onto a graph node path.
    fn resolve_frame(&self, file: &Path) -> Option<PathBuf> {
        let candidate = file
            .strip_prefix(self.graph.root())
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| file.to_path_buf());
        let candidate = candidate
            .strip_prefix("./")
            .map(Path::to_path_buf)
            .unwrap_or(candidate);
        self.graph.node(&candidate).map(|node| node.file.clone())
    }

    fn walk(
        &self,
        file: &Path,
        depth: usize,
        target: Option<&Regex>,
        visited: &mut HashSet<PathBuf>,
        entries: &mut Vec<ChainEntry>,
        truncated: &mut bool,
    ) -> Option<(PathBuf, String)> {
        if depth >= self.max_depth {
            *truncated = true;
            return None;
        }
        if !visited.insert(file.to_path_buf()) {
            return None;
        }
        let node = self.graph.node(file)?;

        let content = std::fs::read_to_string(self.graph.root().join(file)).ok();
        if let Some(content) = &content {
            if let Some(target) = target {
                if let Some(found) = target.find(content) {
                    entries.push(entry_for(file, depth, "target", content, found.start()));
                    return Some((file.to_path_buf(), String::from("target")));
                }
            }
            for pattern in self.patterns.patterns() {
                if let Some(found) = pattern.find(content) {
                    entries.push(entry_for(file, depth, &pattern.id, content, found.start()));
                    tracing::debug!(
                        file = %file.display(),
                        pattern = %pattern.id,
                        depth,
                        "trace terminated on problematic pattern"
                    );
                    return Some((file.to_path_buf(), pattern.id.clone()));
                }
            }
        }

        entries.push(ChainEntry {
            file: file.to_path_buf(),
            depth,
            matched: None,
            excerpt: None,
        });

        let imports: Vec<PathBuf> = node.imports.iter().cloned().collect();
        for next in imports {
            if let Some(hit) = self.walk(&next, depth + 1, target, visited, entries, truncated) {
                return Some(hit);
            }
        }
        None
    }
}

/// Chain entry with the matched line as excerpt.
fn entry_for(file: &Path, depth: usize, matched: &str, content: &str, offset: usize) -> ChainEntry {
    let line_start = content[..offset].rfind('\n').map_or(0, |i| i + 1);
    let line_end = content[offset..]
        .find('\n')
        .map_or(content.len(), |i| offset + i);
    let excerpt: String = content[line_start..line_end]
        .trim()
        .chars()
        .take(EXCERPT_LIMIT)
        .collect();
    ChainEntry {
        file: file.to_path_buf(),
        depth,
        matched: Some(matched.to_string()),
        excerpt: Some(excerpt),
    }
}
