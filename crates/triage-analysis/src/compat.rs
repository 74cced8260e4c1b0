//! Runtime-compatibility scanning
//!
//! A fixed, extensible registry of named rules is compiled once into
//! regular expressions. Matching is line-accurate: the byte offset of each
//! match is converted to a 1-based line/column. Exempt files (server-only
//! paths, an explicit directive comment, test files) produce zero issues
//! and are allowed to use otherwise-flagged APIs.

use moka::sync::Cache;
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use triage_graph::{is_test_file, ContentHash};
use walkdir::WalkDir;

/// Directive comment that marks a file exempt
const SERVER_ONLY_DIRECTIVE: &str = "// triage:server-only";

/// Default capacity of the per-file result cache
const CACHE_CAPACITY: u64 = 4_096;

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Will break at runtime
    Critical,
    /// Very likely to break at runtime
    High,
    /// Breaks under some configurations
    Medium,
    /// Style/maintainability concern
    Low,
}

impl Severity {
    /// Rank for descending sorts (critical highest)
    #[inline]
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Critical => 3,
            Self::High => 2,
            Self::Medium => 1,
            Self::Low => 0,
        }
    }

    /// Stable identifier
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from building a rule registry
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// Rule pattern failed to compile
    #[error("invalid compat rule '{id}': {source}")]
    InvalidPattern {
        /// Offending rule id
        id: String,
        /// Compile error
        source: regex::Error,
    },
}

/// One named compatibility rule
#[derive(Debug, Clone)]
pub struct CompatRule {
    /// Stable rule id
    pub id: String,

    /// Why a match is a problem
    pub reason: String,

    /// How to fix a match
    pub remediation: String,

    /// Severity assigned to matches
    pub severity: Severity,

    pattern: Regex,
}

impl CompatRule {
    /// Compile a rule
    ///
    /// # Errors
    /// Returns [`RuleError::InvalidPattern`] when the regex fails to compile
    pub fn new(
        id: impl Into<String>,
        pattern: &str,
        severity: Severity,
        reason: impl Into<String>,
        remediation: impl Into<String>,
    ) -> Result<Self, RuleError> {
        let id = id.into();
        let compiled = Regex::new(pattern).map_err(|source| RuleError::InvalidPattern {
            id: id.clone(),
            source,
        })?;
        Ok(Self {
            id,
            reason: reason.into(),
            remediation: remediation.into(),
            severity,
            pattern: compiled,
        })
    }
}

/// Compiled rule registry
#[derive(Debug, Clone)]
pub struct CompatRules {
    rules: Vec<CompatRule>,
}

impl CompatRules {
    /// Empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// The builtin rule set
    #[must_use]
    pub fn builtin() -> Self {
        let rules = [
            (
                "module-scope-service",
                r"(?m)^\s*export\s+(?:const|let)\s+\w+\s*=\s*new\s+\w*(?:Service|Repository|Store|Client)\w*\s*\(",
                Severity::Critical,
                "stateful service constructed at module scope executes during browser bundling",
                "convert the module-scope construction to a lazy getter initialized on first use",
            ),
            (
                "module-scope-datasource",
                r"(?m)^\s*(?:export\s+)?const\s+\w+\s*=\s*new\s+(?:DataSource|PrismaClient|Pool)\s*\(",
                Severity::Critical,
                "database client constructed at module scope cannot run in the browser",
                "move the client behind a server-only module and access it through a server route",
            ),
            (
                "datasource-import-in-shared",
                r#"(?m)^\s*import\s+[^;]*from\s+['"][^'"]*data-source[^'"]*['"]"#,
                Severity::High,
                "server data source imported into code that ships to the browser",
                "replace the direct import with a fetch to a server endpoint",
            ),
            (
                "node-fs-import",
                r#"(?m)from\s+['"](?:node:)?fs['"]|require\(\s*['"](?:node:)?fs['"]\s*\)"#,
                Severity::Critical,
                "Node file-system API does not exist in the browser runtime",
                "isolate file-system access in a server-only module",
            ),
            (
                "dirname-usage",
                r"__dirname|__filename",
                Severity::High,
                "CommonJS path globals are undefined in browser bundles",
                "derive paths from import.meta.url or move the code server-side",
            ),
            (
                "process-env-read",
                r"process\.env\.",
                Severity::Medium,
                "process.env is empty in the browser unless statically inlined",
                "read configuration through the runtime config layer",
            ),
            (
                "module-scope-window",
                r"(?m)^\s*(?:export\s+)?(?:const|let|var)\s+\w+\s*=\s*window\.",
                Severity::Medium,
                "window accessed at module scope breaks server-side rendering",
                "move the access inside a function or guard it with a runtime check",
            ),
        ]
        .iter()
        .map(|(id, pattern, severity, reason, remediation)| {
            CompatRule::new(*id, pattern, *severity, *reason, *remediation)
                .expect("builtin compat rule")
        })
        .collect();
        Self { rules }
    }

    /// Append a rule
    #[inline]
    pub fn push(&mut self, rule: CompatRule) {
        self.rules.push(rule);
    }

    /// Registered rules
    #[inline]
    #[must_use]
    pub fn rules(&self) -> &[CompatRule] {
        &self.rules
    }
}

impl Default for CompatRules {
    fn default() -> Self {
        Self::builtin()
    }
}

/// One rule match at one source location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatIssue {
    /// Rule that fired
    pub rule_id: String,

    /// Severity of the finding
    pub severity: Severity,

    /// Repo-relative file
    pub file: PathBuf,

    /// 1-based line of the match
    pub line: u32,

    /// 1-based column of the match
    pub column: u32,

    /// Matched source text, trimmed
    pub matched_text: String,

    /// Why this is a problem
    pub reason: String,

    /// How to fix it
    pub remediation: String,
}

/// Per-file analysis result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCompatReport {
    /// Repo-relative file
    pub file: PathBuf,

    /// All issues, source order
    pub issues: Vec<CompatIssue>,

    /// Whether the file is exempt (server-only by convention or directive)
    pub server_only: bool,

    /// Whether any issue is critical
    pub has_critical: bool,

    /// `issues.len()`
    pub total: usize,
}

impl FileCompatReport {
    fn exempt(file: PathBuf) -> Self {
        Self {
            file,
            issues: Vec::new(),
            server_only: true,
            has_critical: false,
            total: 0,
        }
    }

    fn clean(file: PathBuf) -> Self {
        Self {
            file,
            issues: Vec::new(),
            server_only: false,
            has_critical: false,
            total: 0,
        }
    }
}

/// Scans files against the rule registry
///
/// Per-file results are cached by content hash; re-analyzing an unchanged
/// file is a lookup.
#[derive(Debug)]
pub struct CompatAnalyzer {
    root: PathBuf,
    rules: CompatRules,
    cache: Cache<ContentHash, Arc<FileCompatReport>>,
}

impl CompatAnalyzer {
    /// Analyzer rooted at a project directory with the builtin rules
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_rules(root, CompatRules::builtin())
    }

    /// Analyzer with a custom registry
    #[must_use]
    pub fn with_rules(root: impl Into<PathBuf>, rules: CompatRules) -> Self {
        Self {
            root: root.into(),
            rules,
            cache: Cache::new(CACHE_CAPACITY),
        }
    }

    /// Project root
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Analyze one repo-relative file
    ///
    /// An unreadable file is reported clean with a warning; it never aborts
    /// a caller's directory-wide scan.
    #[must_use]
    pub fn analyze_file(&self, rel: &Path) -> FileCompatReport {
        let abs = self.root.join(rel);
        let content = match std::fs::read_to_string(&abs) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!(file = %rel.display(), %err, "skipping unreadable file");
                return FileCompatReport::clean(rel.to_path_buf());
            }
        };

        let mut hasher = blake3_keyed(rel);
        hasher.update(content.as_bytes());
        let key = ContentHash::new(*hasher.finalize().as_bytes());

        if let Some(cached) = self.cache.get(&key) {
            return (*cached).clone();
        }
        let report = self.analyze_source(rel, &content);
        self.cache.insert(key, Arc::new(report.clone()));
        report
    }

    /// Analyze source text directly (no cache, no file system)
    #[must_use]
    pub fn analyze_source(&self, rel: &Path, content: &str) -> FileCompatReport {
        if is_exempt(rel, content) {
            return FileCompatReport::exempt(rel.to_path_buf());
        }

        let mut issues = Vec::new();
        for rule in self.rules.rules() {
            for found in rule.pattern.find_iter(content) {
                let (line, column) = line_column(content, found.start());
                issues.push(CompatIssue {
                    rule_id: rule.id.clone(),
                    severity: rule.severity,
                    file: rel.to_path_buf(),
                    line,
                    column,
                    matched_text: found.as_str().trim().to_string(),
                    reason: rule.reason.clone(),
                    remediation: rule.remediation.clone(),
                });
            }
        }
        issues.sort_by_key(|issue| (issue.line, issue.column));

        let has_critical = issues.iter().any(|i| i.severity == Severity::Critical);
        let total = issues.len();
        FileCompatReport {
            file: rel.to_path_buf(),
            issues,
            server_only: false,
            has_critical,
            total,
        }
    }

    /// Analyze every source file under a repo-relative directory
    ///
    /// Per-file analysis is independent and runs in parallel; results are
    /// merged afterward in path order.
    #[must_use]
    pub fn analyze_directory(&self, dir: &Path) -> Vec<FileCompatReport> {
        let base = self.root.join(dir);
        let mut files: Vec<PathBuf> = WalkDir::new(&base)
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                !(entry.file_type().is_dir()
                    && (name.starts_with('.') || name == "node_modules" || name == "dist"))
            })
            .flatten()
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                matches!(
                    entry.path().extension().and_then(|e| e.to_str()),
                    Some("ts" | "tsx" | "js" | "jsx")
                )
            })
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(&self.root)
                    .map(Path::to_path_buf)
                    .ok()
            })
            .collect();
        files.sort();

        files
            .par_iter()
            .map(|rel| self.analyze_file(rel))
            .collect()
    }
}

/// Keyed hasher so identical content in different files caches separately.
fn blake3_keyed(rel: &Path) -> blake3::Hasher {
    let mut hasher = blake3::Hasher::new();
    hasher.update(rel.to_string_lossy().as_bytes());
    hasher.update(b"\0");
    hasher
}

/// Whether a file is exempt from compatibility rules.
fn is_exempt(rel: &Path, content: &str) -> bool {
    if is_test_file(rel) {
        return true;
    }
    let in_server_dir = rel.components().any(|c| {
        matches!(
            c.as_os_str().to_string_lossy().as_ref(),
            "server" | "scripts" | "migrations"
        )
    });
    if in_server_dir {
        return true;
    }
    let name = rel
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if name.contains(".server.") {
        return true;
    }
    content.contains(SERVER_ONLY_DIRECTIVE)
}

/// Byte offset to 1-based line/column.
fn line_column(content: &str, offset: usize) -> (u32, u32) {
    let before = &content[..offset];
    let line = before.matches('\n').count() as u32 + 1;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    let column = (offset - line_start) as u32 + 1;
    (line, column)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn analyzer() -> (TempDir, CompatAnalyzer) {
        let dir = TempDir::new().unwrap();
        let analyzer = CompatAnalyzer::new(dir.path());
        (dir, analyzer)
    }

    #[test]
    fn module_scope_service_is_critical_with_position() {
        let (_dir, analyzer) = analyzer();
        let content = "import { db } from './db';\nexport const dealService = new DealService(db);\n";
        let report = analyzer.analyze_source(Path::new("src/services/deal-service.ts"), content);

        assert!(report.has_critical);
        assert_eq!(report.total, 1);
        let issue = &report.issues[0];
        assert_eq!(issue.rule_id, "module-scope-service");
        assert_eq!(issue.line, 2);
        assert_eq!(issue.column, 1);
        assert!(issue.matched_text.contains("new DealService"));
    }

    #[test]
    fn line_column_is_one_based_mid_line() {
        let (_dir, analyzer) = analyzer();
        let content = "const a = 1; const home = process.env.HOME;\n";
        let report = analyzer.analyze_source(Path::new("src/config.ts"), content);

        assert_eq!(report.total, 1);
        assert_eq!(report.issues[0].line, 1);
        assert_eq!(report.issues[0].column, 27);
    }

    #[test]
    fn server_path_is_exempt() {
        let (_dir, analyzer) = analyzer();
        let content = "export const pool = new Pool();\nconst home = process.env.HOME;\n";
        let report = analyzer.analyze_source(Path::new("server/db.ts"), content);

        assert!(report.server_only);
        assert_eq!(report.total, 0);
    }

    #[test]
    fn directive_comment_exempts() {
        let (_dir, analyzer) = analyzer();
        let content = "// triage:server-only\nexport const pool = new Pool();\n";
        let report = analyzer.analyze_source(Path::new("src/lib/pool.ts"), content);
        assert!(report.server_only);
    }

    #[test]
    fn test_files_are_exempt() {
        let (_dir, analyzer) = analyzer();
        let content = "const fs = require('fs');\n";
        let report = analyzer.analyze_source(Path::new("src/util.test.ts"), content);
        assert!(report.server_only);
        assert_eq!(report.total, 0);
    }

    #[test]
    fn unreadable_file_is_reported_clean() {
        let (_dir, analyzer) = analyzer();
        let report = analyzer.analyze_file(Path::new("src/missing.ts"));
        assert_eq!(report.total, 0);
        assert!(!report.server_only);
    }

    #[test]
    fn multiple_rules_fire_in_source_order() {
        let (_dir, analyzer) = analyzer();
        let content = "\
import { AppDataSource } from './data-source';
export const repo = new RepositoryClient();
const key = process.env.API_KEY;
";
        let report = analyzer.analyze_source(Path::new("src/lib/repo.ts"), content);
        let ids: Vec<&str> = report.issues.iter().map(|i| i.rule_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "datasource-import-in-shared",
                "module-scope-service",
                "process-env-read"
            ]
        );
    }

    #[test]
    fn analyze_directory_scans_and_merges() {
        let (dir, analyzer) = analyzer();
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("bad.ts"), "export const s = new FooService();\n").unwrap();
        std::fs::write(src.join("ok.ts"), "export const n = 1;\n").unwrap();

        let reports = analyzer.analyze_directory(Path::new("src"));
        assert_eq!(reports.len(), 2);
        let bad = reports.iter().find(|r| r.file.ends_with("bad.ts")).unwrap();
        assert!(bad.has_critical);
        let ok = reports.iter().find(|r| r.file.ends_with("ok.ts")).unwrap();
        assert_eq!(ok.total, 0);
    }

    #[test]
    fn cached_result_matches_fresh_analysis() {
        let (dir, analyzer) = analyzer();
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("bad.ts"), "export const s = new FooService();\n").unwrap();

        let first = analyzer.analyze_file(Path::new("src/bad.ts"));
        let second = analyzer.analyze_file(Path::new("src/bad.ts"));
        assert_eq!(first, second);
    }
}
