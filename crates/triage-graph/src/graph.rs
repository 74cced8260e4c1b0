//! Graph construction and transitive queries
//!
//! A full-tree scan extracts import edges via text pattern extraction,
//! resolving aliases and relative specifiers to canonical repo-relative
//! paths. Reverse edges are derived in a second pass. All traversal is
//! breadth-first with an explicit visited set and a depth cap, so cyclic
//! import graphs terminate.

use crate::hash::ContentHash;
use crate::node::ImportNode;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use std::collections::{HashSet, VecDeque};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

/// Default transitive-query depth cap
pub const DEFAULT_QUERY_DEPTH: usize = 10;

/// Errors from graph construction and caching
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Scan root does not exist
    #[error("source root not found: {0}")]
    RootNotFound(PathBuf),

    /// Cache file could not be read or written
    #[error("graph cache io at {path}: {source}")]
    CacheIo {
        /// Cache file path
        path: PathBuf,
        /// Underlying io error
        #[source]
        source: std::io::Error,
    },

    /// Cache file could not be decoded
    #[error("graph cache decode: {0}")]
    CacheDecode(#[from] serde_json::Error),
}

/// Scan configuration
///
/// An explicitly constructed context object passed to the builder — no
/// ambient global state.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Project root the scan starts from
    pub root: PathBuf,

    /// Source extensions included in the scan
    pub extensions: Vec<String>,

    /// Directory names excluded from the scan
    pub ignore_dirs: Vec<String>,

    /// Path-alias prefixes, e.g. `("@/", "src")`
    pub aliases: Vec<(String, PathBuf)>,

    /// Depth cap for transitive queries
    pub max_depth: usize,
}

impl GraphConfig {
    /// Config with conventional defaults for a TS/JS tree
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: ["ts", "tsx", "js", "jsx"].map(String::from).to_vec(),
            ignore_dirs: ["node_modules", "dist", "build", "coverage", "out"]
                .map(String::from)
                .to_vec(),
            aliases: vec![(String::from("@/"), PathBuf::from("src"))],
            max_depth: DEFAULT_QUERY_DEPTH,
        }
    }
}

/// Import-specifier extraction patterns, matched against raw file text.
static IMPORT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // import ... from '...'
        r#"import\s+[^;'"]*?from\s+['"]([^'"]+)['"]"#,
        // export ... from '...'
        r#"export\s+[^;'"]*?from\s+['"]([^'"]+)['"]"#,
        // dynamic import('...')
        r#"import\s*\(\s*['"]([^'"]+)['"]\s*\)"#,
        // require('...')
        r#"require\s*\(\s*['"]([^'"]+)['"]\s*\)"#,
        // side-effect import '...'
        r#"(?m)^\s*import\s+['"]([^'"]+)['"]"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("import pattern"))
    .collect()
});

/// Extract raw import specifiers from file text, first-seen order.
#[must_use]
pub fn extract_import_specs(content: &str) -> Vec<String> {
    let mut specs = Vec::new();
    let mut seen = HashSet::new();
    for pattern in IMPORT_PATTERNS.iter() {
        for captures in pattern.captures_iter(content) {
            if let Some(spec) = captures.get(1) {
                let spec = spec.as_str().to_string();
                if seen.insert(spec.clone()) {
                    specs.push(spec);
                }
            }
        }
    }
    specs
}

/// Whether a repo-relative path names a test file
#[must_use]
pub fn is_test_file(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if name.contains(".spec.") || name.contains(".test.") {
        return true;
    }
    path.components().any(|c| {
        matches!(
            c.as_os_str().to_string_lossy().as_ref(),
            "tests" | "test" | "e2e" | "__tests__"
        )
    })
}

/// Collapse `.` and `..` components without touching the file system.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// The file→imports→importers graph
///
/// Nodes are keyed by canonical repo-relative path; cycles are permitted.
#[derive(Debug, Clone)]
pub struct ImportGraph {
    nodes: IndexMap<PathBuf, ImportNode>,
    root: PathBuf,
    built_at_ms: i64,
    max_depth: usize,
}

impl ImportGraph {
    /// Build the graph with a full-tree scan
    ///
    /// Per-file parsing runs in parallel; each file's result is immutable
    /// and merged afterward. An unreadable file is skipped with a warning
    /// and does not abort the scan.
    ///
    /// # Errors
    /// Returns [`GraphError::RootNotFound`] when the configured root is missing
    pub fn build(config: &GraphConfig) -> Result<Self, GraphError> {
        if !config.root.is_dir() {
            return Err(GraphError::RootNotFound(config.root.clone()));
        }

        let files = scan_tree(config);
        let file_set: HashSet<PathBuf> = files.iter().cloned().collect();

        // Parallel per-file pass: content hash, mtime, resolved imports.
        let scanned: Vec<ImportNode> = files
            .par_iter()
            .filter_map(|rel| {
                let abs = config.root.join(rel);
                let content = match std::fs::read_to_string(&abs) {
                    Ok(content) => content,
                    Err(err) => {
                        tracing::warn!(file = %rel.display(), %err, "skipping unreadable file");
                        return None;
                    }
                };
                let modified_ms = file_mtime_ms(&abs).unwrap_or(0);
                let mut node =
                    ImportNode::new(rel.clone(), ContentHash::compute(content.as_bytes()), modified_ms);
                for spec in extract_import_specs(&content) {
                    if let Some(target) = resolve_spec(&spec, rel, &file_set, config) {
                        if target != *rel {
                            node.imports.insert(target);
                        }
                    }
                }
                Some(node)
            })
            .collect();

        let mut nodes: IndexMap<PathBuf, ImportNode> = scanned
            .into_iter()
            .map(|node| (node.file.clone(), node))
            .collect();
        nodes.sort_keys();

        // Second pass: derive reverse edges.
        let edges: Vec<(PathBuf, PathBuf)> = nodes
            .values()
            .flat_map(|node| {
                node.imports
                    .iter()
                    .map(|target| (target.clone(), node.file.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (target, importer) in edges {
            if let Some(node) = nodes.get_mut(&target) {
                node.imported_by.insert(importer);
            }
        }

        let graph = Self {
            nodes,
            root: config.root.clone(),
            built_at_ms: chrono::Utc::now().timestamp_millis(),
            max_depth: config.max_depth,
        };
        tracing::info!(
            files = graph.nodes.len(),
            edges = graph.nodes.values().map(ImportNode::fan_out).sum::<usize>(),
            "import graph built"
        );
        Ok(graph)
    }

    /// Reassemble a graph from cached nodes
    #[must_use]
    pub fn from_nodes(
        root: impl Into<PathBuf>,
        nodes: Vec<ImportNode>,
        built_at_ms: i64,
        max_depth: usize,
    ) -> Self {
        Self {
            nodes: nodes.into_iter().map(|n| (n.file.clone(), n)).collect(),
            root: root.into(),
            built_at_ms,
            max_depth,
        }
    }

    /// Project root this graph was scanned from
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Build timestamp (epoch millis)
    #[inline]
    #[must_use]
    pub fn built_at_ms(&self) -> i64 {
        self.built_at_ms
    }

    /// Depth cap used for transitive queries
    #[inline]
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Node for a repo-relative path
    #[inline]
    #[must_use]
    pub fn node(&self, file: &Path) -> Option<&ImportNode> {
        self.nodes.get(file)
    }

    /// All nodes, path order
    pub fn nodes(&self) -> impl Iterator<Item = &ImportNode> {
        self.nodes.values()
    }

    /// Number of files in the graph
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Files that `file` transitively imports, nearest first
    #[must_use]
    pub fn dependencies(&self, file: &Path, max_depth: usize) -> Vec<PathBuf> {
        self.traverse(file, max_depth, |node| &node.imports)
    }

    /// Files that transitively import `file`, nearest first
    #[must_use]
    pub fn dependents(&self, file: &Path, max_depth: usize) -> Vec<PathBuf> {
        self.traverse(file, max_depth, |node| &node.imported_by)
    }

    /// Test files affected by a set of changed files
    ///
    /// A changed test file is itself affected.
    #[must_use]
    pub fn affected_tests(&self, changed: &[PathBuf]) -> Vec<PathBuf> {
        let mut affected: Vec<PathBuf> = Vec::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();
        for file in changed {
            if is_test_file(file) && seen.insert(file.clone()) {
                affected.push(file.clone());
            }
            for dependent in self.dependents(file, self.max_depth) {
                if is_test_file(&dependent) && seen.insert(dependent.clone()) {
                    affected.push(dependent);
                }
            }
        }
        affected.sort();
        affected
    }

    /// Bounded breadth-first traversal; terminates on cycles.
    fn traverse<'a, F>(&'a self, start: &Path, max_depth: usize, edges: F) -> Vec<PathBuf>
    where
        F: Fn(&'a ImportNode) -> &'a std::collections::BTreeSet<PathBuf>,
    {
        let mut visited: HashSet<PathBuf> = HashSet::new();
        visited.insert(start.to_path_buf());
        let mut queue: VecDeque<(PathBuf, usize)> = VecDeque::new();
        queue.push_back((start.to_path_buf(), 0));
        let mut out = Vec::new();

        while let Some((file, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let Some(node) = self.nodes.get(&file) else {
                continue;
            };
            for next in edges(node) {
                if visited.insert(next.clone()) {
                    out.push(next.clone());
                    queue.push_back((next.clone(), depth + 1));
                }
            }
        }
        out
    }
}

/// Walk the tree collecting repo-relative source files.
fn scan_tree(config: &GraphConfig) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let walker = WalkDir::new(&config.root).into_iter().filter_entry(|entry| {
        // The root itself is exempt; only children are filtered.
        if entry.depth() == 0 {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        if entry.file_type().is_dir() {
            !name.starts_with('.') && !config.ignore_dirs.iter().any(|d| d == name.as_ref())
        } else {
            true
        }
    });
    for entry in walker.flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let ext = entry
            .path()
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        if !config.extensions.iter().any(|e| *e == ext) {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(&config.root) {
            files.push(rel.to_path_buf());
        }
    }
    files.sort();
    files
}

/// Modification time as epoch millis.
pub(crate) fn file_mtime_ms(path: &Path) -> Option<i64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let since_epoch = modified.duration_since(UNIX_EPOCH).ok()?;
    i64::try_from(since_epoch.as_millis()).ok()
}

/// Resolve one import specifier to a canonical repo-relative path.
///
/// Relative specifiers resolve against the importing file; alias prefixes
/// resolve against their configured target. Anything else is an external
/// package and resolves to `None`.
fn resolve_spec(
    spec: &str,
    importer: &Path,
    files: &HashSet<PathBuf>,
    config: &GraphConfig,
) -> Option<PathBuf> {
    let base = if spec.starts_with("./") || spec.starts_with("../") {
        let dir = importer.parent().unwrap_or_else(|| Path::new(""));
        normalize(&dir.join(spec))
    } else {
        let (prefix, target) = config
            .aliases
            .iter()
            .filter(|(prefix, _)| spec.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())?;
        normalize(&target.join(spec[prefix.len()..].trim_start_matches('/')))
    };

    // Exact path, extension probes, then directory index probes.
    if files.contains(&base) {
        return Some(base);
    }
    for ext in &config.extensions {
        let candidate = PathBuf::from(format!("{}.{ext}", base.display()));
        if files.contains(&candidate) {
            return Some(candidate);
        }
    }
    for ext in &config.extensions {
        let candidate = base.join(format!("index.{ext}"));
        if files.contains(&candidate) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn fixture_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "src/services/deal-service.ts", "import { db } from './db';\nexport const dealService = new DealService(db);\n");
        write(root, "src/services/db.ts", "export const db = {};\n");
        write(root, "src/pages/deals.tsx", "import { dealService } from '@/services/deal-service';\nexport default function Deals() {}\n");
        write(root, "tests/deals.spec.ts", "import Deals from '../src/pages/deals';\n");
        write(root, "node_modules/pkg/index.ts", "export const ignored = 1;\n");
        dir
    }

    #[test]
    fn extracts_all_import_shapes() {
        let content = r#"
import { a } from './a';
import b from "./b";
import * as c from './c';
export { d } from './d';
const e = require('./e');
const f = await import('./f');
import './polyfill';
"#;
        let specs = extract_import_specs(content);
        assert_eq!(
            specs,
            vec!["./a", "./b", "./c", "./d", "./f", "./e", "./polyfill"]
        );
    }

    #[test]
    fn build_resolves_relative_and_alias_imports() {
        let dir = fixture_tree();
        let graph = ImportGraph::build(&GraphConfig::new(dir.path())).unwrap();

        let page = graph.node(Path::new("src/pages/deals.tsx")).unwrap();
        assert!(page
            .imports
            .contains(Path::new("src/services/deal-service.ts")));

        let service = graph.node(Path::new("src/services/deal-service.ts")).unwrap();
        assert!(service.imports.contains(Path::new("src/services/db.ts")));
        assert!(service
            .imported_by
            .contains(Path::new("src/pages/deals.tsx")));
    }

    #[test]
    fn ignored_directories_are_excluded() {
        let dir = fixture_tree();
        let graph = ImportGraph::build(&GraphConfig::new(dir.path())).unwrap();
        assert!(graph.node(Path::new("node_modules/pkg/index.ts")).is_none());
    }

    #[test]
    fn dependents_walks_reverse_edges_transitively() {
        let dir = fixture_tree();
        let graph = ImportGraph::build(&GraphConfig::new(dir.path())).unwrap();

        let dependents = graph.dependents(Path::new("src/services/db.ts"), 10);
        assert!(dependents.contains(&PathBuf::from("src/services/deal-service.ts")));
        assert!(dependents.contains(&PathBuf::from("src/pages/deals.tsx")));
        assert!(dependents.contains(&PathBuf::from("tests/deals.spec.ts")));
    }

    #[test]
    fn cyclic_graph_terminates() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "src/a.ts", "import { b } from './b';\nexport const a = 1;\n");
        write(root, "src/b.ts", "import { a } from './a';\nexport const b = 2;\n");
        let graph = ImportGraph::build(&GraphConfig::new(root)).unwrap();

        let deps = graph.dependencies(Path::new("src/a.ts"), 10);
        assert_eq!(deps, vec![PathBuf::from("src/b.ts")]);
        let dependents = graph.dependents(Path::new("src/a.ts"), 10);
        assert_eq!(dependents, vec![PathBuf::from("src/b.ts")]);
    }

    #[test]
    fn depth_cap_bounds_traversal() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "src/a.ts", "import './b';\n");
        write(root, "src/b.ts", "import './c';\n");
        write(root, "src/c.ts", "export const c = 1;\n");
        let graph = ImportGraph::build(&GraphConfig::new(root)).unwrap();

        let shallow = graph.dependencies(Path::new("src/a.ts"), 1);
        assert_eq!(shallow, vec![PathBuf::from("src/b.ts")]);
        let deep = graph.dependencies(Path::new("src/a.ts"), 10);
        assert_eq!(deep.len(), 2);
    }

    #[test]
    fn affected_tests_filters_to_test_files() {
        let dir = fixture_tree();
        let graph = ImportGraph::build(&GraphConfig::new(dir.path())).unwrap();

        let affected = graph.affected_tests(&[PathBuf::from("src/services/db.ts")]);
        assert_eq!(affected, vec![PathBuf::from("tests/deals.spec.ts")]);
    }

    #[test]
    fn missing_root_is_an_error() {
        let result = ImportGraph::build(&GraphConfig::new("/nonexistent/triage-root"));
        assert!(matches!(result, Err(GraphError::RootNotFound(_))));
    }

    #[test]
    fn test_file_naming_conventions() {
        assert!(is_test_file(Path::new("tests/deals.spec.ts")));
        assert!(is_test_file(Path::new("src/util.test.ts")));
        assert!(is_test_file(Path::new("e2e/flow.ts")));
        assert!(is_test_file(Path::new("src/__tests__/x.ts")));
        assert!(!is_test_file(Path::new("src/services/deal-service.ts")));
    }
}
