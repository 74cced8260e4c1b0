//! Persisted graph cache
//!
//! The graph is cached as a schema-versioned JSON document. Validity is a
//! deliberate speed-over-certainty trade-off: a cache older than one hour
//! is invalid outright; otherwise at most [`SAMPLE_LIMIT`] nodes are
//! sampled and their on-disk modification times compared against the
//! cached values. The check is probabilistic, not exhaustive — a change to
//! an unsampled file inside the age window can go unnoticed until the next
//! expiry or a forced rebuild.

use crate::graph::{file_mtime_ms, GraphConfig, GraphError, ImportGraph};
use crate::node::ImportNode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Schema version of the persisted graph document
pub const GRAPH_CACHE_SCHEMA_VERSION: u32 = 1;

/// Hard expiry for a cached graph
const MAX_CACHE_AGE_MS: i64 = 60 * 60 * 1000;

/// Upper bound on nodes sampled during validation
const SAMPLE_LIMIT: usize = 10;

/// On-disk graph document
#[derive(Debug, Serialize, Deserialize)]
struct CachedGraph {
    schema_version: u32,
    built_at_ms: i64,
    root: PathBuf,
    max_depth: usize,
    nodes: Vec<ImportNode>,
}

/// Loader/writer for the persisted graph
#[derive(Debug, Clone)]
pub struct GraphCache {
    path: PathBuf,
}

impl GraphCache {
    /// Cache backed by the given file
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Cache file path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached graph when it is still valid
    ///
    /// Returns `None` for a missing, undecodable, schema-mismatched, aged-out
    /// or drift-detected cache — all of which mean "rebuild".
    #[must_use]
    pub fn load(&self, config: &GraphConfig) -> Option<ImportGraph> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        let cached: CachedGraph = match serde_json::from_str(&raw) {
            Ok(cached) => cached,
            Err(err) => {
                tracing::warn!(%err, "discarding undecodable graph cache");
                return None;
            }
        };
        if !Self::is_valid(&cached, config) {
            return None;
        }
        Some(ImportGraph::from_nodes(
            cached.root,
            cached.nodes,
            cached.built_at_ms,
            cached.max_depth,
        ))
    }

    /// Persist the graph
    ///
    /// # Errors
    /// Returns [`GraphError::CacheIo`] when the cache file cannot be written
    pub fn store(&self, graph: &ImportGraph) -> Result<(), GraphError> {
        let document = CachedGraph {
            schema_version: GRAPH_CACHE_SCHEMA_VERSION,
            built_at_ms: graph.built_at_ms(),
            root: graph.root().to_path_buf(),
            max_depth: graph.max_depth(),
            nodes: graph.nodes().cloned().collect(),
        };
        let json = serde_json::to_string(&document)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| GraphError::CacheIo {
                path: self.path.clone(),
                source,
            })?;
        }
        std::fs::write(&self.path, json).map_err(|source| GraphError::CacheIo {
            path: self.path.clone(),
            source,
        })
    }

    /// Load the cache or rebuild and store
    ///
    /// # Errors
    /// Returns an error when a rebuild fails or the fresh graph cannot be stored
    pub fn build(&self, config: &GraphConfig, force_rebuild: bool) -> Result<ImportGraph, GraphError> {
        if !force_rebuild {
            if let Some(graph) = self.load(config) {
                tracing::debug!(files = graph.len(), "using cached import graph");
                return Ok(graph);
            }
        }
        let graph = ImportGraph::build(config)?;
        self.store(&graph)?;
        Ok(graph)
    }

    /// Age + sampled-mtime validity check.
    fn is_valid(cached: &CachedGraph, config: &GraphConfig) -> bool {
        if cached.schema_version != GRAPH_CACHE_SCHEMA_VERSION {
            tracing::debug!(
                cached = cached.schema_version,
                expected = GRAPH_CACHE_SCHEMA_VERSION,
                "graph cache schema mismatch"
            );
            return false;
        }
        if cached.root != config.root {
            return false;
        }

        let age_ms = chrono::Utc::now().timestamp_millis() - cached.built_at_ms;
        if age_ms > MAX_CACHE_AGE_MS {
            tracing::debug!(age_ms, "graph cache aged out");
            return false;
        }

        // Sample evenly across the node list rather than only its head.
        let step = (cached.nodes.len() / SAMPLE_LIMIT).max(1);
        for node in cached.nodes.iter().step_by(step).take(SAMPLE_LIMIT) {
            match file_mtime_ms(&config.root.join(&node.file)) {
                Some(on_disk) if on_disk <= node.modified_ms => {}
                _ => {
                    tracing::debug!(file = %node.file.display(), "graph cache drift detected");
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentHash;
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, GraphConfig) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.ts"), "import './b';\n").unwrap();
        fs::write(dir.path().join("src/b.ts"), "export const b = 1;\n").unwrap();
        let config = GraphConfig::new(dir.path());
        (dir, config)
    }

    fn cache_in(dir: &TempDir) -> GraphCache {
        GraphCache::new(dir.path().join(".triage/import-graph.json"))
    }

    #[test]
    fn store_then_load_round_trips() {
        let (dir, config) = fixture();
        let cache = cache_in(&dir);

        let graph = ImportGraph::build(&config).unwrap();
        cache.store(&graph).unwrap();

        let loaded = cache.load(&config).unwrap();
        assert_eq!(loaded.len(), graph.len());
        assert!(loaded
            .node(Path::new("src/a.ts"))
            .unwrap()
            .imports
            .contains(Path::new("src/b.ts")));
    }

    #[test]
    fn missing_cache_loads_none() {
        let (dir, config) = fixture();
        assert!(cache_in(&dir).load(&config).is_none());
    }

    #[test]
    fn aged_out_cache_is_invalid() {
        let (dir, config) = fixture();
        let cache = cache_in(&dir);

        let document = CachedGraph {
            schema_version: GRAPH_CACHE_SCHEMA_VERSION,
            built_at_ms: chrono::Utc::now().timestamp_millis() - 2 * MAX_CACHE_AGE_MS,
            root: config.root.clone(),
            max_depth: 10,
            nodes: vec![],
        };
        fs::create_dir_all(cache.path().parent().unwrap()).unwrap();
        fs::write(cache.path(), serde_json::to_string(&document).unwrap()).unwrap();

        assert!(cache.load(&config).is_none());
    }

    #[test]
    fn sampled_mtime_drift_invalidates() {
        let (dir, config) = fixture();
        let cache = cache_in(&dir);

        // Cached node claims an mtime far in the past; disk has advanced.
        let mut node = ImportNode::new("src/a.ts", ContentHash::compute(b"import './b';\n"), 1);
        node.imports.insert(PathBuf::from("src/b.ts"));
        let document = CachedGraph {
            schema_version: GRAPH_CACHE_SCHEMA_VERSION,
            built_at_ms: chrono::Utc::now().timestamp_millis(),
            root: config.root.clone(),
            max_depth: 10,
            nodes: vec![node],
        };
        fs::create_dir_all(cache.path().parent().unwrap()).unwrap();
        fs::write(cache.path(), serde_json::to_string(&document).unwrap()).unwrap();

        assert!(cache.load(&config).is_none());
    }

    #[test]
    fn schema_mismatch_invalidates() {
        let (dir, config) = fixture();
        let cache = cache_in(&dir);

        let document = CachedGraph {
            schema_version: GRAPH_CACHE_SCHEMA_VERSION + 1,
            built_at_ms: chrono::Utc::now().timestamp_millis(),
            root: config.root.clone(),
            max_depth: 10,
            nodes: vec![],
        };
        fs::create_dir_all(cache.path().parent().unwrap()).unwrap();
        fs::write(cache.path(), serde_json::to_string(&document).unwrap()).unwrap();

        assert!(cache.load(&config).is_none());
    }

    #[test]
    fn build_uses_cache_until_forced() {
        let (dir, config) = fixture();
        let cache = cache_in(&dir);

        let first = cache.build(&config, false).unwrap();
        let cached = cache.build(&config, false).unwrap();
        assert_eq!(first.built_at_ms(), cached.built_at_ms());

        let rebuilt = cache.build(&config, true).unwrap();
        assert!(rebuilt.built_at_ms() >= first.built_at_ms());
    }
}
