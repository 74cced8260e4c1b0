//! Pipeline configuration
//!
//! Defaults overlaid with an optional `triage.toml` at the project root;
//! the CLI overrides individual fields on top. The config is an explicit
//! context object handed to the pipeline, not ambient state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use triage_graph::GraphConfig;

/// Config file looked up at the project root
pub const CONFIG_FILE_NAME: &str = "triage.toml";

/// Errors from loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file exists but could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// Config file path
        path: PathBuf,
        /// Underlying io error
        #[source]
        source: std::io::Error,
    },

    /// Config file could not be parsed
    #[error("invalid {path}: {source}")]
    Parse {
        /// Config file path
        path: PathBuf,
        /// Underlying parse error
        #[source]
        source: toml::de::Error,
    },
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Project root the pipeline operates on
    pub root: PathBuf,

    /// Cache directory, relative to the root
    pub cache_dir: PathBuf,

    /// Source extensions included in scans
    pub source_extensions: Vec<String>,

    /// Directory names excluded from scans
    pub ignore_dirs: Vec<String>,

    /// Path-alias prefixes, prefix → target directory
    pub aliases: BTreeMap<String, String>,

    /// Depth cap for transitive graph queries
    pub graph_depth: usize,

    /// Minimum pattern confidence before deep analysis runs
    pub confidence_threshold: f64,

    /// Watch-mode debounce in milliseconds
    pub debounce_ms: u64,

    /// Backup snapshots retained by `backups clean`
    pub backup_keep: usize,

    /// Session id used for report suppression, when set
    pub session_id: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            cache_dir: PathBuf::from(".triage"),
            source_extensions: ["ts", "tsx", "js", "jsx"].map(String::from).to_vec(),
            ignore_dirs: ["node_modules", "dist", "build", "coverage", "out"]
                .map(String::from)
                .to_vec(),
            aliases: BTreeMap::from([(String::from("@/"), String::from("src"))]),
            graph_depth: 10,
            confidence_threshold: 0.3,
            debounce_ms: 1000,
            backup_keep: 5,
            session_id: None,
        }
    }
}

impl PipelineConfig {
    /// Load the config for a project root
    ///
    /// Missing `triage.toml` yields the defaults; a present but invalid
    /// file is an error rather than a silent fallback.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the config file exists but cannot be
    /// read or parsed
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join(CONFIG_FILE_NAME);
        let mut config = if path.is_file() {
            let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            toml::from_str::<Self>(&raw).map_err(|source| ConfigError::Parse { path, source })?
        } else {
            Self::default()
        };
        config.root = root.to_path_buf();
        Ok(config)
    }

    /// Absolute cache directory
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(&self.cache_dir)
    }

    /// Path of a named cache artifact
    #[must_use]
    pub fn cache_path(&self, name: &str) -> PathBuf {
        self.cache_dir().join(name)
    }

    /// Graph-scan configuration derived from this config
    #[must_use]
    pub fn graph_config(&self) -> GraphConfig {
        let mut graph = GraphConfig::new(&self.root);
        graph.extensions = self.source_extensions.clone();
        graph.ignore_dirs = self.ignore_dirs.clone();
        graph.aliases = self
            .aliases
            .iter()
            .map(|(prefix, target)| (prefix.clone(), PathBuf::from(target)))
            .collect();
        graph.max_depth = self.graph_depth;
        graph
    }
}
