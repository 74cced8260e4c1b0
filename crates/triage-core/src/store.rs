//! Cache-artifact store
//!
//! Every artifact the pipeline persists — cached run results, the deep
//! analysis, the suggested fixes — is a self-contained JSON document with
//! a schema version. Missing or malformed run data is an analysis-input
//! error: reported with an actionable message, never a crash.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use triage_analysis::RootCauseAnalysis;
use triage_failure::TestResult;
use triage_fix::GeneratedFix;

/// Schema version of pipeline cache artifacts
pub const ARTIFACT_SCHEMA_VERSION: u32 = 1;

/// Cached run-results artifact
pub const RUN_RESULTS_FILE: &str = "run-results.json";

/// Cached deep-analysis artifact
pub const DEEP_ANALYSIS_FILE: &str = "deep-analysis.json";

/// Cached suggested-fixes artifact
pub const SUGGESTED_FIXES_FILE: &str = "suggested-fixes.json";

/// Errors from the artifact store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No cached artifact exists yet
    #[error("no cached {name} at {path}; run `triage analyze --results <file>` first")]
    Missing {
        /// Artifact name
        name: &'static str,
        /// Expected path
        path: PathBuf,
    },

    /// Artifact exists but cannot be decoded
    #[error("malformed {name} at {path}: {reason}; re-run `triage analyze` to regenerate it")]
    Malformed {
        /// Artifact name
        name: &'static str,
        /// Artifact path
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// File system failure
    #[error("io at {path}: {source}")]
    Io {
        /// Path being read or written
        path: PathBuf,
        /// Underlying io error
        #[source]
        source: std::io::Error,
    },
}

/// Versioned envelope every artifact is stored in
#[derive(Debug, Serialize, Deserialize)]
struct Document<T> {
    schema_version: u32,
    generated_at_ms: i64,
    data: T,
}

/// Directory-backed store of pipeline artifacts
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Store rooted at the cache directory
    #[inline]
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store directory
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist the run-results artifact
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] when the artifact cannot be written
    pub fn write_run_results(&self, results: &[TestResult]) -> Result<PathBuf, StoreError> {
        self.write(RUN_RESULTS_FILE, results)
    }

    /// Load the cached run results
    ///
    /// # Errors
    /// Returns [`StoreError::Missing`]/[`StoreError::Malformed`] per the
    /// analysis-input error taxonomy
    pub fn read_run_results(&self) -> Result<Vec<TestResult>, StoreError> {
        self.read("run results", RUN_RESULTS_FILE)
    }

    /// Persist the deep-analysis artifact
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] when the artifact cannot be written
    pub fn write_analyses(&self, analyses: &[RootCauseAnalysis]) -> Result<PathBuf, StoreError> {
        self.write(DEEP_ANALYSIS_FILE, analyses)
    }

    /// Load the cached deep analysis
    ///
    /// # Errors
    /// Returns [`StoreError::Missing`]/[`StoreError::Malformed`] per the
    /// analysis-input error taxonomy
    pub fn read_analyses(&self) -> Result<Vec<RootCauseAnalysis>, StoreError> {
        self.read("deep analysis", DEEP_ANALYSIS_FILE)
    }

    /// Persist the suggested-fixes artifact
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] when the artifact cannot be written
    pub fn write_fixes(&self, fixes: &[GeneratedFix]) -> Result<PathBuf, StoreError> {
        self.write(SUGGESTED_FIXES_FILE, fixes)
    }

    /// Load the cached suggested fixes
    ///
    /// # Errors
    /// Returns [`StoreError::Missing`]/[`StoreError::Malformed`] per the
    /// analysis-input error taxonomy
    pub fn read_fixes(&self) -> Result<Vec<GeneratedFix>, StoreError> {
        self.read("suggested fixes", SUGGESTED_FIXES_FILE)
    }

    /// Read a harness results file (the pipeline's external input)
    ///
    /// # Errors
    /// Returns [`StoreError::Missing`] when the file does not exist and
    /// [`StoreError::Malformed`] when it is not a results document
    pub fn read_results_file(path: &Path) -> Result<Vec<TestResult>, StoreError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::Missing {
                    name: "harness results",
                    path: path.to_path_buf(),
                });
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_str(&raw).map_err(|err| StoreError::Malformed {
            name: "harness results",
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
    }

    fn write<T: Serialize + ?Sized>(&self, file: &'static str, data: &T) -> Result<PathBuf, StoreError> {
        let path = self.dir.join(file);
        let document = Document {
            schema_version: ARTIFACT_SCHEMA_VERSION,
            generated_at_ms: chrono::Utc::now().timestamp_millis(),
            data,
        };
        let json = serde_json::to_string_pretty(&document).map_err(|err| StoreError::Malformed {
            name: file,
            path: path.clone(),
            reason: err.to_string(),
        })?;
        std::fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;
        std::fs::write(&path, json).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    fn read<T: DeserializeOwned>(
        &self,
        name: &'static str,
        file: &'static str,
    ) -> Result<T, StoreError> {
        let path = self.dir.join(file);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::Missing { name, path });
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        let document: Document<T> =
            serde_json::from_str(&raw).map_err(|err| StoreError::Malformed {
                name,
                path: path.clone(),
                reason: err.to_string(),
            })?;
        if document.schema_version != ARTIFACT_SCHEMA_VERSION {
            return Err(StoreError::Malformed {
                name,
                path,
                reason: format!(
                    "schema version {} (expected {})",
                    document.schema_version, ARTIFACT_SCHEMA_VERSION
                ),
            });
        }
        Ok(document.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use triage_failure::{TestError, TestStatus};

    fn sample_results() -> Vec<TestResult> {
        vec![TestResult {
            name: String::from("deals page renders"),
            file: PathBuf::from("tests/deals.spec.ts"),
            status: TestStatus::Failed,
            error: Some(TestError::new("boom")),
            duration_ms: 1500,
        }]
    }

    #[test]
    fn run_results_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join(".triage"));

        store.write_run_results(&sample_results()).unwrap();
        let loaded = store.read_run_results().unwrap();
        assert_eq!(loaded, sample_results());
    }

    #[test]
    fn missing_artifact_has_actionable_message() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join(".triage"));

        let err = store.read_run_results().unwrap_err();
        assert!(matches!(err, StoreError::Missing { .. }));
        assert!(err.to_string().contains("triage analyze"));
    }

    #[test]
    fn malformed_artifact_is_reported_not_a_crash() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join(".triage");
        std::fs::create_dir_all(&cache).unwrap();
        std::fs::write(cache.join(RUN_RESULTS_FILE), "{not json").unwrap();

        let store = ArtifactStore::new(&cache);
        let err = store.read_run_results().unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));
        assert!(err.to_string().contains("re-run"));
    }

    #[test]
    fn schema_drift_is_malformed() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join(".triage");
        let store = ArtifactStore::new(&cache);
        store.write_run_results(&sample_results()).unwrap();

        let path = cache.join(RUN_RESULTS_FILE);
        let drifted = std::fs::read_to_string(&path)
            .unwrap()
            .replace("\"schema_version\": 1", "\"schema_version\": 99");
        std::fs::write(&path, drifted).unwrap();

        assert!(matches!(
            store.read_run_results(),
            Err(StoreError::Malformed { .. })
        ));
    }

    #[test]
    fn results_file_reader_reports_missing_and_malformed() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("run.json");
        assert!(matches!(
            ArtifactStore::read_results_file(&missing),
            Err(StoreError::Missing { .. })
        ));

        std::fs::write(&missing, "[{\"bad\": true}]").unwrap();
        assert!(matches!(
            ArtifactStore::read_results_file(&missing),
            Err(StoreError::Malformed { .. })
        ));

        std::fs::write(&missing, serde_json::to_string(&sample_results()).unwrap()).unwrap();
        assert_eq!(
            ArtifactStore::read_results_file(&missing).unwrap(),
            sample_results()
        );
    }
}
