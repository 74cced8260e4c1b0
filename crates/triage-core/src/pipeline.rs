//! The single-flow pipeline
//!
//! One test run is analyzed start to finish before the next is accepted:
//! dedup → signature match → (above threshold) synthesis → fix generation
//! → snapshot/diff → session filtering. The pipeline owns no ambient
//! state; graph, analyzers and stores are constructed per run from the
//! config and the cache directory.

use crate::config::PipelineConfig;
use crate::store::{ArtifactStore, StoreError};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use triage_analysis::{
    CompatAnalyzer, DomSnapshotAnalyzer, RootCauseAnalysis, RootCauseSynthesizer,
};
use triage_failure::{deduplicate, DedupReport, PatternLibrary, PatternMatch, TestError, TestResult};
use triage_fix::{FixGenerator, GeneratedFix};
use triage_graph::{GraphCache, GraphError};
use triage_report::{
    compress, diff, CategoryTally, DiffReport, NoveltyReport, ReportDigest, RunSnapshot,
    SessionError, SessionStore, SnapshotError, SnapshotStore,
};

/// Graph cache artifact
pub const GRAPH_CACHE_FILE: &str = "import-graph.json";

/// Last-snapshot artifact
pub const SNAPSHOT_FILE: &str = "last-snapshot.json";

/// Session state directory
pub const SESSIONS_DIR: &str = "sessions";

/// Errors from a pipeline run
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Import graph could not be built or cached
    #[error("import graph: {0}")]
    Graph(#[from] GraphError),

    /// Cache artifact could not be read or written
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Snapshot could not be persisted
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// Session state could not be persisted
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Everything one run produced
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    /// Tests executed
    pub total: usize,

    /// Deduplication outcome
    pub dedup: DedupReport,

    /// One analysis per unique failure, input order
    pub analyses: Vec<RootCauseAnalysis>,

    /// Generated auto fixes
    pub fixes: Vec<GeneratedFix>,

    /// This run's snapshot
    pub snapshot: RunSnapshot,

    /// Delta against the previous run
    pub diff: DiffReport,

    /// Session filtering outcome, when a session id is configured
    pub novelty: Option<NoveltyReport>,

    /// Compressed status line
    pub compact: String,
}

/// The pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
    library: PatternLibrary,
    dom: Option<Box<dyn DomSnapshotAnalyzer>>,
}

impl Pipeline {
    /// Pipeline with the builtin signature library
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            library: PatternLibrary::builtin(),
            dom: None,
        }
    }

    /// Replace the signature library
    #[must_use]
    pub fn with_library(mut self, library: PatternLibrary) -> Self {
        self.library = library;
        self
    }

    /// Install a DOM-snapshot collaborator
    #[must_use]
    pub fn with_dom_analyzer(mut self, dom: Box<dyn DomSnapshotAnalyzer>) -> Self {
        self.dom = Some(dom);
        self
    }

    /// Pipeline configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Analyze one run's results
    ///
    /// # Errors
    /// Returns [`PipelineError`] when the graph cannot be built or an
    /// artifact cannot be persisted; per-failure analysis itself never
    /// errors — exhaustion and no-match outcomes are valid results
    pub fn run(
        &self,
        results: &[TestResult],
        force_rebuild: bool,
    ) -> Result<PipelineReport, PipelineError> {
        let span = tracing::info_span!("pipeline_run", tests = results.len());
        let _guard = span.enter();

        // Fingerprint and deduplicate the failures.
        let mut errors: Vec<TestError> = Vec::new();
        let mut names: Vec<String> = Vec::new();
        for result in results.iter().filter(|r| r.is_failed()) {
            if let Some(error) = &result.error {
                errors.push(error.clone());
                names.push(result.name.clone());
            }
        }
        let dedup = deduplicate(&errors, &names);
        tracing::info!(
            unique = dedup.unique_count,
            duplicates = dedup.duplicate_count,
            "failures deduplicated"
        );

        // Build (or reuse) the import graph and the per-run analyzers.
        let graph_cache = GraphCache::new(self.config.cache_path(GRAPH_CACHE_FILE));
        let graph = graph_cache.build(&self.config.graph_config(), force_rebuild)?;
        let compat = CompatAnalyzer::new(&self.config.root);
        let mut synthesizer = RootCauseSynthesizer::new(&graph, &compat);
        if let Some(dom) = self.dom.as_deref() {
            synthesizer = synthesizer.with_dom_analyzer(dom);
        }
        let generator = FixGenerator::new(&self.config.root);

        // Per-failure analysis and fix generation.
        let mut analyses: Vec<RootCauseAnalysis> = Vec::new();
        let mut fixes: Vec<GeneratedFix> = Vec::new();
        let mut categories: BTreeMap<String, CategoryTally> = BTreeMap::new();
        let mut fixable_count = 0usize;

        for unique in &dedup.unique {
            let pattern = self.library.match_error(&unique.error);
            let analysis = if pattern.confidence >= self.config.confidence_threshold {
                synthesizer.analyze(&unique.name, &unique.error, &pattern)
            } else {
                shallow_analysis(&unique.error, &pattern)
            };

            let generated = generator.generate_fixes(&analysis);
            let tally = categories
                .entry(analysis.pattern.category.as_str().to_string())
                .or_default();
            tally.count += 1;
            if !generated.is_empty() {
                tally.fixable += 1;
                fixable_count += 1;
            }
            fixes.extend(generated);
            analyses.push(analysis);
        }

        // Snapshot, diff, compress.
        let failed_tests: BTreeSet<String> = results
            .iter()
            .filter(|r| r.is_failed())
            .map(|r| r.name.clone())
            .collect();
        let snapshot = RunSnapshot::capture(results.len(), failed_tests, categories, fixable_count);
        let snapshot_store = SnapshotStore::new(self.config.cache_path(SNAPSHOT_FILE));
        let previous = snapshot_store.load();
        let delta = diff(&snapshot, previous.as_ref());
        snapshot_store.store(&snapshot)?;
        let compact = compress(&snapshot);

        // Session filtering, when configured.
        let novelty = match &self.config.session_id {
            Some(session_id) => {
                let digest = build_digest(&snapshot, &analyses, &fixes, &dedup);
                let sessions = SessionStore::new(self.config.cache_path(SESSIONS_DIR));
                Some(sessions.filter_report(session_id, &digest)?)
            }
            None => None,
        };

        // Persist the cache artifacts.
        let store = ArtifactStore::new(self.config.cache_dir());
        store.write_run_results(results)?;
        store.write_analyses(&analyses)?;
        store.write_fixes(&fixes)?;

        tracing::info!(status = %snapshot.status, %compact, "run analyzed");
        Ok(PipelineReport {
            total: results.len(),
            dedup,
            analyses,
            fixes,
            snapshot,
            diff: delta,
            novelty,
            compact,
        })
    }
}

/// Analysis for a failure below the deep-analysis threshold: the pattern
/// match stands alone, with no corroborating signals.
fn shallow_analysis(error: &TestError, pattern: &PatternMatch) -> RootCauseAnalysis {
    let root_cause = pattern
        .best
        .as_ref()
        .map(|hit| hit.root_cause.clone())
        .unwrap_or_else(|| {
            String::from("no known signature matched; manual investigation required")
        });
    RootCauseAnalysis {
        error: error.clone(),
        pattern: pattern.clone(),
        root_cause,
        confidence: pattern.confidence,
        evidence: Vec::new(),
        import_chain: None,
        compat_issues: Vec::new(),
        dom: None,
        suggested_fixes: Vec::new(),
    }
}

/// Digest of what this run would communicate to the session consumer.
fn build_digest(
    snapshot: &RunSnapshot,
    analyses: &[RootCauseAnalysis],
    fixes: &[GeneratedFix],
    dedup: &DedupReport,
) -> ReportDigest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(snapshot.hash.as_bytes());
    for analysis in analyses {
        hasher.update(analysis.root_cause.as_bytes());
        hasher.update(b"\0");
    }
    let report_hash = hex::encode(hasher.finalize().as_bytes());

    let patterns = analyses
        .iter()
        .filter_map(|a| a.pattern.best.as_ref())
        .map(|hit| hit.signature_id.clone())
        .collect();
    let files = analyses
        .iter()
        .filter_map(|a| {
            a.import_chain
                .as_ref()
                .and_then(|c| c.root_cause_file.as_ref())
                .map(|f| f.display().to_string())
        })
        .collect();
    let root_causes = analyses.iter().map(|a| a.root_cause.clone()).collect();
    let fix_ids = fixes
        .iter()
        .map(|f| format!("{}:{}", f.template_id, f.file.display()))
        .collect();
    let fingerprints = dedup
        .unique
        .iter()
        .map(|u| u.fingerprint.to_string())
        .collect();

    ReportDigest {
        report_hash,
        patterns,
        files,
        root_causes,
        fixes: fix_ids,
        fingerprints,
    }
}
