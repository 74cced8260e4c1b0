//! Root-cause synthesis
//!
//! Fuses the signature match with import tracing, compatibility findings
//! and optional DOM corroboration into one [`RootCauseAnalysis`]. The
//! fusion rule is the core scoring algorithm: confidence starts from the
//! pattern match and is boosted additively, capped at 1.0 —
//! [`CHAIN_CONFIDENCE_BOOST`] for a resolved import chain,
//! [`CRITICAL_COMPAT_BOOST`] for a critical compatibility finding,
//! [`DOM_STATE_BOOST`] for DOM-state corroboration. Corroboration never
//! decreases confidence.

use crate::compat::{CompatAnalyzer, CompatIssue, Severity};
use crate::dom::{DomFindings, DomSnapshotAnalyzer};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::PathBuf;
use triage_failure::{PatternMatch, TestError};
use triage_graph::{ImportChain, ImportGraph, ImportTracer};

/// Confidence added when the import trace resolves a root-cause file
pub const CHAIN_CONFIDENCE_BOOST: f64 = 0.20;

/// Confidence added when a critical compatibility finding corroborates
pub const CRITICAL_COMPAT_BOOST: f64 = 0.15;

/// Confidence added when the DOM snapshot corroborates an error state
pub const DOM_STATE_BOOST: f64 = 0.10;

/// How a suggested fix is carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixKind {
    /// A fix template can rewrite the code
    Auto,
    /// A human applies a described change
    Manual,
    /// A loose lead worth investigating
    Suggestion,
}

/// One ranked remediation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedFix {
    /// How the fix is carried out
    pub kind: FixKind,

    /// What to do
    pub description: String,

    /// Command that applies the fix, for auto fixes
    pub command: Option<String>,

    /// File the fix targets
    pub file: Option<PathBuf>,

    /// Line the fix targets
    pub line: Option<u32>,

    /// Confidence in [0, 1]
    pub confidence: f64,
}

impl SuggestedFix {
    /// Create a fix suggestion
    #[must_use]
    pub fn new(kind: FixKind, description: impl Into<String>, confidence: f64) -> Self {
        Self {
            kind,
            description: description.into(),
            command: None,
            file: None,
            line: None,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Attach the target file
    #[must_use]
    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Attach the target line
    #[must_use]
    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    /// Attach the applying command
    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }
}

/// The synthesized verdict for one failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootCauseAnalysis {
    /// The analyzed error
    pub error: TestError,

    /// The signature match this analysis started from
    pub pattern: PatternMatch,

    /// Root-cause text, most specific evidence wins
    pub root_cause: String,

    /// Fused confidence in [0, 1]
    pub confidence: f64,

    /// Human-readable corroboration trail
    pub evidence: Vec<String>,

    /// Import chain, when a trace ran
    pub import_chain: Option<ImportChain>,

    /// Compatibility findings across implicated files
    pub compat_issues: Vec<CompatIssue>,

    /// DOM findings, when the collaborator produced any
    pub dom: Option<DomFindings>,

    /// Ranked fixes: auto-fixable first, then descending confidence
    pub suggested_fixes: Vec<SuggestedFix>,
}

impl RootCauseAnalysis {
    /// Whether any suggested fix is auto-applicable
    #[must_use]
    pub fn has_auto_fix(&self) -> bool {
        self.suggested_fixes.iter().any(|f| f.kind == FixKind::Auto)
    }
}

/// Additive confidence fusion, capped at 1.0.
fn fuse_confidence(base: f64, chain: bool, critical_compat: bool, dom_state: bool) -> f64 {
    let mut confidence = base.clamp(0.0, 1.0);
    if chain {
        confidence += CHAIN_CONFIDENCE_BOOST;
    }
    if critical_compat {
        confidence += CRITICAL_COMPAT_BOOST;
    }
    if dom_state {
        confidence += DOM_STATE_BOOST;
    }
    confidence.min(1.0)
}

/// Orchestrates the per-failure analyzers
pub struct RootCauseSynthesizer<'a> {
    graph: &'a ImportGraph,
    tracer: ImportTracer<'a>,
    compat: &'a CompatAnalyzer,
    dom: Option<&'a dyn DomSnapshotAnalyzer>,
}

impl<'a> RootCauseSynthesizer<'a> {
    /// Synthesizer over a graph and a compatibility analyzer
    #[must_use]
    pub fn new(graph: &'a ImportGraph, compat: &'a CompatAnalyzer) -> Self {
        Self {
            graph,
            tracer: ImportTracer::new(graph),
            compat,
            dom: None,
        }
    }

    /// Install the DOM-snapshot collaborator
    #[must_use]
    pub fn with_dom_analyzer(mut self, dom: &'a dyn DomSnapshotAnalyzer) -> Self {
        self.dom = Some(dom);
        self
    }

    /// Synthesize one failure's root cause
    #[must_use]
    pub fn analyze(
        &self,
        test_name: &str,
        error: &TestError,
        pattern: &PatternMatch,
    ) -> RootCauseAnalysis {
        let mut evidence = Vec::new();
        let mut root_cause = match &pattern.best {
            Some(hit) => {
                evidence.push(format!(
                    "signature '{}' matched (confidence {:.2})",
                    hit.signature_id, hit.confidence
                ));
                hit.root_cause.clone()
            }
            None => String::from("no known signature matched; manual investigation required"),
        };

        // (1) Import trace, when the signature calls for one and a stack exists.
        let wants_trace = pattern
            .best
            .as_ref()
            .is_some_and(|hit| hit.requires_import_trace);
        let import_chain: Option<ImportChain> = if wants_trace && !error.stack.is_empty() {
            Some(self.tracer.trace_from_stack(&error.stack))
        } else {
            None
        };
        let chain_found = import_chain.as_ref().is_some_and(|c| c.found);
        if let Some(chain) = import_chain.as_ref().filter(|c| c.found) {
            if let (Some(file), Some(pattern_id)) =
                (chain.root_cause_file.as_ref(), chain.matched_pattern.as_deref())
            {
                let what = self
                    .tracer
                    .patterns()
                    .describe(pattern_id)
                    .unwrap_or("problematic pattern");
                root_cause = format!("{what} in {}", file.display());
                evidence.push(format!(
                    "import trace terminated at {} ({pattern_id})",
                    file.display()
                ));
            }
        }

        // (2) Compatibility scan over every implicated file.
        let compat_issues = self.scan_implicated(error, import_chain.as_ref());
        let critical_compat = compat_issues
            .iter()
            .any(|issue| issue.severity == Severity::Critical);
        for issue in compat_issues
            .iter()
            .filter(|i| i.severity == Severity::Critical)
        {
            evidence.push(format!(
                "critical compatibility issue '{}' at {}:{}",
                issue.rule_id,
                issue.file.display(),
                issue.line
            ));
        }

        // (3) DOM corroboration for UI-category failures.
        let dom_findings = if pattern.category.consults_dom() {
            self.dom.and_then(|analyzer| analyzer.analyze(test_name))
        } else {
            None
        };
        let dom_state = dom_findings.as_ref().is_some_and(|d| d.has_error_state);
        if let Some(findings) = dom_findings.as_ref().filter(|d| d.has_error_state) {
            evidence.push(String::from("DOM snapshot shows a rendered error state"));
            if let Some(first) = findings.issues.first() {
                root_cause = format!("the page rendered an error state: {first}");
            }
        }

        let confidence = fuse_confidence(
            pattern.confidence,
            chain_found,
            critical_compat,
            dom_state,
        );

        // (4) Aggregate and rank fixes.
        let suggested_fixes = self.rank_fixes(
            pattern,
            import_chain.as_ref(),
            &compat_issues,
            confidence,
            error,
        );

        tracing::debug!(
            test = test_name,
            confidence,
            chain_found,
            critical_compat,
            dom_state,
            "analysis synthesized"
        );

        RootCauseAnalysis {
            error: error.clone(),
            pattern: pattern.clone(),
            root_cause,
            confidence,
            evidence,
            import_chain,
            compat_issues,
            dom: dom_findings,
            suggested_fixes,
        }
    }

    /// Compatibility findings for every file implicated by the error,
    /// the stack and the import chain.
    fn scan_implicated(
        &self,
        error: &TestError,
        chain: Option<&ImportChain>,
    ) -> Vec<CompatIssue> {
        let mut files: BTreeSet<PathBuf> = error
            .implicated_files()
            .into_iter()
            .map(PathBuf::from)
            .collect();
        if let Some(chain) = chain {
            files.extend(chain.entries.iter().map(|e| e.file.clone()));
            if let Some(file) = &chain.root_cause_file {
                files.insert(file.clone());
            }
        }

        let mut issues = Vec::new();
        for file in files {
            // Only scan files the graph knows; stack frames can point at
            // bundler-virtual paths.
            if self.graph.node(&file).is_none() {
                continue;
            }
            issues.extend(self.compat.analyze_file(&file).issues);
        }
        issues
    }

    fn rank_fixes(
        &self,
        pattern: &PatternMatch,
        chain: Option<&ImportChain>,
        compat_issues: &[CompatIssue],
        confidence: f64,
        error: &TestError,
    ) -> Vec<SuggestedFix> {
        let mut fixes: Vec<SuggestedFix> = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut push = |fixes: &mut Vec<SuggestedFix>, fix: SuggestedFix| {
            if seen.insert(fix.description.clone()) {
                fixes.push(fix);
            }
        };

        let target_file = chain
            .and_then(|c| c.root_cause_file.clone())
            .or_else(|| error.file.clone());

        if let Some(hit) = &pattern.best {
            if let Some(template) = &hit.fix_template {
                let mut fix = SuggestedFix::new(
                    FixKind::Auto,
                    format!("rewrite via the '{template}' fix template"),
                    confidence,
                );
                if let Some(file) = &target_file {
                    fix = fix
                        .with_file(file.clone())
                        .with_command(format!(
                            "triage fix --template {template} --file {}",
                            file.display()
                        ));
                }
                push(&mut fixes, fix);
            }
            for suggestion in &hit.suggestions {
                push(
                    &mut fixes,
                    SuggestedFix::new(FixKind::Suggestion, suggestion.clone(), hit.confidence * 0.8),
                );
            }
        }

        for issue in compat_issues {
            let issue_confidence = match issue.severity {
                Severity::Critical => 0.75,
                Severity::High => 0.6,
                Severity::Medium => 0.45,
                Severity::Low => 0.3,
            };
            push(
                &mut fixes,
                SuggestedFix::new(FixKind::Manual, issue.remediation.clone(), issue_confidence)
                    .with_file(issue.file.clone())
                    .with_line(issue.line),
            );
        }

        if let Some(chain) = chain.filter(|c| c.found) {
            if chain
                .matched_pattern
                .as_deref()
                .is_some_and(|p| p.starts_with("module-scope"))
            {
                let mut fix = SuggestedFix::new(
                    FixKind::Suggestion,
                    "convert the module-scope singleton to lazy initialization",
                    0.65,
                );
                if let Some(file) = &chain.root_cause_file {
                    fix = fix.with_file(file.clone());
                }
                push(&mut fixes, fix);
            }
        }

        // Auto-fixable first, then descending confidence.
        fixes.sort_by(|a, b| {
            let auto_a = a.kind == FixKind::Auto;
            let auto_b = b.kind == FixKind::Auto;
            auto_b
                .cmp(&auto_a)
                .then(b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal))
        });
        fixes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::NoDomAnalyzer;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;
    use triage_failure::PatternLibrary;
    use triage_graph::GraphConfig;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn fixture() -> (TempDir, ImportGraph) {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(
            root,
            "src/pages/deals.tsx",
            "import { dealService } from '@/services/deal-service';\nexport default function Deals() {}\n",
        );
        write(
            root,
            "src/services/deal-service.ts",
            "import { db } from './db';\nexport const dealService = new DealService(db);\n",
        );
        write(root, "src/services/db.ts", "export const db = {};\n");
        let graph = ImportGraph::build(&GraphConfig::new(root)).unwrap();
        (dir, graph)
    }

    struct ErrorStateDom;
    impl DomSnapshotAnalyzer for ErrorStateDom {
        fn analyze(&self, _test_name: &str) -> Option<DomFindings> {
            Some(DomFindings {
                issues: vec![String::from("Application error: repository unavailable")],
                has_error_state: true,
                visible_text: String::from("Application error"),
            })
        }
    }

    #[test]
    fn full_fusion_scenario() {
        let (dir, graph) = fixture();
        let compat = CompatAnalyzer::new(dir.path());
        let synthesizer = RootCauseSynthesizer::new(&graph, &compat);
        let library = PatternLibrary::builtin();

        let error = TestError::with_stack_text(
            "AppDataSource.getRepository is not a function",
            "at render (src/pages/deals.tsx:1:1)",
        );
        let pattern = library.match_error(&error);
        let analysis = synthesizer.analyze("deals page renders", &error, &pattern);

        // 0.55 base + 0.20 chain + 0.15 critical compat
        assert!((analysis.confidence - 0.90).abs() < 1e-9);
        assert!(analysis.root_cause.contains("deal-service.ts"));
        assert!(analysis.import_chain.as_ref().unwrap().found);
        assert!(analysis.compat_issues.iter().any(|i| i.severity == Severity::Critical));
        assert!(analysis.has_auto_fix());
        assert_eq!(analysis.suggested_fixes[0].kind, FixKind::Auto);
        assert!(analysis
            .suggested_fixes
            .iter()
            .any(|f| f.description.contains("lazy initialization")));
        assert!(analysis.evidence.len() >= 3);
    }

    #[test]
    fn no_stack_means_no_trace_boost() {
        let (dir, graph) = fixture();
        let compat = CompatAnalyzer::new(dir.path());
        let synthesizer = RootCauseSynthesizer::new(&graph, &compat);
        let library = PatternLibrary::builtin();

        let error = TestError::new("AppDataSource.getRepository is not a function");
        let pattern = library.match_error(&error);
        let analysis = synthesizer.analyze("deals", &error, &pattern);

        assert!(analysis.import_chain.is_none());
        assert!((analysis.confidence - pattern.confidence).abs() < 1e-9);
    }

    #[test]
    fn unknown_pattern_keeps_zero_confidence() {
        let (dir, graph) = fixture();
        let compat = CompatAnalyzer::new(dir.path());
        let synthesizer = RootCauseSynthesizer::new(&graph, &compat);
        let library = PatternLibrary::builtin();

        let error = TestError::new("zorp gleebed the frunt");
        let pattern = library.match_error(&error);
        let analysis = synthesizer.analyze("weird", &error, &pattern);

        assert_eq!(analysis.confidence, 0.0);
        assert!(analysis.root_cause.contains("manual investigation"));
        assert!(analysis.suggested_fixes.is_empty());
    }

    #[test]
    fn dom_corroboration_boosts_and_overrides() {
        let (dir, graph) = fixture();
        let compat = CompatAnalyzer::new(dir.path());
        let dom = ErrorStateDom;
        let synthesizer = RootCauseSynthesizer::new(&graph, &compat).with_dom_analyzer(&dom);
        let library = PatternLibrary::builtin();

        let error = TestError::new("Unable to find element with selector [data-testid=deal-row]");
        let pattern = library.match_error(&error);
        let analysis = synthesizer.analyze("deal rows", &error, &pattern);

        assert!((analysis.confidence - (pattern.confidence + DOM_STATE_BOOST)).abs() < 1e-9);
        assert!(analysis.root_cause.contains("Application error"));
        assert!(analysis.dom.as_ref().unwrap().has_error_state);
    }

    #[test]
    fn dom_not_consulted_for_non_ui_categories() {
        let (dir, graph) = fixture();
        let compat = CompatAnalyzer::new(dir.path());
        let dom = ErrorStateDom;
        let synthesizer = RootCauseSynthesizer::new(&graph, &compat).with_dom_analyzer(&dom);
        let library = PatternLibrary::builtin();

        let error = TestError::new("connect ECONNREFUSED 127.0.0.1:3000");
        let pattern = library.match_error(&error);
        let analysis = synthesizer.analyze("api reachable", &error, &pattern);
        assert!(analysis.dom.is_none());
    }

    #[test]
    fn absent_dom_analyzer_degrades_gracefully() {
        let (dir, graph) = fixture();
        let compat = CompatAnalyzer::new(dir.path());
        let dom = NoDomAnalyzer;
        let synthesizer = RootCauseSynthesizer::new(&graph, &compat).with_dom_analyzer(&dom);
        let library = PatternLibrary::builtin();

        let error = TestError::new("Unable to find element with selector x");
        let pattern = library.match_error(&error);
        let analysis = synthesizer.analyze("t", &error, &pattern);
        assert!(analysis.dom.is_none());
        assert!((analysis.confidence - pattern.confidence).abs() < 1e-9);
    }

    #[test]
    fn fusion_caps_at_one() {
        assert_eq!(fuse_confidence(0.9, true, true, true), 1.0);
        assert_eq!(fuse_confidence(1.0, true, true, true), 1.0);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn corroboration_never_decreases_confidence(
                base in 0.0f64..=1.0,
                chain in any::<bool>(),
                compat in any::<bool>(),
                dom in any::<bool>(),
            ) {
                let fused = fuse_confidence(base, chain, compat, dom);
                prop_assert!(fused >= base - 1e-12);
                prop_assert!(fused <= 1.0 + 1e-12);
            }

            #[test]
            fn adding_one_signal_is_monotone(
                base in 0.0f64..=1.0,
                compat in any::<bool>(),
                dom in any::<bool>(),
            ) {
                let without = fuse_confidence(base, false, compat, dom);
                let with = fuse_confidence(base, true, compat, dom);
                prop_assert!(with >= without - 1e-12);
            }
        }
    }
}
