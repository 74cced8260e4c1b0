//! Analysis layer of the triage pipeline
//!
//! [`CompatAnalyzer`] scans individual source files for runtime-incompatible
//! API usage via a compiled rule registry; [`RootCauseSynthesizer`] fuses a
//! signature match with import tracing, compatibility findings and an
//! optional DOM-snapshot collaborator into one scored
//! [`RootCauseAnalysis`].

pub mod compat;
pub mod dom;
pub mod synthesizer;

pub use compat::{
    CompatAnalyzer, CompatIssue, CompatRule, CompatRules, FileCompatReport, RuleError, Severity,
};
pub use dom::{DomFindings, DomSnapshotAnalyzer, NoDomAnalyzer};
pub use synthesizer::{
    FixKind, RootCauseAnalysis, RootCauseSynthesizer, SuggestedFix, CHAIN_CONFIDENCE_BOOST,
    CRITICAL_COMPAT_BOOST, DOM_STATE_BOOST,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
