//! Failure model for the triage pipeline
//!
//! Provides the immutable [`TestError`]/[`TestResult`] input model consumed
//! from the test harness, stable [`Fingerprint`] deduplication, and the
//! ordered failure-signature library ([`PatternLibrary`]) that classifies
//! errors into a [`FailureCategory`] with a confidence score.

pub mod error;
pub mod fingerprint;
pub mod patterns;

pub use error::{StackFrame, TestError, TestResult, TestStatus};
pub use fingerprint::{deduplicate, DedupReport, Fingerprint, UniqueFailure};
pub use patterns::{
    FailureCategory, PatternLibrary, PatternMatch, Signature, SignatureError, SignatureHit,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
