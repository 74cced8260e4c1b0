//! Failure-signature matching
//!
//! An ordered library of known failure signatures. Each signature carries a
//! closed [`FailureCategory`], a root-cause template, an optional fix
//! template id and a `requires_import_trace` flag. Matching an unknown
//! message yields category [`FailureCategory::Unknown`] with confidence 0 —
//! callers must treat that as "manual investigation required", not an error.

use crate::error::TestError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Specificity multiplier for exact substring matches
const SUBSTRING_SPECIFICITY: f64 = 1.0;

/// Specificity multiplier for regex matches (looser than a literal)
const REGEX_SPECIFICITY: f64 = 0.85;

/// Closed failure taxonomy
///
/// Every classification decision lands on exactly one variant; partial
/// matches never silently default to a wrong category — they fall through
/// to [`FailureCategory::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Server-only API reached browser-executed code
    BrowserCompat,
    /// Test or operation exceeded its time budget
    Timeout,
    /// UI element lookup failed
    ElementNotFound,
    /// Network-level failure (refused, reset, DNS)
    Network,
    /// Value assertion mismatch
    Assertion,
    /// Module/import resolution failure
    ModuleResolution,
    /// No signature matched
    Unknown,
}

impl FailureCategory {
    /// Stable identifier used in compressed reports and cache artifacts
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BrowserCompat => "browser_compat",
            Self::Timeout => "timeout",
            Self::ElementNotFound => "element_not_found",
            Self::Network => "network",
            Self::Assertion => "assertion",
            Self::ModuleResolution => "module_resolution",
            Self::Unknown => "unknown",
        }
    }

    /// Whether failures in this category warrant a DOM-snapshot consult
    #[must_use]
    pub const fn consults_dom(&self) -> bool {
        matches!(self, Self::ElementNotFound | Self::Assertion)
    }

    /// All known categories, report ordering
    pub const ALL: &'static [Self] = &[
        Self::BrowserCompat,
        Self::Timeout,
        Self::ElementNotFound,
        Self::Network,
        Self::Assertion,
        Self::ModuleResolution,
        Self::Unknown,
    ];
}

impl Display for FailureCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a signature matches a message
#[derive(Debug, Clone)]
enum SignatureKind {
    /// Exact substring containment
    Substring(String),
    /// Compiled regular expression
    Pattern(Regex),
}

/// One known failure signature
#[derive(Debug, Clone)]
pub struct Signature {
    /// Stable signature id
    pub id: String,

    kind: SignatureKind,

    /// Category assigned on match
    pub category: FailureCategory,

    /// Root-cause template; `$1`… expand from regex capture groups
    pub root_cause: String,

    /// Fix template id, when an automatic rewrite exists
    pub fix_template: Option<String>,

    /// Whether a confirmed diagnosis needs an import trace
    pub requires_import_trace: bool,

    /// Manual suggestions attached on match
    pub suggestions: Vec<String>,

    /// Confidence before the specificity multiplier, in [0, 1]
    pub base_confidence: f64,
}

impl Signature {
    /// Create a substring signature
    #[must_use]
    pub fn substring(
        id: impl Into<String>,
        needle: impl Into<String>,
        category: FailureCategory,
        root_cause: impl Into<String>,
        base_confidence: f64,
    ) -> Self {
        Self {
            id: id.into(),
            kind: SignatureKind::Substring(needle.into()),
            category,
            root_cause: root_cause.into(),
            fix_template: None,
            requires_import_trace: false,
            suggestions: Vec::new(),
            base_confidence: base_confidence.clamp(0.0, 1.0),
        }
    }

    /// Create a regex signature
    ///
    /// # Errors
    /// Returns [`SignatureError::InvalidPattern`] if the pattern fails to compile
    pub fn pattern(
        id: impl Into<String>,
        pattern: &str,
        category: FailureCategory,
        root_cause: impl Into<String>,
        base_confidence: f64,
    ) -> Result<Self, SignatureError> {
        let id = id.into();
        let compiled = Regex::new(pattern).map_err(|source| SignatureError::InvalidPattern {
            id: id.clone(),
            source,
        })?;
        Ok(Self {
            id,
            kind: SignatureKind::Pattern(compiled),
            category,
            root_cause: root_cause.into(),
            fix_template: None,
            requires_import_trace: false,
            suggestions: Vec::new(),
            base_confidence: base_confidence.clamp(0.0, 1.0),
        })
    }

    /// Attach a fix template id
    #[must_use]
    pub fn with_fix_template(mut self, template: impl Into<String>) -> Self {
        self.fix_template = Some(template.into());
        self
    }

    /// Flag that a confirmed diagnosis needs an import trace
    #[must_use]
    pub fn needs_import_trace(mut self) -> Self {
        self.requires_import_trace = true;
        self
    }

    /// Attach manual suggestions
    #[must_use]
    pub fn with_suggestions<I, S>(mut self, suggestions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suggestions = suggestions.into_iter().map(Into::into).collect();
        self
    }

    /// Match against a message, returning the scored hit
    fn evaluate(&self, message: &str) -> Option<SignatureHit> {
        let (specificity, root_cause) = match &self.kind {
            SignatureKind::Substring(needle) => {
                if !message.contains(needle.as_str()) {
                    return None;
                }
                (SUBSTRING_SPECIFICITY, self.root_cause.clone())
            }
            SignatureKind::Pattern(pattern) => {
                let captures = pattern.captures(message)?;
                let mut rendered = String::new();
                captures.expand(&self.root_cause, &mut rendered);
                (REGEX_SPECIFICITY, rendered)
            }
        };

        Some(SignatureHit {
            signature_id: self.id.clone(),
            root_cause,
            fix_template: self.fix_template.clone(),
            requires_import_trace: self.requires_import_trace,
            suggestions: self.suggestions.clone(),
            confidence: (self.base_confidence * specificity).clamp(0.0, 1.0),
        })
    }
}

/// A scored signature match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureHit {
    /// Which signature fired
    pub signature_id: String,

    /// Rendered root-cause text
    pub root_cause: String,

    /// Fix template id, when one exists
    pub fix_template: Option<String>,

    /// Whether the diagnosis should be confirmed by an import trace
    pub requires_import_trace: bool,

    /// Manual suggestions
    pub suggestions: Vec<String>,

    /// Match confidence in [0, 1]
    pub confidence: f64,
}

/// Result of matching one error against the library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    /// Assigned category ([`FailureCategory::Unknown`] when nothing fired)
    pub category: FailureCategory,

    /// Confidence in [0, 1]; 0 when nothing fired
    pub confidence: f64,

    /// Best hit, absent when nothing fired
    pub best: Option<SignatureHit>,
}

impl PatternMatch {
    /// The no-match result: manual investigation required
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            category: FailureCategory::Unknown,
            confidence: 0.0,
            best: None,
        }
    }
}

/// Errors from building a signature library
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    /// Signature pattern failed to compile
    #[error("invalid pattern for signature '{id}': {source}")]
    InvalidPattern {
        /// Offending signature id
        id: String,
        /// Compile error
        source: regex::Error,
    },
}

/// Ordered library of failure signatures
///
/// Explicitly constructed and passed to components; there is no ambient
/// global registry. Order matters only for ties — the highest-confidence
/// hit wins, earlier signatures win equal scores.
#[derive(Debug, Clone)]
pub struct PatternLibrary {
    signatures: Vec<Signature>,
}

impl PatternLibrary {
    /// Empty library
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            signatures: Vec::new(),
        }
    }

    /// The builtin signature set
    #[must_use]
    pub fn builtin() -> Self {
        let mut lib = Self::new();

        lib.push(
            Signature::substring(
                "datasource-not-initialized",
                ".getRepository is not a function",
                FailureCategory::BrowserCompat,
                "a server data source is constructed in browser-bundled code, so its \
                 repository accessor is undefined at runtime",
                0.55,
            )
            .needs_import_trace()
            .with_fix_template("lazy-singleton")
            .with_suggestions([
                "move data access behind a server route",
                "convert the module-scope service to a lazy getter",
            ]),
        );

        lib.push(
            Signature::substring(
                "window-not-defined",
                "window is not defined",
                FailureCategory::BrowserCompat,
                "browser-only global accessed while rendering on the server",
                0.7,
            )
            .with_suggestions(["guard the access with a runtime environment check"]),
        );

        lib.push(
            Signature::substring(
                "document-not-defined",
                "document is not defined",
                FailureCategory::BrowserCompat,
                "DOM global accessed while rendering on the server",
                0.7,
            )
            .with_suggestions(["guard the access with a runtime environment check"]),
        );

        lib.push(
            Signature::substring(
                "connection-refused",
                "ECONNREFUSED",
                FailureCategory::Network,
                "the application server was not reachable during the test run",
                0.8,
            )
            .with_suggestions(["confirm the dev server is running before the suite starts"]),
        );

        // Compiled from literals; compile failure here is a programmer error.
        let patterned = [
            Signature::pattern(
                "module-not-found",
                r"Cannot find (?:module|package) '([^']+)'",
                FailureCategory::ModuleResolution,
                "import of '$1' does not resolve from the importing file",
                0.85,
            ),
            Signature::pattern(
                "element-not-found",
                r"(?i)unable to find (?:an? )?element|no element matches|element.*not.*found",
                FailureCategory::ElementNotFound,
                "the expected element never appeared in the rendered output",
                0.55,
            ),
            Signature::pattern(
                "locator-wait",
                r"(?i)waiting for (?:selector|locator|element)",
                FailureCategory::ElementNotFound,
                "the locator never resolved before the wait expired",
                0.5,
            ),
            Signature::pattern(
                "test-timeout",
                r"(?i)\btimed?\s?out\b",
                FailureCategory::Timeout,
                "the operation exceeded its time budget",
                0.5,
            ),
            Signature::pattern(
                "fetch-failed",
                r"(?i)fetch failed|network ?error|ERR_CONNECTION",
                FailureCategory::Network,
                "a network request failed during the test",
                0.6,
            ),
            Signature::pattern(
                "assertion-mismatch",
                r"(?i)expected .{1,120}?(?:to (?:be|equal|contain|have)|but got|received)",
                FailureCategory::Assertion,
                "an asserted value did not match",
                0.45,
            ),
        ];
        for sig in patterned {
            lib.push(sig.expect("builtin signature pattern"));
        }

        lib
    }

    /// Append a signature
    #[inline]
    pub fn push(&mut self, signature: Signature) {
        self.signatures.push(signature);
    }

    /// Number of signatures
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    /// Whether the library is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Match an error against the library
    #[must_use]
    pub fn match_error(&self, error: &TestError) -> PatternMatch {
        let mut best: Option<(FailureCategory, SignatureHit)> = None;

        for signature in &self.signatures {
            if let Some(hit) = signature.evaluate(&error.message) {
                let better = match &best {
                    Some((_, current)) => hit.confidence > current.confidence,
                    None => true,
                };
                if better {
                    best = Some((signature.category, hit));
                }
            }
        }

        match best {
            Some((category, hit)) => {
                tracing::debug!(
                    signature = %hit.signature_id,
                    %category,
                    confidence = hit.confidence,
                    "signature matched"
                );
                PatternMatch {
                    category,
                    confidence: hit.confidence,
                    best: Some(hit),
                }
            }
            None => PatternMatch::unknown(),
        }
    }
}

impl Default for PatternLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn datasource_signature_fires_with_trace_flag() {
        let library = PatternLibrary::builtin();
        let error = TestError::new("AppDataSource.getRepository is not a function");
        let result = library.match_error(&error);

        assert_eq!(result.category, FailureCategory::BrowserCompat);
        assert!(result.confidence >= 0.3);
        let hit = result.best.unwrap();
        assert!(hit.requires_import_trace);
        assert_eq!(hit.fix_template.as_deref(), Some("lazy-singleton"));
    }

    #[test]
    fn unknown_message_is_manual_investigation() {
        let library = PatternLibrary::builtin();
        let result = library.match_error(&TestError::new("zorp gleebed the frunt"));
        assert_eq!(result.category, FailureCategory::Unknown);
        assert_eq!(result.confidence, 0.0);
        assert!(result.best.is_none());
    }

    #[test]
    fn substring_beats_looser_regex() {
        // "ECONNREFUSED ... timed out" matches both the network substring and
        // the timeout regex; the substring hit carries more specificity.
        let library = PatternLibrary::builtin();
        let error = TestError::new("connect ECONNREFUSED 127.0.0.1:3000 (timed out)");
        let result = library.match_error(&error);
        assert_eq!(result.category, FailureCategory::Network);
        assert_eq!(result.best.unwrap().signature_id, "connection-refused");
    }

    #[test]
    fn module_not_found_interpolates_capture() {
        let library = PatternLibrary::builtin();
        let error = TestError::new("Error: Cannot find module '@/lib/data-source'");
        let result = library.match_error(&error);
        assert_eq!(result.category, FailureCategory::ModuleResolution);
        assert!(result
            .best
            .unwrap()
            .root_cause
            .contains("'@/lib/data-source'"));
    }

    #[test]
    fn timeout_matches_both_spellings() {
        let library = PatternLibrary::builtin();
        for message in ["Test timed out in 5000ms", "operation timeout exceeded"] {
            let result = library.match_error(&TestError::new(message));
            assert_eq!(result.category, FailureCategory::Timeout, "{message}");
        }
    }

    #[test]
    fn confidence_stays_in_unit_interval() {
        let library = PatternLibrary::builtin();
        for message in [
            "AppDataSource.getRepository is not a function",
            "window is not defined",
            "Unable to find element with selector [data-testid=deal-row]",
            "expected 3 to be 5",
        ] {
            let result = library.match_error(&TestError::new(message));
            assert!((0.0..=1.0).contains(&result.confidence), "{message}");
        }
    }

    #[test]
    fn invalid_custom_pattern_is_reported() {
        let result = Signature::pattern(
            "broken",
            "unclosed(",
            FailureCategory::Unknown,
            "never",
            0.5,
        );
        assert!(matches!(result, Err(SignatureError::InvalidPattern { .. })));
    }

    #[test]
    fn category_identifiers_are_stable() {
        assert_eq!(FailureCategory::BrowserCompat.as_str(), "browser_compat");
        assert_eq!(FailureCategory::Unknown.as_str(), "unknown");
        assert!(FailureCategory::ElementNotFound.consults_dom());
        assert!(!FailureCategory::Network.consults_dom());
    }
}
