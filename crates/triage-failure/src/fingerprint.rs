//! Error fingerprinting and deduplication
//!
//! Provides [`Fingerprint`], a strongly-typed 32-byte hash (Blake3) of a
//! normalized error. Volatile substrings (timestamps, addresses, positions
//! that vary run-to-run) are stripped before hashing so the same underlying
//! bug collapses to one fingerprint across runs.

use crate::error::TestError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::{self, Display, Formatter};

/// How many leading stack frames participate in a fingerprint.
///
/// Deeper frames are runner plumbing and churn across runs.
const FRAME_PREFIX: usize = 5;

/// A 32-byte fingerprint of a normalized error (Blake3)
///
/// Deduplication key: many [`TestError`]s map to one fingerprint.
/// Immutable and cheap to clone (Copy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Create from raw bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Compute the fingerprint of a test error
    #[must_use]
    pub fn of(error: &TestError) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(normalize_message(&error.message).as_bytes());
        for frame in error.stack.iter().take(FRAME_PREFIX) {
            hasher.update(frame.function.as_bytes());
            if let Some(file) = &frame.file {
                hasher.update(file.to_string_lossy().as_bytes());
            }
            // line/column intentionally excluded: they drift run-to-run
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Short string representation (first 16 hex chars)
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl serde::Serialize for Fingerprint {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Fingerprint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s: String = serde::Deserialize::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        if bytes.len() != 32 {
            return Err(serde::de::Error::invalid_length(bytes.len(), &"32 bytes"));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

/// Volatile substrings replaced before hashing, applied in order.
static VOLATILE: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        // ISO-8601 timestamps
        (
            Regex::new(r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?")
                .expect("timestamp regex"),
            "<timestamp>",
        ),
        // Epoch milliseconds
        (Regex::new(r"\b1\d{12}\b").expect("epoch regex"), "<epoch>"),
        // UUIDs
        (
            Regex::new(r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b")
                .expect("uuid regex"),
            "<uuid>",
        ),
        // Heap/object addresses
        (Regex::new(r"0x[0-9a-fA-F]+").expect("addr regex"), "<addr>"),
        // Trailing :line:col positions
        (Regex::new(r":\d+:\d+\b").expect("position regex"), ""),
        // Durations ("timed out after 5000ms", "took 1.2 s")
        (
            Regex::new(r"\b\d+(?:\.\d+)?\s*(?:ms|s)\b").expect("duration regex"),
            "<duration>",
        ),
    ]
});

/// Strip non-deterministic substrings from a failure message.
#[must_use]
pub fn normalize_message(message: &str) -> String {
    let mut out = message.to_string();
    for (pattern, replacement) in VOLATILE.iter() {
        out = pattern.replace_all(&out, *replacement).into_owned();
    }
    out
}

/// One unique failure after deduplication
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct UniqueFailure {
    /// Deduplication key
    pub fingerprint: Fingerprint,

    /// Name of the representative test (first occurrence in input order)
    pub name: String,

    /// Representative error
    pub error: TestError,

    /// Names of every test that produced this fingerprint, input order
    pub occurrences: Vec<String>,
}

/// Result of deduplicating a run's failures
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DedupReport {
    /// One entry per fingerprint, ordered by first occurrence
    pub unique: Vec<UniqueFailure>,

    /// Errors seen
    pub total_count: usize,

    /// Distinct fingerprints
    pub unique_count: usize,

    /// `total_count - unique_count`
    pub duplicate_count: usize,

    /// Fraction of the input that was duplicate noise, in [0, 1]
    pub deduplication_ratio: f64,
}

/// Collapse duplicate failures into unique clusters.
///
/// `names` parallels `errors`; the first occurrence in input order is kept
/// as the representative of a duplicate group. A missing name falls back to
/// the error index.
#[must_use]
pub fn deduplicate(errors: &[TestError], names: &[String]) -> DedupReport {
    let mut unique: Vec<UniqueFailure> = Vec::new();
    let mut index: indexmap::IndexMap<Fingerprint, usize> = indexmap::IndexMap::new();

    for (i, error) in errors.iter().enumerate() {
        let fingerprint = Fingerprint::of(error);
        let name = names
            .get(i)
            .cloned()
            .unwrap_or_else(|| format!("error #{i}"));

        match index.get(&fingerprint) {
            Some(&slot) => unique[slot].occurrences.push(name),
            None => {
                index.insert(fingerprint, unique.len());
                unique.push(UniqueFailure {
                    fingerprint,
                    name: name.clone(),
                    error: error.clone(),
                    occurrences: vec![name],
                });
            }
        }
    }

    let total_count = errors.len();
    let unique_count = unique.len();
    let duplicate_count = total_count - unique_count;
    let deduplication_ratio = if total_count == 0 {
        0.0
    } else {
        duplicate_count as f64 / total_count as f64
    };

    tracing::debug!(total_count, unique_count, "deduplicated failures");

    DedupReport {
        unique,
        total_count,
        unique_count,
        duplicate_count,
        deduplication_ratio,
    }
}
