//! Session-aware suppression
//!
//! A [`SessionContext`] records, per session id, everything already
//! communicated to the downstream consumer: pattern ids, files, root
//! causes, fixes and error fingerprints, plus the hash of the last report
//! sent. Filtering a new report against the context removes known facts,
//! bounding the total communicated volume over a long-running session to
//! strictly new information. Sessions expire after a time-to-live and can
//! be cleared explicitly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Schema version of the persisted session document
pub const SESSION_SCHEMA_VERSION: u32 = 1;

/// Session time-to-live (24 hours)
pub const SESSION_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// Errors from session persistence
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Session file could not be read or written
    #[error("session io at {path}: {source}")]
    Io {
        /// Session file path
        path: PathBuf,
        /// Underlying io error
        #[source]
        source: std::io::Error,
    },

    /// Session file could not be decoded
    #[error("session decode: {0}")]
    Decode(#[from] serde_json::Error),
}

/// What a report wants to communicate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDigest {
    /// Hash of the full report
    pub report_hash: String,

    /// Pattern ids that fired
    pub patterns: Vec<String>,

    /// Files implicated
    pub files: Vec<String>,

    /// Root-cause texts
    pub root_causes: Vec<String>,

    /// Fix descriptions
    pub fixes: Vec<String>,

    /// Error fingerprints
    pub fingerprints: Vec<String>,
}

/// A filtered report: only what the session has not seen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoveltyReport {
    /// Identical report hash to the last one sent; everything suppressed
    pub unchanged: bool,

    /// Pattern ids not previously communicated
    pub new_patterns: Vec<String>,

    /// Files not previously communicated
    pub new_files: Vec<String>,

    /// Root causes not previously communicated
    pub new_root_causes: Vec<String>,

    /// Fixes not previously communicated
    pub new_fixes: Vec<String>,

    /// Fingerprints not previously communicated
    pub new_fingerprints: Vec<String>,

    /// Items suppressed because the session already knew them
    pub already_known: usize,
}

impl NoveltyReport {
    /// The one-field unchanged acknowledgement
    #[must_use]
    pub fn unchanged() -> Self {
        Self {
            unchanged: true,
            new_patterns: Vec::new(),
            new_files: Vec::new(),
            new_root_causes: Vec::new(),
            new_fixes: Vec::new(),
            new_fingerprints: Vec::new(),
            already_known: 0,
        }
    }

    /// Whether anything new would be communicated
    #[must_use]
    pub fn has_news(&self) -> bool {
        !self.unchanged
            && (!self.new_patterns.is_empty()
                || !self.new_files.is_empty()
                || !self.new_root_causes.is_empty()
                || !self.new_fixes.is_empty()
                || !self.new_fingerprints.is_empty())
    }
}

/// Per-session record of previously communicated facts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    /// Persisted document schema version
    pub schema_version: u32,

    /// Session id
    pub session_id: String,

    /// Creation time (epoch millis)
    pub created_at_ms: i64,

    /// Last update time (epoch millis)
    pub updated_at_ms: i64,

    /// Pattern ids already communicated
    pub known_patterns: BTreeSet<String>,

    /// Files already communicated
    pub known_files: BTreeSet<String>,

    /// Root causes already communicated
    pub known_root_causes: BTreeSet<String>,

    /// Fixes already communicated
    pub known_fixes: BTreeSet<String>,

    /// Error fingerprints already communicated
    pub known_fingerprints: BTreeSet<String>,

    /// Hash of the last report sent
    pub last_report_hash: Option<String>,
}

impl SessionContext {
    /// Fresh session
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            schema_version: SESSION_SCHEMA_VERSION,
            session_id: session_id.into(),
            created_at_ms: now,
            updated_at_ms: now,
            known_patterns: BTreeSet::new(),
            known_files: BTreeSet::new(),
            known_root_causes: BTreeSet::new(),
            known_fixes: BTreeSet::new(),
            known_fingerprints: BTreeSet::new(),
            last_report_hash: None,
        }
    }

    /// Whether this session has outlived the time-to-live
    #[must_use]
    pub fn is_expired(&self, ttl_ms: i64) -> bool {
        chrono::Utc::now().timestamp_millis() - self.updated_at_ms > ttl_ms
    }

    /// Filter a report down to what this session has not seen
    ///
    /// An identical report hash to the last one sent collapses to the
    /// one-field unchanged acknowledgement. Otherwise every digest item is
    /// split into new/known; new items are recorded as communicated and
    /// the last report hash updated.
    pub fn filter_report(&mut self, digest: &ReportDigest) -> NoveltyReport {
        if self
            .last_report_hash
            .as_deref()
            .is_some_and(|last| last == digest.report_hash)
        {
            tracing::debug!(session = %self.session_id, "report unchanged; suppressed");
            return NoveltyReport::unchanged();
        }

        let mut already_known = 0usize;
        let mut split = |items: &[String], known: &mut BTreeSet<String>| -> Vec<String> {
            let mut fresh = Vec::new();
            for item in items {
                if known.contains(item) {
                    already_known += 1;
                } else {
                    known.insert(item.clone());
                    fresh.push(item.clone());
                }
            }
            fresh
        };

        let report = NoveltyReport {
            unchanged: false,
            new_patterns: split(&digest.patterns, &mut self.known_patterns),
            new_files: split(&digest.files, &mut self.known_files),
            new_root_causes: split(&digest.root_causes, &mut self.known_root_causes),
            new_fixes: split(&digest.fixes, &mut self.known_fixes),
            new_fingerprints: split(&digest.fingerprints, &mut self.known_fingerprints),
            already_known,
        };

        self.last_report_hash = Some(digest.report_hash.clone());
        self.updated_at_ms = chrono::Utc::now().timestamp_millis();
        report
    }
}

/// Directory-backed store of session files
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
    ttl_ms: i64,
}

impl SessionStore {
    /// Store rooted at a directory with the default TTL
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ttl_ms: SESSION_TTL_MS,
        }
    }

    /// Override the time-to-live
    #[must_use]
    pub fn with_ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    /// Path of one session's file
    #[must_use]
    pub fn session_path(&self, session_id: &str) -> PathBuf {
        // Session ids come from callers; keep the file name tame.
        let safe: String = session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("session-{safe}.json"))
    }

    /// Load a session, creating a fresh one when missing or expired
    #[must_use]
    pub fn load_or_create(&self, session_id: &str) -> SessionContext {
        let path = self.session_path(session_id);
        let loaded = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str::<SessionContext>(&raw).ok())
            .filter(|ctx| ctx.schema_version == SESSION_SCHEMA_VERSION)
            .filter(|ctx| !ctx.is_expired(self.ttl_ms));
        match loaded {
            Some(ctx) => ctx,
            None => SessionContext::new(session_id),
        }
    }

    /// Persist a session
    ///
    /// # Errors
    /// Returns [`SessionError::Io`] when the session file cannot be written
    pub fn store(&self, context: &SessionContext) -> Result<(), SessionError> {
        let path = self.session_path(&context.session_id);
        let json = serde_json::to_string_pretty(context)?;
        std::fs::create_dir_all(&self.dir).map_err(|source| SessionError::Io {
            path: self.dir.clone(),
            source,
        })?;
        std::fs::write(&path, json).map_err(|source| SessionError::Io { path, source })
    }

    /// Explicitly clear a session; returns whether one existed
    ///
    /// # Errors
    /// Returns [`SessionError::Io`] when the session file cannot be removed
    pub fn clear(&self, session_id: &str) -> Result<bool, SessionError> {
        let path = self.session_path(session_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(SessionError::Io { path, source }),
        }
    }

    /// Remove every expired session file; returns how many were removed
    ///
    /// # Errors
    /// Returns [`SessionError::Io`] when the store directory cannot be read
    pub fn sweep_expired(&self) -> Result<usize, SessionError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(SessionError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut removed = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            let expired = std::fs::read_to_string(&path)
                .ok()
                .and_then(|raw| serde_json::from_str::<SessionContext>(&raw).ok())
                .map_or(true, |ctx| ctx.is_expired(self.ttl_ms));
            if expired && std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, "expired sessions swept");
        }
        Ok(removed)
    }

    /// Run one report through a session: load, filter, persist
    ///
    /// # Errors
    /// Returns [`SessionError::Io`] when the updated session cannot be stored
    pub fn filter_report(
        &self,
        session_id: &str,
        digest: &ReportDigest,
    ) -> Result<NoveltyReport, SessionError> {
        let mut context = self.load_or_create(session_id);
        let report = context.filter_report(digest);
        self.store(&context)?;
        Ok(report)
    }
}
