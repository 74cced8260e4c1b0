//! Reporting layer of the triage pipeline
//!
//! Converts full analysis output into terse status codes sized for an
//! automated consumer with a limited context budget, diffs each run's
//! hashed [`RunSnapshot`] against the previous one (emitting only deltas),
//! and tracks per-session what has already been communicated so a
//! long-running session only ever receives strictly new information.

pub mod session;
pub mod snapshot;
pub mod status;

pub use session::{
    NoveltyReport, ReportDigest, SessionContext, SessionError, SessionStore,
    SESSION_SCHEMA_VERSION, SESSION_TTL_MS,
};
pub use snapshot::{
    diff, CategoryTally, DiffReport, RunSnapshot, SnapshotError, SnapshotStore,
    SNAPSHOT_SCHEMA_VERSION,
};
pub use status::{compress, suggested_action, StatusCode};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
