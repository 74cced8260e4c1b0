//! Triage pipeline orchestrator
//!
//! Wires the leaf crates into the single-flow pipeline: harness results →
//! fingerprint deduplication → signature matching → root-cause synthesis →
//! fix generation → snapshot/diff → session filtering. Also provides the
//! configuration layer, the schema-versioned cache-artifact store, the
//! report renderers and the debounced watch mode.

pub mod config;
pub mod pipeline;
pub mod render;
pub mod store;
pub mod watch;

pub use config::{ConfigError, PipelineConfig, CONFIG_FILE_NAME};
pub use pipeline::{Pipeline, PipelineError, PipelineReport};
pub use store::{ArtifactStore, StoreError, ARTIFACT_SCHEMA_VERSION};
pub use watch::{watch, WatchError, WatchOptions};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
