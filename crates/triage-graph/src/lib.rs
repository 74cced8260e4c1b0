//! Import graph for the triage pipeline
//!
//! Builds a file→imports→importers graph over a source tree via text
//! pattern extraction, answers transitive dependency queries with
//! cycle-safe bounded traversal, persists the graph behind a
//! modification-time-sampled cache, and walks import edges from a failing
//! test toward a problematic module ([`ImportTracer`]).

pub mod cache;
pub mod graph;
pub mod hash;
pub mod node;
pub mod tracer;

pub use cache::{GraphCache, GRAPH_CACHE_SCHEMA_VERSION};
pub use graph::{is_test_file, GraphConfig, GraphError, ImportGraph};
pub use hash::ContentHash;
pub use node::ImportNode;
pub use tracer::{
    ChainEntry, ImportChain, ImportTracer, ProblematicPattern, ProblematicPatterns, TraceError,
    MAX_TRACE_DEPTH,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
