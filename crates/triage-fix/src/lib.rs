//! Fix generation and application
//!
//! A declarative [`TemplateRegistry`] of ordered match/replace rewrites
//! feeds the [`FixGenerator`], which turns one template applied to one
//! file's current text into a [`GeneratedFix`]. The [`FixApplier`] writes
//! fixes to disk behind an optimistic-concurrency guard, with timestamped
//! pre-image backups, dry-run previews and all-or-nothing transactional
//! batches.

pub mod applier;
pub mod generator;
pub mod template;

pub use applier::{ApplyError, ApplyOptions, ApplyResult, FixApplier, TransactionResult};
pub use generator::{ChangeKind, CodeChange, FixError, FixGenerator, GeneratedFix};
pub use template::{FixTemplate, ImportRewrite, Rewrite, TemplateError, TemplateRegistry};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
