//! Fix generation
//!
//! Applies one template to one file's current text snapshot. The file is
//! re-read fresh at generation time; every rewrite is applied in order with
//! line numbers captured before mutation, recording one [`CodeChange`] per
//! match. A template with zero matches yields `None` — never an
//! empty-but-successful fix.

use crate::template::{FixTemplate, TemplateRegistry};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use triage_analysis::{FixKind, RootCauseAnalysis};

/// Errors from fix generation
#[derive(Debug, thiserror::Error)]
pub enum FixError {
    /// Template id not in the registry
    #[error("unknown fix template: {0}")]
    UnknownTemplate(String),

    /// Target file could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// Target file
        path: PathBuf,
        /// Underlying io error
        #[source]
        source: std::io::Error,
    },
}

/// Kind of a discrete change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Code rewrite
    Replace,
    /// Import-statement rewrite
    ImportRewrite,
}

/// One discrete change within a generated fix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeChange {
    /// What kind of rewrite produced this change
    pub kind: ChangeKind,

    /// 1-based first line of the original match (pre-mutation numbering)
    pub line_start: u32,

    /// 1-based last line of the original match (pre-mutation numbering)
    pub line_end: u32,

    /// Matched original text
    pub original: String,

    /// Expanded replacement text
    pub replacement: String,

    /// What the rewrite does
    pub description: String,
}

/// A fix produced from one template applied to one file
///
/// `original_content` is the integrity anchor: the applier refuses to
/// write when the on-disk content no longer matches it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFix {
    /// Repo-relative target file
    pub file: PathBuf,

    /// Template that produced this fix
    pub template_id: String,

    /// Discrete changes, template order
    pub changes: Vec<CodeChange>,

    /// File content the fix was generated against
    pub original_content: String,

    /// File content after all rewrites
    pub modified_content: String,

    /// Steps a human must still carry out
    pub manual_steps: Vec<String>,

    /// How to validate the fix worked
    pub validation: String,
}

impl GeneratedFix {
    /// Number of discrete changes
    #[inline]
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.changes.len()
    }
}

/// Generates fixes from templates
#[derive(Debug, Clone)]
pub struct FixGenerator {
    root: PathBuf,
    registry: TemplateRegistry,
}

impl FixGenerator {
    /// Generator rooted at a project directory with the builtin templates
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_registry(root, TemplateRegistry::builtin())
    }

    /// Generator with a custom registry
    #[must_use]
    pub fn with_registry(root: impl Into<PathBuf>, registry: TemplateRegistry) -> Self {
        Self {
            root: root.into(),
            registry,
        }
    }

    /// Template registry in use
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    /// Generate every auto fix an analysis calls for
    ///
    /// Fixes that fail to generate (unreadable file, template gone) are
    /// logged and skipped; the remaining fixes are still returned.
    #[must_use]
    pub fn generate_fixes(&self, analysis: &RootCauseAnalysis) -> Vec<GeneratedFix> {
        let Some(hit) = &analysis.pattern.best else {
            return Vec::new();
        };
        let Some(template_id) = &hit.fix_template else {
            return Vec::new();
        };

        let mut fixes = Vec::new();
        let mut targets: Vec<PathBuf> = analysis
            .suggested_fixes
            .iter()
            .filter(|fix| fix.kind == FixKind::Auto)
            .filter_map(|fix| fix.file.clone())
            .collect();
        targets.dedup();

        for target in targets {
            match self.generate_by_template(&target, template_id) {
                Ok(Some(fix)) => fixes.push(fix),
                Ok(None) => {
                    tracing::debug!(
                        file = %target.display(),
                        template = %template_id,
                        "template matched nothing"
                    );
                }
                Err(err) => {
                    tracing::warn!(file = %target.display(), %err, "fix generation failed");
                }
            }
        }
        fixes
    }

    /// Apply one template to one file's current text
    ///
    /// Returns `Ok(None)` when no rewrite matched.
    ///
    /// # Errors
    /// Returns [`FixError::UnknownTemplate`] for an unregistered id and
    /// [`FixError::Io`] when the target cannot be read
    pub fn generate_by_template(
        &self,
        file: &Path,
        template_id: &str,
    ) -> Result<Option<GeneratedFix>, FixError> {
        let template = self
            .registry
            .get(template_id)
            .ok_or_else(|| FixError::UnknownTemplate(template_id.to_string()))?;

        let abs = self.root.join(file);
        let original_content = std::fs::read_to_string(&abs).map_err(|source| FixError::Io {
            path: abs.clone(),
            source,
        })?;

        let (modified_content, changes) = apply_template(template, &original_content);
        if changes.is_empty() {
            return Ok(None);
        }

        tracing::info!(
            file = %file.display(),
            template = %template_id,
            changes = changes.len(),
            "fix generated"
        );
        Ok(Some(GeneratedFix {
            file: file.to_path_buf(),
            template_id: template_id.to_string(),
            changes,
            original_content,
            modified_content,
            manual_steps: template.manual_steps.clone(),
            validation: template.validation.clone(),
        }))
    }
}

/// Run a template's rewrites in order, recording one change per match.
fn apply_template(template: &FixTemplate, content: &str) -> (String, Vec<CodeChange>) {
    let mut current = content.to_string();
    let mut changes = Vec::new();

    for rewrite in &template.rewrites {
        record_changes(
            &rewrite.pattern,
            &rewrite.replacement,
            &rewrite.description,
            ChangeKind::Replace,
            &current,
            &mut changes,
        );
        current = rewrite
            .pattern
            .replace_all(&current, rewrite.replacement.as_str())
            .into_owned();
    }

    for rewrite in &template.import_rewrites {
        record_changes(
            &rewrite.pattern,
            &rewrite.replacement,
            "rewrite import statement",
            ChangeKind::ImportRewrite,
            &current,
            &mut changes,
        );
        current = rewrite
            .pattern
            .replace_all(&current, rewrite.replacement.as_str())
            .into_owned();
    }

    (current, changes)
}

/// Record one [`CodeChange`] per match, with line numbers computed on the
/// text as it stands before this rewrite mutates it.
fn record_changes(
    pattern: &Regex,
    replacement: &str,
    description: &str,
    kind: ChangeKind,
    content: &str,
    changes: &mut Vec<CodeChange>,
) {
    for captures in pattern.captures_iter(content) {
        let matched = captures.get(0).expect("group 0 always present");
        let mut expanded = String::new();
        captures.expand(replacement, &mut expanded);

        let line_start = line_of(content, matched.start());
        let line_end = line_of(content, matched.end().saturating_sub(1).max(matched.start()));
        changes.push(CodeChange {
            kind,
            line_start,
            line_end,
            original: matched.as_str().to_string(),
            replacement: expanded,
            description: description.to_string(),
        });
    }
}

/// 1-based line containing a byte offset.
fn line_of(content: &str, offset: usize) -> u32 {
    content[..offset.min(content.len())].matches('\n').count() as u32 + 1
}
