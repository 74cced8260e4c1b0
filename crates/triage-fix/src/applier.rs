//! Fix application
//!
//! Safety invariant: before writing, the target file is re-read and
//! byte-compared against the fix's `original_content`; any mismatch aborts
//! with a stale-fix error and no write occurs. Non-dry-run applies write a
//! full pre-image backup into a timestamped directory first.
//! [`FixApplier::apply_transaction`] is all-or-nothing: the first failure
//! restores every previously applied fix from its just-created backup.

use crate::generator::GeneratedFix;
use serde::{Deserialize, Serialize};
use similar::TextDiff;
use std::path::{Path, PathBuf};

/// Message reported on an optimistic-concurrency conflict
const STALE_FIX_MESSAGE: &str = "file modified since analysis";

/// Errors from restore and maintenance operations
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    /// No backup exists for the file
    #[error("no backup found for {0}")]
    NoBackup(PathBuf),

    /// File system failure
    #[error("io at {path}: {source}")]
    Io {
        /// Path being read or written
        path: PathBuf,
        /// Underlying io error
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> ApplyError {
    let path = path.into();
    move |source| ApplyError::Io { path, source }
}

/// Application options
#[derive(Debug, Clone, Copy)]
pub struct ApplyOptions {
    /// Preview only; nothing is written
    pub dry_run: bool,

    /// Write a pre-image backup before replacing the file
    pub backup: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            backup: true,
        }
    }
}

/// Outcome of one fix application attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResult {
    /// Whether the fix was (or, dry-run, would be) applied
    pub success: bool,

    /// Target file
    pub file: PathBuf,

    /// Number of discrete changes in the fix
    pub changes: usize,

    /// Failure description, when unsuccessful
    pub error: Option<String>,

    /// Whether this was a preview
    pub dry_run: bool,

    /// Backup written before the apply, when one was
    pub backup_path: Option<PathBuf>,

    /// Unified-diff preview, dry runs only
    pub preview: Option<String>,
}

impl ApplyResult {
    fn failure(file: &Path, changes: usize, dry_run: bool, error: impl Into<String>) -> Self {
        Self {
            success: false,
            file: file.to_path_buf(),
            changes,
            error: Some(error.into()),
            dry_run,
            backup_path: None,
            preview: None,
        }
    }

    /// Whether this failure was an optimistic-concurrency conflict
    #[must_use]
    pub fn is_stale_conflict(&self) -> bool {
        self.error
            .as_deref()
            .is_some_and(|e| e.contains(STALE_FIX_MESSAGE))
    }
}

/// Outcome of a transactional batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResult {
    /// Whether every fix applied
    pub success: bool,

    /// Per-fix results, batch order, up to and including the first failure
    pub results: Vec<ApplyResult>,
}

/// Applies generated fixes to disk
#[derive(Debug, Clone)]
pub struct FixApplier {
    root: PathBuf,
    backup_dir: PathBuf,
}

impl FixApplier {
    /// Applier rooted at a project directory
    ///
    /// Backups default to `<root>/.triage/backups`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let backup_dir = root.join(".triage").join("backups");
        Self { root, backup_dir }
    }

    /// Override the backup directory
    #[must_use]
    pub fn with_backup_dir(mut self, backup_dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = backup_dir.into();
        self
    }

    /// Backup directory in use
    #[inline]
    #[must_use]
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Apply one fix
    ///
    /// Failures are folded into the result; this never panics and never
    /// leaves a partially written file.
    #[must_use]
    pub fn apply(&self, fix: &GeneratedFix, opts: &ApplyOptions) -> ApplyResult {
        let abs = self.root.join(&fix.file);

        let current = match std::fs::read_to_string(&abs) {
            Ok(current) => current,
            Err(err) => {
                return ApplyResult::failure(
                    &fix.file,
                    fix.change_count(),
                    opts.dry_run,
                    format!("cannot read target: {err}"),
                );
            }
        };

        // Optimistic-concurrency guard: byte-for-byte comparison against
        // the content the fix was generated from.
        if current != fix.original_content {
            tracing::warn!(file = %fix.file.display(), "stale fix rejected");
            return ApplyResult::failure(
                &fix.file,
                fix.change_count(),
                opts.dry_run,
                STALE_FIX_MESSAGE,
            );
        }

        if opts.dry_run {
            let preview = TextDiff::from_lines(&fix.original_content, &fix.modified_content)
                .unified_diff()
                .header("current", "fixed")
                .to_string();
            return ApplyResult {
                success: true,
                file: fix.file.clone(),
                changes: fix.change_count(),
                error: None,
                dry_run: true,
                backup_path: None,
                preview: Some(preview),
            };
        }

        let backup_path = if opts.backup {
            match self.write_backup(&fix.file, &current) {
                Ok(path) => Some(path),
                Err(err) => {
                    return ApplyResult::failure(
                        &fix.file,
                        fix.change_count(),
                        false,
                        format!("backup failed: {err}"),
                    );
                }
            }
        } else {
            None
        };

        if let Err(err) = std::fs::write(&abs, &fix.modified_content) {
            return ApplyResult::failure(
                &fix.file,
                fix.change_count(),
                false,
                format!("write failed: {err}"),
            );
        }

        tracing::info!(
            file = %fix.file.display(),
            template = %fix.template_id,
            changes = fix.change_count(),
            "fix applied"
        );
        ApplyResult {
            success: true,
            file: fix.file.clone(),
            changes: fix.change_count(),
            error: None,
            dry_run: false,
            backup_path,
            preview: None,
        }
    }

    /// Apply a batch independently; one failure does not affect the rest
    #[must_use]
    pub fn apply_all(&self, fixes: &[GeneratedFix], opts: &ApplyOptions) -> Vec<ApplyResult> {
        fixes.iter().map(|fix| self.apply(fix, opts)).collect()
    }

    /// Apply a batch all-or-nothing
    ///
    /// Fixes apply one at a time with backups forced on. On the first
    /// failure every previously applied fix is restored from its
    /// just-created backup and the batch reports failure — no partial
    /// multi-file state is left behind.
    #[must_use]
    pub fn apply_transaction(
        &self,
        fixes: &[GeneratedFix],
        opts: &ApplyOptions,
    ) -> TransactionResult {
        let opts = ApplyOptions {
            dry_run: opts.dry_run,
            backup: true,
        };
        let mut results: Vec<ApplyResult> = Vec::new();

        for fix in fixes {
            let result = self.apply(fix, &opts);
            let failed = !result.success;
            results.push(result);
            if failed {
                if !opts.dry_run {
                    self.roll_back(&results);
                }
                tracing::warn!(
                    applied = results.len() - 1,
                    "transaction rolled back"
                );
                return TransactionResult {
                    success: false,
                    results,
                };
            }
        }

        TransactionResult {
            success: true,
            results,
        }
    }

    /// Restore a file from a specific backup
    ///
    /// # Errors
    /// Returns [`ApplyError::Io`] when the backup cannot be read or the
    /// live file cannot be written
    pub fn restore(&self, backup_path: &Path, file: &Path) -> Result<(), ApplyError> {
        let content =
            std::fs::read(backup_path).map_err(io_err(backup_path))?;
        let abs = self.root.join(file);
        std::fs::write(&abs, content).map_err(io_err(abs))?;
        tracing::info!(file = %file.display(), backup = %backup_path.display(), "restored");
        Ok(())
    }

    /// Restore a file from its most recent backup
    ///
    /// # Errors
    /// Returns [`ApplyError::NoBackup`] when no backup of the file exists
    pub fn restore_latest(&self, file: &Path) -> Result<PathBuf, ApplyError> {
        let backup = self
            .backups_of(file)
            .into_iter()
            .next_back()
            .ok_or_else(|| ApplyError::NoBackup(file.to_path_buf()))?;
        self.restore(&backup, file)?;
        Ok(backup)
    }

    /// Delete all but the newest `keep` backup snapshots
    ///
    /// # Errors
    /// Returns [`ApplyError::Io`] when a snapshot directory cannot be removed
    pub fn clean_old_backups(&self, keep: usize) -> Result<usize, ApplyError> {
        let mut snapshots = self.snapshot_dirs();
        snapshots.sort();
        let excess = snapshots.len().saturating_sub(keep);
        for snapshot in snapshots.iter().take(excess) {
            std::fs::remove_dir_all(snapshot).map_err(io_err(snapshot.clone()))?;
        }
        if excess > 0 {
            tracing::info!(removed = excess, kept = keep.min(snapshots.len()), "backups pruned");
        }
        Ok(excess)
    }

    /// Timestamped snapshot directories, unsorted.
    fn snapshot_dirs(&self) -> Vec<PathBuf> {
        std::fs::read_dir(&self.backup_dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|e| e.path().is_dir())
                    .map(|e| e.path())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All backups of one file, oldest first.
    fn backups_of(&self, file: &Path) -> Vec<PathBuf> {
        let mut snapshots = self.snapshot_dirs();
        snapshots.sort();
        snapshots
            .into_iter()
            .map(|dir| dir.join(file))
            .filter(|candidate| candidate.is_file())
            .collect()
    }

    /// Write the pre-image into a fresh timestamped snapshot directory.
    fn write_backup(&self, file: &Path, content: &str) -> Result<PathBuf, ApplyError> {
        let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S%.3f").to_string();
        let backup_path = self.backup_dir.join(stamp).join(file);
        if let Some(parent) = backup_path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err(parent.to_path_buf()))?;
        }
        std::fs::write(&backup_path, content).map_err(io_err(backup_path.clone()))?;
        Ok(backup_path)
    }

    /// Best-effort restore of every applied fix in a failed batch.
    fn roll_back(&self, results: &[ApplyResult]) {
        for result in results.iter().filter(|r| r.success && !r.dry_run) {
            let Some(backup) = &result.backup_path else {
                continue;
            };
            if let Err(err) = self.restore(backup, &result.file) {
                tracing::error!(file = %result.file.display(), %err, "rollback restore failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::FixGenerator;
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use tempfile::TempDir;

    const SINGLETON: &str = "export const svc = new DealService(db);\n";

    fn setup() -> (TempDir, FixGenerator, FixApplier) {
        let dir = TempDir::new().unwrap();
        let generator = FixGenerator::new(dir.path());
        let applier = FixApplier::new(dir.path());
        (dir, generator, applier)
    }

    fn write(dir: &TempDir, rel: &str, content: &str) {
        let path = dir.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn read(dir: &TempDir, rel: &str) -> String {
        std::fs::read_to_string(dir.path().join(rel)).unwrap()
    }

    fn generate(generator: &FixGenerator, rel: &str) -> GeneratedFix {
        generator
            .generate_by_template(Path::new(rel), "lazy-singleton")
            .unwrap()
            .unwrap()
    }

    #[test]
    fn apply_writes_modified_content_and_backup() {
        let (dir, generator, applier) = setup();
        write(&dir, "src/svc.ts", SINGLETON);
        let fix = generate(&generator, "src/svc.ts");

        let result = applier.apply(&fix, &ApplyOptions::default());
        assert!(result.success);
        assert!(!result.dry_run);

        assert_eq!(read(&dir, "src/svc.ts"), fix.modified_content);
        let backup = result.backup_path.unwrap();
        assert_eq!(std::fs::read_to_string(backup).unwrap(), SINGLETON);
    }

    #[test]
    fn stale_fix_is_rejected_without_writing() {
        let (dir, generator, applier) = setup();
        write(&dir, "src/svc.ts", SINGLETON);
        let fix = generate(&generator, "src/svc.ts");

        // File mutated between generation and application.
        let drifted = "// touched\nexport const svc = new DealService(db);\n";
        write(&dir, "src/svc.ts", drifted);

        let result = applier.apply(&fix, &ApplyOptions::default());
        assert!(!result.success);
        assert!(result.is_stale_conflict());
        assert_eq!(read(&dir, "src/svc.ts"), drifted);
    }

    #[test]
    fn dry_run_previews_without_writing() {
        let (dir, generator, applier) = setup();
        write(&dir, "src/svc.ts", SINGLETON);
        let fix = generate(&generator, "src/svc.ts");

        let result = applier.apply(
            &fix,
            &ApplyOptions {
                dry_run: true,
                backup: true,
            },
        );
        assert!(result.success);
        assert!(result.dry_run);
        assert!(result.backup_path.is_none());
        let preview = result.preview.unwrap();
        assert!(preview.contains("-export const svc = new DealService(db);"));
        assert!(preview.contains("+export function svc(): DealService {"));
        assert_eq!(read(&dir, "src/svc.ts"), SINGLETON);
    }

    #[test]
    fn transaction_rolls_back_on_middle_failure() {
        let (dir, generator, applier) = setup();
        write(&dir, "src/a.ts", "export const a = new AService();\n");
        write(&dir, "src/b.ts", "export const b = new BService();\n");
        write(&dir, "src/c.ts", "export const c = new CService();\n");

        let fix_a = generate(&generator, "src/a.ts");
        let fix_b = generate(&generator, "src/b.ts");
        let fix_c = generate(&generator, "src/c.ts");

        // Invalidate the second fix after generation.
        let drifted = "// drifted\nexport const b = new BService();\n";
        write(&dir, "src/b.ts", drifted);

        let outcome =
            applier.apply_transaction(&[fix_a.clone(), fix_b, fix_c], &ApplyOptions::default());
        assert!(!outcome.success);
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.results[0].success);
        assert!(!outcome.results[1].success);

        // First file restored to its pre-fix content; third never touched.
        assert_eq!(read(&dir, "src/a.ts"), "export const a = new AService();\n");
        assert_eq!(read(&dir, "src/b.ts"), drifted);
        assert_eq!(read(&dir, "src/c.ts"), "export const c = new CService();\n");
    }

    #[test]
    fn transaction_applies_all_when_clean() {
        let (dir, generator, applier) = setup();
        write(&dir, "src/a.ts", "export const a = new AService();\n");
        write(&dir, "src/b.ts", "export const b = new BService();\n");

        let fixes = vec![generate(&generator, "src/a.ts"), generate(&generator, "src/b.ts")];
        let outcome = applier.apply_transaction(&fixes, &ApplyOptions::default());
        assert!(outcome.success);
        assert_eq!(outcome.results.len(), 2);
        assert!(read(&dir, "src/a.ts").contains("export function a(): AService"));
        assert!(read(&dir, "src/b.ts").contains("export function b(): BService"));
    }

    #[test]
    fn apply_all_isolates_failures() {
        let (dir, generator, applier) = setup();
        write(&dir, "src/a.ts", "export const a = new AService();\n");
        write(&dir, "src/b.ts", "export const b = new BService();\n");

        let fix_a = generate(&generator, "src/a.ts");
        let fix_b = generate(&generator, "src/b.ts");
        write(&dir, "src/b.ts", "// drifted\n");

        let results = applier.apply_all(&[fix_a, fix_b], &ApplyOptions::default());
        assert!(results[0].success);
        assert!(!results[1].success);
        // Non-transactional: the first apply sticks.
        assert!(read(&dir, "src/a.ts").contains("export function a(): AService"));
    }

    #[test]
    fn restore_latest_recovers_pre_image() {
        let (dir, generator, applier) = setup();
        write(&dir, "src/svc.ts", SINGLETON);
        let fix = generate(&generator, "src/svc.ts");

        let result = applier.apply(&fix, &ApplyOptions::default());
        assert!(result.success);
        assert_ne!(read(&dir, "src/svc.ts"), SINGLETON);

        applier.restore_latest(Path::new("src/svc.ts")).unwrap();
        assert_eq!(read(&dir, "src/svc.ts"), SINGLETON);
    }

    #[test]
    fn restore_latest_without_backup_errors() {
        let (_dir, _generator, applier) = setup();
        let result = applier.restore_latest(Path::new("src/never.ts"));
        assert!(matches!(result, Err(ApplyError::NoBackup(_))));
    }

    #[test]
    fn clean_old_backups_keeps_newest() {
        let (dir, _generator, applier) = setup();
        // Fabricate three snapshot directories with ascending stamps.
        for stamp in ["20240101-000000.000", "20240102-000000.000", "20240103-000000.000"] {
            let path = applier.backup_dir().join(stamp).join("src/x.ts");
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, stamp).unwrap();
        }

        let removed = applier.clean_old_backups(1).unwrap();
        assert_eq!(removed, 2);

        let remaining: Vec<String> = std::fs::read_dir(applier.backup_dir())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(remaining, vec!["20240103-000000.000"]);
        drop(dir);
    }
}
