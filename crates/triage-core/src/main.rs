//! Triage CLI

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use triage_core::pipeline::{Pipeline, PipelineReport, SESSIONS_DIR, SNAPSHOT_FILE};
use triage_core::store::ArtifactStore;
use triage_core::{render, watch, PipelineConfig, WatchOptions};
use triage_failure::deduplicate;
use triage_fix::{ApplyOptions, ApplyResult, FixApplier, FixGenerator};
use triage_report::{compress, DiffReport, SessionStore, SnapshotStore};

#[derive(Parser)]
#[command(
    name = "triage",
    version,
    about = "Test-failure root-cause analysis and auto-remediation"
)]
struct Cli {
    /// Project root
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze a harness results file
    Analyze {
        /// Harness results JSON (ordered list of test results)
        #[arg(long)]
        results: PathBuf,

        /// Print the structured JSON summary
        #[arg(long)]
        json: bool,

        /// Print only the compact status line
        #[arg(long, conflicts_with = "json")]
        compact: bool,

        /// Session id for report suppression
        #[arg(long)]
        session: Option<String>,

        /// Rebuild the import graph even when the cache is valid
        #[arg(long)]
        force_rebuild: bool,
    },

    /// Apply or preview the cached suggested fixes
    Fix {
        /// Preview only; nothing is written
        #[arg(long)]
        dry_run: bool,

        /// All-or-nothing batch with rollback
        #[arg(long)]
        transaction: bool,

        /// Apply one template instead of the cached fixes
        #[arg(long, requires = "file")]
        template: Option<String>,

        /// Target file for --template
        #[arg(long, requires = "template")]
        file: Option<PathBuf>,

        /// Skip the pre-image backup
        #[arg(long)]
        no_backup: bool,
    },

    /// Render the last run's report from the cache artifacts
    Report {
        /// Print the structured JSON summary
        #[arg(long)]
        json: bool,

        /// Print only the compact status line
        #[arg(long, conflicts_with = "json")]
        compact: bool,
    },

    /// Watch the tree and re-analyze on change
    Watch {
        /// Harness results JSON, re-read on every run
        #[arg(long)]
        results: PathBuf,
    },

    /// Session maintenance
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },

    /// Backup maintenance
    Backups {
        #[command(subcommand)]
        command: BackupCommand,
    },
}

#[derive(Subcommand)]
enum SessionCommand {
    /// Clear one session's state
    Clear {
        /// Session id
        id: String,
    },
    /// Remove expired sessions
    Sweep,
}

#[derive(Subcommand)]
enum BackupCommand {
    /// Keep only the newest N backup snapshots
    Clean {
        /// Snapshots to keep
        #[arg(long, default_value_t = 5)]
        keep: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = PipelineConfig::load(&cli.root)?;

    match cli.command {
        Command::Analyze {
            results,
            json,
            compact,
            session,
            force_rebuild,
        } => {
            if session.is_some() {
                config.session_id = session;
            }
            let pipeline = Pipeline::new(config);
            let results = ArtifactStore::read_results_file(&results)?;
            let report = pipeline.run(&results, force_rebuild)?;
            print_report(&report, json, compact)?;
        }

        Command::Fix {
            dry_run,
            transaction,
            template,
            file,
            no_backup,
        } => {
            let applier = FixApplier::new(&config.root)
                .with_backup_dir(config.cache_path("backups"));
            let opts = ApplyOptions {
                dry_run,
                backup: !no_backup,
            };

            if let (Some(template), Some(file)) = (template, file) {
                let generator = FixGenerator::new(&config.root);
                match generator.generate_by_template(&file, &template)? {
                    Some(fix) => {
                        let result = applier.apply(&fix, &opts);
                        print_apply_result(&result);
                        if !result.success {
                            std::process::exit(1);
                        }
                    }
                    None => {
                        println!("template '{template}' matched nothing in {}", file.display());
                    }
                }
                return Ok(());
            }

            let store = ArtifactStore::new(config.cache_dir());
            let fixes = store.read_fixes()?;
            if fixes.is_empty() {
                println!("no fixes available; run `triage analyze` first");
                return Ok(());
            }

            if transaction {
                let outcome = applier.apply_transaction(&fixes, &opts);
                for result in &outcome.results {
                    print_apply_result(result);
                }
                if outcome.success {
                    println!("transaction applied: {} file(s)", outcome.results.len());
                } else {
                    println!("transaction rolled back");
                    std::process::exit(1);
                }
            } else {
                let results = applier.apply_all(&fixes, &opts);
                let failed = results.iter().filter(|r| !r.success).count();
                for result in &results {
                    print_apply_result(result);
                }
                if failed > 0 {
                    println!("{failed} fix(es) failed");
                    std::process::exit(1);
                }
            }
        }

        Command::Report { json, compact } => {
            let report = load_cached_report(&config)?;
            print_report(&report, json, compact)?;
        }

        Command::Watch { results } => {
            let debounce_ms = config.debounce_ms;
            let pipeline = Arc::new(Pipeline::new(config));
            watch(pipeline, results, WatchOptions { debounce_ms }).await?;
        }

        Command::Session { command } => {
            let sessions = SessionStore::new(config.cache_path(SESSIONS_DIR));
            match command {
                SessionCommand::Clear { id } => {
                    if sessions.clear(&id)? {
                        println!("session '{id}' cleared");
                    } else {
                        println!("no session '{id}'");
                    }
                }
                SessionCommand::Sweep => {
                    let removed = sessions.sweep_expired()?;
                    println!("{removed} expired session(s) removed");
                }
            }
        }

        Command::Backups { command } => match command {
            BackupCommand::Clean { keep } => {
                let applier = FixApplier::new(&config.root)
                    .with_backup_dir(config.cache_path("backups"));
                let removed = applier.clean_old_backups(keep)?;
                println!("{removed} backup snapshot(s) removed");
            }
        },
    }

    Ok(())
}

fn print_report(report: &PipelineReport, json: bool, compact: bool) -> anyhow::Result<()> {
    if compact {
        println!("{}", render::compact_line(report));
    } else if json {
        println!("{}", serde_json::to_string_pretty(&render::json_summary(report))?);
    } else {
        print!("{}", render::text_report(report));
    }
    Ok(())
}

fn print_apply_result(result: &ApplyResult) {
    let verb = if result.dry_run { "would apply" } else { "applied" };
    if result.success {
        println!(
            "{verb}: {} ({} change(s))",
            result.file.display(),
            result.changes
        );
        if let Some(backup) = &result.backup_path {
            println!("  backup: {}", backup.display());
        }
        if let Some(preview) = &result.preview {
            print!("{preview}");
        }
    } else {
        println!(
            "failed: {} ({})",
            result.file.display(),
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
}

/// Reassemble a renderable report from the cache artifacts.
fn load_cached_report(config: &PipelineConfig) -> anyhow::Result<PipelineReport> {
    let store = ArtifactStore::new(config.cache_dir());
    let results = store.read_run_results()?;
    let analyses = store.read_analyses()?;
    let fixes = store.read_fixes()?;
    let snapshot = SnapshotStore::new(config.cache_path(SNAPSHOT_FILE))
        .load()
        .context("no cached snapshot; run `triage analyze --results <file>` first")?;

    let mut errors = Vec::new();
    let mut names = Vec::new();
    for result in results.iter().filter(|r| r.is_failed()) {
        if let Some(error) = &result.error {
            errors.push(error.clone());
            names.push(result.name.clone());
        }
    }
    let dedup = deduplicate(&errors, &names);
    let compact = compress(&snapshot);

    Ok(PipelineReport {
        total: results.len(),
        dedup,
        analyses,
        fixes,
        snapshot,
        // The persisted snapshot is this run's; relative to it nothing
        // has changed since the analyze that wrote it.
        diff: DiffReport::unchanged(),
        novelty: None,
        compact,
    })
}
