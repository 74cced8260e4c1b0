//! Watch mode
//!
//! Watches the project tree, debounces bursts of change events and
//! serializes re-analysis: a change arriving while a run is in flight
//! stays queued and triggers exactly one follow-up run after the current
//! one completes — never an overlapping run.

use crate::pipeline::{Pipeline, PipelineError};
use crate::render;
use crate::store::{ArtifactStore, StoreError};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Watch options
#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    /// Burst debounce window in milliseconds
    pub debounce_ms: u64,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self { debounce_ms: 1000 }
    }
}

/// Errors from watch mode
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// File watcher could not be created or attached
    #[error("watcher: {0}")]
    Notify(#[from] notify::Error),

    /// Harness results could not be read
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A re-run failed
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Watch the project and re-analyze on change
///
/// Reads the harness results file fresh on every run (the harness is
/// assumed to rewrite it). Runs until the watcher channel closes.
///
/// # Errors
/// Returns [`WatchError`] when the watcher cannot start; re-run failures
/// are logged and watching continues
pub async fn watch(
    pipeline: Arc<Pipeline>,
    results_path: PathBuf,
    options: WatchOptions,
) -> Result<(), WatchError> {
    let (tx, rx) = mpsc::channel::<()>(256);

    let root = pipeline.config().root.clone();
    let cache_dir = pipeline.config().cache_dir();
    let extensions = pipeline.config().source_extensions.clone();
    let ignore_dirs = pipeline.config().ignore_dirs.clone();

    let watch_root = root.clone();
    let mut watcher = RecommendedWatcher::new(
        move |event: Result<Event, notify::Error>| match event {
            Ok(event) => {
                if is_relevant(&event, &watch_root, &cache_dir, &extensions, &ignore_dirs) {
                    // Full channel means a run is already pending; drop.
                    let _ = tx.try_send(());
                }
            }
            Err(err) => tracing::warn!(%err, "watch event error"),
        },
        notify::Config::default(),
    )?;
    watcher.watch(&root, RecursiveMode::Recursive)?;
    tracing::info!(root = %root.display(), "watching for changes");

    let debounce = Duration::from_millis(options.debounce_ms);
    drive(rx, debounce, || {
        let pipeline = Arc::clone(&pipeline);
        let results_path = results_path.clone();
        async move {
            match run_once(&pipeline, &results_path).await {
                Ok(compact) => println!("{compact}"),
                Err(err) => tracing::error!(%err, "re-analysis failed"),
            }
        }
    })
    .await;
    Ok(())
}

/// One serialized re-analysis.
async fn run_once(pipeline: &Arc<Pipeline>, results_path: &Path) -> Result<String, WatchError> {
    let results = ArtifactStore::read_results_file(results_path)?;
    let pipeline = Arc::clone(pipeline);
    let report = tokio::task::spawn_blocking(move || pipeline.run(&results, false))
        .await
        .expect("analysis task panicked")?;
    Ok(render::compact_line(&report))
}

/// Debounce-and-serialize loop
///
/// Waits for a first event, sleeps out the burst window, drains whatever
/// queued, then runs the callback once. Events arriving during the run
/// remain queued and collapse into exactly one follow-up iteration.
async fn drive<F, Fut>(mut rx: mpsc::Receiver<()>, debounce: Duration, mut on_change: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    while rx.recv().await.is_some() {
        tokio::time::sleep(debounce).await;
        while rx.try_recv().is_ok() {}
        on_change().await;
    }
}

/// Whether an event should trigger re-analysis.
///
/// Hidden/ignored components are judged on the root-relative path; the
/// absolute prefix above the project root does not participate.
fn is_relevant(
    event: &Event,
    root: &Path,
    cache_dir: &Path,
    extensions: &[String],
    ignore_dirs: &[String],
) -> bool {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return false;
    }
    event.paths.iter().any(|path| {
        // Never self-trigger on our own cache writes.
        if path.starts_with(cache_dir) {
            return false;
        }
        let rel = path.strip_prefix(root).unwrap_or(path);
        if rel.components().any(|c| {
            let name = c.as_os_str().to_string_lossy();
            name.starts_with('.') || ignore_dirs.iter().any(|d| *d == name)
        }) {
            return false;
        }
        rel.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| extensions.iter().any(|e| e == ext) || ext == "json")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn burst_collapses_to_one_run() {
        let (tx, rx) = mpsc::channel::<()>(16);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        for _ in 0..5 {
            tx.send(()).await.unwrap();
        }
        drop(tx);

        drive(rx, Duration::from_millis(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn change_during_run_triggers_exactly_one_follow_up() {
        let (tx, rx) = mpsc::channel::<()>(16);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let holder = Arc::new(std::sync::Mutex::new(Some(tx.clone())));
        let holder_inner = Arc::clone(&holder);

        tx.send(()).await.unwrap();
        drop(tx);

        drive(rx, Duration::from_millis(5), move || {
            let counter = Arc::clone(&counter);
            let holder = Arc::clone(&holder_inner);
            async move {
                let run = counter.fetch_add(1, Ordering::SeqCst);
                if run == 0 {
                    // Three changes land mid-run; they must collapse into
                    // one follow-up, not three.
                    if let Some(tx) = holder.lock().unwrap().as_ref() {
                        for _ in 0..3 {
                            let _ = tx.try_send(());
                        }
                    }
                } else {
                    // Drop the last sender, closing the channel and
                    // ending the loop.
                    holder.lock().unwrap().take();
                }
            }
        })
        .await;

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    fn modify_event(path: &str) -> Event {
        Event {
            kind: EventKind::Modify(notify::event::ModifyKind::Any),
            paths: vec![PathBuf::from(path)],
            attrs: Default::default(),
        }
    }

    fn relevant(event: &Event) -> bool {
        is_relevant(
            event,
            Path::new("/repo"),
            Path::new("/repo/.triage"),
            &[String::from("ts")],
            &[String::from("node_modules")],
        )
    }

    #[test]
    fn cache_writes_do_not_self_trigger() {
        assert!(!relevant(&modify_event("/repo/.triage/run-results.json")));
    }

    #[test]
    fn source_changes_are_relevant() {
        assert!(relevant(&modify_event("/repo/src/services/deal-service.ts")));
    }

    #[test]
    fn ignored_directories_are_not_relevant() {
        assert!(!relevant(&modify_event("/repo/node_modules/pkg/index.ts")));
        assert!(!relevant(&modify_event("/repo/.git/index.ts")));
    }

    #[test]
    fn hidden_components_above_the_root_do_not_mask_changes() {
        let event = modify_event("/home/user/.work/repo/src/app.ts");
        assert!(is_relevant(
            &event,
            Path::new("/home/user/.work/repo"),
            Path::new("/home/user/.work/repo/.triage"),
            &[String::from("ts")],
            &[String::from("node_modules")],
        ));
    }
}
