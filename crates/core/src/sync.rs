//! Sync & watch controller: the only writer to the span store. Drives one
//! indexing cycle — extract, `replace_spans`, enqueue work, rebuild the
//! schema graph, publish `IndexStatus` — in either event-driven or
//! poll-driven mode.
//!
//! Event mode runs a `notify`-based watcher feeding an `mpsc`-channel
//! debounce loop with a configurable quiet window. Poll mode uses an
//! exponential backoff that resets to the base tick the moment a change
//! is observed. Renice is a `#[cfg(unix)]`/`#[cfg(not(unix))]` split, a
//! no-op off unix.

use crate::config::RagConfig;
use crate::error::Result;
use crate::extractor;
use crate::graph::SchemaGraph;
use crate::hashing;
use crate::scan;
use crate::store::Store;
use crate::types::{IndexState, IndexStatus};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub struct SyncController {
    pub repo_root: PathBuf,
    pub store: Store,
    pub config: RagConfig,
    pub graph: SchemaGraph,
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub files_changed: usize,
    pub files_removed: usize,
    pub spans_added: usize,
    pub spans_deleted: usize,
}

impl SyncController {
    pub fn new(repo_root: PathBuf, store: Store, config: RagConfig) -> Self {
        renice_self();
        SyncController { repo_root, store, config, graph: SchemaGraph::default() }
    }

    /// A full rescan: every file under the repo root treated as the
    /// changed-file set.
    pub fn scan_full(&mut self, now: i64) -> Result<CycleReport> {
        let files = scan::walk_files(&self.repo_root);
        self.run_cycle(&files, now)
    }

    /// One indexing cycle over `changed_paths`: extract spans per file,
    /// replace them transactionally, enqueue
    /// embed/enrich work (done inside `replace_spans`), rebuild the schema
    /// graph from the full span set, and atomically publish `IndexStatus`.
    pub fn run_cycle(&mut self, changed_paths: &[PathBuf], now: i64) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        for abs_path in changed_paths {
            let Ok(rel) = abs_path.strip_prefix(&self.repo_root) else { continue };
            let rel_path = rel.to_string_lossy().replace('\\', "/");

            if !abs_path.exists() {
                self.store.remove_file(&rel_path)?;
                report.files_removed += 1;
                continue;
            }
            if abs_path.is_dir() {
                continue;
            }

            let Ok(bytes) = std::fs::read(abs_path) else {
                warn!(path = %rel_path, "failed to read file, skipping this cycle");
                continue;
            };
            let ext = abs_path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();

            let sidecar_content = if extractor::is_opaque_format(&ext) {
                extractor::sidecar::render_sidecar(&ext, &bytes).ok()
            } else {
                None
            };
            let text = match (sidecar_content.is_some(), String::from_utf8(bytes)) {
                (true, _) => String::new(),
                (false, Ok(t)) => t,
                (false, Err(_)) => continue, // binary content with no registered sidecar renderer: skip, not a crash
            };

            let spans = match extractor::extract_spans(&rel_path, &ext, &text, sidecar_content.as_deref()) {
                Ok(spans) => spans,
                Err(e) => {
                    warn!(path = %rel_path, error = %e, "extraction failed, file kept at last known spans");
                    continue;
                }
            };

            let content_hash = hashing::span_hash(sidecar_content.as_deref().unwrap_or(&text));
            let mtime = abs_path
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(now);
            self.store.upsert_file(&rel_path, &content_hash, mtime, &ext, None)?;

            let diff = self.store.replace_spans(&rel_path, spans)?;
            report.spans_added += diff.added.len();
            report.spans_deleted += diff.deleted.len();
            report.files_changed += 1;
        }

        self.rebuild_graph()?;
        self.write_index_status(now, IndexState::Fresh, None)?;
        info!(
            changed = report.files_changed,
            removed = report.files_removed,
            added = report.spans_added,
            deleted = report.spans_deleted,
            "sync cycle complete"
        );
        Ok(report)
    }

    fn rebuild_graph(&mut self) -> Result<()> {
        let mut all_spans = Vec::new();
        let files = scan::walk_files(&self.repo_root);
        for abs_path in &files {
            let Ok(rel) = abs_path.strip_prefix(&self.repo_root) else { continue };
            let rel_path = rel.to_string_lossy().replace('\\', "/");
            all_spans.extend(self.store.spans_for_file(&rel_path)?);
        }
        self.graph = SchemaGraph::build(&all_spans);
        Ok(())
    }

    fn write_index_status(&self, now: i64, state: IndexState, error: Option<String>) -> Result<()> {
        let status = IndexStatus {
            repo: self.repo_root.to_string_lossy().to_string(),
            index_state: state,
            last_indexed_at: now,
            last_indexed_commit: crate::git::current_head(&self.repo_root),
            schema_version: crate::types::STORE_SCHEMA_VERSION,
            last_error: error,
        };
        let status_dir = self.repo_root.join(".llmc");
        std::fs::create_dir_all(&status_dir)?;
        let final_path = status_dir.join("rag_index_status.json");
        let tmp_path = status_dir.join("rag_index_status.json.tmp");
        let json = serde_json::to_string_pretty(&status)?;
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }
}

/// Lowers this process's scheduling priority so heavy enrichment cycles
/// don't starve the rest of the host. A no-op off unix.
#[cfg(unix)]
fn renice_self() {
    unsafe {
        libc::nice(10);
    }
}

#[cfg(not(unix))]
fn renice_self() {}

/// Starts a filesystem watcher on `repo_root` and returns both the watcher
/// handle (must be kept alive) and a receiver of debounced change batches.
pub fn spawn_watcher(repo_root: &Path, debounce: Duration) -> Option<(RecommendedWatcher, mpsc::Receiver<Vec<PathBuf>>)> {
    let (raw_tx, raw_rx) = mpsc::channel::<Event>();
    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = raw_tx.send(event);
            }
        },
        notify::Config::default(),
    )
    .ok()?;

    watcher.watch(repo_root, RecursiveMode::Recursive).ok()?;

    let (batch_tx, batch_rx) = mpsc::channel::<Vec<PathBuf>>();
    std::thread::spawn(move || debounce_loop(raw_rx, batch_tx, debounce));

    Some((watcher, batch_rx))
}

/// Collects raw filesystem events and emits a debounced batch once `debounce`
/// has elapsed since the last event touching a given path.
fn debounce_loop(rx: mpsc::Receiver<Event>, tx: mpsc::Sender<Vec<PathBuf>>, debounce: Duration) {
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();

    loop {
        match rx.recv_timeout(debounce) {
            Ok(event) => {
                if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)) {
                    let now = Instant::now();
                    for path in event.paths {
                        pending.insert(path, now);
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if pending.is_empty() {
                    continue;
                }
                let cutoff = Instant::now() - debounce;
                let ready: Vec<PathBuf> = pending.iter().filter(|(_, t)| **t <= cutoff).map(|(p, _)| p.clone()).collect();
                if ready.is_empty() {
                    continue;
                }
                for path in &ready {
                    pending.remove(path);
                }
                if tx.send(ready).is_err() {
                    return;
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Next poll-mode sleep duration: grows by `backoff_base` on quiet cycles,
/// resets to the tick interval the moment a change is observed.
pub fn next_poll_interval(current: Duration, tick: Duration, backoff_base: f64, max: Duration, changed: bool) -> Duration {
    if changed {
        return tick;
    }
    let grown = current.mul_f64(backoff_base);
    grown.min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RagConfig;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn run_cycle_indexes_new_file_and_writes_status() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.py"), "def foo():\n    return 1\n").unwrap();
        let store = Store::open_in_memory().unwrap();
        let mut controller = SyncController::new(dir.path().to_path_buf(), store, RagConfig::default());

        let report = controller.scan_full(1_000).unwrap();
        assert_eq!(report.files_changed, 1);
        assert!(report.spans_added >= 1);

        let status_path = dir.path().join(".llmc").join("rag_index_status.json");
        assert!(status_path.exists());
        let status: IndexStatus = serde_json::from_str(&fs::read_to_string(status_path).unwrap()).unwrap();
        assert_eq!(status.index_state, IndexState::Fresh);
    }

    #[test]
    fn run_cycle_removes_deleted_file() {
        let dir = TempDir::new().unwrap();
        let file_path = dir.path().join("a.py");
        fs::write(&file_path, "def foo():\n    return 1\n").unwrap();
        let store = Store::open_in_memory().unwrap();
        let mut controller = SyncController::new(dir.path().to_path_buf(), store, RagConfig::default());
        controller.scan_full(1_000).unwrap();

        fs::remove_file(&file_path).unwrap();
        let report = controller.run_cycle(&[file_path], 2_000).unwrap();
        assert_eq!(report.files_removed, 1);
        assert!(controller.store.spans_for_file("a.py").unwrap().is_empty());
    }

    #[test]
    fn poll_backoff_grows_then_resets_on_change() {
        let tick = Duration::from_secs(1);
        let max = Duration::from_secs(8);
        let step1 = next_poll_interval(tick, tick, 2.0, max, false);
        assert_eq!(step1, Duration::from_secs(2));
        let step2 = next_poll_interval(step1, tick, 2.0, max, false);
        assert_eq!(step2, Duration::from_secs(4));
        let capped = next_poll_interval(step2, tick, 2.0, max, false);
        assert_eq!(capped, Duration::from_secs(8));
        let reset = next_poll_interval(capped, tick, 2.0, max, true);
        assert_eq!(reset, tick);
    }
}
