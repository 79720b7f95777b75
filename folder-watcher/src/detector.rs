//! Poll-based change detection.
//!
//! A running [`ChangeDetector`] owns one tokio task that rescans the
//! watched folder every poll interval, diffs the result against the last
//! snapshot and hands the resulting events to an [`EventSink`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WatchConfig;
use crate::event::{ChangeEvent, MaterialRecord, material_id};
use crate::scanner::{DirectoryScanner, Snapshot, snapshot_of};

/// Receives batches of change events from the detector.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Consume a batch, in order. Called after every successful scan,
    /// with an empty batch when nothing changed.
    async fn deliver(&self, events: Vec<ChangeEvent>);
}

/// Lifecycle state of a detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// No poll loop is alive.
    Stopped,

    /// A poll loop is watching a folder.
    Running,
}

/// Compute the events that turn `old` into `new`.
///
/// Removals come first, then additions, then modifications, each group in
/// file name order. A consumer can therefore treat a rename as
/// remove + add without ever holding two records for one name.
pub fn diff(folder: &Path, old: &Snapshot, new: &Snapshot) -> Vec<ChangeEvent> {
    let mut removed = Vec::new();
    let mut added = Vec::new();
    let mut modified = Vec::new();

    for name in old.keys() {
        if !new.contains_key(name) {
            removed.push(ChangeEvent::Removed(material_id(&folder.join(name))));
        }
    }

    for (name, entry) in new {
        match old.get(name) {
            None => added.push(ChangeEvent::Added(MaterialRecord::from_entry(folder, entry))),
            Some(previous)
                if previous.size != entry.size || previous.modified_at != entry.modified_at =>
            {
                let record = MaterialRecord::from_entry(folder, entry);
                modified.push(ChangeEvent::Modified(record.id.clone(), record));
            }
            Some(_) => {}
        }
    }

    removed.extend(added);
    removed.extend(modified);
    removed
}

struct RunningDetector {
    folder: PathBuf,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Watches one folder at a time by polling it.
pub struct ChangeDetector {
    config: WatchConfig,
    scanner: DirectoryScanner,
    sink: Arc<dyn EventSink>,
    running: Option<RunningDetector>,
}

impl ChangeDetector {
    /// Create a stopped detector.
    pub fn new(config: WatchConfig, sink: Arc<dyn EventSink>) -> Self {
        let scanner = DirectoryScanner::new(config.filter.clone());
        Self {
            config,
            scanner,
            sink,
            running: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DetectorState {
        match &self.running {
            Some(running) if !running.task.is_finished() => DetectorState::Running,
            _ => DetectorState::Stopped,
        }
    }

    /// Start polling `folder`, diffing against `baseline` first.
    ///
    /// A loop that is already running is stopped before the new one starts.
    pub async fn start(&mut self, folder: PathBuf, baseline: Snapshot) {
        self.stop().await;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            folder.clone(),
            baseline,
            self.config.clone(),
            self.scanner.clone(),
            Arc::clone(&self.sink),
            cancel.clone(),
        ));

        info!(
            "Change detector started for {} (every {:?})",
            folder.display(),
            self.config.poll_interval()
        );
        self.running = Some(RunningDetector {
            folder,
            cancel,
            task,
        });
    }

    /// Stop polling. No event is delivered once this returns.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.cancel.cancel();
        if let Err(e) = running.task.await {
            error!("Change detector task for {} failed: {e}", running.folder.display());
        }
        info!("Change detector stopped for {}", running.folder.display());
    }
}

impl Drop for ChangeDetector {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}

async fn poll_loop(
    folder: PathBuf,
    baseline: Snapshot,
    config: WatchConfig,
    scanner: DirectoryScanner,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
) {
    let mut last = baseline;
    let mut failures: u32 = 0;

    loop {
        let delay = config.backoff_for(failures);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        match scanner.scan_blocking(folder.clone()).await {
            Ok(entries) => {
                if failures > 0 {
                    info!("Scan of {} recovered after {failures} failures", folder.display());
                }
                failures = 0;

                let next = snapshot_of(entries);
                let events = diff(&folder, &last, &next);
                last = next;

                if cancel.is_cancelled() {
                    break;
                }
                if !events.is_empty() {
                    debug!("Detected {} changes in {}", events.len(), folder.display());
                }
                sink.deliver(events).await;
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                warn!(
                    "Scan failed ({failures} in a row), retrying in {:?}: {e}",
                    config.backoff_for(failures)
                );
            }
        }
    }

    debug!("Poll loop exited for {}", folder.display());
}
