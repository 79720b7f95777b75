//! In-memory catalog of materials.
//!
//! The `MaterialCatalog` is the single source of truth served to clients.
//! It only changes through [`ChangeEvent`]s, whether they come from the
//! change detector or are injected by the ingestion pipeline.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info};

use crate::detector::EventSink;
use crate::event::{ChangeEvent, MaterialRecord};

/// Mapping from material id to record.
#[derive(Debug, Default)]
pub struct MaterialCatalog {
    state: RwLock<CatalogState>,
}

#[derive(Debug, Default)]
struct CatalogState {
    records: HashMap<String, MaterialRecord>,

    /// Bumped by every write that does not come from change detection.
    generation: u64,

    /// Records written outside change detection: generation of the write
    /// and the file it concerns.
    touched: HashMap<String, (u64, PathBuf)>,

    /// Generation at the end of the last two deliveries, oldest first.
    delivered: [u64; 2],
}

impl CatalogState {
    fn apply_external(&mut self, event: ChangeEvent) {
        let path = match &event {
            ChangeEvent::Added(record) | ChangeEvent::Modified(_, record) => {
                Some(record.absolute_path.clone())
            }
            ChangeEvent::Removed(id) => self.records.get(id).map(|r| r.absolute_path.clone()),
        };
        if let Some(path) = path {
            self.generation += 1;
            self.touched
                .insert(event.id().to_string(), (self.generation, path));
        }
        apply_event(&mut self.records, event);
    }

    /// Whether `id` was written after the scan behind the previous
    /// delivery started, so the detector's snapshot may not reflect it.
    fn unsettled(&self, id: &str) -> bool {
        self.touched
            .get(id)
            .is_some_and(|(generation, _)| *generation > self.delivered[0])
    }

    fn reseed(&mut self, records: Vec<MaterialRecord>) {
        let dropped = self.records.len();
        self.records.clear();
        self.touched.clear();
        self.delivered = [self.generation; 2];
        for record in records {
            apply_event(&mut self.records, ChangeEvent::Added(record));
        }
        info!(
            "Catalog reseeded: {} records (dropped {dropped})",
            self.records.len()
        );
    }
}

impl MaterialCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event.
    pub async fn apply(&self, event: ChangeEvent) {
        self.state.write().await.apply_external(event);
    }

    /// Apply events in order under a single write lock.
    pub async fn apply_all(&self, events: Vec<ChangeEvent>) {
        if events.is_empty() {
            return;
        }
        let mut state = self.state.write().await;
        for event in events {
            state.apply_external(event);
        }
    }

    /// Replace the whole catalog with `records`, each treated as added.
    pub async fn reseed(&self, records: Vec<MaterialRecord>) {
        self.state.write().await.reseed(records);
    }

    /// All records ordered by file name, then id.
    pub async fn list(&self) -> Vec<MaterialRecord> {
        let mut list: Vec<MaterialRecord> =
            self.state.read().await.records.values().cloned().collect();
        list.sort_by(|a, b| a.file_name.cmp(&b.file_name).then_with(|| a.id.cmp(&b.id)));
        list
    }

    /// Look up a record by id.
    pub async fn get(&self, id: &str) -> Option<MaterialRecord> {
        self.state.read().await.records.get(id).cloned()
    }

    /// Look up a record by file name.
    pub async fn find_by_name(&self, file_name: &str) -> Option<MaterialRecord> {
        self.state
            .read()
            .await
            .records
            .values()
            .find(|r| r.file_name == file_name)
            .cloned()
    }

    /// Remove a record, returning it if it was present.
    pub async fn remove(&self, id: &str) -> Option<MaterialRecord> {
        let mut state = self.state.write().await;
        let removed = state.records.get(id).cloned();
        if removed.is_some() {
            state.apply_external(ChangeEvent::Removed(id.to_string()));
            debug!("Removed material {id}");
        }
        removed
    }

    /// Number of records.
    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    /// Whether the catalog is empty.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.records.is_empty()
    }

    /// Take the write lock for a multi-step mutation.
    ///
    /// Disk operations that must be atomic with their catalog update run
    /// while the returned guard is held.
    pub async fn writer(&self) -> CatalogWriter<'_> {
        CatalogWriter {
            state: self.state.write().await,
        }
    }
}

/// Applies detector batches without letting them undo newer writes.
///
/// A batch comes from a scan that may predate an upload or delete, and a
/// write landing after that scan started is invisible to the detector's
/// next diff as well. Such records are checked against disk for two
/// deliveries instead of trusting the scan. The check runs before the
/// write lock is taken; a record written again meanwhile waits for the
/// next delivery.
#[async_trait]
impl EventSink for MaterialCatalog {
    async fn deliver(&self, events: Vec<ChangeEvent>) {
        let (since, targets): (u64, Vec<(String, PathBuf)>) = {
            let state = self.state.read().await;
            let targets = state
                .touched
                .iter()
                .filter(|(id, _)| state.unsettled(id))
                .map(|(id, (_, path))| (id.clone(), path.clone()))
                .collect();
            (state.generation, targets)
        };

        let mut observed = Vec::with_capacity(targets.len());
        for (id, path) in targets {
            observed.push(disk_state(id, path).await);
        }

        let mut state = self.state.write().await;
        for event in events {
            if !state.unsettled(event.id()) {
                apply_event(&mut state.records, event);
            }
        }
        for event in observed {
            let current = state
                .touched
                .get(event.id())
                .is_some_and(|(generation, _)| *generation <= since);
            if current {
                debug!("Re-checked {} against disk: {}", event.id(), event.kind());
                apply_event(&mut state.records, event);
            }
        }

        state.delivered = [state.delivered[1], state.generation];
        let settled = state.delivered[0];
        state
            .touched
            .retain(|_, (generation, _)| *generation > settled);
    }
}

/// What is on disk for `id` right now, as an event.
async fn disk_state(id: String, path: PathBuf) -> ChangeEvent {
    match fs::metadata(&path).await {
        Ok(metadata) if metadata.is_file() => {
            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
            ChangeEvent::Modified(id, MaterialRecord::new(path, metadata.len(), modified))
        }
        _ => ChangeEvent::Removed(id),
    }
}

/// Exclusive access to the catalog.
pub struct CatalogWriter<'a> {
    state: RwLockWriteGuard<'a, CatalogState>,
}

impl CatalogWriter<'_> {
    /// Apply one event.
    pub fn apply(&mut self, event: ChangeEvent) {
        self.state.apply_external(event);
    }

    /// Look up a record by id.
    pub fn get(&self, id: &str) -> Option<&MaterialRecord> {
        self.state.records.get(id)
    }

    /// Remove a record.
    pub fn remove(&mut self, id: &str) -> Option<MaterialRecord> {
        let removed = self.state.records.get(id).cloned();
        if removed.is_some() {
            self.state.apply_external(ChangeEvent::Removed(id.to_string()));
        }
        removed
    }

    /// Replace the whole catalog, like [`MaterialCatalog::reseed`].
    pub fn reseed(&mut self, records: Vec<MaterialRecord>) {
        self.state.reseed(records);
    }
}

/// Apply `event` to `records`. Returns whether anything changed.
fn apply_event(records: &mut HashMap<String, MaterialRecord>, event: ChangeEvent) -> bool {
    debug!("Applying {} event for {}", event.kind(), event.id());
    match event {
        ChangeEvent::Added(record) => upsert(records, record),
        ChangeEvent::Modified(id, mut record) => {
            // The event id wins over whatever the record carries.
            record.id = id;
            upsert(records, record)
        }
        ChangeEvent::Removed(id) => records.remove(&id).is_some(),
    }
}

/// Insert or replace, keeping the first discovery time.
fn upsert(records: &mut HashMap<String, MaterialRecord>, mut record: MaterialRecord) -> bool {
    match records.get(&record.id) {
        Some(existing) if existing.same_content(&record) => false,
        Some(existing) => {
            record.discovered_at = existing.discovered_at;
            records.insert(record.id.clone(), record);
            true
        }
        None => {
            records.insert(record.id.clone(), record);
            true
        }
    }
}
