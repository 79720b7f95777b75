//! Watch lifecycle orchestration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::catalog::MaterialCatalog;
use crate::config::WatchConfig;
use crate::detector::{ChangeDetector, DetectorState, EventSink};
use crate::error::{Result, WatcherError};
use crate::event::MaterialRecord;
use crate::ingest::IngestionPipeline;
use crate::registry::{KeyValueStore, PathRegistry, validate_folder};
use crate::scanner::{DirectoryScanner, snapshot_of};

/// What the service is watching right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchStatus {
    /// The watched folder, if any.
    pub folder_path: Option<PathBuf>,

    /// Whether a change detector is polling it.
    pub is_running: bool,
}

/// Owns the single watch of the service.
///
/// Construct one per process and share it. Lifecycle calls are serialized
/// so two change detectors never run at the same time.
pub struct WatchController {
    registry: Arc<PathRegistry>,
    catalog: Arc<MaterialCatalog>,
    pipeline: IngestionPipeline,
    scanner: DirectoryScanner,
    detector: Mutex<ChangeDetector>,
}

impl WatchController {
    /// Create a controller. Nothing is watched until
    /// [`start_watch`](Self::start_watch) or [`resume`](Self::resume).
    pub async fn new(config: WatchConfig, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(PathRegistry::open(store).await?);
        let catalog = Arc::new(MaterialCatalog::new());
        let scanner = DirectoryScanner::new(config.filter.clone());
        let pipeline = IngestionPipeline::new(
            Arc::clone(&catalog),
            Arc::clone(&registry),
            scanner.filter().clone(),
            config.max_upload_bytes,
        );
        let sink: Arc<dyn EventSink> = catalog.clone();
        let detector = ChangeDetector::new(config, sink);

        Ok(Self {
            registry,
            catalog,
            pipeline,
            scanner,
            detector: Mutex::new(detector),
        })
    }

    /// Watch `path`, replacing any current watch.
    ///
    /// The folder is scanned before the old watch is touched, so a folder
    /// that cannot be listed leaves the current watch running. On success
    /// the catalog holds exactly the files of the new folder.
    pub async fn start_watch(&self, path: &Path) -> Result<PathBuf> {
        let mut detector = self.detector.lock().await;

        let folder = validate_folder(path).await?;
        let entries = self
            .scanner
            .scan_blocking(folder.clone())
            .await
            .map_err(|e| WatcherError::InvalidPath(e.to_string()))?;

        detector.stop().await;

        // Uploads re-check the registry under the catalog writer, so holding
        // it across the switch keeps them from landing between the two.
        let mut writer = self.catalog.writer().await;
        let folder = self.registry.set(&folder).await?;
        let records = entries
            .iter()
            .map(|entry| MaterialRecord::from_entry(&folder, entry))
            .collect();
        writer.reseed(records);
        drop(writer);

        detector.start(folder.clone(), snapshot_of(entries)).await;
        info!("Watching {}", folder.display());
        Ok(folder)
    }

    /// Stop watching. The catalog keeps its last known state.
    pub async fn stop_watch(&self) -> Result<()> {
        let mut detector = self.detector.lock().await;
        detector.stop().await;
        self.registry.clear().await?;
        info!("Watch stopped");
        Ok(())
    }

    /// The watched folder, if any.
    pub async fn get_watch(&self) -> Option<PathBuf> {
        self.registry.get().await
    }

    /// Folder and detector state together.
    pub async fn status(&self) -> WatchStatus {
        let detector = self.detector.lock().await;
        WatchStatus {
            folder_path: self.registry.get().await,
            is_running: detector.state() == DetectorState::Running,
        }
    }

    /// Restart the watch persisted by a previous run.
    ///
    /// A persisted folder that no longer exists is forgotten.
    pub async fn resume(&self) -> Result<Option<PathBuf>> {
        let Some(saved) = self.registry.get().await else {
            return Ok(None);
        };

        match self.start_watch(&saved).await {
            Ok(folder) => Ok(Some(folder)),
            Err(WatcherError::InvalidPath(reason)) => {
                warn!("Not resuming watch of {}: {reason}", saved.display());
                self.registry.clear().await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Stop the detector but keep the persisted folder for the next run.
    pub async fn shutdown(&self) {
        self.detector.lock().await.stop().await;
    }

    /// The material catalog.
    pub fn catalog(&self) -> &Arc<MaterialCatalog> {
        &self.catalog
    }

    /// The ingestion pipeline.
    pub fn pipeline(&self) -> &IngestionPipeline {
        &self.pipeline
    }

    /// All materials, in listing order.
    pub async fn list(&self) -> Vec<MaterialRecord> {
        self.catalog.list().await
    }
}
