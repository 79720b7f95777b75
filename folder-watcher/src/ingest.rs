//! Uploads, deletions and reads of materials.
//!
//! Writes go through the `IngestionPipeline` so the catalog is updated in
//! the same critical section as the disk, instead of waiting for the next
//! poll of the change detector.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::catalog::MaterialCatalog;
use crate::config::{ScanFilter, UPLOAD_TEMP_SUFFIX};
use crate::error::{Result, WatcherError};
use crate::event::{ChangeEvent, MaterialRecord, material_id};
use crate::registry::PathRegistry;

/// Writes files into the watched folder and keeps the catalog in step.
///
/// Concurrent uploads of the same file name are rejected with
/// [`WatcherError::Conflict`]; the first one wins.
pub struct IngestionPipeline {
    catalog: Arc<MaterialCatalog>,
    registry: Arc<PathRegistry>,
    filter: ScanFilter,
    max_upload_bytes: u64,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl IngestionPipeline {
    /// Create a pipeline over a catalog and the registry naming its folder.
    ///
    /// `filter` must be the one the change detector scans with, so every
    /// stored upload is a file the detector tracks.
    pub fn new(
        catalog: Arc<MaterialCatalog>,
        registry: Arc<PathRegistry>,
        filter: ScanFilter,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            catalog,
            registry,
            filter,
            max_upload_bytes,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Store `bytes` as `file_name` in the watched folder.
    ///
    /// The data lands in a temp file first and is renamed into place, so
    /// the change detector never lists a partial upload.
    pub async fn upload(&self, file_name: &str, bytes: &[u8]) -> Result<MaterialRecord> {
        validate_file_name(file_name)?;
        if !self.filter.accepts(file_name) {
            return Err(WatcherError::InvalidName(format!(
                "{file_name:?}: excluded from the watched folder listing"
            )));
        }

        let size = bytes.len() as u64;
        if size > self.max_upload_bytes {
            return Err(WatcherError::TooLarge {
                size,
                limit: self.max_upload_bytes,
            });
        }

        let folder = self.registry.get().await.ok_or(WatcherError::NoActiveWatch)?;
        let _reservation = self.reserve(file_name)?;

        let target = folder.join(file_name);
        let temp = folder.join(format!(".{}{UPLOAD_TEMP_SUFFIX}", material_id(&target)));
        fs::write(&temp, bytes).await?;

        let mut writer = self.catalog.writer().await;

        // A watch switch between the write and now would leave a record
        // from the old folder in the reseeded catalog.
        if self.registry.get().await.as_deref() != Some(folder.as_path()) {
            drop(writer);
            discard_temp(&temp).await;
            return Err(WatcherError::Conflict(format!(
                "watch folder changed during upload of {file_name}"
            )));
        }

        if let Err(e) = fs::rename(&temp, &target).await {
            drop(writer);
            discard_temp(&temp).await;
            return Err(e.into());
        }

        let metadata = fs::metadata(&target).await?;
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let record = MaterialRecord::new(target, metadata.len(), modified);

        let event = if writer.get(&record.id).is_some() {
            ChangeEvent::Modified(record.id.clone(), record.clone())
        } else {
            ChangeEvent::Added(record.clone())
        };
        info!("Stored upload {file_name} ({size} bytes, {})", event.kind());
        writer.apply(event);

        // Return what the catalog holds, which keeps the first discovery time.
        Ok(writer.get(&record.id).cloned().unwrap_or(record))
    }

    /// Delete the material `id` from disk, then from the catalog.
    ///
    /// A file that is already gone counts as deleted. Any other disk error
    /// leaves the record in place.
    pub async fn delete(&self, id: &str) -> Result<MaterialRecord> {
        let mut writer = self.catalog.writer().await;
        let record = writer
            .get(id)
            .cloned()
            .ok_or_else(|| WatcherError::NotFound(id.to_string()))?;

        match fs::remove_file(&record.absolute_path).await {
            Ok(()) => debug!("Deleted {}", record.absolute_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("File already gone: {}", record.absolute_path.display());
            }
            Err(e) => return Err(e.into()),
        }

        writer.remove(id);
        info!("Deleted material {id} ({})", record.file_name);
        Ok(record)
    }

    /// Read the bytes of the material named `file_name`.
    pub async fn read(&self, file_name: &str) -> Result<(MaterialRecord, Vec<u8>)> {
        validate_file_name(file_name)?;

        let record = self
            .catalog
            .find_by_name(file_name)
            .await
            .ok_or_else(|| WatcherError::NotFound(file_name.to_string()))?;

        match fs::read(&record.absolute_path).await {
            Ok(bytes) => Ok((record, bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(WatcherError::NotFound(file_name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Claim `file_name` for the duration of one upload.
    pub(crate) fn reserve(&self, file_name: &str) -> Result<Reservation> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(file_name.to_string()) {
            return Err(WatcherError::Conflict(format!(
                "upload of {file_name} already in progress"
            )));
        }
        Ok(Reservation {
            in_flight: Arc::clone(&self.in_flight),
            file_name: file_name.to_string(),
        })
    }
}

/// Releases a file name reservation when dropped.
pub(crate) struct Reservation {
    in_flight: Arc<Mutex<HashSet<String>>>,
    file_name: String,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.file_name);
    }
}

async fn discard_temp(temp: &Path) {
    if let Err(e) = fs::remove_file(temp).await {
        warn!("Failed to remove temp file {}: {e}", temp.display());
    }
}

/// Reject names that could escape the watched folder or hide from scans.
pub fn validate_file_name(file_name: &str) -> Result<()> {
    let invalid = |reason: &str| Err(WatcherError::InvalidName(format!("{file_name:?}: {reason}")));

    if file_name.trim().is_empty() {
        return invalid("empty");
    }
    if file_name.contains(['/', '\\', '\0']) {
        return invalid("contains a path separator");
    }
    if file_name == "." || file_name == ".." {
        return invalid("contains a parent reference");
    }
    if file_name.starts_with('.') {
        return invalid("hidden files are not materials");
    }
    if file_name.ends_with(UPLOAD_TEMP_SUFFIX) {
        return invalid("reserved suffix");
    }
    if Path::new(file_name).is_absolute() {
        return invalid("absolute path");
    }
    Ok(())
}
