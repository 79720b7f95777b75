//! Non-recursive listing of the watched folder.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::config::ScanFilter;
use crate::error::{Result, WatcherError};

/// One file found by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEntry {
    /// File name inside the scanned folder.
    pub file_name: String,

    /// File size in bytes.
    pub size: u64,

    /// Last modification time.
    pub modified_at: DateTime<Utc>,
}

/// Point-in-time listing of a folder keyed by file name.
pub type Snapshot = BTreeMap<String, ScanEntry>;

/// Build a snapshot from scan entries.
pub fn snapshot_of(entries: Vec<ScanEntry>) -> Snapshot {
    entries
        .into_iter()
        .map(|entry| (entry.file_name.clone(), entry))
        .collect()
}

/// Lists the files of a folder that pass a [`ScanFilter`].
#[derive(Debug, Clone, Default)]
pub struct DirectoryScanner {
    filter: ScanFilter,
}

impl DirectoryScanner {
    /// Create a scanner with the given filter.
    pub fn new(filter: ScanFilter) -> Self {
        Self { filter }
    }

    /// The filter in use.
    pub fn filter(&self) -> &ScanFilter {
        &self.filter
    }

    /// List the top-level files of `folder`, ordered by file name.
    ///
    /// Directories are skipped. An entry that vanishes or cannot be
    /// stat'ed between listing and metadata lookup is left out, so a diff
    /// against an earlier snapshot reports it as removed. Failure to read
    /// the folder itself is a [`WatcherError::Scan`].
    pub fn scan(&self, folder: &Path) -> Result<Vec<ScanEntry>> {
        let metadata = std::fs::metadata(folder)
            .map_err(|e| WatcherError::Scan(format!("{}: {e}", folder.display())))?;
        if !metadata.is_dir() {
            return Err(WatcherError::Scan(format!(
                "not a directory: {}",
                folder.display()
            )));
        }

        let walker = WalkDir::new(folder)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();

        let mut entries = Vec::new();
        for item in walker {
            let entry = match item {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(WatcherError::Scan(format!("{}: {e}", folder.display())));
                }
                Err(e) => {
                    debug!("Skipping unreadable entry: {e}");
                    continue;
                }
            };

            let Some(file_name) = entry.file_name().to_str().map(String::from) else {
                debug!("Skipping non UTF-8 file name: {:?}", entry.file_name());
                continue;
            };
            if !self.filter.accepts(&file_name) {
                trace!("Filtered out: {file_name}");
                continue;
            }

            // Follows symlinks; a dangling or vanished entry is skipped.
            let Ok(metadata) = std::fs::metadata(entry.path()) else {
                debug!("Metadata unavailable, skipping: {}", entry.path().display());
                continue;
            };
            if !metadata.is_file() {
                continue;
            }

            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            entries.push(ScanEntry {
                file_name,
                size: metadata.len(),
                modified_at: DateTime::<Utc>::from(modified),
            });
        }

        debug!("Scanned {}: {} files", folder.display(), entries.len());
        Ok(entries)
    }

    /// Run [`scan`](Self::scan) on the blocking thread pool.
    pub async fn scan_blocking(&self, folder: PathBuf) -> Result<Vec<ScanEntry>> {
        let scanner = self.clone();
        tokio::task::spawn_blocking(move || scanner.scan(&folder)).await?
    }
}
