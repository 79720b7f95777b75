//! Configuration types for folder watching.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WatcherError};

/// Default poll interval for the change detector.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Default cap for the scan-error backoff.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

/// Default upload limit (160 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 160 * 1024 * 1024;

/// Suffix of in-progress upload files. Never listed, whatever the filter.
pub const UPLOAD_TEMP_SUFFIX: &str = ".sau-upload";

/// Configuration for watching a material folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Time between two polls of the watched folder, in milliseconds.
    pub poll_interval_ms: u64,

    /// Upper bound for the delay after consecutive scan failures.
    pub max_backoff_ms: u64,

    /// Largest accepted upload, in bytes.
    pub max_upload_bytes: u64,

    /// Which directory entries count as materials.
    pub filter: ScanFilter,
}

impl WatchConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            filter: ScanFilter::default(),
        }
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the backoff cap.
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the upload limit.
    pub fn with_max_upload_bytes(mut self, limit: u64) -> Self {
        self.max_upload_bytes = limit;
        self
    }

    /// Set the scan filter.
    pub fn with_filter(mut self, filter: ScanFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Delay before the next poll after `failures` consecutive scan errors.
    ///
    /// Doubles the poll interval per failure, capped at `max_backoff_ms`.
    /// Zero failures yields the plain poll interval, and the delay never
    /// drops below it when the cap is smaller than the interval.
    pub fn backoff_for(&self, failures: u32) -> Duration {
        let factor = 1u64.checked_shl(failures.min(32)).unwrap_or(u64::MAX);
        let delay = self
            .poll_interval_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms.max(self.poll_interval_ms));
        Duration::from_millis(delay)
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(WatcherError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        for pattern in &self.filter.exclude_patterns {
            glob::Pattern::new(pattern)
                .map_err(|e| WatcherError::Config(format!("bad exclude pattern {pattern}: {e}")))?;
        }
        Ok(())
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Decides which top-level entries of the watched folder are materials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanFilter {
    /// Whether dot-files are listed.
    pub include_hidden: bool,

    /// Glob patterns matched against the file name.
    pub exclude_patterns: Vec<String>,

    /// Case-insensitive extension allow list. Empty accepts every file.
    pub allowed_extensions: Vec<String>,
}

impl ScanFilter {
    /// Restrict materials to the given extensions (without the dot).
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_extensions = extensions
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    /// List dot-files too.
    pub fn include_hidden(mut self) -> Self {
        self.include_hidden = true;
        self
    }

    /// Patterns for OS bookkeeping and in-progress download files.
    fn default_excludes() -> Vec<String> {
        vec![
            ".DS_Store".to_string(),
            "Thumbs.db".to_string(),
            "desktop.ini".to_string(),
            "*.tmp".to_string(),
            "*.part".to_string(),
            "*.crdownload".to_string(),
            "*~".to_string(),
        ]
    }

    /// Check if a file name should be listed.
    pub fn accepts(&self, file_name: &str) -> bool {
        if file_name.ends_with(UPLOAD_TEMP_SUFFIX) {
            return false;
        }
        if !self.include_hidden && file_name.starts_with('.') {
            return false;
        }

        let excluded = self.exclude_patterns.iter().any(|pattern| {
            glob::Pattern::new(pattern).is_ok_and(|glob| glob.matches(file_name))
        });
        if excluded {
            return false;
        }

        if self.allowed_extensions.is_empty() {
            return true;
        }
        let extension = std::path::Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);
        extension.is_some_and(|ext| self.allowed_extensions.contains(&ext))
    }
}

impl Default for ScanFilter {
    fn default() -> Self {
        Self {
            include_hidden: false,
            exclude_patterns: Self::default_excludes(),
            allowed_extensions: Vec::new(),
        }
    }
}
