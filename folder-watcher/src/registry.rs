//! Persistence of the watched folder path.
//!
//! The `PathRegistry` remembers which folder is watched so the watch can be
//! resumed after a restart. Storage goes through the [`KeyValueStore`]
//! trait; [`JsonFileStore`] keeps the values in one JSON document.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{Result, WatcherError};

/// Key under which the watched folder is stored.
pub const WATCH_FOLDER_KEY: &str = "watch_folder";

/// Minimal string key-value storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Volatile store, for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON file.
///
/// Every write rewrites the file through a temp file and a rename.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open the store at `path`, creating parent directories as needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let values = match fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!("Opened state file {}", path.display());

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let content = serde_json::to_string_pretty(values)?;
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().await;
        values.insert(key.to_string(), value.to_string());
        self.persist(&values).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock().await;
        if values.remove(key).is_some() {
            self.persist(&values).await?;
        }
        Ok(())
    }
}

/// Holds the single watched folder.
pub struct PathRegistry {
    store: Arc<dyn KeyValueStore>,
    current: RwLock<Option<PathBuf>>,
}

impl PathRegistry {
    /// Open the registry, loading any persisted path.
    ///
    /// A persisted path is loaded as-is; callers re-validate it before use.
    pub async fn open(store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let current = store.get(WATCH_FOLDER_KEY).await?.map(PathBuf::from);
        if let Some(path) = &current {
            info!("Restored watch folder setting: {}", path.display());
        }
        Ok(Self {
            store,
            current: RwLock::new(current),
        })
    }

    /// Validate, canonicalize and store `path`.
    pub async fn set(&self, path: &Path) -> Result<PathBuf> {
        let path = validate_folder(path).await?;
        self.store
            .set(WATCH_FOLDER_KEY, &path.to_string_lossy())
            .await?;
        *self.current.write().await = Some(path.clone());
        debug!("Watch folder set to {}", path.display());
        Ok(path)
    }

    /// The stored path.
    pub async fn get(&self) -> Option<PathBuf> {
        self.current.read().await.clone()
    }

    /// Forget the stored path.
    pub async fn clear(&self) -> Result<()> {
        self.store.delete(WATCH_FOLDER_KEY).await?;
        *self.current.write().await = None;
        Ok(())
    }
}

/// Check that `path` names an existing directory and make it absolute.
pub async fn validate_folder(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(WatcherError::InvalidPath("folder path is empty".to_string()));
    }

    let metadata = fs::metadata(path)
        .await
        .map_err(|e| WatcherError::InvalidPath(format!("{}: {e}", path.display())))?;
    if !metadata.is_dir() {
        return Err(WatcherError::InvalidPath(format!(
            "not a directory: {}",
            path.display()
        )));
    }

    fs::canonicalize(path)
        .await
        .map_err(|e| WatcherError::InvalidPath(format!("{}: {e}", path.display())))
}
