//! Server configuration loaded from TOML.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sau_folder_watcher::WatchConfig;
use serde::{Deserialize, Serialize};

/// Default listen address.
pub const DEFAULT_BIND: &str = "0.0.0.0:5409";

/// File inside the state directory holding persisted settings.
pub const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP server listens on.
    pub bind: SocketAddr,

    /// Directory for persisted settings such as the watched folder.
    pub state_dir: PathBuf,

    /// Watch behavior.
    pub watch: WatchConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 5409)),
            state_dir: default_state_dir(),
            watch: WatchConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load from `path`, or return defaults when no path is given.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.watch.validate()?;
        Ok(config)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.state_dir.join(SETTINGS_FILE)
    }
}

fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sau-materials")
}
