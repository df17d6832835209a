use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Queue configuration, typically parsed from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Base directory of the side store.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Timeout for one coordinator round-trip, in seconds.
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("data/side-store")
}

fn default_rpc_timeout() -> u64 {
    30
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            rpc_timeout_secs: default_rpc_timeout(),
        }
    }
}

impl QueueConfig {
    /// Load a config from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| QueueError::Config(format!("{}: {e}", path.display())))?;
        toml::from_str(&text).map_err(|e| QueueError::Config(e.to_string()))
    }

    /// Use `dir` as the side-store base directory.
    pub fn with_store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = dir.into();
        self
    }

    /// The coordinator round-trip timeout as a [`Duration`].
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}
