//! Filesystem-backed side store for heavy task operands.
//!
//! A flat named-blob store: one `<name>.blob` file per entry under the base
//! directory. The queue writes and reads only names of the form `input_<i>`
//! and `result_<i>`; the store itself accepts any ASCII name built from
//! alphanumerics plus `_`, `-` and `.`, and rejects everything else before
//! touching the filesystem.

use std::path::{Path, PathBuf};

use tracing::debug;

/// Errors from the named-blob store.
#[derive(Debug, thiserror::Error)]
pub enum SideStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no entry named '{0}'")]
    NotFound(String),

    #[error("invalid store name '{0}'")]
    InvalidName(String),
}

/// Named-blob persistence shared by every subworld.
pub struct SideStore {
    base_dir: PathBuf,
}

impl SideStore {
    /// Open a store rooted at `base_dir`, creating the directory if needed.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, SideStoreError> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Base path for this store.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Write a blob under `name`, replacing any previous entry.
    pub fn write(&self, name: &str, bytes: &[u8]) -> Result<(), SideStoreError> {
        let path = self.path_for(name)?;
        std::fs::write(&path, bytes)?;
        debug!(name, bytes = bytes.len(), "side store write");
        Ok(())
    }

    /// Read the blob stored under `name`.
    pub fn read(&self, name: &str) -> Result<Vec<u8>, SideStoreError> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Err(SideStoreError::NotFound(name.to_string()));
        }
        let bytes = std::fs::read(&path)?;
        debug!(name, bytes = bytes.len(), "side store read");
        Ok(bytes)
    }

    /// Erase the entry stored under `name`.
    pub fn remove(&self, name: &str) -> Result<(), SideStoreError> {
        let path = self.path_for(name)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(name, "side store remove");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SideStoreError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether an entry named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.path_for(name).map(|p| p.exists()).unwrap_or(false)
    }

    /// All entry names, sorted.
    pub fn names(&self) -> Result<Vec<String>, SideStoreError> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if let Some(stem) = file_name.strip_suffix(".blob") {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Whether the store has no entries.
    pub fn is_empty(&self) -> Result<bool, SideStoreError> {
        Ok(self.names()?.is_empty())
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, SideStoreError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(SideStoreError::InvalidName(name.to_string()));
        }
        Ok(self.base_dir.join(format!("{name}.blob")))
    }
}
