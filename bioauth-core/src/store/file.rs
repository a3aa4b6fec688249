//! JSON snapshot persistence for the credential store.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::{StoreError, StoredCredential};

const SNAPSHOT_VERSION: u32 = 1;

/// On-disk layout.
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct StoreSnapshot {
    version: u32,
    pub(super) credentials: Vec<StoredCredential>,
    pub(super) counters: BTreeMap<String, u32>,
}

impl StoreSnapshot {
    pub(super) fn new(credentials: Vec<StoredCredential>, counters: BTreeMap<String, u32>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            credentials,
            counters,
        }
    }
}

/// A snapshot file rewritten via write-to-temp-then-rename.
pub(super) struct FileSnapshot {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSnapshot {
    pub(super) fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub(super) fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Read the snapshot, or `None` if the file does not exist yet.
    pub(super) fn load(&self) -> Result<Option<StoreSnapshot>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };

        let snapshot: StoreSnapshot = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::Serialization(format!(
                "unsupported store version {}",
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }

    /// Build and write a snapshot while holding the write lock, so the last
    /// writer always persists the newest state.
    pub(super) fn write_with(
        &self,
        build: impl FnOnce() -> StoreSnapshot,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot = build();

        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|e| StoreError::Io(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| StoreError::Io(e.to_string()))?;

        tracing::debug!(path = %self.path.display(), "Credential store persisted");
        Ok(())
    }
}
