use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use log::debug;
use parking_lot::Mutex;
use stake_core::StakeError;

use crate::ledger::LedgerSnapshot;

/// Persistence collaborator for ledger snapshots.
///
/// `save` must replace the stored snapshot as a whole or not at all.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<Option<LedgerSnapshot>, StakeError>;
    fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), StakeError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    slot: Mutex<Option<LedgerSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<Option<LedgerSnapshot>, StakeError> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), StakeError> {
        *self.slot.lock() = Some(snapshot.clone());
        Ok(())
    }
}

/// Pretty-printed JSON snapshot on disk, replaced through a sibling temp file.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<Option<LedgerSnapshot>, StakeError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.path).map_err(|e| storage(&self.path, e))?;
        let snapshot = serde_json::from_slice(&bytes).map_err(|e| storage(&self.path, e))?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), StakeError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| storage(parent, e))?;
            }
        }
        let bytes = serde_json::to_vec_pretty(snapshot).map_err(|e| storage(&self.path, e))?;
        let tmp = self.temp_path();
        let mut file = fs::File::create(&tmp).map_err(|e| storage(&tmp, e))?;
        file.write_all(&bytes).map_err(|e| storage(&tmp, e))?;
        file.sync_all().map_err(|e| storage(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| storage(&self.path, e))?;
        debug!(
            "saved snapshot at height {} to {}",
            snapshot.meta.height,
            self.path.display()
        );
        Ok(())
    }
}

fn storage(path: &Path, err: impl std::fmt::Display) -> StakeError {
    StakeError::Storage(format!("{}: {err}", path.display()))
}
