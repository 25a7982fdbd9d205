//! Write-once store for pristine unit bytes.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use crate::error::BackupError;

/// Result of [`BackupStore::ensure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// This call wrote the backup.
    Written(PathBuf),
    /// An earlier call already did.
    Present,
}

/// Persists each unit's bytes at most once per process.
///
/// Every unit gets its own slot lock. The first caller to take a unit's slot
/// writes the file; callers racing on the same unit wait for it and then see
/// the slot filled. A failed write leaves the slot empty so the next delivery
/// tries again.
pub struct BackupStore {
    dir: PathBuf,
    slots: Mutex<HashMap<String, Arc<Mutex<bool>>>>,
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File a unit's backup is written to.
    pub fn path_for(&self, unit: &str) -> PathBuf {
        self.dir.join(file_name(unit))
    }

    fn slot(&self, unit: &str) -> Arc<Mutex<bool>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(unit.to_string()).or_default().clone()
    }

    /// Write `bytes` as the backup of `unit` unless one exists already.
    pub fn ensure(&self, unit: &str, bytes: &[u8]) -> Result<BackupOutcome, BackupError> {
        let slot = self.slot(unit);
        let mut written = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if *written {
            return Ok(BackupOutcome::Present);
        }

        fs::create_dir_all(&self.dir).map_err(|source| BackupError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path_for(unit);
        let tmp = path.with_extension("unit.tmp");
        let write_err = |source| BackupError::Write {
            unit: unit.to_string(),
            path: path.clone(),
            source,
        };
        fs::write(&tmp, bytes).map_err(write_err)?;
        fs::rename(&tmp, &path).map_err(write_err)?;

        *written = true;
        info!(unit = %unit, path = %path.display(), bytes = bytes.len(), "backed up unit");
        Ok(BackupOutcome::Written(path))
    }

    pub fn is_backed_up(&self, unit: &str) -> bool {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            match slots.get(unit) {
                Some(slot) => slot.clone(),
                None => return false,
            }
        };
        let written = *slot.lock().unwrap_or_else(PoisonError::into_inner);
        written
    }

    /// Number of units backed up so far.
    pub fn count(&self) -> usize {
        let slots: Vec<Arc<Mutex<bool>>> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        slots
            .iter()
            .filter(|s| *s.lock().unwrap_or_else(PoisonError::into_inner))
            .count()
    }
}

/// `demo.Outer$Inner` → `demo_Outer_Inner.unit`.
fn file_name(unit: &str) -> String {
    let mut name: String = unit
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    name.push_str(".unit");
    name
}
