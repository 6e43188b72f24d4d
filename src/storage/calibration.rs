//! Calibration offset persistence.

use super::{ensure_dir, to_pretty_json};
use crate::analysis::CalibrationOffsets;
use crate::config::StorageConfig;
use crate::error::{AppResult, DaqError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// One calibration record at a fixed path.
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    path: PathBuf,
}

impl CalibrationStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the configured calibration path.
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.calibration_path())
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted offsets.
    ///
    /// A missing file is [`DaqError::CalibrationMissing`]: nothing has been calibrated
    /// yet, which callers handle by policy.
    pub fn load(&self) -> AppResult<CalibrationOffsets> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(DaqError::CalibrationMissing(self.path.clone()))
            }
            Err(e) => return Err(DaqError::artifact_io(&self.path, e)),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Overwrite the persisted offsets.
    pub fn save(&self, offsets: &CalibrationOffsets) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            ensure_dir(parent)?;
        }
        let bytes = to_pretty_json(offsets)?;
        fs::write(&self.path, bytes).map_err(|e| DaqError::artifact_io(&self.path, e))?;
        info!(path = %self.path.display(), "Calibration offsets saved");
        Ok(())
    }
}
