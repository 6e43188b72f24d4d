//! Persisted artifacts: measurement reports and calibration offsets.
//!
//! Both are pretty-printed JSON documents with a four-space indent. Each artifact has a
//! single writer at a time; callers run one measurement workflow at a time.

pub mod calibration;
pub mod report;

pub use calibration::CalibrationStore;
pub use report::{round_2dp, ArtifactId, ReportDocument, ReportWriter, SensorEntry};

use crate::error::{AppResult, DaqError};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Encode `value` as JSON indented by four spaces.
pub(crate) fn to_pretty_json<T: Serialize>(value: &T) -> AppResult<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer)?;
    buf.push(b'\n');
    Ok(buf)
}

/// Create `dir` and its parents if missing.
pub(crate) fn ensure_dir(dir: &Path) -> AppResult<()> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|e| DaqError::artifact_io(dir, e))
}
