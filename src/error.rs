//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of failures that can occur between the probe's serial link and
//! the persisted measurement report.
//!
//! ## Error Hierarchy
//!
//! - **`Transport`**: The serial link failed to read or write. Fatal to the session; the
//!   session reports a disconnect exactly once and stops processing lines.
//! - **`MalformedFrame`** / **`BufferOverflow`**: One bad or excess data line. Recoverable,
//!   the line is discarded and the session keeps collecting.
//! - **`IncompleteAcquisition`**: The store still has unwritten cells when it is handed to
//!   the analysis pipeline. The report is not produced.
//! - **`PipelineInput`**: An analysis stage did not get enough points. Aborts that report.
//! - **`CalibrationMissing`**: No persisted offsets yet. The caller decides whether to
//!   proceed uncalibrated.
//! - **`ArtifactIo`**: Reading or writing a report/calibration artifact failed. Retrying with
//!   the same inputs is safe because the pipeline is deterministic.
//!
//! The remaining variants (`Config`, `Configuration`, `Serialization`, `SessionClosed`,
//! `InvalidCommand`) cover the ambient surfaces around the core.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration file or environment could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration parsed but holds a semantically invalid value.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Serial transport read/write failure.
    #[error("Transport error: {0}")]
    Transport(#[source] std::io::Error),

    /// One received data line was not a valid five-channel frame.
    #[error("Malformed frame '{line}': {reason}")]
    MalformedFrame {
        /// The offending line, trimmed.
        line: String,
        /// Why the line was rejected.
        reason: String,
    },

    /// A data line arrived after the store was already full.
    #[error("Sample buffer overflow: capacity {capacity} reached, discarded '{line}'")]
    BufferOverflow {
        /// Store capacity in frames.
        capacity: usize,
        /// The discarded line.
        line: String,
    },

    /// The store was finalized with unwritten cells.
    #[error("Incomplete acquisition: {filled} of {expected} cells written")]
    IncompleteAcquisition {
        /// Number of written cells.
        filled: usize,
        /// Number of cells a complete store holds.
        expected: usize,
    },

    /// An analysis stage did not get the input it requires.
    #[error("Pipeline input error in {stage}: {reason}")]
    PipelineInput {
        /// Stage that rejected its input.
        stage: &'static str,
        /// Unmet precondition.
        reason: String,
    },

    /// No calibration offsets have been persisted yet.
    #[error("Calibration offsets not found at {0}")]
    CalibrationMissing(PathBuf),

    /// Persisting or re-opening an artifact failed.
    #[error("Artifact I/O error on {path}: {source}")]
    ArtifactIo {
        /// Artifact path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Artifact content could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The session task has ended; no further commands are accepted.
    #[error("Acquisition session closed")]
    SessionClosed,

    /// An outbound probe command was rejected before reaching the wire.
    #[error("Invalid probe command: {0}")]
    InvalidCommand(String),
}

impl DaqError {
    /// Returns `true` when the caller can keep going after this error.
    ///
    /// Transport and configuration failures end the session or the process; per-line
    /// and per-report failures only cost the affected line or report.
    pub fn is_recoverable(&self) -> bool {
        match self {
            DaqError::Config(_)
            | DaqError::Configuration(_)
            | DaqError::Transport(_)
            | DaqError::SessionClosed => false,
            DaqError::MalformedFrame { .. }
            | DaqError::BufferOverflow { .. }
            | DaqError::IncompleteAcquisition { .. }
            | DaqError::PipelineInput { .. }
            | DaqError::CalibrationMissing(_)
            | DaqError::ArtifactIo { .. }
            | DaqError::Serialization(_)
            | DaqError::InvalidCommand(_) => true,
        }
    }

    pub(crate) fn artifact_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DaqError::ArtifactIo {
            path: path.into(),
            source,
        }
    }
}
