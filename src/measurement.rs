//! Measurement workflows.
//!
//! A workflow turns one completed acquisition into exactly one terminal outcome:
//!
//! - [`MeasurementWorkflow::Survey`]: raw, smoothed, self-referential calibration,
//!   endpoint deltas, spline and peak in a single artifact.
//! - [`MeasurementWorkflow::Calibrated`]: raw and smoothed are written first, then the
//!   artifact is re-opened to append the series calibrated with persisted offsets and
//!   finally the differenced series.
//! - [`MeasurementWorkflow::Reference`]: offsets computed from the acquisition replace the
//!   persisted calibration; no report is written.
//!
//! The pipeline runs to completion before anything is written, so a failing stage never
//! leaves a partial artifact behind.

use crate::acquisition::{AcquisitionSession, SampleStore, SessionEvent};
use crate::analysis::{CalibrationMode, CalibrationOffsets, Pipeline, PipelineOptions, Stage};
use crate::config::{AnalysisConfig, MissingCalibrationPolicy, ProbeConfig};
use crate::error::{AppResult, DaqError};
use crate::storage::{ArtifactId, CalibrationStore, ReportWriter};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info, instrument, warn};

/// Which report a completed acquisition produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementWorkflow {
    /// Self-referential calibration with spline and peak
    Survey,
    /// Persisted calibration with differencing, appended in steps
    Calibrated,
    /// Compute and persist calibration offsets
    Reference,
}

impl fmt::Display for MeasurementWorkflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementWorkflow::Survey => write!(f, "survey"),
            MeasurementWorkflow::Calibrated => write!(f, "calibrated"),
            MeasurementWorkflow::Reference => write!(f, "reference"),
        }
    }
}

const SURVEY_STAGES: [Stage; 6] = [
    Stage::Raw,
    Stage::Smoothed,
    Stage::Calibrated,
    Stage::EndpointDelta,
    Stage::Interpolated,
    Stage::Peak,
];

/// Terminal status of one measurement.
#[derive(Debug)]
pub enum MeasurementOutcome {
    /// A report was written
    Saved {
        /// The written artifact
        artifact: ArtifactId,
    },
    /// New calibration offsets were persisted
    CalibrationSaved {
        /// The saved offsets
        offsets: CalibrationOffsets,
    },
    /// The session ended without a usable acquisition, or the report failed
    Failed(DaqError),
}

impl MeasurementOutcome {
    /// True unless [`MeasurementOutcome::Failed`].
    pub fn is_success(&self) -> bool {
        !matches!(self, MeasurementOutcome::Failed(_))
    }
}

impl fmt::Display for MeasurementOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementOutcome::Saved { artifact } => write!(f, "saved {artifact}"),
            MeasurementOutcome::CalibrationSaved { offsets } => {
                write!(f, "calibration saved {:?}", offsets.as_array())
            }
            MeasurementOutcome::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}

/// Runs workflows against one output directory and calibration store.
#[derive(Debug, Clone)]
pub struct MeasurementRunner {
    analysis: AnalysisConfig,
    writer: ReportWriter,
    calibration: CalibrationStore,
}

impl MeasurementRunner {
    /// Runner with explicit collaborators.
    pub fn new(analysis: AnalysisConfig, writer: ReportWriter, calibration: CalibrationStore) -> Self {
        Self {
            analysis,
            writer,
            calibration,
        }
    }

    /// Runner for the configured storage and analysis settings.
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self::new(
            config.analysis.clone(),
            ReportWriter::from_config(&config.storage),
            CalibrationStore::from_config(&config.storage),
        )
    }

    /// The report writer in use.
    pub fn writer(&self) -> &ReportWriter {
        &self.writer
    }

    /// The calibration store in use.
    pub fn calibration_store(&self) -> &CalibrationStore {
        &self.calibration
    }

    /// Map a session event to an outcome.
    ///
    /// `Completed` runs the workflow and `Disconnected` fails it; every other event is
    /// not terminal and yields `None`.
    pub fn on_event(&self, workflow: MeasurementWorkflow, event: SessionEvent) -> Option<MeasurementOutcome> {
        match event {
            SessionEvent::Completed(store) => Some(self.run(workflow, &store)),
            SessionEvent::Disconnected(err) => Some(MeasurementOutcome::Failed(err)),
            _ => None,
        }
    }

    /// Process a recorded capture of probe output offline.
    ///
    /// The bytes go through the same framing and session state machine as live
    /// traffic, armed up front. A capture cut off before `end` is processed as far
    /// as it got.
    pub fn replay(&self, workflow: MeasurementWorkflow, capture: &[u8]) -> MeasurementOutcome {
        let mut session = AcquisitionSession::new();
        session.arm();

        for event in session.on_bytes(capture) {
            if let Some(outcome) = self.on_event(workflow, event) {
                return outcome;
            }
        }
        self.run(workflow, session.store())
    }

    /// Run `workflow` over a completed store.
    pub fn run(&self, workflow: MeasurementWorkflow, store: &SampleStore) -> MeasurementOutcome {
        match self.try_run(workflow, store) {
            Ok(outcome) => {
                info!(%workflow, %outcome, "Measurement finished");
                outcome
            }
            Err(err) => {
                error!(%workflow, error = %err, "Measurement failed");
                MeasurementOutcome::Failed(err)
            }
        }
    }

    #[instrument(skip(self, store), err)]
    fn try_run(&self, workflow: MeasurementWorkflow, store: &SampleStore) -> AppResult<MeasurementOutcome> {
        let table = store.finalize()?;

        match workflow {
            MeasurementWorkflow::Survey => {
                let pipeline = self.pipeline(CalibrationMode::SelfReferential);
                let report = pipeline.report(&table, &SURVEY_STAGES)?;
                let artifact = self.writer.write(&report)?;
                Ok(MeasurementOutcome::Saved { artifact })
            }
            MeasurementWorkflow::Calibrated => {
                let offsets = self.persisted_offsets()?;
                let output = self.pipeline(CalibrationMode::Persisted(offsets)).run(&table)?;

                let artifact = self
                    .writer
                    .write(&output.report(&[Stage::Raw, Stage::Smoothed]))?;
                self.writer
                    .append(artifact.name(), &output.report(&[Stage::Calibrated]))?;
                self.writer
                    .append(artifact.name(), &output.report(&[Stage::Differenced]))?;
                Ok(MeasurementOutcome::Saved { artifact })
            }
            MeasurementWorkflow::Reference => {
                let offsets = CalibrationOffsets::from_reference(&table);
                self.calibration.save(&offsets)?;
                Ok(MeasurementOutcome::CalibrationSaved { offsets })
            }
        }
    }

    fn pipeline(&self, calibration: CalibrationMode) -> Pipeline {
        Pipeline::new(PipelineOptions::from_config(&self.analysis, calibration))
    }

    fn persisted_offsets(&self) -> AppResult<CalibrationOffsets> {
        match self.calibration.load() {
            Ok(offsets) => Ok(offsets),
            Err(DaqError::CalibrationMissing(path)) => match self.analysis.missing_calibration {
                MissingCalibrationPolicy::Proceed => {
                    warn!(path = %path.display(), "No calibration offsets saved, using zero offsets");
                    Ok(CalibrationOffsets::zero())
                }
                MissingCalibrationPolicy::Abort => Err(DaqError::CalibrationMissing(path)),
            },
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::store::CAPACITY;
    use crate::storage::report::SeriesKind;
    use tempfile::{tempdir, TempDir};
    use tracing_test::traced_test;

    fn runner(dir: &TempDir, policy: MissingCalibrationPolicy) -> MeasurementRunner {
        let analysis = AnalysisConfig {
            missing_calibration: policy,
            ..AnalysisConfig::default()
        };
        MeasurementRunner::new(
            analysis,
            ReportWriter::new(dir.path().join("reports")),
            CalibrationStore::new(dir.path().join("calibration.json")),
        )
    }

    fn filled_store(rows: usize) -> SampleStore {
        let mut store = SampleStore::new();
        for i in 0..rows {
            store
                .push_line(&format!("{} 2.0 3.0 4.0 6.0", i + 1))
                .unwrap();
        }
        store
    }

    #[test]
    fn survey_writes_single_artifact() {
        let dir = tempdir().unwrap();
        let runner = runner(&dir, MissingCalibrationPolicy::Proceed);

        let outcome = runner.run(MeasurementWorkflow::Survey, &filled_store(CAPACITY));
        let MeasurementOutcome::Saved { artifact } = outcome else {
            panic!("expected a saved report, got {outcome}");
        };

        let doc = runner.writer().load(artifact.name()).unwrap();
        assert_eq!(doc.entries(0).count(), 100);
        assert_eq!(doc.entries(1).count(), 200);
        assert_eq!(doc.entries(2).count(), 0);
        assert_eq!(doc.entries(3).count(), 5);
        assert_eq!(doc.entries(4).count(), 1);
        assert_eq!(doc.entries(5).count(), 1);
        assert!(doc.calibration.is_none());
    }

    #[test]
    fn incomplete_store_fails_without_artifact() {
        let dir = tempdir().unwrap();
        let runner = runner(&dir, MissingCalibrationPolicy::Proceed);

        let outcome = runner.run(MeasurementWorkflow::Survey, &filled_store(CAPACITY - 1));
        assert!(matches!(
            outcome,
            MeasurementOutcome::Failed(DaqError::IncompleteAcquisition { .. })
        ));
        assert!(!runner.writer().output_dir().exists());
    }

    #[test]
    fn reference_then_calibrated_applies_offsets() {
        let dir = tempdir().unwrap();
        let runner = runner(&dir, MissingCalibrationPolicy::Abort);

        let outcome = runner.run(MeasurementWorkflow::Reference, &filled_store(CAPACITY));
        let MeasurementOutcome::CalibrationSaved { offsets } = outcome else {
            panic!("expected saved calibration, got {outcome}");
        };
        // Channel 1 mean is 10.5
        assert_eq!(offsets.as_array(), [0.0, 8.5, 7.5, 6.5, 4.5]);

        let outcome = runner.run(MeasurementWorkflow::Calibrated, &filled_store(CAPACITY));
        let MeasurementOutcome::Saved { artifact } = outcome else {
            panic!("expected a saved report, got {outcome}");
        };

        let doc = runner.writer().load(artifact.name()).unwrap();
        assert_eq!(doc.calibration, Some(offsets));
        let calibrated: Vec<_> = doc
            .entries(1)
            .filter(|e| e.series == Some(SeriesKind::Calibrated))
            .collect();
        assert_eq!(calibrated.len(), 100);
        // Constant channel 2 lands on channel 1's mean
        assert!(calibrated
            .iter()
            .filter(|e| e.sensor_id == Some(2))
            .all(|e| e.value == Some(10.5)));
        assert_eq!(doc.entries(2).count(), 95);
        assert_eq!(doc.sensor_data.last().map(|e| e.data_type), Some(2));
    }

    #[test]
    fn missing_calibration_abort_policy() {
        let dir = tempdir().unwrap();
        let runner = runner(&dir, MissingCalibrationPolicy::Abort);
        let outcome = runner.run(MeasurementWorkflow::Calibrated, &filled_store(CAPACITY));
        assert!(matches!(
            outcome,
            MeasurementOutcome::Failed(DaqError::CalibrationMissing(_))
        ));
    }

    #[test]
    #[traced_test]
    fn missing_calibration_proceed_policy() {
        let dir = tempdir().unwrap();
        let runner = runner(&dir, MissingCalibrationPolicy::Proceed);
        let outcome = runner.run(MeasurementWorkflow::Calibrated, &filled_store(CAPACITY));
        assert!(outcome.is_success());
        assert!(logs_contain("using zero offsets"));
    }

    #[test]
    fn replay_runs_capture_through_session() {
        let dir = tempdir().unwrap();
        let runner = runner(&dir, MissingCalibrationPolicy::Proceed);

        let mut capture = String::from("1 2 3\r\n");
        for i in 0..CAPACITY {
            capture.push_str(&format!("{} 2.0 3.0 4.0 6.0\r\n", i + 1));
        }
        capture.push_str("end\r\n");

        let outcome = runner.replay(MeasurementWorkflow::Reference, capture.as_bytes());
        let MeasurementOutcome::CalibrationSaved { offsets } = outcome else {
            panic!("expected saved calibration, got {outcome}");
        };
        assert_eq!(offsets.get(1), 8.5);
        assert_eq!(runner.calibration_store().load().unwrap(), offsets);
    }

    #[test]
    fn truncated_replay_is_incomplete() {
        let dir = tempdir().unwrap();
        let runner = runner(&dir, MissingCalibrationPolicy::Proceed);
        let outcome = runner.replay(MeasurementWorkflow::Survey, b"1 2 3 4 5\n2 2 3 4 5\n");
        assert!(matches!(
            outcome,
            MeasurementOutcome::Failed(DaqError::IncompleteAcquisition { filled: 10, .. })
        ));
    }

    #[test]
    fn disconnect_is_terminal_failure() {
        let dir = tempdir().unwrap();
        let runner = runner(&dir, MissingCalibrationPolicy::Proceed);
        let event = SessionEvent::Disconnected(DaqError::Transport(
            std::io::ErrorKind::BrokenPipe.into(),
        ));
        let outcome = runner.on_event(MeasurementWorkflow::Survey, event);
        assert!(matches!(outcome, Some(MeasurementOutcome::Failed(_))));

        let line = SessionEvent::SampleStored { position: 1 };
        assert!(runner.on_event(MeasurementWorkflow::Survey, line).is_none());
    }
}
