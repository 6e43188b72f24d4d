//! Stage execution and record assembly.

use super::calibration::{CalibrationMode, CalibrationOffsets};
use super::regression::LinearFit;
use super::spline::CubicSpline;
use super::{AnalysisRecord, AnalysisReport, Point};
use crate::acquisition::store::{SampleTable, CAPACITY, CHANNELS};
use crate::config::{AnalysisConfig, CalibrationSource};
use crate::error::{AppResult, DaqError};
use tracing::{debug, instrument};

/// One value per sample for every channel.
pub type ChannelSeries = [[f64; CAPACITY]; CHANNELS];

/// Pipeline stages in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Readings as received
    Raw,
    /// Regression-fitted values
    Smoothed,
    /// Offset-corrected values
    Calibrated,
    /// First differences of the calibrated series
    Differenced,
    /// Last minus first calibrated value
    EndpointDelta,
    /// Spline samples through the endpoint deltas
    Interpolated,
    /// Maximum of the spline samples
    Peak,
}

impl Stage {
    /// Every stage, in output order.
    pub const ALL: [Stage; 7] = [
        Stage::Raw,
        Stage::Smoothed,
        Stage::Calibrated,
        Stage::Differenced,
        Stage::EndpointDelta,
        Stage::Interpolated,
        Stage::Peak,
    ];
}

/// Caller-selected pipeline behaviour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineOptions {
    /// Correction applied by the calibration stage
    pub calibration: CalibrationMode,
    /// Series the calibration stage corrects
    pub source: CalibrationSource,
    /// Sampling step of the interpolated curve
    pub spline_step: f64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            calibration: CalibrationMode::SelfReferential,
            source: CalibrationSource::Smoothed,
            spline_step: 0.1,
        }
    }
}

impl PipelineOptions {
    /// Options from the `[analysis]` configuration section.
    pub fn from_config(config: &AnalysisConfig, calibration: CalibrationMode) -> Self {
        Self {
            calibration,
            source: config.calibration_source,
            spline_step: config.spline_step,
        }
    }
}

/// Every stage's output for one acquisition, at full precision.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    /// Input readings
    pub raw: ChannelSeries,
    /// Per-channel regression lines
    pub fits: [LinearFit; CHANNELS],
    /// Fitted values
    pub smoothed: ChannelSeries,
    /// Corrected values
    pub calibrated: ChannelSeries,
    /// `calibrated[i + 1] − calibrated[i]`
    pub differenced: [[f64; CAPACITY - 1]; CHANNELS],
    /// `calibrated[last] − calibrated[first]`
    pub deltas: [f64; CHANNELS],
    /// Spline samples over the deltas
    pub curve: Vec<Point>,
    /// First maximum of `curve`
    pub peak: Point,
    /// Offsets used by the calibration stage, if persisted
    pub offsets: Option<CalibrationOffsets>,
}

/// The analysis pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pipeline {
    options: PipelineOptions,
}

impl Pipeline {
    /// Pipeline with the given options.
    pub fn new(options: PipelineOptions) -> Self {
        Self { options }
    }

    /// Active options.
    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Run every stage over `table`.
    ///
    /// The first failing stage aborts the run; nothing computed before it is returned.
    #[instrument(skip_all, err)]
    pub fn run(&self, table: &SampleTable) -> AppResult<PipelineOutput> {
        let raw = table.channels();
        check_finite(&raw)?;

        let fits = smooth(&raw)?;
        let smoothed = fits.map(|fit| std::array::from_fn(|t| fit.predict(t as f64)));

        let source = match self.options.source {
            CalibrationSource::Smoothed => &smoothed,
            CalibrationSource::Raw => &raw,
        };
        let calibrated = calibrate(source, &self.options.calibration);
        let differenced = differentiate(&calibrated);
        let deltas = endpoint_deltas(&calibrated);
        let curve = interpolate(&deltas, self.options.spline_step)?;
        let peak = find_peak(&curve)?;

        debug!(peak_x = peak.x, peak_y = peak.y, samples = curve.len(), "Pipeline finished");

        Ok(PipelineOutput {
            raw,
            fits,
            smoothed,
            calibrated,
            differenced,
            deltas,
            curve,
            peak,
            offsets: self.options.calibration.offsets(),
        })
    }

    /// Run the pipeline and assemble a report from the chosen stages.
    pub fn report(&self, table: &SampleTable, stages: &[Stage]) -> AppResult<AnalysisReport> {
        Ok(self.run(table)?.report(stages))
    }
}

impl PipelineOutput {
    /// Records of one stage, channel by channel, in ascending time.
    pub fn records(&self, stage: Stage) -> Vec<AnalysisRecord> {
        match stage {
            Stage::Raw => series_records(&self.raw, |channel, time, value| AnalysisRecord::Raw {
                channel,
                time,
                value,
            }),
            Stage::Smoothed => {
                series_records(&self.smoothed, |channel, time, value| AnalysisRecord::Smoothed {
                    channel,
                    time,
                    value,
                })
            }
            Stage::Calibrated => {
                series_records(&self.calibrated, |channel, time, value| {
                    AnalysisRecord::Calibrated {
                        channel,
                        time,
                        value,
                    }
                })
            }
            Stage::Differenced => self
                .differenced
                .iter()
                .enumerate()
                .flat_map(|(c, series)| {
                    series
                        .iter()
                        .enumerate()
                        .map(move |(i, value)| AnalysisRecord::Differenced {
                            channel: c + 1,
                            time: i + 2,
                            value: *value,
                        })
                })
                .collect(),
            Stage::EndpointDelta => self
                .deltas
                .iter()
                .enumerate()
                .map(|(c, value)| AnalysisRecord::EndpointDelta {
                    channel: c + 1,
                    value: *value,
                })
                .collect(),
            Stage::Interpolated => self
                .curve
                .iter()
                .map(|p| AnalysisRecord::InterpolatedPoint { x: p.x, y: p.y })
                .collect(),
            Stage::Peak => vec![AnalysisRecord::Peak {
                x: self.peak.x,
                y: self.peak.y,
            }],
        }
    }

    /// Report made of the chosen stages, in the order given.
    ///
    /// The calibration snapshot is attached when the calibrated series is included and
    /// persisted offsets were applied.
    pub fn report(&self, stages: &[Stage]) -> AnalysisReport {
        let records = stages.iter().flat_map(|s| self.records(*s)).collect();
        let calibration = if stages.contains(&Stage::Calibrated) {
            self.offsets
        } else {
            None
        };
        AnalysisReport::new(records, calibration)
    }
}

fn series_records<F>(series: &ChannelSeries, make: F) -> Vec<AnalysisRecord>
where
    F: Fn(usize, usize, f64) -> AnalysisRecord,
{
    series
        .iter()
        .enumerate()
        .flat_map(|(c, values)| {
            values
                .iter()
                .enumerate()
                .map(|(t, value)| make(c + 1, t + 1, *value))
                .collect::<Vec<_>>()
        })
        .collect()
}

fn check_finite(raw: &ChannelSeries) -> AppResult<()> {
    for (c, series) in raw.iter().enumerate() {
        if let Some(t) = series.iter().position(|v| !v.is_finite()) {
            return Err(DaqError::PipelineInput {
                stage: "raw",
                reason: format!("channel {} sample {} is not finite", c + 1, t + 1),
            });
        }
    }
    Ok(())
}

/// Fit each channel against its 0-based sample index.
pub fn smooth(raw: &ChannelSeries) -> AppResult<[LinearFit; CHANNELS]> {
    let mut fits = [LinearFit {
        intercept: 0.0,
        slope: 0.0,
    }; CHANNELS];
    for (fit, series) in fits.iter_mut().zip(raw) {
        *fit = LinearFit::fit_indexed(series)?;
    }
    Ok(fits)
}

/// Apply `mode` to every channel.
pub fn calibrate(source: &ChannelSeries, mode: &CalibrationMode) -> ChannelSeries {
    std::array::from_fn(|c| {
        let corrected = mode.apply(c, &source[c]);
        std::array::from_fn(|t| corrected[t])
    })
}

/// First discrete difference per channel.
pub fn differentiate(calibrated: &ChannelSeries) -> [[f64; CAPACITY - 1]; CHANNELS] {
    calibrated.map(|series| std::array::from_fn(|i| series[i + 1] - series[i]))
}

/// `last − first` per channel.
pub fn endpoint_deltas(calibrated: &ChannelSeries) -> [f64; CHANNELS] {
    calibrated.map(|series| series[CAPACITY - 1] - series[0])
}

/// Spline through `(channel, delta)` for channels 1..=5, sampled at `step`.
pub fn interpolate(deltas: &[f64], step: f64) -> AppResult<Vec<Point>> {
    let knots: Vec<Point> = deltas
        .iter()
        .enumerate()
        .map(|(c, delta)| Point::new((c + 1) as f64, *delta))
        .collect();
    CubicSpline::natural(&knots)?.sample(step)
}

/// First point with the largest `y`.
pub fn find_peak(curve: &[Point]) -> AppResult<Point> {
    let mut points = curve.iter();
    let first = points.next().ok_or_else(|| DaqError::PipelineInput {
        stage: "peak",
        reason: "no interpolated points".to_string(),
    })?;
    Ok(points.fold(*first, |best, p| if p.y > best.y { *p } else { best }))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Channel 1 counts 1..=20, channels 2-5 are constant.
    fn ramp_table() -> SampleTable {
        SampleTable::from_rows(std::array::from_fn(|t| {
            [(t + 1) as f64, 2.0, 3.0, 4.0, 5.0]
        }))
    }

    fn table_with_deltas(deltas: [f64; CHANNELS]) -> SampleTable {
        // Linear per channel so smoothing is exact; channel c rises by deltas[c]
        SampleTable::from_rows(std::array::from_fn(|t| {
            std::array::from_fn(|c| deltas[c] * t as f64 / (CAPACITY - 1) as f64)
        }))
    }

    #[test]
    fn raw_stage_echoes_table() {
        let output = Pipeline::default().run(&ramp_table()).unwrap();
        let raw = output.records(Stage::Raw);
        assert_eq!(raw.len(), CAPACITY * CHANNELS);
        assert_eq!(
            raw[0],
            AnalysisRecord::Raw {
                channel: 1,
                time: 1,
                value: 1.0
            }
        );
        assert_eq!(
            raw[CAPACITY * CHANNELS - 1],
            AnalysisRecord::Raw {
                channel: 5,
                time: 20,
                value: 5.0
            }
        );
    }

    #[test]
    fn ramp_regression_recovers_slope_and_intercept() {
        let output = Pipeline::default().run(&ramp_table()).unwrap();
        assert!((output.fits[0].slope - 1.0).abs() < 1e-9);
        assert!((output.fits[0].intercept - 1.0).abs() < 1e-9);
        for fit in &output.fits[1..] {
            assert!(fit.slope.abs() < 1e-12);
        }
    }

    #[test]
    fn self_referential_series_start_at_zero() {
        let output = Pipeline::default().run(&ramp_table()).unwrap();
        for series in &output.calibrated {
            assert_eq!(series[0], 0.0);
        }
        for (c, delta) in output.deltas.iter().enumerate() {
            let series = output.calibrated[c];
            assert_eq!(*delta, series[CAPACITY - 1] - series[0]);
        }
    }

    #[test]
    fn differenced_has_nineteen_per_channel() {
        let output = Pipeline::default().run(&ramp_table()).unwrap();
        let records = output.records(Stage::Differenced);
        assert_eq!(records.len(), (CAPACITY - 1) * CHANNELS);
        match records[0] {
            AnalysisRecord::Differenced {
                channel,
                time,
                value,
            } => {
                assert_eq!((channel, time), (1, 2));
                assert!((value - 1.0).abs() < 1e-9);
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn persisted_calibration_uses_raw_source_when_configured() {
        let offsets = CalibrationOffsets::new([0.0, 1.0, 1.0, 1.0, 1.0]);
        let pipeline = Pipeline::new(PipelineOptions {
            calibration: CalibrationMode::Persisted(offsets),
            source: CalibrationSource::Raw,
            spline_step: 0.1,
        });
        let output = pipeline.run(&ramp_table()).unwrap();
        assert_eq!(output.calibrated[1], [3.0; CAPACITY]);
        assert_eq!(output.calibrated[0][4], 5.0);

        let report = output.report(&[Stage::Calibrated]);
        assert_eq!(report.calibration, Some(offsets));
        assert!(output.report(&[Stage::Raw]).calibration.is_none());
    }

    #[test]
    fn interpolated_curve_hits_deltas() {
        let deltas = [0.5, 2.0, -1.0, 3.5, 1.0];
        let output = Pipeline::default().run(&table_with_deltas(deltas)).unwrap();
        assert_eq!(output.curve.len(), 41);
        for (c, delta) in deltas.iter().enumerate() {
            let knot = output.curve[c * 10];
            assert!((knot.x - (c + 1) as f64).abs() < 1e-9);
            assert!((knot.y - delta).abs() < 0.01);
        }
    }

    #[test]
    fn increasing_deltas_peak_at_last_channel() {
        let output = Pipeline::default()
            .run(&table_with_deltas([1.0, 2.0, 3.0, 4.0, 5.0]))
            .unwrap();
        assert_eq!(output.peak.x, 5.0);
        assert!((output.peak.y - 5.0).abs() < 1e-9);
    }

    #[test]
    fn uneven_step_keeps_peak_at_last_channel() {
        let pipeline = Pipeline::new(PipelineOptions {
            spline_step: 0.3,
            ..PipelineOptions::default()
        });
        let output = pipeline
            .run(&table_with_deltas([1.0, 2.0, 3.0, 4.0, 5.0]))
            .unwrap();
        assert_eq!(output.curve.last().map(|p| p.x), Some(5.0));
        assert_eq!(output.peak.x, 5.0);
    }

    #[test]
    fn peak_ties_resolve_to_first() {
        let curve = [
            Point::new(1.0, 2.0),
            Point::new(1.1, 3.0),
            Point::new(1.2, 3.0),
        ];
        assert_eq!(find_peak(&curve).unwrap(), Point::new(1.1, 3.0));
        assert!(find_peak(&[]).is_err());
    }

    #[test]
    fn non_finite_input_rejected() {
        let mut rows = *ramp_table().rows();
        rows[3][2] = f64::NAN;
        let err = Pipeline::default()
            .run(&SampleTable::from_rows(rows))
            .unwrap_err();
        assert!(matches!(err, DaqError::PipelineInput { stage: "raw", .. }));
    }

    #[test]
    fn bad_step_aborts_run() {
        let pipeline = Pipeline::new(PipelineOptions {
            spline_step: -1.0,
            ..PipelineOptions::default()
        });
        assert!(matches!(
            pipeline.run(&ramp_table()),
            Err(DaqError::PipelineInput { stage: "spline", .. })
        ));
    }

    #[test]
    fn reruns_are_identical() {
        let pipeline = Pipeline::default();
        let a = pipeline.report(&ramp_table(), &Stage::ALL).unwrap();
        let b = pipeline.report(&ramp_table(), &Stage::ALL).unwrap();
        assert_eq!(a, b);
    }
}
