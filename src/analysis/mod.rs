//! Five-channel analysis pipeline.
//!
//! Pure functions over a finalized [`SampleTable`](crate::acquisition::SampleTable):
//!
//! ```text
//! Raw ──> Smoothed (OLS) ──> Calibrated ──┬──> Differenced
//!                                        └──> EndpointDelta ──> Interpolated ──> Peak
//! ```
//!
//! [`Pipeline::run`] computes every stage at full precision. Rounding to two decimals
//! happens only when a report is serialized.

pub mod calibration;
pub mod pipeline;
pub mod regression;
pub mod spline;

pub use calibration::{CalibrationMode, CalibrationOffsets};
pub use pipeline::{Pipeline, PipelineOptions, PipelineOutput, Stage};
pub use regression::LinearFit;
pub use spline::CubicSpline;

use serde::{Deserialize, Serialize};

/// A point on the interpolated curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Channel coordinate
    pub x: f64,
    /// Value
    pub y: f64,
}

impl Point {
    /// Create a point.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// One derived value. Channels and times are 1-based.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnalysisRecord {
    /// Reading as received
    Raw {
        /// Channel 1..=5
        channel: usize,
        /// Sample position 1..=20
        time: usize,
        /// Reading
        value: f64,
    },
    /// Regression-fitted value
    Smoothed {
        /// Channel 1..=5
        channel: usize,
        /// Sample position 1..=20
        time: usize,
        /// Fitted value
        value: f64,
    },
    /// Offset-corrected value
    Calibrated {
        /// Channel 1..=5
        channel: usize,
        /// Sample position 1..=20
        time: usize,
        /// Corrected value
        value: f64,
    },
    /// First difference of the calibrated series
    Differenced {
        /// Channel 1..=5
        channel: usize,
        /// Sample position 2..=20
        time: usize,
        /// `calibrated[time] − calibrated[time − 1]`
        value: f64,
    },
    /// Last minus first calibrated value
    EndpointDelta {
        /// Channel 1..=5
        channel: usize,
        /// Net change
        value: f64,
    },
    /// Sample of the spline through the endpoint deltas
    InterpolatedPoint {
        /// Channel coordinate
        x: f64,
        /// Interpolated value
        y: f64,
    },
    /// Maximum of the interpolated curve
    Peak {
        /// Channel coordinate of the maximum
        x: f64,
        /// Maximum value
        y: f64,
    },
}

/// Ordered records produced for one acquisition, plus the offsets used, if persisted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnalysisReport {
    /// Records in stage order
    pub records: Vec<AnalysisRecord>,
    /// Persisted offsets applied by the calibration stage
    pub calibration: Option<CalibrationOffsets>,
}

impl AnalysisReport {
    /// Report with the given records and calibration snapshot.
    pub fn new(records: Vec<AnalysisRecord>, calibration: Option<CalibrationOffsets>) -> Self {
        Self {
            records,
            calibration,
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when there are no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
