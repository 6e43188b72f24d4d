//! Per-channel calibration offsets.
//!
//! Channel 1 is the reference. Adding `offset[c]` to channel `c` shifts its mean onto the
//! reference channel's mean, so the reference offset is always 0.0.

use crate::acquisition::store::{SampleTable, CHANNELS};
use serde::{Deserialize, Serialize};

/// Additive correction for each channel, indexed by 0-based channel.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "OffsetsDocument", into = "OffsetsDocument")]
pub struct CalibrationOffsets {
    offsets: [f64; CHANNELS],
}

impl CalibrationOffsets {
    /// Offsets in channel order.
    pub fn new(offsets: [f64; CHANNELS]) -> Self {
        Self { offsets }
    }

    /// All offsets zero; calibrating with this is a no-op.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Compute offsets from a reference acquisition.
    ///
    /// `offset[c] = mean[channel 1] − mean[c]`, each mean taken over all samples.
    pub fn from_reference(table: &SampleTable) -> Self {
        let means = table
            .channels()
            .map(|series| series.iter().sum::<f64>() / series.len() as f64);
        let reference = means[0];
        Self {
            offsets: means.map(|mean| reference - mean),
        }
    }

    /// Offset for a 0-based channel.
    pub fn get(&self, channel: usize) -> f64 {
        self.offsets[channel]
    }

    /// Offsets in channel order.
    pub fn as_array(&self) -> [f64; CHANNELS] {
        self.offsets
    }
}

/// How the calibration stage corrects each series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationMode {
    /// Subtract each channel's first value, so every series starts at zero
    SelfReferential,
    /// Add persisted per-channel offsets
    Persisted(CalibrationOffsets),
}

impl CalibrationMode {
    /// Apply the correction to one channel's series.
    pub fn apply(&self, channel: usize, series: &[f64]) -> Vec<f64> {
        match self {
            CalibrationMode::SelfReferential => {
                let first = series.first().copied().unwrap_or_default();
                series.iter().map(|v| v - first).collect()
            }
            CalibrationMode::Persisted(offsets) => {
                let offset = offsets.get(channel);
                series.iter().map(|v| v + offset).collect()
            }
        }
    }

    /// The persisted offsets, if any.
    pub fn offsets(&self) -> Option<CalibrationOffsets> {
        match self {
            CalibrationMode::SelfReferential => None,
            CalibrationMode::Persisted(offsets) => Some(*offsets),
        }
    }
}

/// On-disk shape: one named key per channel.
#[derive(Serialize, Deserialize)]
struct OffsetsDocument {
    sensor_1_offset: f64,
    sensor_2_offset: f64,
    sensor_3_offset: f64,
    sensor_4_offset: f64,
    sensor_5_offset: f64,
}

impl From<OffsetsDocument> for CalibrationOffsets {
    fn from(doc: OffsetsDocument) -> Self {
        Self::new([
            doc.sensor_1_offset,
            doc.sensor_2_offset,
            doc.sensor_3_offset,
            doc.sensor_4_offset,
            doc.sensor_5_offset,
        ])
    }
}

impl From<CalibrationOffsets> for OffsetsDocument {
    fn from(offsets: CalibrationOffsets) -> Self {
        let [sensor_1_offset, sensor_2_offset, sensor_3_offset, sensor_4_offset, sensor_5_offset] =
            offsets.offsets;
        Self {
            sensor_1_offset,
            sensor_2_offset,
            sensor_3_offset,
            sensor_4_offset,
            sensor_5_offset,
        }
    }
}
