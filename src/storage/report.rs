//! Measurement report artifacts.
//!
//! A report is a `sensor_data` array of flat entries discriminated by `data_type`:
//!
//! | data_type | content                                  |
//! |-----------|------------------------------------------|
//! | 0         | raw reading (`sensor_id`, `time`, `value`) |
//! | 1         | smoothed or calibrated value, see `series` |
//! | 2         | first difference, `time` from 2          |
//! | 3         | endpoint delta per `sensor_id`           |
//! | 4         | `interpolated_points` array              |
//! | 5         | peak (`max_x_value`, `max_y_value`)      |
//!
//! Values are rounded to two decimals here and nowhere else.

use super::{ensure_dir, to_pretty_json};
use crate::analysis::{AnalysisRecord, AnalysisReport, CalibrationOffsets, Point};
use crate::config::StorageConfig;
use crate::error::{AppResult, DaqError};
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const NAME_PREFIX: &str = "sensor_data_";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Round to two decimals, half away from zero, on the shortest decimal representation.
///
/// Working on the decimal text rather than the binary value means `1.005` becomes `1.01`,
/// as a person reading the number would expect.
pub fn round_2dp(value: f64) -> f64 {
    if !value.is_finite() {
        return value;
    }
    // No negative zero in reports
    if value == 0.0 {
        return 0.0;
    }
    let text = value.abs().to_string();
    let (int_part, frac_part) = text.split_once('.').unwrap_or((text.as_str(), ""));
    if frac_part.len() <= 2 {
        return value;
    }

    let mut digits: Vec<u8> = int_part
        .bytes()
        .chain(frac_part.bytes().take(2))
        .map(|b| b - b'0')
        .collect();

    if frac_part.as_bytes()[2] >= b'5' {
        let mut carry = true;
        for digit in digits.iter_mut().rev() {
            if *digit == 9 {
                *digit = 0;
            } else {
                *digit += 1;
                carry = false;
                break;
            }
        }
        if carry {
            digits.insert(0, 1);
        }
    }

    let split = digits.len() - 2;
    let render = |ds: &[u8]| ds.iter().map(|d| char::from(b'0' + d)).collect::<String>();
    let rounded: f64 = format!("{}.{}", render(&digits[..split]), render(&digits[split..]))
        .parse()
        .unwrap_or(value.abs());

    let signed = if value.is_sign_negative() { -rounded } else { rounded };
    if signed == 0.0 {
        0.0
    } else {
        signed
    }
}

/// Which series a `data_type` 1 entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    /// Regression-fitted values
    Smoothed,
    /// Offset-corrected values
    Calibrated,
}

/// One element of the `sensor_data` array.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorEntry {
    /// Record kind, see the module table
    pub data_type: u8,
    /// Channel 1..=5
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_id: Option<usize>,
    /// Sample position
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<usize>,
    /// Value, two decimals
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Curve samples, two decimals
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpolated_points: Option<Vec<Point>>,
    /// Channel coordinate of the peak
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_x_value: Option<f64>,
    /// Peak value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_y_value: Option<f64>,
    /// Series of a `data_type` 1 entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<SeriesKind>,
}

impl SensorEntry {
    fn sample(data_type: u8, channel: usize, time: usize, value: f64) -> Self {
        Self {
            data_type,
            sensor_id: Some(channel),
            time: Some(time),
            value: Some(round_2dp(value)),
            ..Self::default()
        }
    }
}

/// The persisted report.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReportDocument {
    /// Entries in pipeline order
    pub sensor_data: Vec<SensorEntry>,
    /// Persisted offsets the calibrated series was computed with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration: Option<CalibrationOffsets>,
}

impl ReportDocument {
    /// Serialize-ready form of `report`.
    pub fn from_report(report: &AnalysisReport) -> Self {
        let mut doc = Self::default();
        doc.extend(report);
        doc
    }

    /// Append `report`'s entries; its calibration snapshot replaces any earlier one.
    pub fn extend(&mut self, report: &AnalysisReport) {
        let mut curve: Vec<Point> = Vec::new();
        for record in &report.records {
            if let AnalysisRecord::InterpolatedPoint { x, y } = *record {
                curve.push(Point::new(round_2dp(x), round_2dp(y)));
                continue;
            }
            self.flush_curve(&mut curve);
            self.sensor_data.push(entry_for(record));
        }
        self.flush_curve(&mut curve);

        if report.calibration.is_some() {
            self.calibration = report.calibration;
        }
    }

    /// Entries with the given `data_type`.
    pub fn entries(&self, data_type: u8) -> impl Iterator<Item = &SensorEntry> {
        self.sensor_data
            .iter()
            .filter(move |e| e.data_type == data_type)
    }

    fn flush_curve(&mut self, curve: &mut Vec<Point>) {
        if curve.is_empty() {
            return;
        }
        self.sensor_data.push(SensorEntry {
            data_type: 4,
            interpolated_points: Some(std::mem::take(curve)),
            ..SensorEntry::default()
        });
    }
}

fn entry_for(record: &AnalysisRecord) -> SensorEntry {
    match *record {
        AnalysisRecord::Raw {
            channel,
            time,
            value,
        } => SensorEntry::sample(0, channel, time, value),
        AnalysisRecord::Smoothed {
            channel,
            time,
            value,
        } => SensorEntry {
            series: Some(SeriesKind::Smoothed),
            ..SensorEntry::sample(1, channel, time, value)
        },
        AnalysisRecord::Calibrated {
            channel,
            time,
            value,
        } => SensorEntry {
            series: Some(SeriesKind::Calibrated),
            ..SensorEntry::sample(1, channel, time, value)
        },
        AnalysisRecord::Differenced {
            channel,
            time,
            value,
        } => SensorEntry::sample(2, channel, time, value),
        AnalysisRecord::EndpointDelta { channel, value } => SensorEntry {
            data_type: 3,
            sensor_id: Some(channel),
            value: Some(round_2dp(value)),
            ..SensorEntry::default()
        },
        AnalysisRecord::InterpolatedPoint { x, y } => SensorEntry {
            data_type: 4,
            interpolated_points: Some(vec![Point::new(round_2dp(x), round_2dp(y))]),
            ..SensorEntry::default()
        },
        AnalysisRecord::Peak { x, y } => SensorEntry {
            data_type: 5,
            max_x_value: Some(round_2dp(x)),
            max_y_value: Some(round_2dp(y)),
            ..SensorEntry::default()
        },
    }
}

/// Name and location of a written report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactId {
    name: String,
    path: PathBuf,
}

impl ArtifactId {
    /// File name, e.g. `sensor_data_2026-03-01_12-00-00.json`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Writes reports into one output directory.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    output_dir: PathBuf,
}

impl ReportWriter {
    /// Writer for `output_dir`; the directory is created on first write.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Writer for the configured output directory.
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.output_dir)
    }

    /// Output directory.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write `report` to a new artifact named after the current local time.
    pub fn write(&self, report: &AnalysisReport) -> AppResult<ArtifactId> {
        self.write_at(report, Local::now().naive_local())
    }

    /// Write `report` to a new artifact named after `timestamp`.
    ///
    /// An existing artifact is never replaced: a `_1`, `_2`, ... suffix is added until
    /// the name is free.
    pub fn write_at(&self, report: &AnalysisReport, timestamp: NaiveDateTime) -> AppResult<ArtifactId> {
        ensure_dir(&self.output_dir)?;
        let bytes = to_pretty_json(&ReportDocument::from_report(report))?;
        let stamp = timestamp.format(TIMESTAMP_FORMAT).to_string();

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                format!("{NAME_PREFIX}{stamp}.json")
            } else {
                format!("{NAME_PREFIX}{stamp}_{attempt}.json")
            };
            let path = self.output_dir.join(&name);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    write_or_discard(file, &path, &bytes)?;
                    info!(artifact = %name, entries = report.len(), "Report written");
                    return Ok(ArtifactId { name, path });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(DaqError::artifact_io(path, e)),
            }
        }

        Err(DaqError::artifact_io(
            self.output_dir.join(format!("{NAME_PREFIX}{stamp}.json")),
            io::Error::new(io::ErrorKind::AlreadyExists, "no free artifact name"),
        ))
    }

    /// Re-open the artifact called `name` and append `report`'s entries.
    pub fn append(&self, name: &str, report: &AnalysisReport) -> AppResult<()> {
        let path = self.locate(name)?;
        let mut doc = self.read_document(&path)?;
        doc.extend(report);
        let bytes = to_pretty_json(&doc)?;
        fs::write(&path, bytes).map_err(|e| DaqError::artifact_io(&path, e))?;
        info!(artifact = %name, entries = report.len(), "Report extended");
        Ok(())
    }

    /// Read back the artifact called `name`.
    pub fn load(&self, name: &str) -> AppResult<ReportDocument> {
        let path = self.locate(name)?;
        self.read_document(&path)
    }

    fn locate(&self, name: &str) -> AppResult<PathBuf> {
        let path = self.output_dir.join(name);
        if Path::new(name).file_name().and_then(|n| n.to_str()) != Some(name) {
            return Err(DaqError::artifact_io(
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "not a bare artifact name"),
            ));
        }
        Ok(path)
    }

    fn read_document(&self, path: &Path) -> AppResult<ReportDocument> {
        let bytes = fs::read(path).map_err(|e| DaqError::artifact_io(path, e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Write a freshly created artifact; on failure the partial file is removed so its
/// name stays free.
fn write_or_discard<W: Write>(mut out: W, path: &Path, bytes: &[u8]) -> AppResult<()> {
    let written = out.write_all(bytes).and_then(|()| out.flush());
    drop(out);
    written.map_err(|e| {
        if let Err(remove) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %remove, "Failed to remove partial artifact");
        }
        DaqError::artifact_io(path, e)
    })
}
