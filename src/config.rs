//! Configuration System using Figment
//!
//! This module provides strongly-typed configuration loading for the probe application.
//! Configuration is loaded from:
//! 1. `config/probe.toml` (base configuration, optional)
//! 2. Environment variables (prefixed with `PROBE_DAQ_`, sections split on `__`)
//!
//! Every field carries a default, so a missing file yields a usable configuration.
//!
//! # Example
//! ```no_run
//! use probe_daq::config::ProbeConfig;
//!
//! let config = ProbeConfig::load()?;
//! config.validate()?;
//! println!("Reports go to {}", config.storage.output_dir.display());
//! # Ok::<(), probe_daq::error::DaqError>(())
//! ```

use crate::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/probe.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Serial transport and session queue settings
    #[serde(default)]
    pub transport: TransportConfig,
    /// Artifact locations
    #[serde(default)]
    pub storage: StorageConfig,
    /// Analysis pipeline settings
    #[serde(default)]
    pub analysis: AnalysisConfig,
    /// Measurement workflow settings
    #[serde(default)]
    pub measurement: MeasurementConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Serial transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Serial port path (e.g., "/dev/rfcomm0", "COM5")
    #[serde(default)]
    pub port: Option<String>,
    /// Communication speed
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Terminator appended to every outbound line
    #[serde(default = "default_line_terminator")]
    pub line_terminator: String,
    /// Size of each transport read
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Capacity of the outbound command queue
    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,
    /// Capacity of the session event queue
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

/// Artifact storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for report artifacts
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// File name of the calibration artifact inside `output_dir`
    #[serde(default = "default_calibration_file")]
    pub calibration_file: String,
}

/// Which series the calibration stage corrects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationSource {
    /// Regression-smoothed values
    #[default]
    Smoothed,
    /// Raw readings
    Raw,
}

/// What to do when a calibrated workflow finds no persisted offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingCalibrationPolicy {
    /// Continue with zero offsets and log a warning
    #[default]
    Proceed,
    /// Fail the report
    Abort,
}

/// Analysis pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Series corrected by the calibration stage
    #[serde(default)]
    pub calibration_source: CalibrationSource,
    /// Sampling step of the interpolated curve, in channel units
    #[serde(default = "default_spline_step")]
    pub spline_step: f64,
    /// Policy when no calibration offsets are persisted
    #[serde(default)]
    pub missing_calibration: MissingCalibrationPolicy,
}

/// Measurement workflow configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementConfig {
    /// How long to wait for `end` after sending `start`
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

// Default value functions
fn default_app_name() -> String {
    "Probe DAQ".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_line_terminator() -> String {
    "\n".to_string()
}

fn default_read_buffer_size() -> usize {
    1024
}

fn default_command_queue_capacity() -> usize {
    32
}

fn default_event_queue_capacity() -> usize {
    256
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("Vein_Scope")
}

fn default_calibration_file() -> String {
    "calibration_offsets.json".to_string()
}

fn default_spline_step() -> f64 {
    0.1
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
            line_terminator: default_line_terminator(),
            read_buffer_size: default_read_buffer_size(),
            command_queue_capacity: default_command_queue_capacity(),
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            calibration_file: default_calibration_file(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            calibration_source: CalibrationSource::default(),
            spline_step: default_spline_step(),
            missing_calibration: MissingCalibrationPolicy::default(),
        }
    }
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl StorageConfig {
    /// Full path of the calibration artifact
    pub fn calibration_path(&self) -> PathBuf {
        self.output_dir.join(&self.calibration_file)
    }
}

impl MeasurementConfig {
    /// Acquisition timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ProbeConfig {
    /// Load configuration from `config/probe.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `PROBE_DAQ_`.
    /// Example: `PROBE_DAQ_APPLICATION__LOG_LEVEL=debug`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(ProbeConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("PROBE_DAQ_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.transport.baud_rate == 0 {
            return Err(DaqError::Configuration(
                "baud_rate must be greater than zero".to_string(),
            ));
        }
        if self.transport.line_terminator.is_empty() {
            return Err(DaqError::Configuration(
                "line_terminator must not be empty".to_string(),
            ));
        }
        if self.transport.read_buffer_size == 0
            || self.transport.command_queue_capacity == 0
            || self.transport.event_queue_capacity == 0
        {
            return Err(DaqError::Configuration(
                "read_buffer_size and queue capacities must be greater than zero".to_string(),
            ));
        }

        let step = self.analysis.spline_step;
        if !step.is_finite() || step <= 0.0 {
            return Err(DaqError::Configuration(format!(
                "Invalid spline_step {step}. Must be a positive number"
            )));
        }

        if self.storage.calibration_file.trim().is_empty() {
            return Err(DaqError::Configuration(
                "calibration_file must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
