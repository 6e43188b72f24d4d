//! # Probe DAQ Core Library
//!
//! Acquisition and analysis for a five-channel sensor probe that streams
//! newline-delimited readings over a serial link. The library is shared by the
//! `probe-daq` command-line frontend and the integration tests.
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: Frame splitting, the `start`/`end` session state machine, the
//!   fixed 20×5 sample store and the task that owns the serial port.
//! - **`analysis`**: The deterministic pipeline (regression smoothing, calibration,
//!   differencing, endpoint deltas, natural cubic spline and peak extraction).
//! - **`storage`**: JSON report artifacts and the persisted calibration offsets.
//! - **`measurement`**: Workflows that turn a completed acquisition into a report or a
//!   new calibration.
//! - **`transport`**: Serial port opening and an in-memory mock of the probe.
//! - **`config`**: Figment-based configuration (`config/probe.toml` + `PROBE_DAQ_*`).
//! - **`logging`**: `tracing` subscriber setup.
//! - **`error`**: The crate-wide `DaqError`.

pub mod acquisition;
pub mod analysis;
pub mod config;
pub mod error;
pub mod logging;
pub mod measurement;
pub mod storage;
pub mod transport;

pub use error::{AppResult, DaqError};
