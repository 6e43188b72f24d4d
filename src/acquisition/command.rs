//! Outbound probe vocabulary.

use super::session::{END, START};
use crate::error::{AppResult, DaqError};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Servo angles the probe mount accepts, in degrees.
pub const SERVO_RANGE: RangeInclusive<u16> = 70..=110;

/// A line the host can send to the probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeCommand {
    /// Begin an acquisition (`start`)
    Start,
    /// Stop an acquisition (`end`)
    End,
    /// Laser on (`on`)
    LaserOn,
    /// Laser off (`off`)
    LaserOff,
    /// Rotate the servo; sent as the bare angle
    ServoAngle(u16),
    /// Anything else, passed through unchanged
    Raw(String),
}

impl ProbeCommand {
    /// Servo command, checked against [`SERVO_RANGE`].
    pub fn servo(angle: u16) -> AppResult<Self> {
        if SERVO_RANGE.contains(&angle) {
            Ok(ProbeCommand::ServoAngle(angle))
        } else {
            Err(DaqError::InvalidCommand(format!(
                "servo angle {angle} outside {}..={}",
                SERVO_RANGE.start(),
                SERVO_RANGE.end()
            )))
        }
    }

    /// Pass-through command. Rejects empty text and embedded line breaks.
    pub fn raw(text: impl Into<String>) -> AppResult<Self> {
        let text = text.into();
        if text.is_empty() || text.contains(['\n', '\r']) {
            return Err(DaqError::InvalidCommand(format!(
                "'{}' is not a single line",
                text.escape_debug()
            )));
        }
        Ok(ProbeCommand::Raw(text))
    }
}

impl fmt::Display for ProbeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeCommand::Start => f.write_str(START),
            ProbeCommand::End => f.write_str(END),
            ProbeCommand::LaserOn => f.write_str("on"),
            ProbeCommand::LaserOff => f.write_str("off"),
            ProbeCommand::ServoAngle(angle) => write!(f, "{angle}"),
            ProbeCommand::Raw(text) => f.write_str(text),
        }
    }
}

impl FromStr for ProbeCommand {
    type Err = DaqError;

    /// Accepts `start`, `end`, `on`, `off`, `servo <deg>` or a bare angle; any other
    /// single line becomes [`ProbeCommand::Raw`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let angle = s.strip_prefix("servo").map(str::trim).unwrap_or(s);
        if let Ok(angle) = angle.parse::<u16>() {
            return ProbeCommand::servo(angle);
        }
        match s {
            START => Ok(ProbeCommand::Start),
            END => Ok(ProbeCommand::End),
            "on" => Ok(ProbeCommand::LaserOn),
            "off" => Ok(ProbeCommand::LaserOff),
            other => ProbeCommand::raw(other),
        }
    }
}
