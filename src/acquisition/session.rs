//! Acquisition session state machine.
//!
//! ```text
//! Idle ──start──> Armed ──data──> Collecting ──end──> Complete
//!   ^                                                    │
//!   └────────────────────────── start ───────────────────┘
//!
//! any state ──transport failure──> Error (terminal)
//! ```
//!
//! The session is plain synchronous state. The actor in [`super::actor`] is its only
//! mutator at runtime; `replay` drives it directly from a capture file.

use super::framing::FrameSplitter;
use super::store::SampleStore;
use crate::error::DaqError;
use crate::logging::WIRE_TARGET;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Control line that arms the session when sent.
pub const START: &str = "start";

/// Control line that completes the session when received.
pub const END: &str = "end";

/// Lifecycle state of an [`AcquisitionSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No acquisition requested; data lines are echoed only
    Idle,
    /// `start` sent, store cleared, no frame received yet
    Armed,
    /// At least one frame stored since arming
    Collecting,
    /// `end` received; the store holds the last acquisition
    Complete,
    /// The transport failed; no further lines are processed
    Error,
}

impl SessionState {
    /// True while data lines are written to the store.
    pub fn is_receiving(self) -> bool {
        matches!(self, SessionState::Armed | SessionState::Collecting)
    }
}

/// Which way a line travelled over the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Written to the probe
    Sent,
    /// Read from the probe
    Received,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Sent => write!(f, "Send"),
            Direction::Received => write!(f, "Recv"),
        }
    }
}

/// Notification emitted by a session to its caller.
#[derive(Debug)]
pub enum SessionEvent {
    /// A line crossed the link (echo of every control and data line)
    Line {
        /// Direction of travel
        direction: Direction,
        /// Line content without terminator
        text: String,
    },
    /// A frame was written at this 1-based position
    SampleStored {
        /// Position in `1..=20`
        position: usize,
    },
    /// A data line was discarded (malformed frame or overflow)
    Rejected(DaqError),
    /// `end` arrived; carries a snapshot of the store
    Completed(SampleStore),
    /// The transport failed; emitted once per session
    Disconnected(DaqError),
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEvent::Line { direction, text } => write!(f, "{direction} : {text}"),
            SessionEvent::SampleStored { position } => write!(f, "stored sample {position}"),
            SessionEvent::Rejected(err) => write!(f, "rejected: {err}"),
            SessionEvent::Completed(store) => {
                write!(f, "acquisition complete ({} samples)", store.len())
            }
            SessionEvent::Disconnected(err) => write!(f, "disconnected: {err}"),
        }
    }
}

/// One physical connection's worth of acquisition state.
#[derive(Debug)]
pub struct AcquisitionSession {
    state: SessionState,
    store: SampleStore,
    splitter: FrameSplitter,
}

impl Default for AcquisitionSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AcquisitionSession {
    /// A fresh, idle session.
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            store: SampleStore::new(),
            splitter: FrameSplitter::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The live store.
    pub fn store(&self) -> &SampleStore {
        &self.store
    }

    /// Clear the store and start accepting frames.
    ///
    /// Has no effect once the session is in [`SessionState::Error`].
    pub fn arm(&mut self) {
        if self.state == SessionState::Error {
            return;
        }
        self.store.reset();
        self.state = SessionState::Armed;
        info!("Acquisition armed");
    }

    /// Record an outbound line. Sending `start` arms the session.
    pub fn on_sent(&mut self, line: &str) -> Vec<SessionEvent> {
        if self.state == SessionState::Error {
            return Vec::new();
        }
        debug!(target: WIRE_TARGET, "Send : {line}");
        if line == START {
            self.arm();
        }
        vec![SessionEvent::Line {
            direction: Direction::Sent,
            text: line.to_string(),
        }]
    }

    /// Feed raw transport bytes and process every completed line in order.
    pub fn on_bytes(&mut self, bytes: &[u8]) -> Vec<SessionEvent> {
        if self.state == SessionState::Error {
            return Vec::new();
        }
        let mut events = Vec::new();
        for line in self.splitter.feed(bytes) {
            events.extend(self.on_line(&line));
        }
        events
    }

    /// Process one received line.
    pub fn on_line(&mut self, line: &str) -> Vec<SessionEvent> {
        if self.state == SessionState::Error {
            return Vec::new();
        }
        debug!(target: WIRE_TARGET, "Recv : {line}");
        let mut events = vec![SessionEvent::Line {
            direction: Direction::Received,
            text: line.to_string(),
        }];

        if !self.state.is_receiving() {
            return events;
        }

        if line == END {
            self.state = SessionState::Complete;
            info!(samples = self.store.len(), "Acquisition complete");
            events.push(SessionEvent::Completed(self.store.clone()));
            return events;
        }

        match self.store.push_line(line) {
            Ok(position) => {
                self.state = SessionState::Collecting;
                events.push(SessionEvent::SampleStored { position });
            }
            Err(err) => {
                warn!(error = %err, "Discarded data line");
                events.push(SessionEvent::Rejected(err));
            }
        }
        events
    }

    /// Move to [`SessionState::Error`].
    ///
    /// Returns the disconnect notification the first time only; later failures
    /// return `None`.
    pub fn on_transport_error(&mut self, err: DaqError) -> Option<SessionEvent> {
        if self.state == SessionState::Error {
            return None;
        }
        error!(error = %err, "Probe link lost");
        self.state = SessionState::Error;
        self.splitter.clear();
        Some(SessionEvent::Disconnected(err))
    }
}
