//! Stream framing and acquisition session.
//!
//! Bytes from the probe flow through three layers:
//!
//! ```text
//! transport ──> FrameSplitter ──> AcquisitionSession ──> SampleStore
//!   (bytes)        (lines)        (start/end, events)     (20 × 5 cells)
//! ```
//!
//! At runtime a single task spawned by [`spawn_session`] owns all three; callers talk to
//! it through a [`SessionHandle`] and listen on the returned [`SessionEvent`] channel.

pub mod actor;
pub mod command;
pub mod framing;
pub mod session;
pub mod store;

pub use actor::{spawn_session, SessionHandle};
pub use command::ProbeCommand;
pub use framing::FrameSplitter;
pub use session::{AcquisitionSession, Direction, SessionEvent, SessionState};
pub use store::{SampleFrame, SampleStore, SampleTable, CAPACITY, CHANNELS};
