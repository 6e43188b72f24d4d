//! Serial Transport Abstractions
//!
//! The acquisition session treats the probe link as an opaque, ordered byte channel.
//! Anything implementing `AsyncRead + AsyncWrite + Unpin + Send` qualifies:
//!
//! - `tokio_serial::SerialStream` (real hardware, see [`open_serial_async`])
//! - [`mock_serial::MockSerialPort`] (tests and offline demos)
//! - `tokio::io::DuplexStream`
//!
//! Connection setup and teardown (pairing, permissions) happens outside this crate;
//! callers hand an already-open port to [`crate::acquisition::spawn_session`].

pub mod mock_serial;
#[cfg(feature = "serial")]
mod serial;

#[cfg(feature = "serial")]
pub use serial::open_serial_async;

use tokio::io::{AsyncRead, AsyncWrite};

/// Trait alias for async serial port I/O.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

// Blanket implementation for all types meeting the requirements
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;
