//! Mock serial port for exercising the probe link without hardware
//!
//! This module provides `MockSerialPort`, which implements `AsyncRead` and `AsyncWrite`,
//! and a corresponding `MockDeviceHarness` that plays the probe's side of the link:
//! it streams sample lines, asserts on the commands it receives, and can inject
//! read failures or hang up.
//!
//! # Architecture
//!
//! A pair of unbounded channels simulates bidirectional communication:
//! - `MockSerialPort` (given to the session): implements AsyncRead/AsyncWrite
//! - `MockDeviceHarness` (kept by the test): scripts device behavior
//!
//! Dropping the harness (or calling [`MockDeviceHarness::hang_up`]) makes the next
//! read return end-of-file and every write or shutdown fail with `BrokenPipe`.
//!
//! # Example
//!
//! ```rust,ignore
//! use probe_daq::transport::mock_serial;
//!
//! let (port, mut probe) = mock_serial::new();
//! let (handle, mut events) = spawn_session(port, &TransportConfig::default());
//!
//! handle.send("start").await?;
//! probe.expect_line("start").await;
//! probe.send_line("1.0 2.0 3.0 4.0 5.0")?;
//! ```

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// The session-facing side of the mock serial port
#[derive(Debug)]
pub struct MockSerialPort {
    /// Channel to send written data to the harness
    writes_tx: UnboundedSender<Vec<u8>>,
    /// Channel to receive data (or injected failures) from the harness
    reads_rx: UnboundedReceiver<io::Result<Vec<u8>>>,
    /// Buffer for data received from the harness but not yet read by the session
    read_buffer: VecDeque<u8>,
}

/// The test-facing side that plays the probe
#[derive(Debug)]
pub struct MockDeviceHarness {
    /// Channel to receive data written by the session
    writes_rx: UnboundedReceiver<Vec<u8>>,
    /// Channel to send data to the session for it to read
    reads_tx: UnboundedSender<io::Result<Vec<u8>>>,
    /// Received bytes not yet asserted by the test
    write_buffer: Vec<u8>,
}

/// Creates a new connected pair of `MockSerialPort` and `MockDeviceHarness`
pub fn new() -> (MockSerialPort, MockDeviceHarness) {
    let (client_to_harness_tx, client_to_harness_rx) = mpsc::unbounded_channel();
    let (harness_to_client_tx, harness_to_client_rx) = mpsc::unbounded_channel();

    let port = MockSerialPort {
        writes_tx: client_to_harness_tx,
        reads_rx: harness_to_client_rx,
        read_buffer: VecDeque::new(),
    };

    let harness = MockDeviceHarness {
        writes_rx: client_to_harness_rx,
        reads_tx: harness_to_client_tx,
        write_buffer: Vec::new(),
    };

    (port, harness)
}

// =============================================================================
// MockSerialPort Implementations
// =============================================================================

impl MockSerialPort {
    fn fill_from_buffer(&mut self, buf: &mut ReadBuf<'_>) {
        let to_read = std::cmp::min(buf.remaining(), self.read_buffer.len());
        let chunk: Vec<u8> = self.read_buffer.drain(..to_read).collect();
        buf.put_slice(&chunk);
    }
}

impl AsyncRead for MockSerialPort {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.read_buffer.is_empty() {
            self.fill_from_buffer(buf);
            return Poll::Ready(Ok(()));
        }

        match self.reads_rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.read_buffer.extend(chunk);
                self.fill_from_buffer(buf);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Some(Err(err))) => Poll::Ready(Err(err)),
            // Channel closed: end-of-file
            Poll::Ready(None) => Poll::Ready(Ok(())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for MockSerialPort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.writes_tx.send(buf.to_vec()) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock probe disconnected",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.writes_tx.is_closed() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock probe disconnected",
            )));
        }
        Poll::Ready(Ok(()))
    }
}

// =============================================================================
// MockDeviceHarness Implementations
// =============================================================================

impl MockDeviceHarness {
    /// Sends raw bytes to the session, exactly as given
    ///
    /// # Errors
    /// Returns error if the session side has been dropped
    pub fn send_bytes(&self, data: &[u8]) -> Result<(), &'static str> {
        self.reads_tx
            .send(Ok(data.to_vec()))
            .map_err(|_| "Failed to send data: session port disconnected")
    }

    /// Sends one newline-terminated line to the session
    ///
    /// # Errors
    /// Returns error if the session side has been dropped
    pub fn send_line(&self, line: &str) -> Result<(), &'static str> {
        self.send_bytes(format!("{line}\n").as_bytes())
    }

    /// Streams sample lines followed by `end`, the way the probe answers a
    /// measurement request
    ///
    /// # Errors
    /// Returns error if the session side has been dropped
    pub fn send_acquisition<I, S>(&self, lines: I) -> Result<(), &'static str>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            self.send_line(line.as_ref())?;
        }
        self.send_line("end")
    }

    /// Makes the session's next read fail with the given error kind
    ///
    /// # Errors
    /// Returns error if the session side has been dropped
    pub fn inject_read_error(&self, kind: io::ErrorKind) -> Result<(), &'static str> {
        self.reads_tx
            .send(Err(io::Error::new(kind, "injected mock read failure")))
            .map_err(|_| "Failed to inject error: session port disconnected")
    }

    /// Drops the device side of the link
    pub fn hang_up(self) {
        drop(self);
    }

    /// Waits for the session to write specific bytes and asserts their correctness
    ///
    /// # Panics
    /// Panics if the expected data is not received within 2 seconds or if
    /// the received data does not match.
    #[allow(clippy::panic)]
    pub async fn expect_write(&mut self, expected: &[u8]) {
        use tokio::time::{timeout, Duration};

        let timeout_duration = Duration::from_secs(2);

        while self.write_buffer.len() < expected.len() {
            match timeout(timeout_duration, self.writes_rx.recv()).await {
                Ok(Some(chunk)) => self.write_buffer.extend_from_slice(&chunk),
                Ok(None) => panic!("Session-side port closed while expecting a write."),
                Err(_) => {
                    panic!(
                        "Timeout waiting for write. Expected `{:?}` ({} bytes), but only received `{:?}` ({} bytes).",
                        String::from_utf8_lossy(expected),
                        expected.len(),
                        String::from_utf8_lossy(&self.write_buffer),
                        self.write_buffer.len()
                    );
                }
            }
        }

        let actual = &self.write_buffer[..expected.len()];
        assert_eq!(
            actual,
            expected,
            "Mismatch in expected write. Expected `{:?}`, got `{:?}`.",
            String::from_utf8_lossy(expected),
            String::from_utf8_lossy(actual)
        );

        // Keep any excess for the next expectation
        self.write_buffer.drain(..expected.len());
    }

    /// Waits for the session to write `line` followed by `\n`
    pub async fn expect_line(&mut self, line: &str) {
        self.expect_write(format!("{line}\n").as_bytes()).await;
    }
}
