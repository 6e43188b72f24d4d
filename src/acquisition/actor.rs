//! Single-owner session task.
//!
//! [`spawn_session`] moves the transport and the [`AcquisitionSession`] into one Tokio
//! task. Inbound bytes and outbound commands are handled by the same `select!` loop,
//! so arming on `start` can never interleave with a half-processed inbound line.
//!
//! ## Message Flow
//!
//! 1. Caller sends a [`SessionCommand`] through [`SessionHandle`]
//! 2. The task writes the line, then updates the session (arming on `start`)
//! 3. The task answers on the command's oneshot channel
//! 4. Every state change is published as a [`SessionEvent`]

use super::command::ProbeCommand;
use super::session::{AcquisitionSession, SessionEvent, SessionState};
use crate::config::TransportConfig;
use crate::error::{AppResult, DaqError};
use crate::transport::SerialPortIO;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Requests processed by the session task.
#[derive(Debug)]
pub enum SessionCommand {
    /// Write one line (terminator appended by the task)
    Send {
        /// Line content
        line: String,
        /// Resolved after the write and any re-arm
        response: oneshot::Sender<AppResult<()>>,
    },
    /// Report the current state
    GetState {
        /// Current state
        response: oneshot::Sender<SessionState>,
    },
    /// Stop the task and close the transport
    Shutdown {
        /// Resolved once the loop has exited
        response: oneshot::Sender<()>,
    },
}

impl SessionCommand {
    /// Build a `Send` command and its reply channel.
    pub fn send(line: String) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Send { line, response: tx }, rx)
    }

    /// Build a `GetState` command and its reply channel.
    pub fn get_state() -> (Self, oneshot::Receiver<SessionState>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetState { response: tx }, rx)
    }

    /// Build a `Shutdown` command and its reply channel.
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { response: tx }, rx)
    }
}

/// Cloneable sender side of a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    command_tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Send one line to the probe.
    ///
    /// Resolves once the task has written the line. For `start` the store is already
    /// cleared and armed when this returns.
    pub async fn send(&self, line: impl Into<String>) -> AppResult<()> {
        let line = line.into();
        if line.contains(['\n', '\r']) {
            return Err(DaqError::InvalidCommand(format!(
                "'{}' is not a single line",
                line.escape_debug()
            )));
        }
        let (cmd, rx) = SessionCommand::send(line);
        self.request(cmd, rx).await?
    }

    /// Send a typed probe command.
    pub async fn send_command(&self, command: ProbeCommand) -> AppResult<()> {
        self.send(command.to_string()).await
    }

    /// Current session state.
    pub async fn state(&self) -> AppResult<SessionState> {
        let (cmd, rx) = SessionCommand::get_state();
        self.request(cmd, rx).await
    }

    /// Stop the session task. The event channel closes afterwards.
    pub async fn shutdown(&self) -> AppResult<()> {
        let (cmd, rx) = SessionCommand::shutdown();
        self.request(cmd, rx).await
    }

    async fn request<T>(&self, cmd: SessionCommand, rx: oneshot::Receiver<T>) -> AppResult<T> {
        self.command_tx
            .send(cmd)
            .await
            .map_err(|_| DaqError::SessionClosed)?;
        rx.await.map_err(|_| DaqError::SessionClosed)
    }
}

/// Spawn the task that owns `port` and the acquisition state.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_session<P>(
    port: P,
    config: &TransportConfig,
) -> (SessionHandle, mpsc::Receiver<SessionEvent>)
where
    P: SerialPortIO + 'static,
{
    let (command_tx, command_rx) = mpsc::channel(config.command_queue_capacity);
    let (event_tx, event_rx) = mpsc::channel(config.event_queue_capacity);

    let task = SessionTask {
        session: AcquisitionSession::new(),
        events: event_tx,
        terminator: config.line_terminator.clone(),
        read_buffer_size: config.read_buffer_size,
    };
    tokio::spawn(task.run(port, command_rx));

    (SessionHandle { command_tx }, event_rx)
}

struct SessionTask {
    session: AcquisitionSession,
    events: mpsc::Sender<SessionEvent>,
    terminator: String,
    read_buffer_size: usize,
}

impl SessionTask {
    async fn run<P: SerialPortIO>(mut self, port: P, mut command_rx: mpsc::Receiver<SessionCommand>) {
        info!("Acquisition session started");
        let (mut reader, mut writer) = tokio::io::split(port);
        let mut buf = vec![0u8; self.read_buffer_size.max(1)];

        loop {
            let reading = self.session.state() != SessionState::Error;
            tokio::select! {
                biased;

                command = command_rx.recv() => {
                    let Some(command) = command else {
                        debug!("All session handles dropped");
                        break;
                    };
                    match command {
                        SessionCommand::Send { line, response } => {
                            let result = self.send_line(&mut writer, &line).await;
                            let _ = response.send(result);
                        }
                        SessionCommand::GetState { response } => {
                            let _ = response.send(self.session.state());
                        }
                        SessionCommand::Shutdown { response } => {
                            if let Err(err) = writer.shutdown().await {
                                debug!(error = %err, "Closing the probe link failed");
                            }
                            let _ = response.send(());
                            info!("Acquisition session shut down");
                            return;
                        }
                    }
                }

                read = reader.read(&mut buf), if reading => {
                    match read {
                        Ok(0) => {
                            let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "probe closed the link");
                            self.fail(eof).await;
                        }
                        Ok(n) => {
                            let events = self.session.on_bytes(&buf[..n]);
                            self.publish(events).await;
                        }
                        Err(err) => self.fail(err).await,
                    }
                }
            }
        }
        if let Err(err) = writer.shutdown().await {
            debug!(error = %err, "Closing the probe link failed");
        }
    }

    async fn send_line<W>(&mut self, writer: &mut W, line: &str) -> AppResult<()>
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        if self.session.state() == SessionState::Error {
            return Err(DaqError::SessionClosed);
        }

        let mut bytes = Vec::with_capacity(line.len() + self.terminator.len());
        bytes.extend_from_slice(line.as_bytes());
        bytes.extend_from_slice(self.terminator.as_bytes());

        let written = match writer.write_all(&bytes).await {
            Ok(()) => writer.flush().await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            let reply = DaqError::Transport(io::Error::new(err.kind(), err.to_string()));
            self.fail(err).await;
            return Err(reply);
        }

        let events = self.session.on_sent(line);
        self.publish(events).await;
        Ok(())
    }

    async fn fail(&mut self, err: io::Error) {
        if let Some(event) = self.session.on_transport_error(DaqError::Transport(err)) {
            self.publish(vec![event]).await;
        }
    }

    /// Echo and progress notifications are dropped when the queue is full so an
    /// undrained receiver never stalls command handling. Rejections, completion and
    /// disconnects wait for queue space.
    async fn publish(&self, events: Vec<SessionEvent>) {
        for event in events {
            match event {
                SessionEvent::Line { .. } | SessionEvent::SampleStored { .. } => {
                    if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
                        warn!(%event, "Session event queue full, notification dropped");
                    }
                }
                // A dropped receiver only loses notifications; the session keeps running.
                event => {
                    let _ = self.events.send(event).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::store::CAPACITY;
    use crate::transport::mock_serial;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next_matching<F>(events: &mut mpsc::Receiver<SessionEvent>, f: F) -> SessionEvent
    where
        F: Fn(&SessionEvent) -> bool,
    {
        timeout(Duration::from_secs(2), async {
            loop {
                let event = events.recv().await.expect("event channel closed");
                if f(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    #[tokio::test]
    async fn start_is_written_and_arms() {
        let (port, mut probe) = mock_serial::new();
        let (handle, mut events) = spawn_session(port, &TransportConfig::default());

        handle.send_command(ProbeCommand::Start).await.unwrap();
        probe.expect_line("start").await;
        assert_eq!(handle.state().await.unwrap(), SessionState::Armed);

        let event = next_matching(&mut events, |e| matches!(e, SessionEvent::Line { .. })).await;
        assert_eq!(event.to_string(), "Send : start");
    }

    #[tokio::test]
    async fn full_acquisition_completes() {
        let (port, mut probe) = mock_serial::new();
        let (handle, mut events) = spawn_session(port, &TransportConfig::default());

        handle.send("start").await.unwrap();
        probe.expect_line("start").await;
        probe
            .send_acquisition((1..=CAPACITY).map(|i| format!("{i} 2 3 4 5")))
            .unwrap();

        let event = next_matching(&mut events, |e| matches!(e, SessionEvent::Completed(_))).await;
        let SessionEvent::Completed(store) = event else {
            unreachable!()
        };
        let table = store.finalize().unwrap();
        assert_eq!(table.channel(0)[CAPACITY - 1], CAPACITY as f64);
        assert_eq!(handle.state().await.unwrap(), SessionState::Complete);
    }

    #[tokio::test]
    async fn custom_terminator_is_appended() {
        let (port, mut probe) = mock_serial::new();
        let config = TransportConfig {
            line_terminator: "\r\n".into(),
            ..TransportConfig::default()
        };
        let (handle, _events) = spawn_session(port, &config);

        handle.send_command(ProbeCommand::ServoAngle(90)).await.unwrap();
        probe.expect_write(b"90\r\n").await;
    }

    #[tokio::test]
    async fn multiline_send_rejected_before_wire() {
        let (port, _probe) = mock_serial::new();
        let (handle, _events) = spawn_session(port, &TransportConfig::default());
        assert!(matches!(
            handle.send("on\noff").await,
            Err(DaqError::InvalidCommand(_))
        ));
    }

    #[tokio::test]
    async fn hang_up_disconnects_once() {
        let (port, probe) = mock_serial::new();
        let (handle, mut events) = spawn_session(port, &TransportConfig::default());

        probe.hang_up();
        next_matching(&mut events, |e| matches!(e, SessionEvent::Disconnected(_))).await;
        assert_eq!(handle.state().await.unwrap(), SessionState::Error);

        assert!(matches!(
            handle.send("start").await,
            Err(DaqError::SessionClosed)
        ));

        handle.shutdown().await.unwrap();
        while let Some(event) = events.recv().await {
            assert!(!matches!(event, SessionEvent::Disconnected(_)));
        }
    }

    #[tokio::test]
    async fn undrained_events_do_not_block_commands() {
        let (port, mut probe) = mock_serial::new();
        let config = TransportConfig {
            event_queue_capacity: 4,
            ..TransportConfig::default()
        };
        let (handle, mut events) = spawn_session(port, &config);

        for i in 0..10 {
            probe.send_line(&format!("idle {i}")).unwrap();
        }
        // Let the task read every idle line into the full queue
        tokio::time::sleep(Duration::from_millis(100)).await;

        timeout(Duration::from_secs(2), handle.send("start"))
            .await
            .expect("send blocked behind the event queue")
            .unwrap();
        probe.expect_line("start").await;

        // Completion still gets through once the caller drains
        probe
            .send_acquisition((1..=CAPACITY).map(|i| format!("{i} 2 3 4 5")))
            .unwrap();
        let event = next_matching(&mut events, |e| matches!(e, SessionEvent::Completed(_))).await;
        let SessionEvent::Completed(store) = event else {
            unreachable!()
        };
        assert_eq!(store.len(), CAPACITY);
    }

    #[tokio::test]
    async fn shutdown_completes_when_link_close_fails() {
        let (port, probe) = mock_serial::new();
        let (handle, mut events) = spawn_session(port, &TransportConfig::default());

        probe.hang_up();
        next_matching(&mut events, |e| matches!(e, SessionEvent::Disconnected(_))).await;

        // The mock refuses to close after hang-up; shutdown still answers
        timeout(Duration::from_secs(2), handle.shutdown())
            .await
            .expect("shutdown did not answer")
            .unwrap();
        assert!(timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn commands_after_shutdown_fail() {
        let (port, _probe) = mock_serial::new();
        let (handle, _events) = spawn_session(port, &TransportConfig::default());
        handle.shutdown().await.unwrap();
        assert!(matches!(handle.state().await, Err(DaqError::SessionClosed)));
    }
}
