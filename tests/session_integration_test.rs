//! Integration tests for the acquisition session over the mock serial link.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use probe_daq::acquisition::{
    spawn_session, Direction, ProbeCommand, SessionEvent, SessionState, CAPACITY,
};
use probe_daq::config::{AnalysisConfig, TransportConfig};
use probe_daq::measurement::{MeasurementOutcome, MeasurementRunner, MeasurementWorkflow};
use probe_daq::storage::{CalibrationStore, ReportWriter};
use probe_daq::transport::mock_serial;
use probe_daq::DaqError;
use std::io;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Channel 1 counts up from `base`, channels 2-5 are constant.
fn frames(base: usize, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("{}.0 2.0 3.0 4.0 5.0", base + i))
        .collect()
}

async fn wait_for<F>(events: &mut mpsc::Receiver<SessionEvent>, pred: F) -> (Vec<SessionEvent>, SessionEvent)
where
    F: Fn(&SessionEvent) -> bool,
{
    let mut seen = Vec::new();
    let found = timeout(Duration::from_secs(2), async {
        loop {
            let event = events.recv().await.expect("session event channel closed");
            if pred(&event) {
                return event;
            }
            seen.push(event);
        }
    })
    .await
    .expect("timed out waiting for session event");
    (seen, found)
}

#[tokio::test]
async fn test_lines_before_start_are_not_stored() {
    let (port, mut probe) = mock_serial::new();
    let (handle, mut events) = spawn_session(port, &TransportConfig::default());

    probe.send_line("9 9 9 9 9").unwrap();
    let (_, echo) = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::Line { direction: Direction::Received, .. })
    })
    .await;
    assert_eq!(echo.to_string(), "Recv : 9 9 9 9 9");
    assert_eq!(handle.state().await.unwrap(), SessionState::Idle);

    handle.send_command(ProbeCommand::Start).await.unwrap();
    probe.expect_line("start").await;
    probe.send_acquisition(frames(1, CAPACITY)).unwrap();

    let (seen, done) = wait_for(&mut events, |e| matches!(e, SessionEvent::Completed(_))).await;
    let stored = seen
        .iter()
        .filter(|e| matches!(e, SessionEvent::SampleStored { .. }))
        .count();
    assert_eq!(stored, CAPACITY);

    let SessionEvent::Completed(store) = done else { unreachable!() };
    let table = store.finalize().unwrap();
    assert_eq!(table.channel(0)[0], 1.0);
}

#[tokio::test]
async fn test_data_right_after_start_lands_in_fresh_store() {
    let (port, probe) = mock_serial::new();
    let (handle, mut events) = spawn_session(port, &TransportConfig::default());

    // First acquisition is abandoned after five samples
    handle.send("start").await.unwrap();
    for line in frames(100, 5) {
        probe.send_line(&line).unwrap();
    }
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::SampleStored { position: 5 })
    })
    .await;

    // Re-arm while the probe keeps talking; the reply arrives only after the reset
    handle.send("start").await.unwrap();
    probe.send_acquisition(frames(1, CAPACITY)).unwrap();

    let (_, done) = wait_for(&mut events, |e| matches!(e, SessionEvent::Completed(_))).await;
    let SessionEvent::Completed(store) = done else { unreachable!() };
    assert_eq!(store.len(), CAPACITY);
    assert_eq!(store.finalize().unwrap().channel(0)[0], 1.0);
}

#[tokio::test]
async fn test_overflow_and_malformed_lines_are_recoverable() {
    let (port, mut probe) = mock_serial::new();
    let (handle, mut events) = spawn_session(port, &TransportConfig::default());

    handle.send("start").await.unwrap();
    probe.expect_line("start").await;

    let mut lines = frames(1, 3);
    lines.push("1.0 2.0 3.0 4.0".to_string());
    lines.extend(frames(4, CAPACITY - 3));
    lines.push("21.0 2.0 3.0 4.0 5.0".to_string());
    probe.send_acquisition(lines).unwrap();

    let (seen, done) = wait_for(&mut events, |e| matches!(e, SessionEvent::Completed(_))).await;

    let rejected: Vec<&DaqError> = seen
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Rejected(err) => Some(err),
            _ => None,
        })
        .collect();
    assert_eq!(rejected.len(), 2);
    assert!(matches!(rejected[0], DaqError::MalformedFrame { .. }));
    assert!(matches!(rejected[1], DaqError::BufferOverflow { .. }));

    // The malformed line did not take position 4
    let SessionEvent::Completed(store) = done else { unreachable!() };
    let table = store.finalize().unwrap();
    assert_eq!(table.channel(0)[3], 4.0);
    assert_eq!(table.channel(0)[CAPACITY - 1], CAPACITY as f64);
    assert_eq!(handle.state().await.unwrap(), SessionState::Complete);
}

#[tokio::test]
async fn test_read_failure_disconnects_exactly_once() {
    let (port, mut probe) = mock_serial::new();
    let (handle, mut events) = spawn_session(port, &TransportConfig::default());

    handle.send("start").await.unwrap();
    probe.expect_line("start").await;
    probe.send_line("1 2 3 4 5").unwrap();
    probe.inject_read_error(io::ErrorKind::ConnectionReset).unwrap();
    probe.send_line("2 2 3 4 5").unwrap();

    let (_, event) = wait_for(&mut events, |e| matches!(e, SessionEvent::Disconnected(_))).await;
    let SessionEvent::Disconnected(DaqError::Transport(err)) = event else {
        panic!("expected transport error, got {event:?}");
    };
    assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);

    // A second failure must not produce another notification
    probe.hang_up();
    assert!(matches!(
        handle.send_command(ProbeCommand::LaserOn).await,
        Err(DaqError::SessionClosed)
    ));
    handle.shutdown().await.unwrap();

    let mut remaining = Vec::new();
    while let Some(event) = events.recv().await {
        remaining.push(event);
    }
    assert!(remaining
        .iter()
        .all(|e| !matches!(e, SessionEvent::Disconnected(_) | SessionEvent::SampleStored { .. })));
}

#[tokio::test]
async fn test_write_failure_is_reported_to_sender() {
    let (port, probe) = mock_serial::new();
    let (handle, mut events) = spawn_session(port, &TransportConfig::default());

    probe.hang_up();
    // Either the write fails or the read side noticed EOF first
    let result = handle.send("on").await;
    assert!(matches!(
        result,
        Err(DaqError::Transport(_)) | Err(DaqError::SessionClosed)
    ));
    wait_for(&mut events, |e| matches!(e, SessionEvent::Disconnected(_))).await;
    assert_eq!(handle.state().await.unwrap(), SessionState::Error);
}

#[tokio::test]
async fn test_completed_session_feeds_survey_report() {
    let dir = tempfile::tempdir().unwrap();
    let runner = MeasurementRunner::new(
        AnalysisConfig::default(),
        ReportWriter::new(dir.path()),
        CalibrationStore::new(dir.path().join("calibration_offsets.json")),
    );

    let (port, mut probe) = mock_serial::new();
    let (handle, mut events) = spawn_session(port, &TransportConfig::default());
    handle.send_command(ProbeCommand::Start).await.unwrap();
    probe.expect_line("start").await;
    probe.send_acquisition(frames(1, CAPACITY)).unwrap();

    let outcome = timeout(Duration::from_secs(2), async {
        loop {
            let event = events.recv().await.unwrap();
            if let Some(outcome) = runner.on_event(MeasurementWorkflow::Survey, event) {
                break outcome;
            }
        }
    })
    .await
    .unwrap();

    let MeasurementOutcome::Saved { artifact } = outcome else {
        panic!("expected saved report, got {outcome}");
    };
    assert!(artifact.name().starts_with("sensor_data_"));

    let doc = runner.writer().load(artifact.name()).unwrap();
    let peak = doc.entries(5).next().unwrap();
    // Only channel 1 rises, by 19
    assert_eq!(peak.max_y_value, Some(19.0));
    assert_eq!(peak.max_x_value, Some(1.0));
}
