//! Session lifecycle and dispatch tests against the scripted transport

use bittle_core::protocol::{
    Command, MockTransport, Outcome, Session, SessionConfig, SessionError, SessionState,
};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

mod common;

fn config() -> SessionConfig {
    SessionConfig {
        port_name: "/dev/ttyMOCK0".to_string(),
        ..SessionConfig::default()
    }
}

/// Virtual time lands on timer ticks, which are rounded up to the next millisecond
fn assert_elapsed(start: Instant, expected: Duration) {
    let elapsed = start.elapsed();
    assert!(
        elapsed >= expected && elapsed <= expected + Duration::from_millis(5),
        "elapsed {:?}, expected {:?}",
        elapsed,
        expected
    );
}

async fn ready_session(mock: &MockTransport) -> Session<MockTransport> {
    common::init_tracing();
    let mut session = Session::new(mock.clone(), config());
    session.connect().await.unwrap();
    session
}

#[tokio::test(start_paused = true)]
async fn test_connect_waits_for_prompt() {
    let mock = MockTransport::bittle();
    let session = ready_session(&mock).await;
    assert_eq!(session.state(), SessionState::Ready);
    assert!(mock.is_held());
    assert_eq!(mock.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_without_prompt_times_out() {
    let mock = MockTransport::default();
    mock.set_boot_lines(&["* Start *", "Initialize I2C", "Connect MPU6050"]);
    let mut session = Session::new(mock.clone(), config());

    let start = Instant::now();
    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, SessionError::HandshakeTimeout(_)));
    assert_elapsed(start, Duration::from_secs(10));
    assert_eq!(session.state(), SessionState::Faulted);
    assert!(!mock.is_held());
}

#[tokio::test(start_paused = true)]
async fn test_connect_port_unavailable() {
    let mock = MockTransport::bittle();
    mock.fail_next_opens(1);
    let mut session = Session::new(mock.clone(), config());
    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, SessionError::PortUnavailable { .. }));
    assert_eq!(session.state(), SessionState::Faulted);
    assert!(!mock.is_held());
}

#[tokio::test(start_paused = true)]
async fn test_connect_retries_then_succeeds() {
    let mock = MockTransport::bittle();
    mock.fail_next_opens(1);
    let mut session = Session::new(
        mock.clone(),
        SessionConfig {
            handshake_attempts: 3,
            retry_interval: Duration::from_secs(5),
            ..config()
        },
    );
    let start = Instant::now();
    session.connect().await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);
    assert_elapsed(start, Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_faulted_session_can_reconnect() {
    let mock = MockTransport::bittle();
    mock.fail_next_opens(1);
    let mut session = Session::new(mock.clone(), config());
    assert!(session.connect().await.is_err());
    session.connect().await.unwrap();
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_send_acknowledged_then_settles() {
    let mock = MockTransport::bittle();
    let mut session = ready_session(&mock).await;

    let start = Instant::now();
    let outcome = session
        .send(&Command::new("ksit").with_duration(3.0))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Acknowledged);
    assert_elapsed(start, Duration::from_secs(3));
    assert_eq!(mock.written_lines(), vec!["ksit"]);
}

#[tokio::test(start_paused = true)]
async fn test_send_argument_on_the_wire() {
    let mock = MockTransport::bittle();
    let mut session = ready_session(&mock).await;
    session
        .send(&Command::new("m").with_argument("0 30"))
        .await
        .unwrap();
    assert_eq!(mock.written_lines(), vec!["m 0 30"]);
}

#[tokio::test(start_paused = true)]
async fn test_pure_wait_writes_nothing() {
    let mock = MockTransport::bittle();
    let mut session = ready_session(&mock).await;

    let start = Instant::now();
    let outcome = session.send(&Command::wait(2.0)).await.unwrap();
    assert_eq!(outcome, Outcome::Waited);
    assert_elapsed(start, Duration::from_secs(2));
    assert!(mock.written_lines().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_chatter_before_echo_is_skipped() {
    let mock = MockTransport::bittle();
    mock.push_reply(&["1283 105 26 61", "ksit"]);
    let mut session = ready_session(&mock).await;
    let outcome = session.send(&Command::new("ksit")).await.unwrap();
    assert_eq!(outcome, Outcome::Acknowledged);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_command() {
    let mock = MockTransport::bittle();
    mock.push_reply(&["wrong key!"]);
    let mut session = ready_session(&mock).await;
    let outcome = session.send(&Command::new("kfoo")).await.unwrap();
    assert_eq!(outcome, Outcome::Rejected);
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_missing_echo_is_tolerated() {
    let mock = MockTransport::bittle();
    mock.push_reply(&[]);
    let mut session = ready_session(&mock).await;

    let start = Instant::now();
    let outcome = session.send(&Command::new("ksit")).await.unwrap();
    assert_eq!(outcome, Outcome::Unacknowledged);
    assert_elapsed(start, Duration::from_secs(1));
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.consecutive_unacknowledged(), 1);

    // An acknowledged send resets the run
    session.send(&Command::new("ksit")).await.unwrap();
    assert_eq!(session.consecutive_unacknowledged(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_run_of_unacknowledged_sends_faults() {
    let mock = MockTransport::bittle();
    mock.set_echo(false);
    let mut session = ready_session(&mock).await;

    for _ in 0..3 {
        let outcome = session.send(&Command::new("ksit")).await.unwrap();
        assert_eq!(outcome, Outcome::Unacknowledged);
    }
    let err = session.send(&Command::new("ksit")).await.unwrap_err();
    assert!(matches!(err, SessionError::TooManyUnacknowledged(4)));
    assert_eq!(session.state(), SessionState::Faulted);

    let err = session.send(&Command::new("ksit")).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::NotReady(SessionState::Faulted)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_faults() {
    let mock = MockTransport::bittle();
    mock.fail_write_at(0);
    let mut session = ready_session(&mock).await;
    let err = session.send(&Command::new("ksit")).await.unwrap_err();
    assert!(matches!(err, SessionError::Write(_)));
    assert_eq!(session.state(), SessionState::Faulted);
}

#[tokio::test(start_paused = true)]
async fn test_min_settle_applies_to_commands_only() {
    let mock = MockTransport::bittle();
    let mut session = Session::new(
        mock.clone(),
        SessionConfig {
            min_settle: Duration::from_secs(5),
            ..config()
        },
    );
    session.connect().await.unwrap();

    let start = Instant::now();
    session
        .send(&Command::new("ktr").with_duration(1.0))
        .await
        .unwrap();
    assert_elapsed(start, Duration::from_secs(5));

    let start = Instant::now();
    session.send(&Command::wait(1.0)).await.unwrap();
    assert_elapsed(start, Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_always_releases() {
    let mock = MockTransport::bittle();
    let mut session = ready_session(&mock).await;
    session.disconnect();
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!mock.is_held());
    session.disconnect();
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_settle_releases_port() {
    let mock = MockTransport::bittle();
    let token = CancellationToken::new();
    let mut session = Session::new(mock.clone(), config()).with_cancellation(token.clone());
    session.connect().await.unwrap();

    let long = Command::new("ksit").with_duration(30.0);
    let (result, _) = tokio::join!(
        session.send(&long),
        async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            token.cancel();
        }
    );
    assert!(matches!(result, Err(SessionError::Cancelled)));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!mock.is_held());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_handshake_releases_port() {
    let mock = MockTransport::default();
    let token = CancellationToken::new();
    let mut session = Session::new(mock.clone(), config()).with_cancellation(token.clone());

    let (result, _) = tokio::join!(session.connect(), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
    });
    assert!(matches!(result, Err(SessionError::Cancelled)));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!mock.is_held());
}

#[tokio::test(start_paused = true)]
async fn test_park_sends_rest_and_releases() {
    let mock = MockTransport::bittle();
    let mut session = ready_session(&mock).await;
    let start = Instant::now();
    session.park().await;
    assert_eq!(mock.written_lines(), vec!["d"]);
    assert_elapsed(start, Duration::from_secs(3));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!mock.is_held());
}

#[tokio::test(start_paused = true)]
async fn test_park_when_faulted_only_releases() {
    let mock = MockTransport::bittle();
    mock.fail_write_at(0);
    let mut session = ready_session(&mock).await;
    let _ = session.send(&Command::new("ksit")).await;
    session.park().await;
    assert_eq!(mock.written_lines(), vec!["ksit"]);
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_park_after_cancel_still_rests() {
    let mock = MockTransport::bittle();
    let token = CancellationToken::new();
    let mut session = Session::new(mock.clone(), config()).with_cancellation(token.clone());
    session.connect().await.unwrap();

    token.cancel();
    let start = Instant::now();
    session.park().await;
    assert_eq!(mock.written_lines(), vec!["d"]);
    assert_elapsed(start, Duration::from_secs(3));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!mock.is_held());
    assert!(session.cancellation().is_cancelled());
}
