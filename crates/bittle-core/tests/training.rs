//! Command queue and training prompt tests

use bittle_core::protocol::{
    Command, MockTransport, Outcome, Session, SessionConfig, SessionError, SessionState,
};
use bittle_core::training::{
    CommandQueue, ParseError, QueueLimits, ReplCommand, ReplExit, TrainingRepl,
};
use pretty_assertions::assert_eq;
use std::time::Duration;

mod common;

fn config() -> SessionConfig {
    SessionConfig {
        port_name: "/dev/ttyMOCK0".to_string(),
        ..SessionConfig::default()
    }
}

async fn ready_session(mock: &MockTransport) -> Session<MockTransport> {
    common::init_tracing();
    let mut session = Session::new(mock.clone(), config());
    session.connect().await.unwrap();
    session
}

#[tokio::test(start_paused = true)]
async fn test_sit_then_sleep_then_run() {
    let mock = MockTransport::bittle();
    let mut session = ready_session(&mock).await;
    let mut queue = CommandQueue::new();
    queue.enqueue("ksit,3").unwrap();
    queue.enqueue("sleep,2").unwrap();

    let start = tokio::time::Instant::now();
    let report = queue.run(&mut session).await;

    assert!(report.completed());
    let outcomes: Vec<Outcome> = report.dispatched.iter().map(|d| d.outcome).collect();
    assert_eq!(outcomes, vec![Outcome::Acknowledged, Outcome::Waited]);
    let written = mock.written();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].line, "ksit");
    assert_eq!(written[0].at, start);
    assert!(start.elapsed() >= Duration::from_secs(5));
    assert!(start.elapsed() < Duration::from_secs(6));
    assert!(queue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_run_sends_every_entry_in_order() {
    let mock = MockTransport::bittle();
    let mut session = ready_session(&mock).await;
    let mut queue = CommandQueue::new();
    for line in ["kbalance,1", "ksit,2", "kstr,1", "d"] {
        queue.enqueue(line).unwrap();
    }
    let report = queue.run(&mut session).await;
    assert!(report.completed());
    assert_eq!(mock.written_lines(), vec!["kbalance", "ksit", "kstr", "d"]);
    let indices: Vec<usize> = report.dispatched.iter().map(|d| d.entry.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_failure_keeps_undispatched_entries() {
    let mock = MockTransport::bittle();
    mock.fail_write_at(1);
    let mut session = ready_session(&mock).await;
    let mut queue = CommandQueue::new();
    for line in ["ksit,1", "kbalance,1", "kstr,1", "d,1"] {
        queue.enqueue(line).unwrap();
    }

    let report = queue.run(&mut session).await;
    assert_eq!(report.dispatched.len(), 1);
    let failure = report.failure.as_ref().unwrap();
    assert_eq!(failure.entry.index, 1);
    assert!(failure.consumed);
    assert!(matches!(failure.error, SessionError::Write(_)));
    assert!(matches!(failure.reconnect, Some(Ok(()))));
    assert_eq!(session.state(), SessionState::Ready);

    let remaining: Vec<String> = queue
        .dry_run()
        .into_iter()
        .map(|e| e.command.token)
        .collect();
    assert_eq!(remaining, vec!["kstr", "d"]);

    let report = queue.run(&mut session).await;
    assert!(report.completed());
    assert!(queue.is_empty());
    assert_eq!(mock.written_lines(), vec!["ksit", "kbalance", "kstr", "d"]);
}

#[tokio::test(start_paused = true)]
async fn test_failure_with_failed_reconnect() {
    let mock = MockTransport::bittle();
    mock.fail_write_at(0);
    let mut session = ready_session(&mock).await;
    mock.fail_next_opens(1);

    let mut queue = CommandQueue::new();
    queue.enqueue("ksit,1").unwrap();
    queue.enqueue("d,1").unwrap();
    let report = queue.run(&mut session).await;

    let failure = report.failure.unwrap();
    assert!(matches!(
        failure.reconnect,
        Some(Err(SessionError::PortUnavailable { .. }))
    ));
    assert_eq!(session.state(), SessionState::Faulted);
    assert_eq!(queue.len(), 1);
    assert!(!mock.is_held());
}

#[tokio::test(start_paused = true)]
async fn test_run_before_connect_keeps_everything() {
    let mock = MockTransport::bittle();
    let mut session = Session::new(mock.clone(), config());
    let mut queue = CommandQueue::new();
    queue.enqueue("ksit,1").unwrap();

    let report = queue.run(&mut session).await;
    let failure = report.failure.unwrap();
    assert!(!failure.consumed);
    assert!(matches!(failure.error, SessionError::NotReady(_)));
    assert_eq!(queue.len(), 1);
    assert!(mock.written_lines().is_empty());

    // The reconnect attempt brought the session up
    assert_eq!(session.state(), SessionState::Ready);
    assert!(queue.run(&mut session).await.completed());
    assert_eq!(mock.written_lines(), vec!["ksit"]);
}

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_entries_do_not_stop_the_run() {
    let mock = MockTransport::bittle();
    mock.push_reply(&[]);
    let mut session = ready_session(&mock).await;
    let mut queue = CommandQueue::new();
    queue.enqueue("ksit").unwrap();
    queue.enqueue("d").unwrap();
    let report = queue.run(&mut session).await;
    assert!(report.completed());
    assert_eq!(report.dispatched[0].outcome, Outcome::Unacknowledged);
    assert_eq!(report.dispatched[1].outcome, Outcome::Acknowledged);
}

#[test]
fn test_repl_command_parsing() {
    let limits = QueueLimits::default();
    let cases = [
        ("dry-run", ReplCommand::DryRun),
        ("run", ReplCommand::Run),
        ("clear", ReplCommand::Clear),
        ("exit", ReplCommand::Exit),
        ("quit", ReplCommand::Exit),
        ("help", ReplCommand::Help),
        (
            "ksit,3",
            ReplCommand::Enqueue(Command::new("ksit").with_duration(3.0)),
        ),
        ("sleep,2", ReplCommand::Enqueue(Command::wait(2.0))),
    ];
    for (line, expected) in cases {
        assert_eq!(ReplCommand::parse(line, &limits).unwrap(), expected);
    }
    assert!(matches!(
        ReplCommand::parse("foo,-1", &limits),
        Err(ParseError::InvalidDuration(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_repl_session() {
    let mock = MockTransport::bittle();
    let mut session = ready_session(&mock).await;
    let mut repl = TrainingRepl::new(QueueLimits::default(), Vec::new());

    let input: &[u8] = b"ksit,3\nsleep,2\n\ndry-run\nrun\ndry-run\nexit\nkbalance,1\n";
    let summary = repl.run(input, &mut session).await.unwrap();

    assert_eq!(summary.exit, ReplExit::Quit);
    assert_eq!(summary.runs, 1);
    assert_eq!(summary.inputs, 6);
    assert_eq!(mock.written_lines(), vec!["ksit"]);
    assert!(repl.queue().is_empty());

    let out = String::from_utf8(repl.into_output()).unwrap();
    assert!(out.contains("Added command as cmd:ksit, duration:3sec"));
    assert!(out.contains("Added command as cmd:sleep, duration:2sec"));
    assert!(out.contains("Currently, the command is:\ncmd:ksit, duration:3\ncmd:sleep, duration:2\n"));
    assert!(out.contains("[0] cmd:ksit, duration:3 ... ok"));
    assert!(out.contains("[1] cmd:sleep, duration:2 ... waited"));
    assert!(out.contains("Currently, the command is:\nEmpty\n"));
    assert!(out.trim_end().ends_with("Bye!"));
}

#[tokio::test(start_paused = true)]
async fn test_repl_rejects_malformed_line() {
    let mock = MockTransport::bittle();
    let mut session = ready_session(&mock).await;
    let mut repl = TrainingRepl::new(QueueLimits::default(), Vec::new());

    let input: &[u8] = b"foo,-1\ndry-run\n";
    let summary = repl.run(input, &mut session).await.unwrap();

    assert_eq!(summary.exit, ReplExit::EndOfInput);
    assert!(repl.queue().is_empty());
    let out = String::from_utf8(repl.into_output()).unwrap();
    assert!(out.contains("Failed to add a command: invalid duration '-1'"));
    assert!(out.contains("Currently, the command is:\nEmpty\n"));
}

#[tokio::test(start_paused = true)]
async fn test_repl_run_with_empty_queue() {
    let mock = MockTransport::bittle();
    let mut session = ready_session(&mock).await;
    let mut repl = TrainingRepl::new(QueueLimits::default(), Vec::new());
    let input: &[u8] = b"run\nquit\n";
    let summary = repl.run(input, &mut session).await.unwrap();
    assert_eq!(summary.runs, 0);
    let out = String::from_utf8(repl.into_output()).unwrap();
    assert!(out.contains("There is no command."));
}

#[tokio::test(start_paused = true)]
async fn test_repl_clear() {
    let mock = MockTransport::bittle();
    let mut session = ready_session(&mock).await;
    let mut repl = TrainingRepl::new(QueueLimits::default(), Vec::new());
    let input: &[u8] = b"ksit,3\nd\nclear\nrun\n";
    repl.run(input, &mut session).await.unwrap();
    assert!(repl.queue().is_empty());
    assert!(mock.written_lines().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_repl_input_limit() {
    let mock = MockTransport::bittle();
    let mut session = ready_session(&mock).await;
    let limits = QueueLimits {
        max_inputs: 2,
        ..QueueLimits::default()
    };
    let mut repl = TrainingRepl::new(limits, Vec::new());
    let input: &[u8] = b"d\nd\nd\n";
    let summary = repl.run(input, &mut session).await.unwrap();
    assert_eq!(summary.exit, ReplExit::InputLimit);
    assert_eq!(summary.inputs, 2);
    assert_eq!(repl.queue().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_repl_reports_failure_and_remaining() {
    let mock = MockTransport::bittle();
    mock.fail_write_at(0);
    let mut session = ready_session(&mock).await;
    let mut repl = TrainingRepl::new(QueueLimits::default(), Vec::new());
    let input: &[u8] = b"ksit,1\nd,1\nrun\n";
    repl.run(input, &mut session).await.unwrap();
    assert_eq!(repl.queue().len(), 1);
    let out = String::from_utf8(repl.into_output()).unwrap();
    assert!(out.contains("[0] cmd:ksit, duration:1 ... failed: Write to device failed"));
    assert!(out.contains("Reconnected to the robot."));
    assert!(out.contains("1 command(s) left in the queue"));
}
