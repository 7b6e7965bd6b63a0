//! Command queue
//!
//! Collects `token[,duration]` lines typed by the operator and replays them through
//! a session as one timed sequence.

use std::collections::VecDeque;
use thiserror::Error;

use crate::protocol::commands::{is_valid_token, SLEEP_MARKER};
use crate::protocol::{Command, Outcome, Session, SessionError, Transport};

/// Malformed queue input; the line is rejected and the queue left unchanged
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Nothing before the comma
    #[error("empty command")]
    Empty,

    /// Token is not printable ASCII
    #[error("invalid command '{0}' (printable ASCII, no spaces or commas)")]
    InvalidToken(String),

    /// Argument is not printable ASCII, or given to `sleep`
    #[error("invalid argument '{0}'")]
    InvalidArgument(String),

    /// Duration is not a non-negative number
    #[error("invalid duration '{0}' (must be a non-negative number of seconds)")]
    InvalidDuration(String),

    /// Duration above the configured limit
    #[error("duration {value}s is longer than the {max}s limit")]
    DurationTooLong {
        /// Requested seconds
        value: f64,
        /// Limit in seconds
        max: f64,
    },

    /// `sleep` without a positive duration
    #[error("'sleep' needs a duration greater than zero, e.g. sleep,2")]
    WaitWithoutDuration,
}

/// Limits applied to operator input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueLimits {
    /// Non-empty input lines accepted per training session
    pub max_inputs: usize,
    /// Longest accepted duration, in seconds
    pub max_duration_secs: f64,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_inputs: 100,
            max_duration_secs: 300.0,
        }
    }
}

/// Parse one `token[ argument][,duration]` line
pub fn parse_command(line: &str, limits: &QueueLimits) -> Result<Command, ParseError> {
    let line = line.trim();
    let (head, duration) = match line.split_once(',') {
        Some((head, tail)) => (head.trim(), parse_duration(tail, limits)?),
        None => (line, 0.0),
    };
    if head.is_empty() {
        return Err(ParseError::Empty);
    }

    let (token, argument) = match head.split_once(char::is_whitespace) {
        Some((token, arg)) => (token, Some(arg.trim())),
        None => (head, None),
    };

    if token == SLEEP_MARKER {
        if let Some(arg) = argument {
            return Err(ParseError::InvalidArgument(arg.to_string()));
        }
        if duration <= 0.0 {
            return Err(ParseError::WaitWithoutDuration);
        }
        return Ok(Command::wait(duration));
    }

    if !is_valid_token(token) {
        return Err(ParseError::InvalidToken(token.to_string()));
    }
    let mut cmd = Command::new(token).with_duration(duration);
    if let Some(arg) = argument {
        cmd = cmd.with_argument(arg);
    }
    cmd.validate()
        .map_err(|_| ParseError::InvalidArgument(argument.unwrap_or_default().to_string()))?;
    Ok(cmd)
}

fn parse_duration(raw: &str, limits: &QueueLimits) -> Result<f64, ParseError> {
    let raw = raw.trim();
    let value: f64 = raw
        .parse()
        .map_err(|_| ParseError::InvalidDuration(raw.to_string()))?;
    if !value.is_finite() || value < 0.0 {
        return Err(ParseError::InvalidDuration(raw.to_string()));
    }
    if value > limits.max_duration_secs {
        return Err(ParseError::DurationTooLong {
            value,
            max: limits.max_duration_secs,
        });
    }
    Ok(value)
}

/// A queued command with its insertion index
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    /// Position in insertion order (counts up across clears)
    pub index: usize,
    /// The command to send
    pub command: Command,
}

/// A queued command that was dispatched, with its outcome
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    /// The entry sent
    pub entry: QueueEntry,
    /// How the device answered
    pub outcome: Outcome,
}

/// The entry a run stopped on
#[derive(Debug)]
pub struct RunFailure {
    /// Entry whose send failed
    pub entry: QueueEntry,
    /// Whether the entry was taken off the queue (it reached the device)
    pub consumed: bool,
    /// Why the send failed
    pub error: SessionError,
    /// Result of the single reconnect attempt, if one was made
    pub reconnect: Option<Result<(), SessionError>>,
}

/// Result of [`CommandQueue::run`]
#[derive(Debug, Default)]
pub struct RunReport {
    /// Entries sent, in order
    pub dispatched: Vec<Dispatched>,
    /// Set if the run stopped early
    pub failure: Option<RunFailure>,
}

impl RunReport {
    /// True if every entry was dispatched
    pub fn completed(&self) -> bool {
        self.failure.is_none()
    }

    /// True if the device rejected any command
    pub fn has_rejections(&self) -> bool {
        self.dispatched
            .iter()
            .any(|d| d.outcome == Outcome::Rejected)
    }
}

/// Ordered buffer of commands awaiting `run`
#[derive(Debug, Default)]
pub struct CommandQueue {
    entries: VecDeque<QueueEntry>,
    next_index: usize,
    limits: QueueLimits,
}

impl CommandQueue {
    /// Create an empty queue with default limits
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty queue with explicit limits
    pub fn with_limits(limits: QueueLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Input limits in force
    pub fn limits(&self) -> &QueueLimits {
        &self.limits
    }

    /// Parse `line` and append it. On error the queue is unchanged.
    pub fn enqueue(&mut self, line: &str) -> Result<&QueueEntry, ParseError> {
        let command = parse_command(line, &self.limits)?;
        Ok(self.push(command))
    }

    /// Append an already built command
    pub fn push(&mut self, command: Command) -> &QueueEntry {
        let index = self.next_index;
        self.next_index += 1;
        self.entries.push_back(QueueEntry { index, command });
        &self.entries[self.entries.len() - 1]
    }

    /// Snapshot of the queued entries in order
    pub fn dry_run(&self) -> Vec<QueueEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of queued entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Send every entry in order.
    ///
    /// Entries leave the queue as they are dispatched, so a failure leaves exactly
    /// the undispatched tail queued for a later `run`. A failure triggers one
    /// reconnect attempt unless it was a cancellation.
    pub async fn run<T: Transport>(&mut self, session: &mut Session<T>) -> RunReport {
        let mut report = RunReport::default();
        while let Some(entry) = self.entries.front().cloned() {
            match session.send(&entry.command).await {
                Ok(outcome) => {
                    self.entries.pop_front();
                    report.dispatched.push(Dispatched { entry, outcome });
                }
                Err(error) => {
                    // NotReady is refused before anything reaches the device
                    let consumed = !matches!(error, SessionError::NotReady(_));
                    if consumed {
                        self.entries.pop_front();
                    }
                    tracing::error!(
                        index = entry.index,
                        error = %error,
                        remaining = self.entries.len(),
                        "queue run stopped"
                    );
                    let reconnect = if matches!(error, SessionError::Cancelled) {
                        None
                    } else {
                        Some(session.reconnect().await)
                    };
                    report.failure = Some(RunFailure {
                        entry,
                        consumed,
                        error,
                        reconnect,
                    });
                    return report;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn limits() -> QueueLimits {
        QueueLimits::default()
    }

    #[test]
    fn test_parse_token_and_duration() {
        assert_eq!(
            parse_command("ksit,3", &limits()).unwrap(),
            Command::new("ksit").with_duration(3.0)
        );
        assert_eq!(
            parse_command("  kbalance , 1.5 ", &limits()).unwrap(),
            Command::new("kbalance").with_duration(1.5)
        );
    }

    #[test]
    fn test_parse_token_only() {
        assert_eq!(parse_command("d", &limits()).unwrap(), Command::new("d"));
    }

    #[test]
    fn test_parse_sleep() {
        assert_eq!(parse_command("sleep,2", &limits()).unwrap(), Command::wait(2.0));
        assert_eq!(
            parse_command("sleep", &limits()),
            Err(ParseError::WaitWithoutDuration)
        );
        assert_eq!(
            parse_command("sleep,0", &limits()),
            Err(ParseError::WaitWithoutDuration)
        );
        assert!(matches!(
            parse_command("sleep now,2", &limits()),
            Err(ParseError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_parse_argument() {
        assert_eq!(
            parse_command("m 0 30,2", &limits()).unwrap(),
            Command::new("m").with_argument("0 30").with_duration(2.0)
        );
    }

    #[test]
    fn test_parse_bad_durations() {
        for line in ["foo,-1", "foo,", "foo,abc", "foo,inf", "foo,NaN", "foo,1,2"] {
            assert!(
                matches!(
                    parse_command(line, &limits()),
                    Err(ParseError::InvalidDuration(_))
                ),
                "{} should be rejected",
                line
            );
        }
        assert_eq!(
            parse_command("foo,301", &limits()),
            Err(ParseError::DurationTooLong {
                value: 301.0,
                max: 300.0
            })
        );
    }

    #[test]
    fn test_parse_bad_tokens() {
        assert_eq!(parse_command("", &limits()), Err(ParseError::Empty));
        assert_eq!(parse_command(",3", &limits()), Err(ParseError::Empty));
        assert!(matches!(
            parse_command("kße,1", &limits()),
            Err(ParseError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_enqueue_preserves_order() {
        let mut queue = CommandQueue::new();
        queue.enqueue("ksit,3").unwrap();
        queue.enqueue("sleep,2").unwrap();
        queue.enqueue("kbalance,1").unwrap();
        let entries = queue.dry_run();
        let indices: Vec<usize> = entries.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(entries[0].command, Command::new("ksit").with_duration(3.0));
        assert_eq!(entries[1].command, Command::wait(2.0));
        assert_eq!(entries[2].command.duration_secs, 1.0);
    }

    #[test]
    fn test_rejected_line_leaves_queue_unchanged() {
        let mut queue = CommandQueue::new();
        queue.enqueue("ksit,3").unwrap();
        assert!(queue.enqueue("foo,-1").is_err());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.dry_run()[0].index, 0);
    }

    #[test]
    fn test_clear() {
        let mut queue = CommandQueue::new();
        queue.enqueue("ksit,3").unwrap();
        queue.enqueue("d").unwrap();
        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.dry_run().is_empty());
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_dry_run_is_non_destructive() {
        let mut queue = CommandQueue::new();
        queue.enqueue("ksit,3").unwrap();
        assert_eq!(queue.dry_run(), queue.dry_run());
        assert_eq!(queue.len(), 1);
    }
}
