//! Interactive training prompt
//!
//! Reads operator lines, queues commands and replays them on `run`. Input and
//! output are injected so the loop can be driven from tests.

use std::io::{self, Write};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use super::queue::{CommandQueue, ParseError, QueueLimits, RunReport};
use crate::protocol::{Command, Outcome, Session, Transport};

/// Prompt shown before each input line
pub const PROMPT: &str = "BOW-WOW?>>> ";

/// One recognized operator line
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    /// Show the queue
    DryRun,
    /// Send the queue
    Run,
    /// Empty the queue
    Clear,
    /// End the session
    Exit,
    /// Print usage
    Help,
    /// Queue a command
    Enqueue(Command),
}

impl ReplCommand {
    /// Parse a non-empty operator line
    pub fn parse(line: &str, limits: &QueueLimits) -> Result<Self, ParseError> {
        match line.trim() {
            "dry-run" => Ok(ReplCommand::DryRun),
            "run" => Ok(ReplCommand::Run),
            "clear" => Ok(ReplCommand::Clear),
            "exit" | "quit" => Ok(ReplCommand::Exit),
            "help" => Ok(ReplCommand::Help),
            other => super::queue::parse_command(other, limits).map(ReplCommand::Enqueue),
        }
    }
}

/// How a training session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplExit {
    /// `exit` or `quit`
    Quit,
    /// Input closed
    EndOfInput,
    /// Input limit reached
    InputLimit,
    /// Cancellation requested
    Cancelled,
}

/// Counters for a finished training session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplSummary {
    /// Non-empty lines read
    pub inputs: usize,
    /// `run`s that sent something
    pub runs: usize,
    /// How the prompt ended
    pub exit: ReplExit,
}

/// Training prompt over a command queue
pub struct TrainingRepl<W: Write> {
    queue: CommandQueue,
    out: W,
}

impl<W: Write> TrainingRepl<W> {
    /// Create a prompt writing to `out`
    pub fn new(limits: QueueLimits, out: W) -> Self {
        Self {
            queue: CommandQueue::with_limits(limits),
            out,
        }
    }

    /// The underlying queue
    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Give back the output writer
    pub fn into_output(self) -> W {
        self.out
    }

    /// Print usage
    pub fn print_usage(&mut self) -> io::Result<()> {
        let max = self.queue.limits().max_duration_secs;
        writeln!(self.out, "----------------------------")?;
        writeln!(self.out, "Ex) Sit 3sec, wait a 2sec.")?;
        writeln!(self.out, ">>> ksit,3")?;
        writeln!(self.out, ">>> sleep,2")?;
        writeln!(self.out, ">>> run")?;
        writeln!(self.out, "----------------------------")?;
        writeln!(self.out, "---Available commands---")?;
        writeln!(self.out, "[dry-run] Show the queued command list.")?;
        writeln!(self.out, "[run] Send all queued commands to the robot and clear them.")?;
        writeln!(self.out, "[clear] Clear all queued commands.")?;
        writeln!(self.out, "[help] Show this message.")?;
        writeln!(self.out, "[exit] Quit the training.")?;
        writeln!(self.out, "[quit] Quit the training.")?;
        writeln!(self.out, "Durations are seconds, 0 to {}.", max)?;
        writeln!(self.out, "----------------------------")
    }

    /// Read and handle lines until exit, end of input, the input limit or cancellation
    pub async fn run<R, T>(&mut self, input: R, session: &mut Session<T>) -> io::Result<ReplSummary>
    where
        R: AsyncBufRead + Unpin,
        T: Transport,
    {
        let cancel = session.cancellation().clone();
        let mut lines = input.lines();
        let mut summary = ReplSummary {
            inputs: 0,
            runs: 0,
            exit: ReplExit::EndOfInput,
        };

        loop {
            write!(self.out, "{}", PROMPT)?;
            self.out.flush()?;

            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    summary.exit = ReplExit::Cancelled;
                    break;
                }
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                writeln!(self.out)?;
                summary.exit = ReplExit::EndOfInput;
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            summary.inputs += 1;
            let limits = *self.queue.limits();
            match ReplCommand::parse(line, &limits) {
                Ok(ReplCommand::Exit) => {
                    summary.exit = ReplExit::Quit;
                    break;
                }
                Ok(ReplCommand::Help) => self.print_usage()?,
                Ok(ReplCommand::Clear) => {
                    self.queue.clear();
                    writeln!(self.out, "Cleared all commands.")?;
                }
                Ok(ReplCommand::DryRun) => self.show_queue()?,
                Ok(ReplCommand::Run) => {
                    if self.queue.is_empty() {
                        writeln!(self.out, "There is no command.")?;
                    } else {
                        summary.runs += 1;
                        let report = self.queue.run(session).await;
                        self.show_report(&report)?;
                        if let Some(failure) = &report.failure {
                            if matches!(failure.error, crate::protocol::SessionError::Cancelled) {
                                summary.exit = ReplExit::Cancelled;
                                break;
                            }
                        }
                    }
                }
                Ok(ReplCommand::Enqueue(cmd)) => {
                    let entry = self.queue.push(cmd);
                    writeln!(self.out, "Added command as {}sec", entry.command)?;
                }
                Err(e) => {
                    tracing::debug!(line, error = %e, "rejected input");
                    writeln!(self.out, "Failed to add a command: {}", e)?;
                    writeln!(
                        self.out,
                        "Use token[,duration], e.g. ksit,3 or sleep,2 (type 'help' for more)."
                    )?;
                }
            }

            if summary.inputs >= limits.max_inputs {
                writeln!(self.out, "Input limit of {} reached.", limits.max_inputs)?;
                summary.exit = ReplExit::InputLimit;
                break;
            }
        }

        if summary.exit != ReplExit::Cancelled {
            writeln!(self.out, "Bye!")?;
        }
        Ok(summary)
    }

    fn show_queue(&mut self) -> io::Result<()> {
        writeln!(self.out, "Currently, the command is:")?;
        if self.queue.is_empty() {
            return writeln!(self.out, "Empty");
        }
        for entry in self.queue.dry_run() {
            writeln!(self.out, "{}", entry.command)?;
        }
        Ok(())
    }

    fn show_report(&mut self, report: &RunReport) -> io::Result<()> {
        for d in &report.dispatched {
            let status = match d.outcome {
                Outcome::Acknowledged => "ok",
                Outcome::Waited => "waited",
                Outcome::Unacknowledged => "no echo",
                Outcome::Rejected => "rejected",
            };
            writeln!(self.out, "[{}] {} ... {}", d.entry.index, d.entry.command, status)?;
        }
        if report.has_rejections() {
            writeln!(self.out, "Something went wrong in the commands.")?;
        }
        if let Some(failure) = &report.failure {
            writeln!(
                self.out,
                "[{}] {} ... failed: {}",
                failure.entry.index, failure.entry.command, failure.error
            )?;
            match &failure.reconnect {
                Some(Ok(())) => writeln!(self.out, "Reconnected to the robot.")?,
                Some(Err(e)) => writeln!(self.out, "Reconnect failed: {}", e)?,
                None => {}
            }
            writeln!(
                self.out,
                "{} command(s) left in the queue; type 'run' to retry or 'clear' to drop them.",
                self.queue.len()
            )?;
        }
        Ok(())
    }
}
