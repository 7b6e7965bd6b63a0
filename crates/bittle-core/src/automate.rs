//! Automation scheduler
//!
//! Makes the robot act on its own: wait a random number of minutes, pick a random
//! action from the action set, perform it, repeat until cancelled.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::action_set::{Action, ActionSet};
use crate::config::ConfigError;
use crate::protocol::{Outcome, Session, SessionError, Transport};

/// Scheduler parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    interval_min: u64,
    interval_max: u64,
    act_times: i64,
    max_cycles: Option<u64>,
}

impl SchedulerConfig {
    /// Interval bounds are in minutes and must satisfy `1 <= min <= max`.
    /// `act_times` is how often the chosen action repeats per cycle; zero or less
    /// runs a single cycle once and stops.
    pub fn new(interval_min: u64, interval_max: u64, act_times: i64) -> Result<Self, ConfigError> {
        if interval_min == 0 || interval_min > interval_max {
            return Err(ConfigError::InvalidInterval {
                min: interval_min,
                max: interval_max,
            });
        }
        Ok(Self {
            interval_min,
            interval_max,
            act_times,
            max_cycles: None,
        })
    }

    /// Stop after `cycles` takes
    pub fn with_max_cycles(mut self, cycles: Option<u64>) -> Self {
        self.max_cycles = cycles;
        self
    }

    /// `(min, max)` minutes
    pub fn interval_bounds(&self) -> (u64, u64) {
        (self.interval_min, self.interval_max)
    }

    /// Repetitions per cycle
    pub fn act_times(&self) -> i64 {
        self.act_times
    }

    /// True when the scheduler runs exactly one cycle
    pub fn is_one_shot(&self) -> bool {
        self.act_times <= 0
    }
}

/// Progress reported while the scheduler runs
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// Idling before the next take
    Waiting {
        /// Cycle about to start, counting from 1
        cycle: u64,
        /// Length of the wait
        minutes: u64,
    },
    /// Starting one repetition of an action
    Dispatching {
        /// Current cycle
        cycle: u64,
        /// Action name
        action: String,
        /// Repetition within the cycle, counting from 1
        repetition: u64,
    },
    /// A command was not acknowledged; the action continues
    Unacknowledged {
        /// Token that was sent
        token: String,
        /// `Unacknowledged` or `Rejected`
        outcome: Outcome,
    },
    /// A fault was recovered by reconnecting
    Reconnected {
        /// The fault that aborted the take
        cause: String,
    },
    /// The scheduler stopped
    Finished {
        /// Takes performed
        cycles: u64,
        /// Why it stopped
        reason: StopReason,
    },
}

/// Why the scheduler stopped without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Cancellation was requested
    Cancelled,
    /// `act_times <= 0`: one cycle only
    OneShot,
    /// `max_cycles` reached
    CycleLimit,
}

/// Counters for a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSummary {
    /// Takes started
    pub cycles: u64,
    /// Commands and waits that went through `send`
    pub commands_sent: u64,
    /// Sends that ended unacknowledged or rejected
    pub unacknowledged: u64,
    /// Successful reconnects after a fault
    pub reconnects: u64,
    /// Why the run ended
    pub reason: StopReason,
}

/// Fatal scheduler errors
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// A take faulted and the reconnect that followed failed too
    #[error("Session fault ({cause}); reconnect failed: {reconnect}")]
    ReconnectFailed {
        /// The fault that aborted the take
        cause: SessionError,
        /// Why the reconnect failed
        reconnect: SessionError,
    },
}

/// Randomly timed action player
pub struct Scheduler {
    actions: ActionSet,
    config: SchedulerConfig,
    rng: StdRng,
    events: Option<mpsc::UnboundedSender<SchedulerEvent>>,
}

impl Scheduler {
    /// Create a scheduler over an already validated action set
    pub fn new(actions: ActionSet, config: SchedulerConfig) -> Self {
        Self {
            actions,
            config,
            rng: StdRng::from_entropy(),
            events: None,
        }
    }

    /// Load the action set file; an empty or malformed set is an error here
    pub fn load(path: impl AsRef<Path>, config: SchedulerConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(ActionSet::load(path)?, config))
    }

    /// Use a fixed seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Report progress on `tx`
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<SchedulerEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// The loaded action set
    pub fn actions(&self) -> &ActionSet {
        &self.actions
    }

    fn emit(&self, event: SchedulerEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Draw the next idle wait, uniformly in whole minutes within the bounds
    pub fn next_wait(&mut self) -> Duration {
        let (min, max) = self.config.interval_bounds();
        let minutes = self.rng.gen_range(min..=max);
        Duration::from_secs(minutes.saturating_mul(60))
    }

    /// Run until cancelled (or until the one-shot / cycle limit is reached).
    ///
    /// A faulting send aborts the current take and triggers one reconnect; if that
    /// fails the scheduler stops with an error and the session stays `Faulted`.
    /// Cancellation during the idle wait leaves the session as it was, so the caller
    /// can still [`park`](Session::park) the robot.
    pub async fn run<T: Transport>(
        &mut self,
        session: &mut Session<T>,
    ) -> Result<SchedulerSummary, SchedulerError> {
        let cancel = session.cancellation().clone();
        let mut summary = SchedulerSummary {
            cycles: 0,
            commands_sent: 0,
            unacknowledged: 0,
            reconnects: 0,
            reason: StopReason::Cancelled,
        };

        loop {
            let cycle = summary.cycles + 1;
            let wait = self.next_wait();
            let minutes = wait.as_secs() / 60;
            tracing::info!(cycle, minutes, "idle");
            self.emit(SchedulerEvent::Waiting { cycle, minutes });

            let slept = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                _ = tokio::time::sleep(wait) => true,
            };
            if !slept {
                return Ok(self.finish(summary, StopReason::Cancelled));
            }

            summary.cycles = cycle;
            let action = self.actions.pick(&mut self.rng).clone();
            tracing::info!(cycle, action = %action.name, "act");

            match self.perform(session, &action, cycle, &mut summary).await {
                Ok(()) => {}
                Err(SessionError::Cancelled) => {
                    return Ok(self.finish(summary, StopReason::Cancelled))
                }
                Err(cause) => {
                    tracing::error!(error = %cause, action = %action.name, "take aborted, reconnecting");
                    match session.reconnect().await {
                        Ok(()) => {
                            summary.reconnects += 1;
                            self.emit(SchedulerEvent::Reconnected {
                                cause: cause.to_string(),
                            });
                        }
                        Err(SessionError::Cancelled) => {
                            return Ok(self.finish(summary, StopReason::Cancelled))
                        }
                        Err(reconnect) => {
                            return Err(SchedulerError::ReconnectFailed { cause, reconnect });
                        }
                    }
                }
            }

            if self.config.is_one_shot() {
                return Ok(self.finish(summary, StopReason::OneShot));
            }
            if self.config.max_cycles.is_some_and(|max| summary.cycles >= max) {
                return Ok(self.finish(summary, StopReason::CycleLimit));
            }
        }
    }

    /// Perform `action` `act_times` times, stopping at the first faulting send
    async fn perform<T: Transport>(
        &self,
        session: &mut Session<T>,
        action: &Action,
        cycle: u64,
        summary: &mut SchedulerSummary,
    ) -> Result<(), SessionError> {
        let repetitions = self.config.act_times.max(1) as u64;
        for repetition in 1..=repetitions {
            self.emit(SchedulerEvent::Dispatching {
                cycle,
                action: action.name.clone(),
                repetition,
            });
            for cmd in &action.commands {
                let outcome = session.send(cmd).await?;
                summary.commands_sent += 1;
                if !outcome.is_success() {
                    summary.unacknowledged += 1;
                    self.emit(SchedulerEvent::Unacknowledged {
                        token: cmd.token.clone(),
                        outcome,
                    });
                }
            }
        }
        Ok(())
    }

    fn finish(&self, mut summary: SchedulerSummary, reason: StopReason) -> SchedulerSummary {
        summary.reason = reason;
        tracing::info!(cycles = summary.cycles, ?reason, "scheduler stopped");
        self.emit(SchedulerEvent::Finished {
            cycles: summary.cycles,
            reason,
        });
        summary
    }
}
