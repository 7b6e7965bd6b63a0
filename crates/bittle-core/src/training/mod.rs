//! Training mode
//!
//! Build a choreography line by line, check it with `dry-run`, then send it with `run`.

mod queue;
mod repl;

pub use queue::{
    parse_command, CommandQueue, Dispatched, ParseError, QueueEntry, QueueLimits, RunFailure,
    RunReport,
};
pub use repl::{ReplCommand, ReplExit, ReplSummary, TrainingRepl, PROMPT};
