//! Robot commands
//!
//! A command is an opaque ASCII token (Bittle skill names such as `ksit`, or single
//! letters such as `d`) with an optional argument and a settle duration. A command
//! with no token is a pure wait.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Literal used in input lines and action files for a pure wait
pub const SLEEP_MARKER: &str = "sleep";

/// A single command to dispatch through a [`Session`](super::Session)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Token sent to the device; empty for a pure wait
    pub token: String,
    /// Optional argument, sent after the token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argument: Option<String>,
    /// Seconds to wait after sending before the next command
    #[serde(default)]
    pub duration_secs: f64,
}

impl Command {
    /// Create a command with no argument and no settle time
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            argument: None,
            duration_secs: 0.0,
        }
    }

    /// Create a pure wait of `secs` seconds
    pub fn wait(secs: f64) -> Self {
        Self {
            token: String::new(),
            argument: None,
            duration_secs: secs,
        }
    }

    /// Set the argument
    pub fn with_argument(mut self, argument: impl Into<String>) -> Self {
        self.argument = Some(argument.into());
        self
    }

    /// Set the settle duration in seconds
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = secs;
        self
    }

    /// Check if this command only waits and sends nothing
    pub fn is_wait(&self) -> bool {
        self.token.is_empty()
    }

    /// Settle duration as a [`Duration`]; invalid values collapse to zero
    pub fn settle(&self) -> Duration {
        if self.duration_secs.is_finite() && self.duration_secs > 0.0 {
            Duration::from_secs_f64(self.duration_secs)
        } else {
            Duration::ZERO
        }
    }

    /// Check the command invariants, returning a description of the first violation
    pub fn validate(&self) -> Result<(), String> {
        if !self.duration_secs.is_finite() || self.duration_secs < 0.0 {
            return Err(format!("invalid duration {}", self.duration_secs));
        }
        if self.is_wait() {
            if self.argument.is_some() {
                return Err("a wait cannot carry an argument".to_string());
            }
            if self.duration_secs <= 0.0 {
                return Err("a wait needs a duration greater than zero".to_string());
            }
            return Ok(());
        }
        if !is_valid_token(&self.token) {
            return Err(format!("invalid token '{}'", self.token));
        }
        if let Some(arg) = &self.argument {
            if arg.is_empty() || !arg.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
                return Err(format!("invalid argument '{}'", arg));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_wait() {
            write!(f, "cmd:{}, duration:{}", SLEEP_MARKER, self.duration_secs)
        } else {
            write!(f, "cmd:{}", self.token)?;
            if let Some(arg) = &self.argument {
                write!(f, " {}", arg)?;
            }
            write!(f, ", duration:{}", self.duration_secs)
        }
    }
}

/// Tokens are non-empty printable ASCII without whitespace or commas
pub fn is_valid_token(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_graphic() && c != ',')
}
