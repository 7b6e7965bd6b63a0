//! Action sets
//!
//! An action set is a pre-authored list of named choreographies, each an ordered
//! sequence of commands. The automation scheduler loads one at startup and picks
//! from it at random.
//!
//! File format (JSON):
//!
//! ```json
//! [
//!   { "name": "sit and rest",
//!     "commands": [ { "cmd": "ksit", "duration": 5 }, { "cmd": "sleep", "duration": 2 }, { "cmd": "d" } ] }
//! ]
//! ```

use rand::Rng;
use serde::Deserialize;
use std::path::Path;

use crate::config::ConfigError;
use crate::protocol::commands::SLEEP_MARKER;
use crate::protocol::Command;

/// Longest settle duration accepted in an action set, in seconds
pub const MAX_ACTION_DURATION_SECS: f64 = 300.0;

/// A command as written in the action file
#[derive(Debug, Clone, Deserialize)]
struct RawCommand {
    #[serde(default)]
    cmd: String,
    #[serde(default)]
    arg: Option<String>,
    #[serde(default)]
    duration: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct RawAction {
    name: String,
    #[serde(default)]
    commands: Vec<RawCommand>,
}

/// A named, ordered sequence of commands
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    /// Human-readable name
    pub name: String,
    /// Commands to dispatch in order
    pub commands: Vec<Command>,
}

impl Action {
    /// Total settle time of one run of this action, in seconds
    pub fn total_duration_secs(&self) -> f64 {
        self.commands.iter().map(|c| c.duration_secs).sum()
    }
}

/// A validated, non-empty set of actions
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSet {
    actions: Vec<Action>,
}

impl ActionSet {
    /// Build a set from already constructed actions, validating every command
    pub fn new(actions: Vec<Action>) -> Result<Self, ConfigError> {
        if actions.is_empty() {
            return Err(ConfigError::EmptyActionSet);
        }
        for (idx, action) in actions.iter().enumerate() {
            if action.name.trim().is_empty() {
                return Err(ConfigError::InvalidAction {
                    index: idx,
                    reason: "empty name".to_string(),
                });
            }
            if action.commands.is_empty() {
                return Err(ConfigError::InvalidAction {
                    index: idx,
                    reason: format!("'{}' has no commands", action.name),
                });
            }
            for (cmd_idx, cmd) in action.commands.iter().enumerate() {
                let problem = cmd.validate().err().or_else(|| {
                    (cmd.duration_secs > MAX_ACTION_DURATION_SECS).then(|| {
                        format!(
                            "duration {} exceeds {}s",
                            cmd.duration_secs, MAX_ACTION_DURATION_SECS
                        )
                    })
                });
                if let Some(reason) = problem {
                    return Err(ConfigError::InvalidAction {
                        index: idx,
                        reason: format!("'{}' command {}: {}", action.name, cmd_idx, reason),
                    });
                }
            }
        }
        Ok(Self { actions })
    }

    /// Parse an action set from JSON
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: Vec<RawAction> =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let actions = raw
            .into_iter()
            .map(|a| Action {
                name: a.name,
                commands: a.commands.into_iter().map(Command::from).collect(),
            })
            .collect();
        Self::new(actions)
    }

    /// Load an action set file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let set = Self::from_json(&json)?;
        tracing::info!(path = %path.display(), actions = set.len(), "action set loaded");
        Ok(set)
    }

    /// All actions in file order
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Number of actions
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Always false; an empty set is rejected at construction
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Pick an action uniformly at random
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> &Action {
        &self.actions[rng.gen_range(0..self.actions.len())]
    }

    /// Human-readable summary, one line per action
    pub fn summarize(&self) -> String {
        let mut summary = format!("Action set: {} action(s)\n", self.actions.len());
        for action in &self.actions {
            summary.push_str(&format!(
                "  {} ({} command(s), {}s)\n",
                action.name,
                action.commands.len(),
                action.total_duration_secs()
            ));
        }
        summary
    }
}

impl From<RawCommand> for Command {
    fn from(raw: RawCommand) -> Self {
        let token = raw.cmd.trim();
        let token = if token == SLEEP_MARKER { "" } else { token };
        Command {
            token: token.to_string(),
            argument: raw.arg,
            duration_secs: raw.duration,
        }
    }
}
