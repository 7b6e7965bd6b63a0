//! Settings file
//!
//! `bittle.toml` holds the serial port, automation bounds, training limits and the
//! log level. Every component receives plain parameters built from it; none reads
//! the file itself.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::automate::SchedulerConfig;
use crate::protocol::{
    Command, LineCodec, SessionConfig, DEFAULT_BAUD_RATE, DEFAULT_HANDSHAKE_TIMEOUT_SECS,
    DEFAULT_PROMPT_PATTERN, DEFAULT_RESPONSE_TIMEOUT_MS, DEFAULT_UNACKNOWLEDGED_LIMIT,
};
use crate::training::QueueLimits;

/// Configuration errors; all are fatal at startup
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// TOML or JSON syntax or type error
    #[error("Malformed configuration: {0}")]
    Parse(String),

    /// An action set without actions
    #[error("Action set is empty")]
    EmptyActionSet,

    /// An action failed validation
    #[error("Action {index}: {reason}")]
    InvalidAction {
        /// Position of the action in the file
        index: usize,
        /// What is wrong with it
        reason: String,
    },

    /// Scheduler interval bounds out of order or zero
    #[error("Invalid interval bounds: min {min} max {max} (need 1 <= min <= max)")]
    InvalidInterval {
        /// Lower bound in minutes
        min: u64,
        /// Upper bound in minutes
        max: u64,
    },

    /// A setting out of range
    #[error("Invalid setting {key}: {reason}")]
    Invalid {
        /// Dotted setting name
        key: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// `[serial]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Port name; discovered when unset
    pub port: Option<String>,
    /// Baud rate
    pub baud_rate: u32,
    /// Seconds to wait for the ready prompt
    pub handshake_timeout_secs: u64,
    /// Open + handshake attempts per connect
    pub handshake_attempts: u32,
    /// Seconds between handshake attempts
    pub retry_interval_secs: u64,
    /// Milliseconds to wait for an echo
    pub response_timeout_ms: u64,
    /// Consecutive unacknowledged sends tolerated
    pub unacknowledged_limit: u32,
    /// Floor for command settle times, in seconds
    pub min_settle_secs: f64,
    /// Regex matching the ready prompt
    pub prompt_pattern: String,
    /// Lines that mean the device rejected a command
    pub rejection_lines: Vec<String>,
    /// Token sent when parking; empty or unset disables it
    pub rest_command: Option<String>,
    /// Settle time of the rest command, in seconds
    pub rest_duration_secs: f64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
            handshake_attempts: 1,
            retry_interval_secs: 5,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            unacknowledged_limit: DEFAULT_UNACKNOWLEDGED_LIMIT,
            min_settle_secs: 0.0,
            prompt_pattern: DEFAULT_PROMPT_PATTERN.to_string(),
            rejection_lines: vec!["wrong key!".to_string()],
            rest_command: Some("d".to_string()),
            rest_duration_secs: 3.0,
        }
    }
}

/// `[automate]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomateSettings {
    /// Action-set JSON file
    pub actions: Option<PathBuf>,
    /// Repetitions per take; zero or less means one take only
    pub act_times: i64,
    /// Shortest idle wait, in minutes
    pub interval_min: u64,
    /// Longest idle wait, in minutes
    pub interval_max: u64,
    /// Stop after this many takes
    pub max_cycles: Option<u64>,
}

impl Default for AutomateSettings {
    fn default() -> Self {
        Self {
            actions: None,
            act_times: 3,
            interval_min: 3,
            interval_max: 5,
            max_cycles: None,
        }
    }
}

/// `[training]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// Input lines accepted per session
    pub max_inputs: usize,
    /// Longest accepted duration, in seconds
    pub max_duration_secs: f64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        let limits = QueueLimits::default();
        Self {
            max_inputs: limits.max_inputs,
            max_duration_secs: limits.max_duration_secs,
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Whole settings file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `[serial]`
    pub serial: SerialSettings,
    /// `[automate]`
    pub automate: AutomateSettings,
    /// `[training]`
    pub training: TrainingSettings,
    /// `[logging]`
    pub logging: LoggingSettings,
}

impl Settings {
    /// Default location: `<config dir>/bittle/bittle.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("bittle").join("bittle.toml"))
    }

    /// Load settings; a missing file yields defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "settings file not found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let settings = Self::from_toml(&text)?;
        tracing::debug!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.serial;
        if s.baud_rate == 0 {
            return Err(ConfigError::Invalid {
                key: "serial.baud_rate",
                reason: "must be greater than zero".to_string(),
            });
        }
        if !s.min_settle_secs.is_finite() || s.min_settle_secs < 0.0 {
            return Err(ConfigError::Invalid {
                key: "serial.min_settle_secs",
                reason: format!("{} is not a non-negative number", s.min_settle_secs),
            });
        }
        if !s.rest_duration_secs.is_finite() || s.rest_duration_secs < 0.0 {
            return Err(ConfigError::Invalid {
                key: "serial.rest_duration_secs",
                reason: format!("{} is not a non-negative number", s.rest_duration_secs),
            });
        }
        self.codec()?;
        let a = &self.automate;
        if a.interval_min == 0 || a.interval_min > a.interval_max {
            return Err(ConfigError::InvalidInterval {
                min: a.interval_min,
                max: a.interval_max,
            });
        }
        let t = &self.training;
        if !t.max_duration_secs.is_finite() || t.max_duration_secs <= 0.0 {
            return Err(ConfigError::Invalid {
                key: "training.max_duration_secs",
                reason: format!("{} is not a positive number", t.max_duration_secs),
            });
        }
        Ok(())
    }

    /// Session parameters for `port`
    pub fn session_config(&self, port: impl Into<String>) -> SessionConfig {
        let s = &self.serial;
        SessionConfig {
            port_name: port.into(),
            baud_rate: s.baud_rate,
            handshake_timeout: Duration::from_secs(s.handshake_timeout_secs),
            handshake_attempts: s.handshake_attempts.max(1),
            retry_interval: Duration::from_secs(s.retry_interval_secs),
            response_timeout: Duration::from_millis(s.response_timeout_ms),
            unacknowledged_limit: s.unacknowledged_limit,
            min_settle: Duration::from_secs_f64(s.min_settle_secs.max(0.0)),
            rest_command: s
                .rest_command
                .as_deref()
                .filter(|c| !c.is_empty())
                .map(|c| Command::new(c).with_duration(s.rest_duration_secs)),
        }
    }

    /// Response codec built from the prompt pattern and rejection lines
    pub fn codec(&self) -> Result<LineCodec, ConfigError> {
        LineCodec::new(
            &self.serial.prompt_pattern,
            self.serial.rejection_lines.clone(),
        )
        .map_err(|e| ConfigError::Invalid {
            key: "serial.prompt_pattern",
            reason: e.to_string(),
        })
    }

    /// Scheduler parameters
    pub fn scheduler_config(&self) -> Result<SchedulerConfig, ConfigError> {
        let a = &self.automate;
        SchedulerConfig::new(a.interval_min, a.interval_max, a.act_times)
            .map(|c| c.with_max_cycles(a.max_cycles))
    }

    /// Training queue limits
    pub fn queue_limits(&self) -> QueueLimits {
        QueueLimits {
            max_inputs: self.training.max_inputs,
            max_duration_secs: self.training.max_duration_secs,
        }
    }
}
