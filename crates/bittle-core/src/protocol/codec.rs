//! Command framing and response classification
//!
//! Outgoing commands are framed as `token[ argument]\n`. Incoming lines are
//! classified purely textually; the device prints boot diagnostics and other
//! chatter that must never be mistaken for an error.

use regex::Regex;

use super::{Command, DEFAULT_PROMPT};

/// Separator between token and argument
pub const ARGUMENT_DELIMITER: u8 = b' ';

/// Line terminator expected by the device
pub const LINE_TERMINATOR: u8 = b'\n';

/// Default device lines that report a rejected command
pub const DEFAULT_REJECTION_LINES: &[&str] = &["wrong key!"];

/// Classification of one line received from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// The device is ready for the next command
    Prompt,
    /// The device repeated the command just sent
    Echo,
    /// The device reported that it did not understand the command
    Rejected,
    /// Anything else
    Unrecognized,
}

#[derive(Debug, Clone)]
enum PromptMatcher {
    Exact(String),
    Pattern(Regex),
}

impl PromptMatcher {
    fn matches(&self, line: &str) -> bool {
        match self {
            PromptMatcher::Exact(prompt) => line == prompt,
            PromptMatcher::Pattern(re) => re.is_match(line),
        }
    }
}

/// Encodes commands and classifies device lines
#[derive(Debug, Clone)]
pub struct LineCodec {
    prompt: PromptMatcher,
    rejections: Vec<String>,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self {
            prompt: PromptMatcher::Exact(DEFAULT_PROMPT.to_string()),
            rejections: DEFAULT_REJECTION_LINES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl LineCodec {
    /// Create a codec from a prompt pattern (a regex) and a list of rejection lines
    pub fn new(prompt_pattern: &str, rejections: Vec<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            prompt: PromptMatcher::Pattern(Regex::new(prompt_pattern)?),
            rejections,
        })
    }

    /// Frame a command for the wire. Pure waits encode to no bytes.
    pub fn encode(&self, cmd: &Command) -> Vec<u8> {
        if cmd.is_wait() {
            return Vec::new();
        }
        let mut bytes = cmd.token.as_bytes().to_vec();
        if let Some(arg) = &cmd.argument {
            bytes.push(ARGUMENT_DELIMITER);
            bytes.extend_from_slice(arg.as_bytes());
        }
        bytes.push(LINE_TERMINATOR);
        bytes
    }

    /// Classify a received line against the token that was just sent.
    ///
    /// Precedence is prompt, rejection, echo. An empty line or a line that matches
    /// nothing is `Unrecognized`.
    pub fn classify(&self, line: &str, sent_token: Option<&str>) -> ResponseKind {
        let line = line.trim_end_matches(['\r', '\n', ' ', '\t']).trim_start();
        if line.is_empty() {
            return ResponseKind::Unrecognized;
        }
        if self.prompt.matches(line) {
            return ResponseKind::Prompt;
        }
        if self.rejections.iter().any(|r| r == line) {
            return ResponseKind::Rejected;
        }
        match sent_token {
            Some(token) if !token.is_empty() && line.contains(token) => ResponseKind::Echo,
            _ => ResponseKind::Unrecognized,
        }
    }
}
