//! Serial Protocol Communication
//!
//! Implements the line-oriented ASCII protocol spoken by the Bittle's NyBoard:
//! commands go out as short tokens terminated by a newline, and the board answers
//! with echoes, a ready prompt after boot, and free-form diagnostic chatter.

pub mod codec;
pub mod commands;
mod error;
pub mod mock;
pub mod serial;
mod session;
mod transport;

pub use codec::{LineCodec, ResponseKind};
pub use commands::Command;
pub use error::{SessionError, TransportError};
pub use mock::MockTransport;
pub use serial::{list_ports, PortInfo, SerialTransport};
pub use session::{Outcome, Session, SessionConfig, SessionState};
pub use transport::Transport;

/// Default baud rate of the NyBoard
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default time to wait for a command echo in milliseconds
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 1000;

/// Default time the board gets to boot and print its prompt, in seconds
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Default number of consecutive unacknowledged sends tolerated
pub const DEFAULT_UNACKNOWLEDGED_LIMIT: u32 = 3;

/// Ready prompt printed by the NyBoard once its IMU is initialised
pub const DEFAULT_PROMPT: &str = "DMP ready!";

/// Default prompt pattern accepted in settings files
pub const DEFAULT_PROMPT_PATTERN: &str = r"^DMP ready!$";

/// Longest line buffered before it is handed up without a terminator
pub const MAX_LINE_LENGTH: usize = 512;
