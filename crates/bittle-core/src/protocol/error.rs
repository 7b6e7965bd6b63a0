//! Protocol errors

use std::time::Duration;
use thiserror::Error;

/// Errors reported by a [`Transport`](super::Transport), passed upward verbatim
#[derive(Error, Debug)]
pub enum TransportError {
    /// The port could not be opened
    #[error("Serial port '{port}' unavailable: {reason}")]
    PortUnavailable {
        /// Port name
        port: String,
        /// OS error text
        reason: String,
    },

    /// No complete line arrived in time
    #[error("Read timed out")]
    Timeout,

    /// The OS rejected a write
    #[error("Write failed: {0}")]
    Write(#[source] std::io::Error),

    /// The OS rejected a read, or the port hung up
    #[error("Read failed: {0}")]
    Read(#[source] std::io::Error),

    /// Used before `open` or after `close`
    #[error("Port is not open")]
    NotOpen,
}

/// Errors that can occur while driving a [`Session`](super::Session)
#[derive(Error, Debug)]
pub enum SessionError {
    /// The port could not be opened
    #[error("Serial port '{port}' unavailable: {reason}")]
    PortUnavailable {
        /// Port name
        port: String,
        /// OS error text
        reason: String,
    },

    /// No ready prompt within the handshake timeout
    #[error("Device did not signal ready within {0:?}")]
    HandshakeTimeout(Duration),

    /// Writing a command failed
    #[error("Write to device failed: {0}")]
    Write(String),

    /// `send` outside the `Ready` state
    #[error("Session is not ready (state: {0:?})")]
    NotReady(super::SessionState),

    /// `connect` while `Ready`
    #[error("Already connected")]
    AlreadyConnected,

    /// Too many sends in a row went unacknowledged or were rejected
    #[error("{0} consecutive commands went unacknowledged")]
    TooManyUnacknowledged(u32),

    /// Any other transport failure
    #[error("Transport error: {0}")]
    Transport(TransportError),

    /// A wait was cancelled; the port has been released
    #[error("Cancelled")]
    Cancelled,
}
