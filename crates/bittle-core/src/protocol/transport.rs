//! Byte-level transport
//!
//! A transport owns the OS handle exclusively. It does no retries and no
//! interpretation: errors are reported to the session as they happen.

use async_trait::async_trait;
use std::time::Duration;

use super::TransportError;

/// Line-oriented byte transport to the device
#[async_trait]
pub trait Transport: Send {
    /// Open the port. Opening an already open transport reopens it.
    async fn open(&mut self, port_name: &str, baud_rate: u32) -> Result<(), TransportError>;

    /// Write an already framed line and flush it
    async fn write_line(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Read one line (terminator stripped), failing with `Timeout` if none arrives in time
    async fn read_line(&mut self, timeout: Duration) -> Result<String, TransportError>;

    /// Release the handle. Idempotent.
    fn close(&mut self);

    /// Check if the handle is held
    fn is_open(&self) -> bool;
}
