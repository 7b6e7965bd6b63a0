//! Scripted transport for testing without a robot
//!
//! `MockTransport` is cheap to clone; clones share state, so a test can hand one
//! clone to a [`Session`](super::Session) and inspect the other.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use super::{Transport, TransportError};

/// A line written to the mock, with the (virtual) time it was written
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenLine {
    /// Line content without the terminator
    pub line: String,
    /// When the write happened
    pub at: Instant,
}

#[derive(Debug, Default)]
struct MockState {
    open: bool,
    open_count: usize,
    close_count: usize,
    boot_lines: Vec<String>,
    incoming: VecDeque<String>,
    written: Vec<WrittenLine>,
    echo: bool,
    replies: VecDeque<Vec<String>>,
    open_failures: usize,
    write_failures: VecDeque<usize>,
}

/// In-memory transport with scripted device behaviour
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// A device that boots straight to the ready prompt and echoes every command
    pub fn bittle() -> Self {
        let mock = Self::default();
        mock.set_boot_lines(&["* Start *", "Initialize I2C", "Enable DMP", "DMP ready!"]);
        mock.set_echo(true);
        mock
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A poisoned lock only happens if a test already panicked
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Lines the device prints every time the port is opened
    pub fn set_boot_lines(&self, lines: &[&str]) {
        self.lock().boot_lines = lines.iter().map(|s| s.to_string()).collect();
    }

    /// Echo each written line back (default off)
    pub fn set_echo(&self, echo: bool) {
        self.lock().echo = echo;
    }

    /// Queue a line as if the device had printed it
    pub fn push_line(&self, line: &str) {
        self.lock().incoming.push_back(line.to_string());
    }

    /// Script the reply to the next write, replacing the echo for that write.
    /// An empty list means the device stays silent.
    pub fn push_reply(&self, lines: &[&str]) {
        self.lock()
            .replies
            .push_back(lines.iter().map(|s| s.to_string()).collect());
    }

    /// Fail the next `n` calls to `open`
    pub fn fail_next_opens(&self, n: usize) {
        self.lock().open_failures = n;
    }

    /// Fail the write with the given zero-based index (counted across the mock's life)
    pub fn fail_write_at(&self, index: usize) {
        self.lock().write_failures.push_back(index);
    }

    /// Lines written so far
    pub fn written(&self) -> Vec<WrittenLine> {
        self.lock().written.clone()
    }

    /// Written line contents only
    pub fn written_lines(&self) -> Vec<String> {
        self.lock().written.iter().map(|w| w.line.clone()).collect()
    }

    /// Whether the handle is currently held
    pub fn is_held(&self) -> bool {
        self.lock().open
    }

    /// Number of successful opens
    pub fn open_count(&self) -> usize {
        self.lock().open_count
    }

    /// Number of closes that released a held handle
    pub fn close_count(&self) -> usize {
        self.lock().close_count
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self, port_name: &str, _baud_rate: u32) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.open {
            state.open = false;
            state.close_count += 1;
        }
        if state.open_failures > 0 {
            state.open_failures -= 1;
            return Err(TransportError::PortUnavailable {
                port: port_name.to_string(),
                reason: "mock open failure".to_string(),
            });
        }
        state.open = true;
        state.open_count += 1;
        state.incoming.clear();
        let boot = state.boot_lines.clone();
        state.incoming.extend(boot);
        Ok(())
    }

    async fn write_line(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = self.lock();
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        let index = state.written.len();
        let line = String::from_utf8_lossy(bytes)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        state.written.push(WrittenLine {
            line: line.clone(),
            at: Instant::now(),
        });
        if let Some(pos) = state.write_failures.iter().position(|i| *i == index) {
            state.write_failures.remove(pos);
            return Err(TransportError::Write(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock write failure",
            )));
        }
        if let Some(reply) = state.replies.pop_front() {
            state.incoming.extend(reply);
        } else if state.echo {
            state.incoming.push_back(line);
        }
        Ok(())
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<String, TransportError> {
        let next = {
            let mut state = self.lock();
            if !state.open {
                return Err(TransportError::NotOpen);
            }
            state.incoming.pop_front()
        };
        match next {
            Some(line) => Ok(line),
            None => {
                tokio::time::sleep(timeout).await;
                Err(TransportError::Timeout)
            }
        }
    }

    fn close(&mut self) {
        let mut state = self.lock();
        if state.open {
            state.open = false;
            state.close_count += 1;
        }
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }
}
