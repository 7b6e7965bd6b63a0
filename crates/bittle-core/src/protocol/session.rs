//! Session management
//!
//! Handles the connection lifecycle and command dispatch to the robot.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{
    Command, LineCodec, ResponseKind, SessionError, Transport, TransportError, DEFAULT_BAUD_RATE,
    DEFAULT_HANDSHAKE_TIMEOUT_SECS, DEFAULT_RESPONSE_TIMEOUT_MS, DEFAULT_UNACKNOWLEDGED_LIMIT,
};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No handle held
    Disconnected,
    /// Port open, waiting for the ready prompt
    Connecting,
    /// Prompt seen, commands accepted
    Ready,
    /// Handshake or transport failure; needs a reconnect
    Faulted,
}

/// Result of a dispatched command that did not fault the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The device echoed the command or printed its prompt
    Acknowledged,
    /// A pure wait; nothing was sent
    Waited,
    /// No echo arrived within the response timeout
    Unacknowledged,
    /// The device reported it did not understand the command
    Rejected,
}

impl Outcome {
    /// True when the device confirmed the command (or none was sent)
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Acknowledged | Outcome::Waited)
    }
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Serial port name
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// How long to wait for the ready prompt after opening the port
    pub handshake_timeout: Duration,
    /// Open + handshake attempts before giving up
    pub handshake_attempts: u32,
    /// Wait between handshake attempts
    pub retry_interval: Duration,
    /// How long to wait for an echo after each command
    pub response_timeout: Duration,
    /// Consecutive unacknowledged sends tolerated before faulting
    pub unacknowledged_limit: u32,
    /// Floor applied to the settle time of non-wait commands
    pub min_settle: Duration,
    /// Command sent by [`Session::park`] before releasing the port
    pub rest_command: Option<Command>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            handshake_attempts: 1,
            retry_interval: Duration::from_secs(5),
            response_timeout: Duration::from_millis(DEFAULT_RESPONSE_TIMEOUT_MS),
            unacknowledged_limit: DEFAULT_UNACKNOWLEDGED_LIMIT,
            min_settle: Duration::ZERO,
            rest_command: Some(Command::new("d").with_duration(3.0)),
        }
    }
}

/// Run `fut` unless `token` fires first
async fn cancellable<F: Future>(token: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        out = fut => Some(out),
    }
}

/// Serial command session with a robot
///
/// The session is the only writer of its state. Observers use [`Session::subscribe`].
pub struct Session<T: Transport> {
    /// Transport handle
    transport: T,
    /// Current state, published to subscribers
    state: watch::Sender<SessionState>,
    /// Session configuration
    config: SessionConfig,
    /// Framing and classification
    codec: LineCodec,
    /// Cancels every wait the session performs
    cancel: CancellationToken,
    /// Unacknowledged or rejected sends since the last acknowledgement
    consecutive_unacknowledged: u32,
    /// Metrics: cumulative bytes/lines sent & received
    tx_bytes: u64,
    rx_bytes: u64,
    tx_lines: u64,
    rx_lines: u64,
}

impl<T: Transport> Session<T> {
    /// Create a new session (not yet connected)
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self::with_codec(transport, config, LineCodec::default())
    }

    /// Create a session with a custom codec
    pub fn with_codec(transport: T, config: SessionConfig, codec: LineCodec) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            transport,
            state,
            config,
            codec,
            cancel: CancellationToken::new(),
            consecutive_unacknowledged: 0,
            tx_bytes: 0,
            rx_bytes: 0,
            tx_lines: 0,
            rx_lines: 0,
        }
    }

    /// Use `token` to cancel the session's waits
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Get current session state
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state changes from another task
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// The cancellation token governing this session
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Get cumulative tx/rx bytes and line counters
    pub fn counters(&self) -> (u64, u64, u64, u64) {
        (self.tx_bytes, self.rx_bytes, self.tx_lines, self.rx_lines)
    }

    /// Unacknowledged sends since the last acknowledged one
    pub fn consecutive_unacknowledged(&self) -> u32 {
        self.consecutive_unacknowledged
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::debug!(from = ?*current, to = ?state, "session state change");
            *current = state;
            true
        });
    }

    /// Release the handle after a cancelled wait
    fn abort(&mut self) -> SessionError {
        tracing::info!("session wait cancelled, releasing port");
        self.transport.close();
        self.set_state(SessionState::Disconnected);
        SessionError::Cancelled
    }

    fn fault(&mut self, err: SessionError) -> SessionError {
        tracing::error!(error = %err, "session faulted");
        self.set_state(SessionState::Faulted);
        err
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<String, TransportError> {
        let line = self.transport.read_line(timeout).await?;
        self.rx_bytes = self.rx_bytes.saturating_add(line.len() as u64 + 1);
        self.rx_lines = self.rx_lines.saturating_add(1);
        tracing::debug!("<<< {}", line);
        Ok(line)
    }

    /// Connect to the robot: open the port and wait for the ready prompt
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        if self.state() == SessionState::Ready {
            return Err(SessionError::AlreadyConnected);
        }
        // A faulted session still holds nothing useful
        self.transport.close();
        self.set_state(SessionState::Connecting);
        self.consecutive_unacknowledged = 0;

        let attempts = self.config.handshake_attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            if attempt > 1 {
                tracing::info!(attempt, attempts, "retrying connection");
                let token = self.cancel.clone();
                let interval = self.config.retry_interval;
                if cancellable(&token, tokio::time::sleep(interval)).await.is_none() {
                    return Err(self.abort());
                }
            }
            match self.try_connect().await {
                Ok(()) => {
                    tracing::info!(port = %self.config.port_name, "robot ready");
                    self.set_state(SessionState::Ready);
                    return Ok(());
                }
                Err(SessionError::Cancelled) => return Err(self.abort()),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "connection attempt failed");
                    self.transport.close();
                    last_err = Some(e);
                }
            }
        }

        let err = last_err.unwrap_or(SessionError::HandshakeTimeout(self.config.handshake_timeout));
        Err(self.fault(err))
    }

    /// One open + handshake attempt. The caller releases the handle on failure.
    async fn try_connect(&mut self) -> Result<(), SessionError> {
        let token = self.cancel.clone();
        let port = self.config.port_name.clone();
        let baud = self.config.baud_rate;

        match cancellable(&token, self.transport.open(&port, baud)).await {
            None => return Err(SessionError::Cancelled),
            Some(Err(TransportError::PortUnavailable { port, reason })) => {
                return Err(SessionError::PortUnavailable { port, reason })
            }
            Some(Err(e)) => return Err(SessionError::Transport(e)),
            Some(Ok(())) => {}
        }

        let timeout = self.config.handshake_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SessionError::HandshakeTimeout(timeout));
            }
            match cancellable(&token, self.read_line(remaining)).await {
                None => return Err(SessionError::Cancelled),
                Some(Ok(line)) => match self.codec.classify(&line, None) {
                    ResponseKind::Prompt => return Ok(()),
                    _ => tracing::debug!("boot: {}", line),
                },
                Some(Err(TransportError::Timeout)) => {
                    return Err(SessionError::HandshakeTimeout(timeout))
                }
                Some(Err(e)) => return Err(SessionError::Transport(e)),
            }
        }
    }

    /// Disconnect and release the port. Always succeeds.
    pub fn disconnect(&mut self) {
        self.transport.close();
        self.consecutive_unacknowledged = 0;
        self.set_state(SessionState::Disconnected);
    }

    /// Disconnect then connect again
    pub async fn reconnect(&mut self) -> Result<(), SessionError> {
        self.disconnect();
        self.connect().await
    }

    /// Send a command, wait for its echo, then hold for its settle duration
    pub async fn send(&mut self, cmd: &Command) -> Result<Outcome, SessionError> {
        let state = self.state();
        if state != SessionState::Ready {
            return Err(SessionError::NotReady(state));
        }
        let token = self.cancel.clone();

        if cmd.is_wait() {
            tracing::debug!(secs = cmd.duration_secs, "wait");
            if cancellable(&token, tokio::time::sleep(cmd.settle())).await.is_none() {
                return Err(self.abort());
            }
            return Ok(Outcome::Waited);
        }

        let bytes = self.codec.encode(cmd);
        tracing::debug!(">>> {}", String::from_utf8_lossy(&bytes).trim_end());
        match cancellable(&token, self.transport.write_line(&bytes)).await {
            None => return Err(self.abort()),
            Some(Err(e)) => return Err(self.fault(SessionError::Write(e.to_string()))),
            Some(Ok(())) => {}
        }
        self.tx_bytes = self.tx_bytes.saturating_add(bytes.len() as u64);
        self.tx_lines = self.tx_lines.saturating_add(1);

        let outcome = match self.await_acknowledgement(&cmd.token).await {
            Ok(outcome) => outcome,
            Err(SessionError::Cancelled) => return Err(self.abort()),
            Err(e) => return Err(self.fault(e)),
        };

        if outcome.is_success() {
            self.consecutive_unacknowledged = 0;
        } else {
            self.consecutive_unacknowledged += 1;
            tracing::warn!(
                token = %cmd.token,
                outcome = ?outcome,
                consecutive = self.consecutive_unacknowledged,
                "command not acknowledged"
            );
            if self.consecutive_unacknowledged > self.config.unacknowledged_limit {
                let count = self.consecutive_unacknowledged;
                return Err(self.fault(SessionError::TooManyUnacknowledged(count)));
            }
        }

        let settle = cmd.settle().max(self.config.min_settle);
        if cancellable(&token, tokio::time::sleep(settle)).await.is_none() {
            return Err(self.abort());
        }
        Ok(outcome)
    }

    /// Read lines until an echo, prompt or rejection, or until the response timeout
    async fn await_acknowledgement(&mut self, token_sent: &str) -> Result<Outcome, SessionError> {
        let cancel = self.cancel.clone();
        let deadline = Instant::now() + self.config.response_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Outcome::Unacknowledged);
            }
            match cancellable(&cancel, self.read_line(remaining)).await {
                None => return Err(SessionError::Cancelled),
                Some(Ok(line)) => match self.codec.classify(&line, Some(token_sent)) {
                    ResponseKind::Echo | ResponseKind::Prompt => return Ok(Outcome::Acknowledged),
                    ResponseKind::Rejected => return Ok(Outcome::Rejected),
                    ResponseKind::Unrecognized => {
                        tracing::warn!(line = %line, "unrecognized device output")
                    }
                },
                Some(Err(TransportError::Timeout)) => return Ok(Outcome::Unacknowledged),
                Some(Err(e)) => return Err(SessionError::Transport(e)),
            }
        }
    }

    /// Put the robot at rest (if ready) and release the port.
    ///
    /// The rest command is sent even after cancellation has been requested, since
    /// parking is how a cancelled run ends.
    pub async fn park(&mut self) {
        if self.state() == SessionState::Ready {
            if let Some(rest) = self.config.rest_command.clone() {
                let cancel = std::mem::replace(&mut self.cancel, CancellationToken::new());
                let result = self.send(&rest).await;
                self.cancel = cancel;
                if let Err(e) = result {
                    tracing::warn!(error = %e, "failed to send rest command");
                }
            }
        }
        self.disconnect();
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.transport.close();
    }
}
