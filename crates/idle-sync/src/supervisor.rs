//! # Reconnection Supervisor
//!
//! Backoff and failure budget for the session loop in
//! [`SyncClient`](crate::SyncClient).
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected ──► Disconnected ──► ...
//!                                     │
//!                 N consecutive abnormal closes, or auth rejection
//!                                     ▼
//!                               Unrecoverable
//! ```
//!
//! Every abnormal close and every failed connect attempt counts as one
//! failure. The k-th consecutive failure waits `min(base * 2^(k-1), max)`
//! before the next attempt; reaching the budget, or any authentication
//! rejection, sets the terminal flag and no attempt is ever made again.
//! A successful connect resets both the delay and the counter. A
//! deliberate local close is not a failure.

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Connection state reported to callers through
/// [`SyncClient::status`](crate::SyncClient::status).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal. Re-authenticate and build a new client.
    Unrecoverable { reason: String },
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionStatus::Unrecoverable { .. })
    }
}

/// Connection lifecycle events broadcast by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// First session established.
    Connected,

    /// The session closed. `code` is the WebSocket close code, if any.
    Disconnected { reason: String, code: Option<u16> },

    /// Waiting `delay_ms` before reconnect attempt number `attempt`.
    Reconnecting { attempt: u32, delay_ms: u64 },

    /// A replacement session was established.
    Reconnected,

    /// No further reconnection will be attempted.
    Unrecoverable {
        reason: String,
        consecutive_failures: u32,
    },
}

/// What to do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Wait `delay`, then make attempt number `attempt`.
    Retry { attempt: u32, delay: Duration },
    /// The terminal flag is set.
    GiveUp,
}

/// Backoff interval, consecutive-failure counter and terminal flag.
#[derive(Debug, Clone)]
pub struct ReconnectState {
    base_delay: Duration,
    max_delay: Duration,
    max_failures: u32,
    enabled: bool,
    current_delay: Duration,
    consecutive_failures: u32,
    terminal: bool,
}

impl ReconnectState {
    pub fn new(config: &ReconnectConfig) -> Self {
        let base_delay = Duration::from_millis(config.base_delay_ms);
        Self {
            base_delay,
            max_delay: Duration::from_millis(config.max_delay_ms).max(base_delay),
            max_failures: config.max_consecutive_failures.max(1),
            enabled: config.enabled,
            current_delay: base_delay,
            consecutive_failures: 0,
            terminal: false,
        }
    }

    /// A session opened. Resets the backoff and the failure counter.
    pub fn on_connected(&mut self) {
        if self.consecutive_failures > 0 {
            tracing::debug!(
                previous_failures = self.consecutive_failures,
                "Reconnect state reset"
            );
        }
        self.current_delay = self.base_delay;
        self.consecutive_failures = 0;
    }

    /// An abnormal close or failed connect attempt.
    pub fn on_failure(&mut self) -> Decision {
        if self.terminal {
            return Decision::GiveUp;
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if !self.enabled || self.consecutive_failures >= self.max_failures {
            self.terminal = true;
            return Decision::GiveUp;
        }

        let delay = self.current_delay;
        self.current_delay = (self.current_delay * 2).min(self.max_delay);
        Decision::Retry {
            attempt: self.consecutive_failures,
            delay,
        }
    }

    /// The server rejected the credential. Always terminal.
    pub fn on_auth_rejected(&mut self) {
        self.terminal = true;
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Delay the next failure would wait.
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }
}
