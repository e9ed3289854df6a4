//! # Error Types
//!
//! Semantic error types for the sync protocol. Variants follow the
//! protocol's failure taxonomy:
//!
//! | Class | Variants | Retried by |
//! |-------|----------|------------|
//! | Transport | [`SyncError::NotConnected`], [`SyncError::ConnectionFailed`], [`SyncError::WebSocket`] | caller |
//! | Timeout | [`SyncError::Timeout`] | caller |
//! | Protocol | [`SyncError::ServerError`], [`SyncError::ProtocolError`] | never (not fatal) |
//! | Session | [`SyncError::Disconnected`] | supervisor reconnects |
//! | Fatal | [`SyncError::AuthenticationRejected`], [`SyncError::Unrecoverable`], [`SyncError::MissingCredential`] | never |
//!
//! Malformed inbound frames never surface as errors; the dispatcher drops
//! them and the call timeout is the backstop.

use thiserror::Error;

/// Convenient Result alias for sync operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// All errors that can occur while talking to the game server.
#[derive(Error, Debug)]
pub enum SyncError {
    // ─── Transport ──────────────────────────────────────────────────
    /// No session is open, so the frame was not sent.
    #[error("Not connected to the game server")]
    NotConnected,

    /// No credential was configured; no connection attempt was made.
    #[error("No session token configured. Sign in before connecting.")]
    MissingCredential,

    /// Failed to establish a WebSocket connection.
    #[error("Failed to connect to {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// Low-level WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    // ─── Session ────────────────────────────────────────────────────
    /// The session closed while the call was outstanding.
    #[error("Disconnected: {reason}")]
    Disconnected { reason: String },

    /// The server rejected the credential (close code 4001 or an HTTP
    /// 401/403 during the handshake).
    #[error("Authentication rejected: {reason}. Sign in again.")]
    AuthenticationRejected { reason: String },

    /// Too many consecutive failures; no further reconnects will happen.
    #[error("Session permanently unusable: {reason}")]
    Unrecoverable { reason: String },

    // ─── Timeout ────────────────────────────────────────────────────
    /// No matching response arrived within the call bound.
    #[error("Call timed out after {millis}ms")]
    Timeout { millis: u64 },

    // ─── Protocol ───────────────────────────────────────────────────
    /// The server answered with an `error` frame.
    #[error("Server error: {message}")]
    ServerError { message: String },

    /// A reply arrived but its payload did not have the expected shape.
    #[error("Protocol error: {reason}")]
    ProtocolError { reason: String },

    // ─── Config ─────────────────────────────────────────────────────
    /// Configuration file error (missing, malformed, or invalid values).
    #[error("Configuration error: {reason}")]
    ConfigError { reason: String },

    // ─── I/O ────────────────────────────────────────────────────────
    /// Filesystem or I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Returns `true` if the failure is transient and the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Timeout { .. }
                | SyncError::Disconnected { .. }
                | SyncError::NotConnected
                | SyncError::WebSocket(_)
        )
    }

    /// Returns `true` if the session is unusable right now.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailed { .. }
                | SyncError::Disconnected { .. }
                | SyncError::NotConnected
                | SyncError::WebSocket(_)
        )
    }

    /// Returns `true` if the user must re-authenticate before anything
    /// else can succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::AuthenticationRejected { .. }
                | SyncError::Unrecoverable { .. }
                | SyncError::MissingCredential
        )
    }
}

// ─── From impls for external error types ────────────────────────────────

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SyncError::WebSocket(err.to_string())
    }
}

#[cfg(feature = "config-toml")]
impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigError {
            reason: err.to_string(),
        }
    }
}
