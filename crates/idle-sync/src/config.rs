//! # Configuration
//!
//! [`SyncConfig`] holds everything a [`SyncClient`](crate::SyncClient)
//! needs: the endpoint, the session token, call timeouts, backoff
//! parameters, and the periodic task intervals.
//!
//! ## Loading Priority
//!
//! Configuration is loaded from the first source that provides a value:
//!
//! 1. Explicit struct fields (programmatic construction)
//! 2. TOML config file at an explicit path
//! 3. The file named by `IDLE_SYNC_CONFIG`
//! 4. `./idle-sync.toml` in the current directory
//! 5. `~/.config/idle-sync/idle-sync.toml`
//! 6. Environment variables only
//!
//! `IDLE_SYNC_URL` and `IDLE_SYNC_TOKEN` always override file values.

use serde::{Deserialize, Serialize};
#[cfg(feature = "config-toml")]
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{SyncError, SyncResult};

/// Default game server WebSocket URL.
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8080/ws";

/// Environment variable overriding [`SyncConfig::server_url`].
pub const ENV_SERVER_URL: &str = "IDLE_SYNC_URL";

/// Environment variable overriding [`SyncConfig::token`].
pub const ENV_TOKEN: &str = "IDLE_SYNC_TOKEN";

/// Environment variable naming a config file.
pub const ENV_CONFIG_PATH: &str = "IDLE_SYNC_CONFIG";

const DEFAULT_CALL_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 10_000;
const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;
const DEFAULT_STATE_SYNC_INTERVAL_MS: u64 = 5_000;
const DEFAULT_EVENT_CHECK_INTERVAL_MS: u64 = 20_000;
const DEFAULT_EFFECTS_CHECK_INTERVAL_MS: u64 = 5_000;
const DEFAULT_EFFECT_SWEEP_INTERVAL_MS: u64 = 1_000;
const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 5 * 60 * 1_000;
const DEFAULT_SAVE_INTERVAL_MS: u64 = 30_000;
const DEFAULT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_SPEND_SETTLE_MS: u64 = 15_000;

/// Configuration for a sync client.
///
/// ```
/// use idle_sync::config::SyncConfig;
///
/// let config = SyncConfig::new("ws://localhost:8080/ws").with_token("abc123");
/// assert_eq!(config.reconnect.max_consecutive_failures, 5);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// WebSocket URL of the game server.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Session token issued by the login flow. Without it no connection
    /// attempt is made.
    #[serde(default)]
    pub token: Option<String>,

    /// Capacity of the inbound frame channel and of each change subscriber.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub keepalive: KeepaliveConfig,

    #[serde(default)]
    pub save: SaveConfig,

    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

/// Timeout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Upper bound on a correlated call, in milliseconds.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,

    /// Upper bound on the WebSocket handshake, in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

/// Reconnection behavior after an abnormal close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Enable automatic reconnection.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Backoff floor, in milliseconds.
    #[serde(default = "default_reconnect_base_delay")]
    pub base_delay_ms: u64,

    /// Backoff ceiling, in milliseconds.
    #[serde(default = "default_reconnect_max_delay")]
    pub max_delay_ms: u64,

    /// Consecutive abnormal disconnects before the session is declared
    /// unrecoverable.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

/// Intervals of the reconciliation loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_state_sync_interval")]
    pub state_sync_interval_ms: u64,

    #[serde(default = "default_event_check_interval")]
    pub event_check_interval_ms: u64,

    #[serde(default = "default_effects_check_interval")]
    pub effects_check_interval_ms: u64,

    /// How often expired effects are removed locally.
    #[serde(default = "default_effect_sweep_interval")]
    pub effect_sweep_interval_ms: u64,
}

/// Liveness frame settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaliveConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_keepalive_interval")]
    pub interval_ms: u64,
}

/// Local save settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_save_interval")]
    pub interval_ms: u64,
}

/// Which resource totals take the greater of the local and incoming value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxMergeScope {
    /// Every resource key.
    #[default]
    All,
    /// Only the listed keys; others take the incoming value.
    Only(Vec<String>),
}

impl MaxMergeScope {
    /// Whether `key` is reconciled with the max-merge rule.
    pub fn covers(&self, key: &str) -> bool {
        match self {
            MaxMergeScope::All => true,
            MaxMergeScope::Only(keys) => keys.iter().any(|k| k == key),
        }
    }
}

/// Reconciliation rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default)]
    pub max_merge: MaxMergeScope,

    /// How long a local spend discounts incoming totals that still
    /// predate it. `0` turns spend tracking off.
    #[serde(default = "default_spend_settle")]
    pub spend_settle_ms: u64,
}

impl ReconcileConfig {
    pub fn spend_settle(&self) -> Duration {
        Duration::from_millis(self.spend_settle_ms)
    }
}

// ─── Defaults ───────────────────────────────────────────────────────────

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_spend_settle() -> u64 {
    DEFAULT_SPEND_SETTLE_MS
}

fn default_call_timeout() -> u64 {
    DEFAULT_CALL_TIMEOUT_MS
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_reconnect_base_delay() -> u64 {
    DEFAULT_RECONNECT_BASE_DELAY_MS
}

fn default_reconnect_max_delay() -> u64 {
    DEFAULT_RECONNECT_MAX_DELAY_MS
}

fn default_max_consecutive_failures() -> u32 {
    DEFAULT_MAX_CONSECUTIVE_FAILURES
}

fn default_state_sync_interval() -> u64 {
    DEFAULT_STATE_SYNC_INTERVAL_MS
}

fn default_event_check_interval() -> u64 {
    DEFAULT_EVENT_CHECK_INTERVAL_MS
}

fn default_effects_check_interval() -> u64 {
    DEFAULT_EFFECTS_CHECK_INTERVAL_MS
}

fn default_effect_sweep_interval() -> u64 {
    DEFAULT_EFFECT_SWEEP_INTERVAL_MS
}

fn default_keepalive_interval() -> u64 {
    DEFAULT_KEEPALIVE_INTERVAL_MS
}

fn default_save_interval() -> u64 {
    DEFAULT_SAVE_INTERVAL_MS
}

// ─── Default impls ──────────────────────────────────────────────────────

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay_ms: DEFAULT_RECONNECT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_RECONNECT_MAX_DELAY_MS,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_merge: MaxMergeScope::default(),
            spend_settle_ms: DEFAULT_SPEND_SETTLE_MS,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            state_sync_interval_ms: DEFAULT_STATE_SYNC_INTERVAL_MS,
            event_check_interval_ms: DEFAULT_EVENT_CHECK_INTERVAL_MS,
            effects_check_interval_ms: DEFAULT_EFFECTS_CHECK_INTERVAL_MS,
            effect_sweep_interval_ms: DEFAULT_EFFECT_SWEEP_INTERVAL_MS,
        }
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: DEFAULT_KEEPALIVE_INTERVAL_MS,
        }
    }
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: DEFAULT_SAVE_INTERVAL_MS,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_URL)
    }
}

// ─── SyncConfig impl ────────────────────────────────────────────────────

impl SyncConfig {
    /// Create a config for `server_url` with every other field defaulted.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            token: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            timeouts: TimeoutConfig::default(),
            reconnect: ReconnectConfig::default(),
            polling: PollingConfig::default(),
            keepalive: KeepaliveConfig::default(),
            save: SaveConfig::default(),
            reconcile: ReconcileConfig::default(),
        }
    }

    /// Set the session token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Build a config from environment variables only.
    ///
    /// Optional: `IDLE_SYNC_URL`, `IDLE_SYNC_TOKEN`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply `IDLE_SYNC_URL` / `IDLE_SYNC_TOKEN` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_SERVER_URL) {
            self.server_url = url;
        }
        if let Some(token) = lookup(ENV_TOKEN).filter(|t| !t.is_empty()) {
            self.token = Some(token);
        }
    }

    /// Parse a TOML document, without environment overrides.
    #[cfg(feature = "config-toml")]
    pub fn from_toml_str(contents: &str) -> SyncResult<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a TOML file, with environment variable overrides.
    #[cfg(feature = "config-toml")]
    pub fn from_file(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| SyncError::ConfigError {
            reason: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;
        let mut config = Self::from_toml_str(&contents)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Discover and load config from the standard search path:
    ///
    /// 1. Explicit path (if `Some`)
    /// 2. `IDLE_SYNC_CONFIG` environment variable
    /// 3. `./idle-sync.toml`
    /// 4. `~/.config/idle-sync/idle-sync.toml`
    ///
    /// Falls back to environment-variable-only config if no file is found.
    #[cfg(feature = "config-toml")]
    pub fn discover(explicit_path: Option<&Path>) -> SyncResult<Self> {
        if let Some(path) = explicit_path {
            return Self::from_file(path);
        }

        if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        let local_path = PathBuf::from("idle-sync.toml");
        if local_path.exists() {
            return Self::from_file(&local_path);
        }

        if let Some(home_path) = home_config_path() {
            if home_path.exists() {
                return Self::from_file(&home_path);
            }
        }

        Ok(Self::from_env())
    }

    /// Reject values that would make the client misbehave.
    pub fn validate(&self) -> SyncResult<()> {
        let invalid = |reason: &str| -> SyncResult<()> {
            Err(SyncError::ConfigError {
                reason: reason.to_string(),
            })
        };

        if self.server_url.is_empty() {
            return invalid("server_url must not be empty");
        }
        if self.channel_capacity == 0 {
            return invalid("channel_capacity must be at least 1");
        }
        if self.timeouts.call_timeout_ms == 0 {
            return invalid("timeouts.call_timeout_ms must be positive");
        }
        if self.timeouts.connect_timeout_ms == 0 {
            return invalid("timeouts.connect_timeout_ms must be positive");
        }
        if self.reconnect.max_consecutive_failures == 0 {
            return invalid("reconnect.max_consecutive_failures must be at least 1");
        }
        if self.reconnect.base_delay_ms > self.reconnect.max_delay_ms {
            return invalid("reconnect.base_delay_ms must not exceed reconnect.max_delay_ms");
        }
        if self.polling.enabled
            && [
                self.polling.state_sync_interval_ms,
                self.polling.event_check_interval_ms,
                self.polling.effects_check_interval_ms,
                self.polling.effect_sweep_interval_ms,
            ]
            .contains(&0)
        {
            return invalid("polling intervals must be positive");
        }
        if self.keepalive.enabled && self.keepalive.interval_ms == 0 {
            return invalid("keepalive.interval_ms must be positive");
        }
        if self.save.enabled && self.save.interval_ms == 0 {
            return invalid("save.interval_ms must be positive");
        }
        Ok(())
    }

    /// The call bound as a [`Duration`].
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.call_timeout_ms)
    }

    /// The handshake bound as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.connect_timeout_ms)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────

/// Platform-appropriate config file path.
#[cfg(feature = "config-toml")]
fn home_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA")
            .ok()
            .map(|dir| PathBuf::from(dir).join("idle-sync").join("idle-sync.toml"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok().map(|dir| {
            PathBuf::from(dir)
                .join(".config")
                .join("idle-sync")
                .join("idle-sync.toml")
        })
    }
}
