//! # idle-sync
//!
//! Client side of the idle-game synchronization protocol: keeps a local
//! copy of game state consistent with the authoritative server over one
//! long-lived WebSocket.
//!
//! ## Quick Start
//!
//! ```no_run
//! use idle_sync::{SyncClient, SyncConfig};
//!
//! #[tokio::main]
//! async fn main() -> idle_sync::SyncResult<()> {
//!     // Load config from idle-sync.toml or the environment
//!     let config = SyncConfig::discover(None)?;
//!
//!     let client = SyncClient::connect(config).await?;
//!
//!     // Optimistic local mutation; pushes and polls never lower it
//!     client.store().add_resource("gold", 1.0);
//!
//!     // Correlated call
//!     let state = client.request_full_state().await?;
//!     println!("{} resources", state.resources.len());
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Components
//!
//! | Module | Role |
//! |--------|------|
//! | [`transport`] | One WebSocket session: open, send, close, inbound frames |
//! | [`correlator`] | Correlation ids, pending calls, timeouts |
//! | [`dispatcher`] | Routes replies and push frames |
//! | [`store`] | Local state and reconciliation rules |
//! | [`supervisor`] | Backoff and failure budget |
//! | [`reconcile`] | Periodic `getState` / `checkEvents` / `getEffects` |
//! | [`keepalive`] | Periodic `ping` |
//! | [`save`] | Periodic `save` |
//! | [`client`] | [`SyncClient`], wiring the above together |
//!
//! ## Configuration
//!
//! See [`SyncConfig`]. The simplest setup uses environment variables:
//!
//! ```bash
//! export IDLE_SYNC_URL="wss://game.example.com/ws"
//! export IDLE_SYNC_TOKEN="session-token"
//! ```
//!
//! Or an `idle-sync.toml` file:
//!
//! ```toml
//! server_url = "wss://game.example.com/ws"
//! token = "session-token"
//!
//! [reconnect]
//! max_consecutive_failures = 5
//! ```

pub mod client;
pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod keepalive;
pub mod notices;
pub mod protocol;
pub mod reconcile;
pub mod save;
pub mod scheduler;
pub mod store;
pub mod supervisor;
pub mod transport;

// ─── Public re-exports ──────────────────────────────────────────────────

pub use client::SyncClient;
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use store::{GameStore, StateChange};
pub use supervisor::{ConnectionEvent, ConnectionStatus};
