//! # Sync Client
//!
//! [`SyncClient`] is the constructed session object that owns one
//! connection to the game server at a time and keeps the local
//! [`GameStore`] reconciled with it.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                          SyncClient                           │
//! │                                                               │
//! │  call() / fire() ──► SessionLink ──► Session::send()          │
//! │        ▲                  │                                   │
//! │        │            Correlator (pending table)                │
//! │        │                  ▲                                   │
//! │  driver task:             │                                   │
//! │    inbound mpsc ──► Dispatcher ──► GameStore ──► subscribers  │
//! │    TaskSet: state-sync, event-check, effects-check,           │
//! │             effect-sweep, keepalive, save                     │
//! │    ReconnectState: backoff + failure budget                   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! A single driver task consumes the inbound channel, so frames are
//! handled strictly in arrival order. When the session ends the driver
//! stops the periodic tasks, rejects every pending call, and closes the
//! session before it sleeps through the backoff and opens a replacement.
//!
//! ```no_run
//! use idle_sync::{SyncClient, SyncConfig};
//!
//! # async fn demo() -> idle_sync::SyncResult<()> {
//! let config = SyncConfig::new("wss://game.example.com/ws").with_token("session-token");
//! let client = SyncClient::connect(config).await?;
//!
//! let reply = client.call("buyUnit", serde_json::json!({"unit": "miner"})).await?;
//! println!("{reply}");
//! println!("gold: {:?}", client.store().resource("gold"));
//!
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::SyncConfig;
use crate::correlator::{Correlator, SessionLink};
use crate::dispatcher::Dispatcher;
use crate::error::{SyncError, SyncResult};
use crate::keepalive::{self, PongTracker};
use crate::protocol::constants::Requests;
use crate::protocol::frames::Request;
use crate::protocol::state::{ActiveEffect, GameState, SyncPayload};
use crate::reconcile;
use crate::save;
use crate::scheduler::TaskSet;
use crate::store::GameStore;
use crate::supervisor::{ConnectionEvent, ConnectionStatus, Decision, ReconnectState};
use crate::transport::{CloseKind, CloseReason, Inbound, Session};

/// Capacity of the connection event broadcast.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Upper bound on waiting for the driver during [`SyncClient::disconnect`].
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// State shared between the public handle and the driver task.
struct Shared {
    config: SyncConfig,
    store: GameStore,
    correlator: Arc<Correlator>,
    pongs: Arc<PongTracker>,
    dispatcher: Dispatcher,
    session: Mutex<Option<Arc<Session>>>,
    status_tx: watch::Sender<ConnectionStatus>,
    event_tx: broadcast::Sender<ConnectionEvent>,
}

/// How one session ended.
enum SessionEnd {
    /// [`SyncClient::disconnect`] or the client was dropped.
    Local,
    Remote(CloseReason),
}

/// Game server client with request correlation, push reconciliation,
/// periodic polling, and automatic reconnection.
///
/// See [module docs](self) for the architecture.
pub struct SyncClient {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl SyncClient {
    /// Open the first session and start the driver.
    ///
    /// Fails with [`SyncError::MissingCredential`] without any network
    /// traffic when the config carries no token. A failed first connect
    /// is returned to the caller rather than retried.
    pub async fn connect(config: SyncConfig) -> SyncResult<Self> {
        Self::connect_with_store(config, None).await
    }

    /// Like [`connect`](Self::connect), but reconciling into an existing
    /// store (for example one restored from disk).
    pub async fn connect_with_store(
        config: SyncConfig,
        store: Option<GameStore>,
    ) -> SyncResult<Self> {
        config.validate()?;
        if config.token.as_deref().is_none_or(str::is_empty) {
            tracing::warn!("No session token configured, not connecting");
            return Err(SyncError::MissingCredential);
        }

        let (status_tx, _) = watch::channel(ConnectionStatus::Connecting);
        let (session, inbound) = match open_session(&config).await {
            Ok(opened) => opened,
            Err(e) => {
                tracing::warn!(error = %e, "Initial connection failed");
                return Err(e);
            }
        };

        let store =
            store.unwrap_or_else(|| GameStore::new(&config.reconcile, config.channel_capacity));
        let correlator = Arc::new(Correlator::new(config.call_timeout()));
        let pongs = Arc::new(PongTracker::new());
        let dispatcher =
            Dispatcher::new(Arc::clone(&correlator), store.clone(), Arc::clone(&pongs));
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let shared = Arc::new(Shared {
            config,
            store,
            correlator,
            pongs,
            dispatcher,
            session: Mutex::new(None),
            status_tx,
            event_tx,
        });

        // Installed before returning so calls work as soon as we do.
        let session = Arc::new(session);
        let tasks = shared.install(&session);
        shared.emit(ConnectionEvent::Connected);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let driver = tokio::spawn(drive(
            Arc::clone(&shared),
            session,
            inbound,
            tasks,
            shutdown_rx,
        ));

        Ok(Self {
            shared,
            shutdown_tx,
            driver: Mutex::new(Some(driver)),
        })
    }

    // ─── Remote calls ───────────────────────────────────────────────────

    /// Issue a correlated request and wait for its reply `data`.
    ///
    /// `params` are spread into the frame next to `type`.
    pub async fn call(&self, kind: &str, params: Value) -> SyncResult<Value> {
        self.link()?.call(Request::with_params(kind, params)).await
    }

    /// Send a frame without expecting a reply. Nothing is reported back;
    /// a frame that cannot be sent is logged and dropped.
    pub async fn fire(&self, kind: &str, params: Value) {
        match self.link() {
            Ok(link) => link.fire(Request::with_params(kind, params)).await,
            Err(e) => tracing::debug!(kind, error = %e, "Fire-and-forget frame not sent"),
        }
    }

    /// `getState`, merged into the store.
    pub async fn fetch_state(&self) -> SyncResult<SyncPayload> {
        reconcile::sync_state(&self.link()?, &self.shared.store).await
    }

    /// `checkEvents`, offering any eligible event to the store.
    pub async fn check_events(&self) -> SyncResult<Option<String>> {
        reconcile::check_events(&self.link()?, &self.shared.store).await
    }

    /// `getEffects`, replacing the store's effect list.
    pub async fn fetch_effects(&self) -> SyncResult<Vec<ActiveEffect>> {
        reconcile::check_effects(&self.link()?, &self.shared.store).await
    }

    /// `getFullState`, applied as a full-state snapshot.
    pub async fn request_full_state(&self) -> SyncResult<GameState> {
        reconcile::full_state(&self.link()?, &self.shared.store).await
    }

    /// Report the player's choice for a presented event. The pending event
    /// is cleared once the server accepts.
    pub async fn resolve_event(&self, event_key: &str, choice: Value) -> SyncResult<Value> {
        let params = serde_json::json!({ "eventKey": event_key, "choice": choice });
        let store = self.shared.store.clone();
        let key = event_key.to_string();
        self.link()?
            .call_applying(
                Request::with_params(Requests::RESOLVE_EVENT, params),
                move |_| {
                    store.clear_event_if(&key);
                    Ok(())
                },
            )
            .await
    }

    /// Fire a `save` frame now instead of waiting for the next tick.
    pub async fn save_now(&self) {
        let Some(frame) = save::save_frame(&self.shared.store) else {
            return;
        };
        match self.link() {
            Ok(link) => link.fire(frame).await,
            Err(e) => tracing::debug!(error = %e, "Save skipped"),
        }
    }

    // ─── Observation ────────────────────────────────────────────────────

    /// The local game state.
    pub fn store(&self) -> &GameStore {
        &self.shared.store
    }

    /// Watch the connection status.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Current connection status.
    pub fn current_status(&self) -> ConnectionStatus {
        self.shared.status_tx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.current_status().is_connected()
    }

    /// Subscribe to connection lifecycle events.
    pub fn event_receiver(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// When the last `pong` arrived.
    pub fn last_pong(&self) -> Option<Instant> {
        self.shared.pongs.last_pong()
    }

    /// Calls awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.shared.correlator.pending_count()
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    /// Close the session deliberately. No reconnection follows.
    ///
    /// Idempotent. Pending calls are rejected with
    /// [`SyncError::Disconnected`].
    pub async fn disconnect(&self) {
        self.shutdown_tx.send_replace(true);

        let driver = lock(&self.driver).take();
        if let Some(handle) = driver {
            if tokio::time::timeout(DISCONNECT_TIMEOUT, handle).await.is_err() {
                tracing::warn!("Driver did not stop in time");
            }
        }
    }

    /// A link to the open session, or why there is none.
    fn link(&self) -> SyncResult<SessionLink> {
        if let ConnectionStatus::Unrecoverable { reason } = &*self.shared.status_tx.borrow() {
            return Err(SyncError::Unrecoverable {
                reason: reason.clone(),
            });
        }
        let session = lock(&self.shared.session)
            .clone()
            .ok_or(SyncError::NotConnected)?;
        Ok(SessionLink::new(session, Arc::clone(&self.shared.correlator)))
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("server_url", &self.shared.config.server_url)
            .field("status", &self.current_status())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

// ─── Driver ─────────────────────────────────────────────────────────────

impl Shared {
    fn set_status(&self, status: ConnectionStatus) {
        self.status_tx.send_replace(status);
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Publish `session` and start its periodic tasks.
    fn install(&self, session: &Arc<Session>) -> TaskSet {
        *lock(&self.session) = Some(Arc::clone(session));
        self.set_status(ConnectionStatus::Connected);

        let link = SessionLink::new(Arc::clone(session), Arc::clone(&self.correlator));
        let mut tasks = TaskSet::new();
        reconcile::start(&mut tasks, &link, &self.store, &self.config.polling);
        keepalive::start(&mut tasks, &link, &self.config.keepalive);
        save::start(&mut tasks, &link, &self.store, &self.config.save);
        tracing::debug!(session = session.id(), tasks = ?tasks.names(), "Session installed");
        tasks
    }

    /// Tear down a finished session: timers first, then the pending
    /// calls, then the socket.
    async fn teardown(&self, session: &Session, mut tasks: TaskSet) {
        tasks.stop_all();
        lock(&self.session).take();
        self.correlator.reject_all("session closed");
        session.close().await;
    }

    /// Dispatch inbound frames until the session ends.
    async fn pump(
        &self,
        inbound: &mut mpsc::Receiver<Inbound>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return SessionEnd::Local;
                    }
                }
                item = inbound.recv() => match item {
                    Some(Inbound::Frame(text)) => {
                        self.dispatcher.dispatch(&text);
                    }
                    Some(Inbound::Closed(reason)) => return SessionEnd::Remote(reason),
                    None => {
                        return SessionEnd::Remote(CloseReason {
                            code: None,
                            reason: "reader stopped".into(),
                        });
                    }
                },
            }
        }
    }

    fn give_up(&self, reason: String, consecutive_failures: u32) {
        tracing::error!(reason = %reason, consecutive_failures, "Connection unrecoverable");
        self.set_status(ConnectionStatus::Unrecoverable {
            reason: reason.clone(),
        });
        self.emit(ConnectionEvent::Unrecoverable {
            reason,
            consecutive_failures,
        });
    }
}

/// The session loop: run the installed session, tear it down, back off,
/// reconnect and install the replacement.
async fn drive(
    shared: Arc<Shared>,
    mut session: Arc<Session>,
    mut inbound: mpsc::Receiver<Inbound>,
    mut tasks: TaskSet,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut reconnect = ReconnectState::new(&shared.config.reconnect);

    loop {
        let end = shared.pump(&mut inbound, &mut shutdown).await;
        shared.teardown(&session, tasks).await;

        let reason = match end {
            SessionEnd::Local => {
                tracing::info!(session = session.id(), "Disconnected by client");
                shared.set_status(ConnectionStatus::Disconnected);
                shared.emit(ConnectionEvent::Disconnected {
                    reason: "client disconnect".into(),
                    code: None,
                });
                return;
            }
            SessionEnd::Remote(reason) => reason,
        };

        tracing::warn!(
            session = session.id(),
            code = ?reason.code,
            reason = %reason.reason,
            "Session lost"
        );
        shared.set_status(ConnectionStatus::Disconnected);
        shared.emit(ConnectionEvent::Disconnected {
            reason: reason.reason.clone(),
            code: reason.code,
        });

        let mut last_error = reason.to_string();
        let mut decision = match reason.kind() {
            CloseKind::AuthRejected => {
                reconnect.on_auth_rejected();
                Decision::GiveUp
            }
            CloseKind::Dropped => reconnect.on_failure(),
        };

        let opened = loop {
            let (attempt, delay) = match decision {
                Decision::GiveUp => {
                    shared.give_up(last_error, reconnect.consecutive_failures());
                    return;
                }
                Decision::Retry { attempt, delay } => (attempt, delay),
            };

            let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
            tracing::info!(attempt, delay_ms, "Reconnecting after backoff");
            shared.emit(ConnectionEvent::Reconnecting { attempt, delay_ms });

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    tracing::info!("Reconnection cancelled");
                    return;
                }
            }

            shared.set_status(ConnectionStatus::Connecting);
            let result = tokio::select! {
                result = open_session(&shared.config) => result,
                _ = shutdown.changed() => {
                    shared.set_status(ConnectionStatus::Disconnected);
                    tracing::info!("Reconnection cancelled");
                    return;
                }
            };

            match result {
                Ok(opened) => break opened,
                Err(e @ SyncError::AuthenticationRejected { .. }) => {
                    tracing::warn!(attempt, error = %e, "Reconnection rejected");
                    reconnect.on_auth_rejected();
                    last_error = e.to_string();
                    decision = Decision::GiveUp;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Reconnection attempt failed");
                    shared.set_status(ConnectionStatus::Disconnected);
                    last_error = e.to_string();
                    decision = reconnect.on_failure();
                }
            }
        };

        let (new_session, new_inbound) = opened;
        session = Arc::new(new_session);
        inbound = new_inbound;
        reconnect.on_connected();
        tasks = shared.install(&session);
        tracing::info!(session = session.id(), "Reconnected");
        shared.emit(ConnectionEvent::Reconnected);
    }
}

async fn open_session(config: &SyncConfig) -> SyncResult<(Session, mpsc::Receiver<Inbound>)> {
    Session::open(
        &config.server_url,
        config.token.as_deref(),
        config.connect_timeout(),
        config.channel_capacity,
    )
    .await
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
