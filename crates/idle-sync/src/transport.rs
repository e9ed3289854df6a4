//! # Transport Session
//!
//! One physical WebSocket connection. A [`Session`] is opened once,
//! used, and closed; reconnecting always builds a new one.
//!
//! The socket is split into halves. The writer sits behind a mutex for
//! [`Session::send`]; the reader runs in a spawned task that forwards raw
//! text frames into a bounded channel, in arrival order, and finishes the
//! stream with a single [`Inbound::Closed`] when the remote side goes away:
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │                      Session                        │
//! │                                                     │
//! │  writer: Mutex<SplitSink>   ◄── send() / close()    │
//! │                                                     │
//! │  reader task:                                       │
//! │    SplitStream ──► Inbound::Frame(text) ──► mpsc    │
//! │                └─► Inbound::Closed(reason)          │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! A local [`close`](Session::close) aborts the reader first, so a
//! deliberate close never produces an `Inbound::Closed`.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, Instant};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::{SyncError, SyncResult};
use crate::protocol::constants::{CloseCodes, TOKEN_QUERY_PARAM};

/// Upper bound on flushing the close handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of the WebSocket connection.
type WsWriter = SplitSink<WsStream, Message>;

/// Read half of the WebSocket connection.
type WsReader = SplitStream<WsStream>;

/// Lifecycle of a single session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Open,
    Closing,
    Closed,
}

/// How a remote-initiated close should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// The server rejected the credential. Never reconnect.
    AuthRejected,
    /// Network drop or server-side close. Reconnect with backoff.
    Dropped,
}

/// Why the remote side ended the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// WebSocket close code, when the server sent a close frame.
    pub code: Option<u16>,
    pub reason: String,
}

impl CloseReason {
    /// Classify the close for the reconnection supervisor.
    pub fn kind(&self) -> CloseKind {
        if self.code == Some(CloseCodes::AUTH_REJECTED) {
            CloseKind::AuthRejected
        } else {
            CloseKind::Dropped
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) if self.reason.is_empty() => write!(f, "closed with code {code}"),
            Some(code) => write!(f, "closed with code {code}: {}", self.reason),
            None => f.write_str(&self.reason),
        }
    }
}

/// Items produced by the reader task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// One raw text frame.
    Frame(String),
    /// The remote side ended the session. Always the last item.
    Closed(CloseReason),
}

/// One live duplex connection to the game server.
pub struct Session {
    id: u64,
    writer: Mutex<WsWriter>,
    status: Arc<StdMutex<SessionStatus>>,
    last_activity: Arc<StdMutex<Instant>>,
    reader_handle: StdMutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Open a session to `server_url`, presenting `token`.
    ///
    /// Fails with [`SyncError::MissingCredential`] before touching the
    /// network when no token is available. A handshake refused with HTTP
    /// 401 or 403 becomes [`SyncError::AuthenticationRejected`].
    ///
    /// Returns the session and the receiver of its inbound frames; the
    /// channel holds at most `capacity` unread frames, after which the
    /// reader waits.
    pub async fn open(
        server_url: &str,
        token: Option<&str>,
        connect_timeout: Duration,
        capacity: usize,
    ) -> SyncResult<(Self, mpsc::Receiver<Inbound>)> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or(SyncError::MissingCredential)?;
        let url = with_token(server_url, token);

        let (ws, response) = tokio::time::timeout(connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| SyncError::Timeout {
                millis: u64::try_from(connect_timeout.as_millis()).unwrap_or(u64::MAX),
            })?
            .map_err(|e| handshake_error(server_url, e))?;

        let id = next_session_id();
        tracing::info!(
            session = id,
            url = server_url,
            status = %response.status(),
            "Connected to game server"
        );

        let (writer, reader) = ws.split();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let status = Arc::new(StdMutex::new(SessionStatus::Open));
        let last_activity = Arc::new(StdMutex::new(Instant::now()));

        let reader_handle = Self::spawn_reader(
            id,
            reader,
            tx,
            Arc::clone(&status),
            Arc::clone(&last_activity),
        );

        Ok((
            Self {
                id,
                writer: Mutex::new(writer),
                status,
                last_activity,
                reader_handle: StdMutex::new(Some(reader_handle)),
            },
            rx,
        ))
    }

    /// Spawn the task that forwards socket frames into the inbound channel.
    fn spawn_reader(
        id: u64,
        mut reader: WsReader,
        tx: mpsc::Sender<Inbound>,
        status: Arc<StdMutex<SessionStatus>>,
        last_activity: Arc<StdMutex<Instant>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let close = loop {
                let msg = reader.next().await;
                if msg.is_some() {
                    *lock(&last_activity) = Instant::now();
                }

                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let text: &str = &text;
                        tracing::trace!(session = id, raw = text, "Frame received");
                        if tx.send(Inbound::Frame(text.to_owned())).await.is_err() {
                            tracing::debug!(session = id, "Inbound channel closed");
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(frame) => {
                                let reason: &str = &frame.reason;
                                CloseReason {
                                    code: Some(u16::from(frame.code)),
                                    reason: reason.to_owned(),
                                }
                            }
                            None => CloseReason {
                                code: None,
                                reason: "closed without a close frame".into(),
                            },
                        };
                    }
                    Some(Err(e)) => {
                        break CloseReason {
                            code: None,
                            reason: format!("WebSocket error: {e}"),
                        };
                    }
                    None => {
                        break CloseReason {
                            code: None,
                            reason: "stream ended".into(),
                        };
                    }
                    Some(Ok(_)) => {
                        // Binary frames, pings, pongs: skip
                    }
                }
            };

            *lock(&status) = SessionStatus::Closed;
            tracing::info!(session = id, reason = %close, "Session closed by remote");
            let _ = tx.send(Inbound::Closed(close)).await;
        })
    }

    /// Process-unique id of this session, for logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current lifecycle status.
    pub fn status(&self) -> SessionStatus {
        *lock(&self.status)
    }

    /// Whether frames can be sent.
    pub fn is_open(&self) -> bool {
        self.status() == SessionStatus::Open
    }

    /// Time of the last frame sent or received.
    pub fn last_activity(&self) -> Instant {
        *lock(&self.last_activity)
    }

    /// Send one text frame.
    ///
    /// Fails with [`SyncError::NotConnected`] when the session is not
    /// open; nothing is queued.
    pub async fn send(&self, text: String) -> SyncResult<()> {
        if !self.is_open() {
            return Err(SyncError::NotConnected);
        }

        tracing::trace!(session = self.id, raw = %text, "Frame sent");
        let mut writer = self.writer.lock().await;
        writer
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| SyncError::WebSocket(format!("Send error: {e}")))?;
        *lock(&self.last_activity) = Instant::now();
        Ok(())
    }

    /// Close the session. Idempotent; never reported as a remote close.
    pub async fn close(&self) {
        {
            let mut status = lock(&self.status);
            match *status {
                SessionStatus::Open => *status = SessionStatus::Closing,
                SessionStatus::Closing => return,
                SessionStatus::Closed => {
                    drop(status);
                    self.abort_reader();
                    return;
                }
            }
        }

        self.abort_reader();

        let _ = tokio::time::timeout(CLOSE_TIMEOUT, async {
            let mut writer = self.writer.lock().await;
            writer.close().await
        })
        .await;

        *lock(&self.status) = SessionStatus::Closed;
        tracing::debug!(session = self.id, "Session closed locally");
    }

    fn abort_reader(&self) {
        if let Some(handle) = lock(&self.reader_handle).take() {
            handle.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.abort_reader();
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn next_session_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Append the token as a query parameter.
fn with_token(server_url: &str, token: &str) -> String {
    let separator = if server_url.contains('?') { '&' } else { '?' };
    format!(
        "{server_url}{separator}{TOKEN_QUERY_PARAM}={}",
        percent_encode(token)
    )
}

fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

fn handshake_error(server_url: &str, err: tungstenite::Error) -> SyncError {
    if let tungstenite::Error::Http(response) = &err {
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return SyncError::AuthenticationRejected {
                reason: format!("handshake refused with HTTP {status}"),
            };
        }
    }
    SyncError::ConnectionFailed {
        url: server_url.to_string(),
        reason: format!("WebSocket connection failed: {err}"),
    }
}
