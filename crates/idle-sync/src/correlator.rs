//! # Correlator
//!
//! Pairs correlated requests with their replies.
//!
//! Every [`call`](Correlator::call) takes a fresh id from a process-wide
//! monotonically increasing counter, registers a pending entry *before*
//! the frame is written, and then waits on a `oneshot` for the dispatcher
//! to route back the matching `result` / `error` frame. An entry leaves
//! the table exactly once: on its reply, on timeout, on session loss
//! ([`reject_all`](Correlator::reject_all)), or when the caller drops the
//! call future.
//!
//! A call may carry an [`ApplyReply`] hook. The dispatcher runs it on the
//! reply's `data` while routing the frame, so the reply reaches local
//! state in arrival order relative to the pushes around it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{SyncError, SyncResult};
use crate::protocol::frames::Request;
use crate::transport::Session;

/// Ids are unique across every correlator in the process.
static NEXT_CORRELATION_ID: AtomicU64 = AtomicU64::new(1);

/// Applies a successful reply's `data` inside the dispatch loop.
///
/// An error is delivered to the caller in place of the reply.
pub type ApplyReply = Box<dyn FnOnce(&Value) -> SyncResult<()> + Send>;

/// A call awaiting its reply.
struct PendingRequest {
    tx: oneshot::Sender<SyncResult<Value>>,
    kind: String,
    issued_at: Instant,
    apply: Option<ApplyReply>,
}

/// Request/response correlation table with a bounded wait per call.
pub struct Correlator {
    pending: Mutex<HashMap<u64, PendingRequest>>,
    call_timeout: Duration,
}

impl Correlator {
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            call_timeout,
        }
    }

    /// Upper bound on a single call.
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Number of calls awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.table().len()
    }

    /// Send `request` with a fresh correlation id and wait for the reply.
    ///
    /// Resolves with the reply's `data`, or rejects with
    /// [`SyncError::ServerError`] (an `error` frame),
    /// [`SyncError::Timeout`], [`SyncError::Disconnected`] (the session
    /// closed first), or the send error itself.
    pub async fn call(&self, session: &Session, request: Request) -> SyncResult<Value> {
        self.send_and_wait(session, request, None).await
    }

    /// Like [`call`](Self::call), with `apply` run on the reply's `data`
    /// by whoever routes the reply, before the caller wakes.
    pub async fn call_applying<F>(
        &self,
        session: &Session,
        request: Request,
        apply: F,
    ) -> SyncResult<Value>
    where
        F: FnOnce(&Value) -> SyncResult<()> + Send + 'static,
    {
        self.send_and_wait(session, request, Some(Box::new(apply))).await
    }

    async fn send_and_wait(
        &self,
        session: &Session,
        request: Request,
        apply: Option<ApplyReply>,
    ) -> SyncResult<Value> {
        let (id, rx) = self.begin(&request.kind, apply);
        let _guard = PendingGuard { owner: self, id };

        let request = request.correlated(id);
        let json = request.to_json()?;
        tracing::debug!(id, kind = %request.kind, session = session.id(), "Sending request");

        session.send(json).await?;
        self.wait(id, &request.kind, rx).await
    }

    /// Send `request` without a correlation id. Failures are logged and
    /// otherwise ignored.
    pub async fn fire(&self, session: &Session, request: Request) {
        let kind = request.kind.clone();
        let result = match request.to_json() {
            Ok(json) => session.send(json).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => tracing::trace!(kind = %kind, "Fired frame"),
            Err(e) => tracing::debug!(kind = %kind, error = %e, "Fire-and-forget frame not sent"),
        }
    }

    /// Route a reply to its caller. Returns `false` when no call with
    /// that id is pending (late reply after a timeout, or a stray id).
    ///
    /// A successful reply runs the call's [`ApplyReply`] hook first, on
    /// the current thread.
    pub fn resolve(&self, id: u64, result: SyncResult<Value>) -> bool {
        let Some(pending) = self.table().remove(&id) else {
            tracing::debug!(id, "Reply for unknown correlation id");
            return false;
        };

        let result = match (result, pending.apply) {
            (Ok(data), Some(apply)) => apply(&data).map(|()| data),
            (result, _) => result,
        };

        tracing::debug!(
            id,
            kind = %pending.kind,
            elapsed_ms = u64::try_from(pending.issued_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            ok = result.is_ok(),
            "Request completed"
        );
        let _ = pending.tx.send(result);
        true
    }

    /// Reject every pending call with [`SyncError::Disconnected`].
    ///
    /// Returns how many calls were rejected.
    pub fn reject_all(&self, reason: &str) -> usize {
        let drained: Vec<(u64, PendingRequest)> = self.table().drain().collect();
        let count = drained.len();
        for (id, pending) in drained {
            tracing::debug!(id, kind = %pending.kind, "Rejecting pending request");
            let _ = pending.tx.send(Err(SyncError::Disconnected {
                reason: reason.to_string(),
            }));
        }
        if count > 0 {
            tracing::info!(count, reason, "Rejected pending requests");
        }
        count
    }

    /// Allocate an id and register its pending entry.
    fn begin(
        &self,
        kind: &str,
        apply: Option<ApplyReply>,
    ) -> (u64, oneshot::Receiver<SyncResult<Value>>) {
        let id = NEXT_CORRELATION_ID.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        let previous = self.table().insert(
            id,
            PendingRequest {
                tx,
                kind: kind.to_string(),
                issued_at: Instant::now(),
                apply,
            },
        );
        debug_assert!(previous.is_none(), "correlation id reused while live");
        (id, rx)
    }

    /// Wait for the reply to `id`, bounded by the call timeout.
    async fn wait(
        &self,
        id: u64,
        kind: &str,
        rx: oneshot::Receiver<SyncResult<Value>>,
    ) -> SyncResult<Value> {
        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SyncError::Disconnected {
                reason: "pending request dropped".into(),
            }),
            Err(_) => {
                self.forget(id);
                tracing::warn!(id, kind, "Request timed out");
                Err(SyncError::Timeout {
                    millis: u64::try_from(self.call_timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    fn forget(&self, id: u64) {
        self.table().remove(&id);
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<u64, PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A session paired with the correlator that owns its pending calls.
///
/// Periodic tasks hold a clone for the lifetime of one session; a fresh
/// link is built after every reconnect.
#[derive(Clone)]
pub struct SessionLink {
    pub session: Arc<Session>,
    pub correlator: Arc<Correlator>,
}

impl SessionLink {
    pub fn new(session: Arc<Session>, correlator: Arc<Correlator>) -> Self {
        Self {
            session,
            correlator,
        }
    }

    pub async fn call(&self, request: Request) -> SyncResult<Value> {
        self.correlator.call(&self.session, request).await
    }

    pub async fn call_applying<F>(&self, request: Request, apply: F) -> SyncResult<Value>
    where
        F: FnOnce(&Value) -> SyncResult<()> + Send + 'static,
    {
        self.correlator
            .call_applying(&self.session, request, apply)
            .await
    }

    pub async fn fire(&self, request: Request) {
        self.correlator.fire(&self.session, request).await;
    }

    pub fn is_open(&self) -> bool {
        self.session.is_open()
    }
}

/// Removes the pending entry however the call ends (send error, timeout,
/// or the caller dropping the future).
struct PendingGuard<'a> {
    owner: &'a Correlator,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.owner.forget(self.id);
    }
}
