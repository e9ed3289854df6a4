//! # Keepalive
//!
//! Sends a fire-and-forget `ping` on a fixed interval while a session is
//! open, so proxies and load balancers do not reap an idle connection.
//! The server's `pong` only updates [`PongTracker`]; a missing pong never
//! triggers a reconnect by itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::config::KeepaliveConfig;
use crate::correlator::SessionLink;
use crate::protocol::constants::Requests;
use crate::protocol::frames::Request;
use crate::scheduler::TaskSet;

/// Task name in the session's [`TaskSet`].
pub const KEEPALIVE_TASK: &str = "keepalive";

/// Records the most recent `pong`.
#[derive(Debug, Default)]
pub struct PongTracker {
    last: Mutex<Option<Instant>>,
    count: AtomicU64,
}

impl PongTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, server_timestamp: Option<u64>) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(count, server_timestamp, "Pong received");
    }

    /// When the last pong arrived, if ever.
    pub fn last_pong(&self) -> Option<Instant> {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pong_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Start the ping timer for the session behind `link`.
pub fn start(tasks: &mut TaskSet, link: &SessionLink, config: &KeepaliveConfig) {
    if !config.enabled {
        return;
    }

    let link = link.clone();
    tasks.spawn_periodic(
        KEEPALIVE_TASK,
        Duration::from_millis(config.interval_ms),
        move || {
            let link = link.clone();
            async move {
                if link.is_open() {
                    link.fire(Request::new(Requests::PING)).await;
                }
            }
        },
    );
}
