//! # Push Dispatcher
//!
//! Routes every inbound text frame, strictly in arrival order:
//!
//! - `result` / `error` with a correlation id go to the [`Correlator`],
//!   which applies a poll reply to the store before the next frame is
//!   routed.
//! - `sync`, `achievementUnlocked`, `eventTriggered`, `effectsUpdate` and
//!   `fullState` go to the matching [`GameStore`] handler.
//! - `pong` updates the [`PongTracker`].
//!
//! Frames that fail to parse are dropped with a debug log. A reply that
//! never correlates is left to the caller's timeout.

use std::sync::Arc;

use crate::correlator::Correlator;
use crate::error::SyncError;
use crate::keepalive::PongTracker;
use crate::protocol::frames::ServerFrame;
use crate::protocol::state::now_millis;
use crate::store::GameStore;

/// What a frame turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// A correlated reply. `matched` is false when no call was waiting.
    Reply { correlation_id: u64, matched: bool },

    /// A push frame applied to the store.
    Push { kind: &'static str },

    /// An `error` frame without a correlation id.
    UncorrelatedError,

    Pong,

    /// Unparseable frame.
    Dropped,
}

/// Routes inbound frames for one client.
pub struct Dispatcher {
    correlator: Arc<Correlator>,
    store: GameStore,
    pongs: Arc<PongTracker>,
}

impl Dispatcher {
    pub fn new(correlator: Arc<Correlator>, store: GameStore, pongs: Arc<PongTracker>) -> Self {
        Self {
            correlator,
            store,
            pongs,
        }
    }

    /// Parse and route one raw frame.
    pub fn dispatch(&self, text: &str) -> Dispatched {
        match ServerFrame::parse(text) {
            Ok(frame) => self.route(frame),
            Err(e) => {
                tracing::debug!(error = %e, len = text.len(), "Dropping malformed frame");
                Dispatched::Dropped
            }
        }
    }

    /// Route an already parsed frame.
    pub fn route(&self, frame: ServerFrame) -> Dispatched {
        let kind = frame.kind();
        match frame {
            ServerFrame::Result {
                correlation_id,
                data,
            } => Dispatched::Reply {
                correlation_id,
                matched: self.correlator.resolve(correlation_id, Ok(data)),
            },
            ServerFrame::Error {
                correlation_id: Some(correlation_id),
                message,
            } => Dispatched::Reply {
                correlation_id,
                matched: self
                    .correlator
                    .resolve(correlation_id, Err(SyncError::ServerError { message })),
            },
            ServerFrame::Error {
                correlation_id: None,
                message,
            } => {
                tracing::warn!(message = %message, "Server error without correlation id");
                Dispatched::UncorrelatedError
            }
            ServerFrame::Sync(payload) => {
                self.store.apply_sync(&payload);
                Dispatched::Push { kind }
            }
            ServerFrame::AchievementUnlocked { achievements } => {
                let newly = self.store.unlock_achievements(&achievements);
                tracing::debug!(
                    received = achievements.len(),
                    new = newly.len(),
                    "Achievements unlocked"
                );
                Dispatched::Push { kind }
            }
            ServerFrame::EventTriggered { event_key } => {
                self.store.offer_event(&event_key);
                Dispatched::Push { kind }
            }
            ServerFrame::EffectsUpdate { effects } => {
                self.store.replace_effects(effects, now_millis());
                Dispatched::Push { kind }
            }
            ServerFrame::FullState { state } => {
                tracing::info!("Applying full state snapshot");
                self.store.apply_full_state(state, now_millis());
                Dispatched::Push { kind }
            }
            ServerFrame::Pong { timestamp } => {
                self.pongs.record(timestamp);
                Dispatched::Pong
            }
        }
    }
}
