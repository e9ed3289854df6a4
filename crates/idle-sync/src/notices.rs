//! # Change Notices
//!
//! `Stream` adapters over [`GameStore`] change notifications, for the
//! presentation layer.
//!
//! [`ChangeStream`] filters raw [`StateChange`] values through a closure.
//! The helpers below build the common ones:
//!
//! ```rust
//! use futures_util::StreamExt;
//! use idle_sync::config::ReconcileConfig;
//! use idle_sync::notices;
//! use idle_sync::store::GameStore;
//!
//! let rt = tokio::runtime::Builder::new_current_thread()
//!     .enable_time()
//!     .build()
//!     .unwrap();
//!
//! rt.block_on(async {
//!     let store = GameStore::new(&ReconcileConfig::default(), 16);
//!     let mut unlocked = notices::achievement_notices(&store);
//!
//!     store.unlock_achievements(&["first-click".to_string()]);
//!     store.unlock_achievements(&["first-click".to_string()]);
//!     drop(store);
//!
//!     assert_eq!(unlocked.next().await.as_deref(), Some("first-click"));
//! });
//! ```

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::mpsc;

use crate::store::{GameStore, StateChange};

/// Filtering stream over a store subscription.
///
/// Changes the closure maps to `None` are skipped.
pub struct ChangeStream<T, F>
where
    F: Fn(StateChange) -> Option<T>,
{
    rx: mpsc::Receiver<StateChange>,
    select: F,
}

impl<T, F> ChangeStream<T, F>
where
    F: Fn(StateChange) -> Option<T>,
{
    pub fn new(rx: mpsc::Receiver<StateChange>, select: F) -> Self {
        Self { rx, select }
    }
}

impl<T, F> Stream for ChangeStream<T, F>
where
    F: Fn(StateChange) -> Option<T> + Unpin,
{
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(change)) => {
                    if let Some(item) = (self.select)(change) {
                        return Poll::Ready(Some(item));
                    }
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Every change, unfiltered.
pub fn changes(store: &GameStore) -> impl Stream<Item = StateChange> + Send + Unpin + use<> {
    ChangeStream::new(store.subscribe(), Some)
}

/// One item per newly unlocked achievement key.
pub fn achievement_notices(store: &GameStore) -> impl Stream<Item = String> + Send + Unpin + use<> {
    ChangeStream::new(store.subscribe(), |change| match change {
        StateChange::AchievementUnlocked { key } => Some(key),
        _ => None,
    })
}

/// One item per narrative event presented to the player.
pub fn event_notices(store: &GameStore) -> impl Stream<Item = String> + Send + Unpin + use<> {
    ChangeStream::new(store.subscribe(), |change| match change {
        StateChange::EventPresented { key } => Some(key),
        _ => None,
    })
}
