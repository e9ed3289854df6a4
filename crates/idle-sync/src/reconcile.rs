//! # Reconciliation Loop
//!
//! Redundant polling next to the push path. Three correlated calls run on
//! their own intervals and feed their replies into the same [`GameStore`]
//! handlers the push dispatcher uses. Replies are applied by the
//! dispatcher as they arrive, never after the caller wakes, so a poll
//! reply and the pushes around it land in arrival order:
//!
//! | Task            | Request       | Handler                              |
//! |-----------------|---------------|--------------------------------------|
//! | `state-sync`    | `getState`    | [`GameStore::apply_sync`]            |
//! | `event-check`   | `checkEvents` | [`GameStore::offer_event`]           |
//! | `effects-check` | `getEffects`  | [`GameStore::replace_effects`]       |
//! | `effect-sweep`  | (local)       | [`GameStore::sweep_expired`]         |
//!
//! A failed poll is logged and dropped. The next tick is the retry.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::PollingConfig;
use crate::correlator::SessionLink;
use crate::error::{SyncError, SyncResult};
use crate::protocol::constants::Requests;
use crate::protocol::frames::Request;
use crate::protocol::state::{
    ActiveEffect, EffectsPayload, EventCheck, GameState, SyncPayload, now_millis,
};
use crate::scheduler::TaskSet;
use crate::store::GameStore;

pub const STATE_SYNC_TASK: &str = "state-sync";
pub const EVENT_CHECK_TASK: &str = "event-check";
pub const EFFECTS_CHECK_TASK: &str = "effects-check";
pub const EFFECT_SWEEP_TASK: &str = "effect-sweep";

/// Decode a reply's `data` into the type a request expects.
pub fn decode_reply<T: DeserializeOwned>(request: &str, data: Value) -> SyncResult<T> {
    serde_json::from_value(data).map_err(|e| SyncError::ProtocolError {
        reason: format!("unexpected {request} reply: {e}"),
    })
}

/// Poll `getState` and merge the reply.
pub async fn sync_state(link: &SessionLink, store: &GameStore) -> SyncResult<SyncPayload> {
    let store = store.clone();
    let data = link
        .call_applying(Request::new(Requests::GET_STATE), move |data| {
            let payload: SyncPayload = decode_reply(Requests::GET_STATE, data.clone())?;
            store.apply_sync(&payload);
            Ok(())
        })
        .await?;
    decode_reply(Requests::GET_STATE, data)
}

/// Poll `checkEvents` and offer any eligible event.
///
/// Returns the event key the server reported, whether or not it was
/// presented.
pub async fn check_events(link: &SessionLink, store: &GameStore) -> SyncResult<Option<String>> {
    let store = store.clone();
    let data = link
        .call_applying(Request::new(Requests::CHECK_EVENTS), move |data| {
            let check: EventCheck = decode_reply(Requests::CHECK_EVENTS, data.clone())?;
            if let Some(key) = &check.event_key {
                store.offer_event(key);
            }
            Ok(())
        })
        .await?;
    let check: EventCheck = decode_reply(Requests::CHECK_EVENTS, data)?;
    Ok(check.event_key)
}

/// Poll `getEffects` and replace the active effect list.
pub async fn check_effects(link: &SessionLink, store: &GameStore) -> SyncResult<Vec<ActiveEffect>> {
    let store = store.clone();
    let data = link
        .call_applying(Request::new(Requests::GET_EFFECTS), move |data| {
            let payload: EffectsPayload = decode_reply(Requests::GET_EFFECTS, data.clone())?;
            store.replace_effects(payload.effects, now_millis());
            Ok(())
        })
        .await?;
    let payload: EffectsPayload = decode_reply(Requests::GET_EFFECTS, data)?;
    Ok(payload.effects)
}

/// Request a full snapshot and apply it.
pub async fn full_state(link: &SessionLink, store: &GameStore) -> SyncResult<GameState> {
    let store = store.clone();
    let data = link
        .call_applying(Request::new(Requests::GET_FULL_STATE), move |data| {
            let state: GameState = decode_reply(Requests::GET_FULL_STATE, data.clone())?;
            store.apply_full_state(state, now_millis());
            Ok(())
        })
        .await?;
    decode_reply(Requests::GET_FULL_STATE, data)
}

/// Start the poll and sweep tasks for the session behind `link`.
pub fn start(tasks: &mut TaskSet, link: &SessionLink, store: &GameStore, config: &PollingConfig) {
    if !config.enabled {
        return;
    }

    spawn_poll(
        tasks,
        STATE_SYNC_TASK,
        config.state_sync_interval_ms,
        link,
        store,
        |link, store| async move { sync_state(&link, &store).await.map(|_| ()) },
    );
    spawn_poll(
        tasks,
        EVENT_CHECK_TASK,
        config.event_check_interval_ms,
        link,
        store,
        |link, store| async move { check_events(&link, &store).await.map(|_| ()) },
    );
    spawn_poll(
        tasks,
        EFFECTS_CHECK_TASK,
        config.effects_check_interval_ms,
        link,
        store,
        |link, store| async move { check_effects(&link, &store).await.map(|_| ()) },
    );

    let sweep_store = store.clone();
    tasks.spawn_periodic(
        EFFECT_SWEEP_TASK,
        Duration::from_millis(config.effect_sweep_interval_ms),
        move || {
            sweep_store.sweep_expired(now_millis());
            async {}
        },
    );
}

fn spawn_poll<F, Fut>(
    tasks: &mut TaskSet,
    name: &'static str,
    interval_ms: u64,
    link: &SessionLink,
    store: &GameStore,
    poll: F,
) where
    F: Fn(SessionLink, GameStore) -> Fut + Send + 'static,
    Fut: Future<Output = SyncResult<()>> + Send + 'static,
{
    let link = link.clone();
    let store = store.clone();
    tasks.spawn_periodic(name, Duration::from_millis(interval_ms), move || {
        let run = poll(link.clone(), store.clone());
        async move {
            if let Err(e) = run.await {
                tracing::warn!(task = name, error = %e, "Poll failed");
            }
        }
    });
}
