//! # Local Game Store
//!
//! Client-side copy of the game state and the rules for merging
//! authoritative updates into it.
//!
//! Push frames and poll replies land here through the same handlers, so a
//! `sync` push and a `getState` reply reconcile identically:
//!
//! - Entity collections, the effect list, and (on `fullState`) the
//!   achievement set are replaced wholesale.
//! - Resource totals take the greater of the local and incoming value for
//!   every key covered by [`MaxMergeScope`]. A stale push never lowers a
//!   total the player has just earned locally.
//! - A local [`spend`](GameStore::spend) leaves a mark on its key. Until
//!   an incoming total drops below the pre-spend value, or the settle
//!   window passes, incoming totals for that key are discounted by the
//!   amount spent, so a push that predates the spend cannot refund it.
//! - Achievement unlocks are idempotent and notify once per new key.
//! - At most one narrative event is pending; later triggers are dropped.
//!
//! [`GameStore`] is a cheap-to-clone handle. Observers call
//! [`subscribe`](GameStore::subscribe) for [`StateChange`] notifications.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::config::{MaxMergeScope, ReconcileConfig};
use crate::protocol::state::{
    ActiveEffect, GameState, MobileUnit, OwnedUnit, Purchasable, Resources, SavePayload,
    SyncPayload,
};

/// A change observed by the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    /// At least one resource total changed.
    ResourcesChanged,

    /// One or more entity collections were replaced by a sync.
    CollectionsReplaced,

    /// An achievement was newly unlocked. Emitted once per key.
    AchievementUnlocked { key: String },

    /// A narrative event is now presented to the player.
    EventPresented { key: String },

    /// The presented event was dismissed or resolved.
    EventCleared { key: String },

    /// The effect list was replaced.
    EffectsReplaced { active: usize },

    /// Expired effects were swept locally.
    EffectsExpired { removed: usize },

    /// A full-state snapshot was applied.
    FullStateApplied,
}

/// Local spending on one key the server may not have seen yet.
#[derive(Debug, Clone, Copy)]
struct SpendMark {
    /// Total before the first unsettled spend.
    before: f64,
    /// Sum of unsettled spends.
    amount: f64,
    at: Instant,
}

#[derive(Debug, Default)]
struct LocalState {
    game: GameState,
    pending_event: Option<String>,
    spends: HashMap<String, SpendMark>,
}

struct StoreInner {
    state: Mutex<LocalState>,
    watchers: Mutex<Vec<mpsc::Sender<StateChange>>>,
    max_merge: MaxMergeScope,
    spend_settle: Duration,
    watcher_capacity: usize,
}

/// Shared handle to the local game state.
#[derive(Clone)]
pub struct GameStore {
    inner: Arc<StoreInner>,
}

impl GameStore {
    /// Create an empty store reconciling by `rules`.
    ///
    /// `watcher_capacity` bounds each subscriber's queue.
    pub fn new(rules: &ReconcileConfig, watcher_capacity: usize) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(LocalState::default()),
                watchers: Mutex::new(Vec::new()),
                max_merge: rules.max_merge.clone(),
                spend_settle: rules.spend_settle(),
                watcher_capacity: watcher_capacity.max(1),
            }),
        }
    }

    /// Register for change notifications.
    ///
    /// A subscriber that falls behind misses notifications; the store
    /// never waits on it.
    pub fn subscribe(&self) -> mpsc::Receiver<StateChange> {
        let (tx, rx) = mpsc::channel(self.inner.watcher_capacity);
        lock(&self.inner.watchers).push(tx);
        rx
    }

    // ─── Authoritative updates ──────────────────────────────────────────

    /// Apply a `sync` push or `getState` reply.
    pub fn apply_sync(&self, payload: &SyncPayload) {
        let mut changes = Vec::new();
        {
            let mut state = self.state();
            if let Some(incoming) = &payload.resources {
                if self.merge_resources(&mut state, incoming) {
                    changes.push(StateChange::ResourcesChanged);
                }
            }

            let mut replaced = false;
            if let Some(units) = &payload.units {
                state.game.units.clone_from(units);
                replaced = true;
            }
            if let Some(purchasables) = &payload.purchasables {
                state.game.purchasables.clone_from(purchasables);
                replaced = true;
            }
            if let Some(mobile_units) = &payload.mobile_units {
                state.game.mobile_units.clone_from(mobile_units);
                replaced = true;
            }
            if replaced {
                changes.push(StateChange::CollectionsReplaced);
            }
        }
        self.notify(changes);
    }

    /// Apply a `fullState` snapshot.
    ///
    /// Everything is replaced except resource totals, play time and click
    /// count, which keep the greater value, and the pending event, which
    /// survives.
    pub fn apply_full_state(&self, snapshot: GameState, now_ms: u64) {
        {
            let mut state = self.state();
            let GameState {
                resources,
                units,
                purchasables,
                mobile_units,
                effects,
                achievements,
                play_time_secs,
                click_count,
            } = snapshot;

            self.merge_resources(&mut state, &resources);
            state.game.units = units;
            state.game.purchasables = purchasables;
            state.game.mobile_units = mobile_units;
            state.game.effects = live_effects(effects, now_ms);
            state.game.achievements = achievements;
            state.game.play_time_secs = state.game.play_time_secs.max(play_time_secs);
            state.game.click_count = state.game.click_count.max(click_count);
        }
        self.notify(vec![StateChange::FullStateApplied]);
    }

    /// Mark achievements unlocked. Returns the keys that were not already
    /// unlocked, in input order without repeats.
    pub fn unlock_achievements(&self, keys: &[String]) -> Vec<String> {
        let newly: Vec<String> = {
            let mut state = self.state();
            keys.iter()
                .filter(|key| state.game.achievements.insert((*key).clone()))
                .cloned()
                .collect()
        };
        self.notify(
            newly
                .iter()
                .map(|key| StateChange::AchievementUnlocked { key: key.clone() })
                .collect(),
        );
        newly
    }

    /// Present `key` unless another event is already pending.
    ///
    /// Returns `true` when the event was accepted.
    pub fn offer_event(&self, key: &str) -> bool {
        {
            let mut state = self.state();
            if let Some(current) = &state.pending_event {
                tracing::debug!(pending = %current, dropped = key, "Event already presented");
                return false;
            }
            state.pending_event = Some(key.to_string());
        }
        self.notify(vec![StateChange::EventPresented {
            key: key.to_string(),
        }]);
        true
    }

    /// Clear the pending event, returning it.
    pub fn dismiss_event(&self) -> Option<String> {
        let cleared = self.state().pending_event.take();
        if let Some(key) = &cleared {
            self.notify(vec![StateChange::EventCleared { key: key.clone() }]);
        }
        cleared
    }

    /// Clear the pending event only if it is `key`.
    pub(crate) fn clear_event_if(&self, key: &str) -> bool {
        let cleared = {
            let mut state = self.state();
            if state.pending_event.as_deref() == Some(key) {
                state.pending_event = None;
                true
            } else {
                false
            }
        };
        if cleared {
            self.notify(vec![StateChange::EventCleared {
                key: key.to_string(),
            }]);
        }
        cleared
    }

    /// Replace the active effect list, dropping entries already expired.
    pub fn replace_effects(&self, effects: Vec<ActiveEffect>, now_ms: u64) {
        let active = {
            let mut state = self.state();
            state.game.effects = live_effects(effects, now_ms);
            state.game.effects.len()
        };
        self.notify(vec![StateChange::EffectsReplaced { active }]);
    }

    /// Remove effects whose expiry has passed. Returns how many were removed.
    pub fn sweep_expired(&self, now_ms: u64) -> usize {
        let removed = {
            let mut state = self.state();
            let before = state.game.effects.len();
            state.game.effects.retain(|effect| !effect.is_expired(now_ms));
            before - state.game.effects.len()
        };
        if removed > 0 {
            tracing::debug!(removed, "Swept expired effects");
            self.notify(vec![StateChange::EffectsExpired { removed }]);
        }
        removed
    }

    // ─── Optimistic local mutations ─────────────────────────────────────

    /// Add `amount` to a resource total. Returns the new total.
    pub fn add_resource(&self, key: &str, amount: f64) -> f64 {
        let total = {
            let mut state = self.state();
            let entry = state.game.resources.entry(key.to_string()).or_insert(0.0);
            *entry += amount;
            *entry
        };
        self.notify(vec![StateChange::ResourcesChanged]);
        total
    }

    /// Deduct `amount` from a resource if the total covers it.
    ///
    /// Returns `false` and leaves the total untouched otherwise. The spend
    /// is remembered until the server's totals reflect it.
    pub fn spend(&self, key: &str, amount: f64) -> bool {
        {
            let mut guard = self.state();
            let state = &mut *guard;
            let before = match state.game.resources.get_mut(key) {
                Some(total) if *total >= amount => {
                    let before = *total;
                    *total -= amount;
                    before
                }
                _ => return false,
            };
            let now = Instant::now();
            state
                .spends
                .entry(key.to_string())
                .and_modify(|mark| {
                    mark.amount += amount;
                    mark.at = now;
                })
                .or_insert(SpendMark {
                    before,
                    amount,
                    at: now,
                });
        }
        self.notify(vec![StateChange::ResourcesChanged]);
        true
    }

    /// Count one player click.
    pub fn record_click(&self) -> u64 {
        let mut state = self.state();
        state.game.click_count += 1;
        state.game.click_count
    }

    /// Accumulate play time.
    pub fn add_play_time(&self, secs: u64) -> u64 {
        let mut state = self.state();
        state.game.play_time_secs = state.game.play_time_secs.saturating_add(secs);
        state.game.play_time_secs
    }

    // ─── Reads ──────────────────────────────────────────────────────────

    /// Locally authoritative fields for the periodic save frame.
    pub fn save_payload(&self) -> SavePayload {
        let state = self.state();
        SavePayload {
            resources: state.game.resources.clone(),
            play_time_secs: state.game.play_time_secs,
            click_count: state.game.click_count,
        }
    }

    /// Copy of the whole game state.
    pub fn snapshot(&self) -> GameState {
        self.state().game.clone()
    }

    pub fn resource(&self, key: &str) -> Option<f64> {
        self.state().game.resources.get(key).copied()
    }

    pub fn resources(&self) -> Resources {
        self.state().game.resources.clone()
    }

    pub fn units(&self) -> Vec<OwnedUnit> {
        self.state().game.units.clone()
    }

    pub fn purchasables(&self) -> Vec<Purchasable> {
        self.state().game.purchasables.clone()
    }

    pub fn mobile_units(&self) -> Vec<MobileUnit> {
        self.state().game.mobile_units.clone()
    }

    pub fn effects(&self) -> Vec<ActiveEffect> {
        self.state().game.effects.clone()
    }

    pub fn achievements(&self) -> BTreeSet<String> {
        self.state().game.achievements.clone()
    }

    pub fn is_unlocked(&self, key: &str) -> bool {
        self.state().game.achievements.contains(key)
    }

    /// The event currently presented to the player, if any.
    pub fn pending_event(&self) -> Option<String> {
        self.state().pending_event.clone()
    }

    fn state(&self) -> MutexGuard<'_, LocalState> {
        lock(&self.inner.state)
    }

    /// Merge incoming totals into the local ones. Returns whether any
    /// total changed.
    #[allow(clippy::float_cmp)]
    fn merge_resources(&self, state: &mut LocalState, incoming: &Resources) -> bool {
        let LocalState { game, spends, .. } = state;
        let settle = self.inner.spend_settle;
        spends.retain(|_, mark| mark.at.elapsed() < settle);

        let mut changed = false;
        for (key, &value) in incoming {
            let merged = match game.resources.get(key) {
                Some(&current) if self.inner.max_merge.covers(key) => {
                    match spends.get(key).copied() {
                        // Predates the spend.
                        Some(mark) if value >= mark.before => current.max(value - mark.amount),
                        Some(_) => {
                            tracing::trace!(key = %key, "Spend reflected by server");
                            spends.remove(key);
                            current.max(value)
                        }
                        None => current.max(value),
                    }
                }
                _ => value,
            };
            let previous = game.resources.insert(key.clone(), merged);
            if previous != Some(merged) {
                changed = true;
            }
        }
        changed
    }

    /// Deliver notifications to every live subscriber, dropping closed ones.
    fn notify(&self, changes: Vec<StateChange>) {
        if changes.is_empty() {
            return;
        }
        let mut watchers = lock(&self.inner.watchers);
        watchers.retain(|tx| !tx.is_closed());
        for change in changes {
            for tx in watchers.iter() {
                if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(change.clone()) {
                    tracing::trace!("Change subscriber full, notification skipped");
                }
            }
        }
    }
}

impl std::fmt::Debug for GameStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameStore")
            .field("max_merge", &self.inner.max_merge)
            .finish_non_exhaustive()
    }
}

fn live_effects(mut effects: Vec<ActiveEffect>, now_ms: u64) -> Vec<ActiveEffect> {
    effects.retain(|effect| !effect.is_expired(now_ms));
    effects
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn store() -> GameStore {
        GameStore::new(&ReconcileConfig::default(), 16)
    }

    fn scoped(max_merge: MaxMergeScope, spend_settle_ms: u64) -> ReconcileConfig {
        ReconcileConfig {
            max_merge,
            spend_settle_ms,
        }
    }

    fn sync_gold(store: &GameStore, gold: f64) {
        store.apply_sync(&SyncPayload {
            resources: Some(resources(&[("gold", gold)])),
            ..SyncPayload::default()
        });
    }

    fn resources(pairs: &[(&str, f64)]) -> Resources {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    fn effect(kind: &str, expires_at: u64) -> ActiveEffect {
        ActiveEffect {
            kind: kind.into(),
            target: None,
            magnitude: 2.0,
            expires_at,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<StateChange>) -> Vec<StateChange> {
        let mut out = Vec::new();
        while let Ok(change) = rx.try_recv() {
            out.push(change);
        }
        out
    }

    #[test]
    fn test_stale_sync_never_lowers_a_total() {
        let store = store();
        store.add_resource("gold", 100.0);
        store.add_resource("gold", 5.0);

        store.apply_sync(&SyncPayload {
            resources: Some(resources(&[("gold", 100.0), ("wood", 3.0)])),
            ..SyncPayload::default()
        });

        assert_eq!(store.resource("gold"), Some(105.0));
        assert_eq!(store.resource("wood"), Some(3.0));
    }

    #[test]
    fn test_newer_sync_raises_a_total() {
        let store = store();
        store.add_resource("gold", 10.0);
        store.apply_sync(&SyncPayload {
            resources: Some(resources(&[("gold", 250.0)])),
            ..SyncPayload::default()
        });
        assert_eq!(store.resource("gold"), Some(250.0));
    }

    #[test]
    fn test_scoped_max_merge_only_protects_listed_keys() {
        let store = GameStore::new(&scoped(MaxMergeScope::Only(vec!["gold".into()]), 15_000), 4);
        store.add_resource("gold", 50.0);
        store.add_resource("wood", 50.0);

        store.apply_sync(&SyncPayload {
            resources: Some(resources(&[("gold", 10.0), ("wood", 10.0)])),
            ..SyncPayload::default()
        });

        assert_eq!(store.resource("gold"), Some(50.0));
        assert_eq!(store.resource("wood"), Some(10.0));
    }

    #[test]
    fn test_sync_replaces_present_collections_only() {
        let store = store();
        store.apply_sync(&SyncPayload {
            units: Some(vec![OwnedUnit {
                key: "miner".into(),
                count: 2,
                extra: Map::new(),
            }]),
            purchasables: Some(vec![Purchasable {
                key: "pickaxe".into(),
                purchased: false,
                extra: Map::new(),
            }]),
            ..SyncPayload::default()
        });

        store.apply_sync(&SyncPayload {
            units: Some(vec![]),
            ..SyncPayload::default()
        });

        assert!(store.units().is_empty());
        assert_eq!(store.purchasables().len(), 1);
    }

    #[test]
    fn test_duplicate_achievement_notifies_once() {
        let store = store();
        let mut rx = store.subscribe();

        let first = store.unlock_achievements(&["a".into(), "b".into(), "a".into()]);
        let second = store.unlock_achievements(&["a".into()]);

        assert_eq!(first, vec!["a".to_string(), "b".to_string()]);
        assert!(second.is_empty());
        assert_eq!(
            drain(&mut rx),
            vec![
                StateChange::AchievementUnlocked { key: "a".into() },
                StateChange::AchievementUnlocked { key: "b".into() },
            ]
        );
    }

    #[test]
    fn test_first_event_wins() {
        let store = store();
        assert!(store.offer_event("storm"));
        assert!(!store.offer_event("merchant"));
        assert_eq!(store.pending_event().as_deref(), Some("storm"));

        assert_eq!(store.dismiss_event().as_deref(), Some("storm"));
        assert!(store.offer_event("merchant"));
    }

    #[test]
    fn test_clear_event_if_matches_key() {
        let store = store();
        store.offer_event("storm");
        assert!(!store.clear_event_if("merchant"));
        assert!(store.clear_event_if("storm"));
        assert!(store.pending_event().is_none());
    }

    #[test]
    fn test_effects_replace_and_sweep() {
        let store = store();
        store.replace_effects(vec![effect("boost", 1_000), effect("stale", 10)], 100);
        assert_eq!(store.effects().len(), 1);

        assert_eq!(store.sweep_expired(999), 0);
        assert_eq!(store.sweep_expired(1_000), 1);
        assert!(store.effects().is_empty());
    }

    #[test]
    fn test_full_state_replaces_but_keeps_monotonic_counters() {
        let store = store();
        store.add_resource("gold", 40.0);
        for _ in 0..3 {
            store.record_click();
        }
        store.unlock_achievements(&["old".into()]);
        store.offer_event("storm");

        let snapshot = GameState {
            resources: resources(&[("gold", 30.0), ("gems", 1.0)]),
            achievements: BTreeSet::from(["new".to_string()]),
            click_count: 1,
            play_time_secs: 600,
            effects: vec![effect("boost", 5_000)],
            ..GameState::default()
        };
        store.apply_full_state(snapshot, 1_000);

        assert_eq!(store.resource("gold"), Some(40.0));
        assert_eq!(store.resource("gems"), Some(1.0));
        assert_eq!(store.snapshot().click_count, 3);
        assert_eq!(store.snapshot().play_time_secs, 600);
        assert!(!store.is_unlocked("old"));
        assert!(store.is_unlocked("new"));
        assert_eq!(store.effects().len(), 1);
        assert_eq!(store.pending_event().as_deref(), Some("storm"));

        // Known through the snapshot, so no notice.
        assert!(store.unlock_achievements(&["new".into()]).is_empty());
    }

    #[test]
    fn test_spend_is_optimistic_and_bounded() {
        let store = store();
        store.add_resource("gold", 10.0);
        assert!(store.spend("gold", 4.0));
        assert!(!store.spend("gold", 100.0));
        assert!(!store.spend("wood", 1.0));
        assert_eq!(store.resource("gold"), Some(6.0));
    }

    #[test]
    fn test_stale_sync_cannot_refund_a_spend() {
        let store = store();
        store.add_resource("gold", 100.0);
        assert!(store.spend("gold", 40.0));

        // Sent before the server applied the purchase.
        sync_gold(&store, 100.0);
        assert_eq!(store.resource("gold"), Some(60.0));

        sync_gold(&store, 60.0);
        assert_eq!(store.resource("gold"), Some(60.0));

        // Settled: ordinary max-merge again.
        sync_gold(&store, 75.0);
        assert_eq!(store.resource("gold"), Some(75.0));
        sync_gold(&store, 60.0);
        assert_eq!(store.resource("gold"), Some(75.0));
    }

    #[test]
    fn test_consecutive_spends_accumulate() {
        let store = store();
        store.add_resource("gold", 100.0);
        store.spend("gold", 30.0);
        store.spend("gold", 20.0);

        sync_gold(&store, 100.0);
        assert_eq!(store.resource("gold"), Some(50.0));

        sync_gold(&store, 70.0);
        assert_eq!(store.resource("gold"), Some(70.0));
    }

    #[test]
    fn test_stale_sync_still_raises_past_a_spend() {
        let store = store();
        store.add_resource("gold", 100.0);
        store.spend("gold", 40.0);

        // Income the server earned on top of the pre-spend total.
        sync_gold(&store, 130.0);
        assert_eq!(store.resource("gold"), Some(90.0));
    }

    #[test]
    fn test_spend_mark_expires_after_settle_window() {
        let store = GameStore::new(&scoped(MaxMergeScope::All, 20), 4);
        store.add_resource("gold", 100.0);
        store.spend("gold", 40.0);

        std::thread::sleep(Duration::from_millis(40));

        // Past the window the server total is taken at face value.
        sync_gold(&store, 110.0);
        assert_eq!(store.resource("gold"), Some(110.0));
    }

    #[test]
    fn test_spend_tracking_off() {
        let store = GameStore::new(&scoped(MaxMergeScope::All, 0), 4);
        store.add_resource("gold", 100.0);
        store.spend("gold", 40.0);
        sync_gold(&store, 100.0);
        assert_eq!(store.resource("gold"), Some(100.0));
    }

    #[test]
    fn test_save_payload_reflects_local_fields() {
        let store = store();
        store.add_resource("gold", 7.0);
        store.record_click();
        store.add_play_time(90);

        let payload = store.save_payload();
        assert_eq!(payload.resources["gold"], 7.0);
        assert_eq!(payload.click_count, 1);
        assert_eq!(payload.play_time_secs, 90);
    }

    #[test]
    fn test_full_subscriber_does_not_block() {
        let store = GameStore::new(&ReconcileConfig::default(), 1);
        let mut rx = store.subscribe();
        store.offer_event("a");
        store.dismiss_event();
        store.offer_event("b");

        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(store.pending_event().as_deref(), Some("b"));
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let store = store();
        drop(store.subscribe());
        let mut live = store.subscribe();
        store.add_resource("gold", 1.0);
        assert_eq!(drain(&mut live), vec![StateChange::ResourcesChanged]);
        assert_eq!(lock(&store.inner.watchers).len(), 1);
    }
}
