//! Game state payloads carried by `sync`, `fullState`, `effectsUpdate`
//! and the matching poll replies.
//!
//! Entity types keep any fields this crate does not interpret in an
//! `extra` map so that they survive a round trip to the presentation
//! layer untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Numeric resource totals keyed by resource name.
pub type Resources = BTreeMap<String, f64>;

/// A production unit the player owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnedUnit {
    pub key: String,

    #[serde(default)]
    pub count: u64,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An upgrade offered in the shop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Purchasable {
    pub key: String,

    #[serde(default)]
    pub purchased: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A unit sent out on an expedition, with its server-side status
/// (e.g. `"traveling"`, `"returned"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MobileUnit {
    pub id: String,

    pub status: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A timed buff or debuff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveEffect {
    /// Effect kind, e.g. `"productionMultiplier"`.
    pub kind: String,

    /// Resource the effect applies to, if it is resource-specific.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    pub magnitude: f64,

    /// Expiry as Unix milliseconds.
    pub expires_at: u64,
}

impl ActiveEffect {
    /// Whether the effect has expired at `now_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at <= now_ms
    }
}

/// Partial collections carried by a `sync` push or a `getState` reply.
///
/// Absent collections leave the local copy untouched; present ones
/// replace it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<Vec<OwnedUnit>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchasables: Option<Vec<Purchasable>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile_units: Option<Vec<MobileUnit>>,
}

impl SyncPayload {
    /// Whether the payload carries nothing.
    pub fn is_empty(&self) -> bool {
        self.resources.is_none()
            && self.units.is_none()
            && self.purchasables.is_none()
            && self.mobile_units.is_none()
    }
}

/// The entire client-visible game state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    #[serde(default)]
    pub resources: Resources,

    #[serde(default)]
    pub units: Vec<OwnedUnit>,

    #[serde(default)]
    pub purchasables: Vec<Purchasable>,

    #[serde(default)]
    pub mobile_units: Vec<MobileUnit>,

    #[serde(default)]
    pub effects: Vec<ActiveEffect>,

    #[serde(default)]
    pub achievements: BTreeSet<String>,

    #[serde(default)]
    pub play_time_secs: u64,

    #[serde(default)]
    pub click_count: u64,
}

/// Reply to `checkEvents`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCheck {
    #[serde(default)]
    pub event_key: Option<String>,
}

/// Reply to `getEffects`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectsPayload {
    #[serde(default)]
    pub effects: Vec<ActiveEffect>,
}

/// Body of the periodic `save` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePayload {
    pub resources: Resources,
    pub play_time_secs: u64,
    pub click_count: u64,
}

/// Current wall-clock time as Unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
