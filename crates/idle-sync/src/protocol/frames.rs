//! Wire frames.
//!
//! Every frame is a JSON object keyed by a `type` discriminator.
//! Outbound frames are built as [`Request`]; inbound frames parse into
//! [`ServerFrame`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{SyncError, SyncResult};
use crate::protocol::constants::{CORRELATION_ID_FIELD, TYPE_FIELD};
use crate::protocol::state::{ActiveEffect, GameState, SyncPayload};

/// A client-to-server frame: `{ type, ...params, correlationId? }`.
///
/// Without a correlation id the frame is fire-and-forget.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(flatten)]
    pub params: Map<String, Value>,

    #[serde(rename = "correlationId", skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<u64>,
}

impl Request {
    /// Create a frame with no parameters.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: Map::new(),
            correlation_id: None,
        }
    }

    /// Create a frame whose parameters are the fields of `params`.
    ///
    /// Objects are spread into the frame; `null` means no parameters; any
    /// other value is carried under a `value` key. `type` and
    /// `correlationId` keys are reserved and dropped.
    pub fn with_params(kind: impl Into<String>, params: Value) -> Self {
        let mut request = Self::new(kind);
        match params {
            Value::Object(mut map) => {
                map.remove(TYPE_FIELD);
                map.remove(CORRELATION_ID_FIELD);
                request.params = map;
            }
            Value::Null => {}
            other => {
                request.params.insert("value".into(), other);
            }
        }
        request
    }

    /// Attach a correlation id, turning this into a correlated request.
    #[must_use]
    pub fn correlated(mut self, id: u64) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn to_json(&self) -> SyncResult<String> {
        serde_json::to_string(self).map_err(|e| SyncError::ProtocolError {
            reason: format!("serialize error: {e}"),
        })
    }
}

/// A server-to-client frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    /// Successful reply to a correlated request.
    Result {
        #[serde(rename = "correlationId")]
        correlation_id: u64,
        #[serde(default)]
        data: Value,
    },

    /// Failed reply. Servers may also push uncorrelated errors, which are
    /// only logged.
    Error {
        #[serde(rename = "correlationId", default)]
        correlation_id: Option<u64>,
        #[serde(default)]
        message: String,
    },

    /// Partial collection sync.
    Sync(SyncPayload),

    /// Achievement keys the server has just unlocked.
    AchievementUnlocked {
        #[serde(default)]
        achievements: Vec<String>,
    },

    /// A narrative event became eligible.
    EventTriggered {
        #[serde(rename = "eventKey")]
        event_key: String,
    },

    /// Full replacement of the active effect list.
    EffectsUpdate {
        #[serde(default)]
        effects: Vec<ActiveEffect>,
    },

    /// Entire game state.
    FullState { state: GameState },

    /// Keepalive acknowledgment.
    Pong {
        #[serde(default)]
        timestamp: Option<u64>,
    },
}

impl ServerFrame {
    /// Parse one inbound text frame.
    pub fn parse(text: &str) -> SyncResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// The frame's `type` discriminator.
    pub fn kind(&self) -> &'static str {
        use crate::protocol::constants::FrameTypes;
        match self {
            ServerFrame::Result { .. } => FrameTypes::RESULT,
            ServerFrame::Error { .. } => FrameTypes::ERROR,
            ServerFrame::Sync(_) => FrameTypes::SYNC,
            ServerFrame::AchievementUnlocked { .. } => FrameTypes::ACHIEVEMENT_UNLOCKED,
            ServerFrame::EventTriggered { .. } => FrameTypes::EVENT_TRIGGERED,
            ServerFrame::EffectsUpdate { .. } => FrameTypes::EFFECTS_UPDATE,
            ServerFrame::FullState { .. } => FrameTypes::FULL_STATE,
            ServerFrame::Pong { .. } => FrameTypes::PONG,
        }
    }
}
