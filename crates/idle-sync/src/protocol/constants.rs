//! Protocol constants for frame types, request names, and close codes.

/// Field carrying the frame discriminator.
pub const TYPE_FIELD: &str = "type";

/// Field carrying the correlation id on requests and replies.
pub const CORRELATION_ID_FIELD: &str = "correlationId";

/// Query parameter carrying the session token on the connect URL.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Server-to-client frame types.
pub struct FrameTypes;

impl FrameTypes {
    // ─── Correlated replies ─────────────────────────────────────────

    /// Successful reply to a correlated request.
    pub const RESULT: &'static str = "result";

    /// Failed reply to a correlated request.
    pub const ERROR: &'static str = "error";

    // ─── Push ───────────────────────────────────────────────────────

    /// Partial entity-collection sync.
    pub const SYNC: &'static str = "sync";

    /// Newly unlocked achievement keys.
    pub const ACHIEVEMENT_UNLOCKED: &'static str = "achievementUnlocked";

    /// A narrative event became eligible.
    pub const EVENT_TRIGGERED: &'static str = "eventTriggered";

    /// Full replacement of the active effect list.
    pub const EFFECTS_UPDATE: &'static str = "effectsUpdate";

    /// Entire game state.
    pub const FULL_STATE: &'static str = "fullState";

    /// Keepalive acknowledgment.
    pub const PONG: &'static str = "pong";

    /// All push frame types (replies excluded).
    pub const PUSH: &'static [&'static str] = &[
        Self::SYNC,
        Self::ACHIEVEMENT_UNLOCKED,
        Self::EVENT_TRIGGERED,
        Self::EFFECTS_UPDATE,
        Self::FULL_STATE,
        Self::PONG,
    ];
}

/// Client-to-server request types.
pub struct Requests;

impl Requests {
    // ─── Reconciliation polls (correlated) ──────────────────────────

    /// Current entity collections and resource totals.
    pub const GET_STATE: &'static str = "getState";

    /// Whether a narrative event is eligible right now.
    pub const CHECK_EVENTS: &'static str = "checkEvents";

    /// Current active effect list.
    pub const GET_EFFECTS: &'static str = "getEffects";

    // ─── Other correlated calls ─────────────────────────────────────

    /// Entire game state, used for cold start and desync recovery.
    pub const GET_FULL_STATE: &'static str = "getFullState";

    /// Submit the player's choice for the presented event.
    pub const RESOLVE_EVENT: &'static str = "resolveEvent";

    // ─── Fire-and-forget ────────────────────────────────────────────

    /// Liveness frame.
    pub const PING: &'static str = "ping";

    /// Locally-authoritative mutable fields.
    pub const SAVE: &'static str = "save";
}

/// WebSocket close codes with protocol meaning.
pub struct CloseCodes;

impl CloseCodes {
    /// Deliberate close.
    pub const NORMAL: u16 = 1000;

    /// Endpoint going away (server restart).
    pub const GOING_AWAY: u16 = 1001;

    /// The server rejected the session token. Never retried.
    pub const AUTH_REJECTED: u16 = 4001;
}
