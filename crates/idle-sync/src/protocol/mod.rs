//! Wire protocol types.
//!
//! - [`constants`]: frame type names, request names, and close codes.
//! - [`frames`]: the outbound [`Request`] and inbound [`ServerFrame`].
//! - [`state`]: game state payloads carried inside frames.

pub mod constants;
pub mod frames;
pub mod state;

pub use constants::{CloseCodes, FrameTypes, Requests};
pub use frames::{Request, ServerFrame};
pub use state::{
    ActiveEffect, EffectsPayload, EventCheck, GameState, MobileUnit, OwnedUnit, Purchasable,
    Resources, SavePayload, SyncPayload,
};
