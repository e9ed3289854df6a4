//! # Local Save
//!
//! Periodically fires the locally authoritative fields (resource totals,
//! play time, click count) as a `save` frame. Best effort: a failed send
//! is logged and the next tick supersedes it.

use std::time::Duration;

use crate::config::SaveConfig;
use crate::correlator::SessionLink;
use crate::protocol::constants::Requests;
use crate::protocol::frames::Request;
use crate::scheduler::TaskSet;
use crate::store::GameStore;

/// Task name in the session's [`TaskSet`].
pub const SAVE_TASK: &str = "save";

/// Build the `save` frame from the store's current contents.
pub fn save_frame(store: &GameStore) -> Option<Request> {
    match serde_json::to_value(store.save_payload()) {
        Ok(params) => Some(Request::with_params(Requests::SAVE, params)),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize save payload");
            None
        }
    }
}

/// Start the save timer for the session behind `link`.
pub fn start(tasks: &mut TaskSet, link: &SessionLink, store: &GameStore, config: &SaveConfig) {
    if !config.enabled {
        return;
    }

    let link = link.clone();
    let store = store.clone();
    tasks.spawn_periodic(
        SAVE_TASK,
        Duration::from_millis(config.interval_ms),
        move || {
            let link = link.clone();
            let frame = save_frame(&store);
            async move {
                if let Some(frame) = frame {
                    if link.is_open() {
                        link.fire(frame).await;
                    }
                }
            }
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconcileConfig;

    #[test]
    fn test_save_frame_shape() {
        let store = GameStore::new(&ReconcileConfig::default(), 4);
        store.add_resource("gold", 12.0);
        store.record_click();
        store.add_play_time(30);

        let frame = save_frame(&store).unwrap();
        let json: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();

        assert_eq!(json["type"], "save");
        assert_eq!(json["resources"]["gold"], 12.0);
        assert_eq!(json["playTimeSecs"], 30);
        assert_eq!(json["clickCount"], 1);
        assert!(json.get("correlationId").is_none());
    }
}
