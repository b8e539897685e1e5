//! State change tracking helpers built on top of callback listeners

use std::collections::HashSet;

use ha_core::events::{StateChangedData, STATE_CHANGED};
use ha_core::{EntityId, State};
use tracing::{trace, warn};

use crate::{EventBus, ListenerId};

/// Call `action` whenever one of `entity_ids` changes state
///
/// The action receives the entity ID plus the old and new state; either may
/// be `None` when the entity was just added or removed. Changes to any other
/// entity are ignored. Remove the returned listener to stop tracking.
pub fn track_state_change<F>(bus: &EventBus, entity_ids: &[EntityId], action: F) -> ListenerId
where
    F: Fn(&EntityId, Option<&State>, Option<&State>) + Send + Sync + 'static,
{
    let tracked: HashSet<String> = entity_ids.iter().map(ToString::to_string).collect();
    trace!(?tracked, "Tracking state changes");

    bus.listen(STATE_CHANGED, move |event| {
        let is_tracked = event
            .data
            .get("entity_id")
            .and_then(|v| v.as_str())
            .is_some_and(|id| tracked.contains(id));
        if !is_tracked {
            return;
        }

        match serde_json::from_value::<StateChangedData>(event.data.clone()) {
            Ok(data) => action(
                &data.entity_id,
                data.old_state.as_ref(),
                data.new_state.as_ref(),
            ),
            Err(e) => warn!("Malformed state_changed event: {}", e),
        }
    })
}
