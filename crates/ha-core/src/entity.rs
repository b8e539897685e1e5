//! Capability trait for anything that publishes a state into the state store

use std::collections::HashMap;

use crate::EntityId;

/// A publishable state holder
///
/// Components implement this on plain structs and hand them to the state
/// store, which turns the reported values into a [`State`](crate::State).
/// `friendly_name` is added from [`Entity::name`] at publish time.
pub trait Entity: Send + Sync {
    /// Entity ID the state is published under
    fn entity_id(&self) -> &EntityId;

    /// Stable identifier that survives renames
    fn unique_id(&self) -> Option<&str> {
        None
    }

    /// Display name
    fn name(&self) -> Option<&str> {
        None
    }

    /// Current state value in its serialized form
    fn state(&self) -> String;

    fn extra_state_attributes(&self) -> HashMap<String, serde_json::Value> {
        HashMap::new()
    }
}
