//! Core types for Home Assistant
//!
//! This crate provides the fundamental types shared by the host crates and
//! the built-in components: EntityId, State, Event, Context, and the Entity
//! capability trait that components implement to publish state.

mod context;
mod entity;
mod entity_id;
mod event;
mod state;

pub use context::Context;
pub use entity::Entity;
pub use entity_id::{is_valid_slug, slugify, EntityId, EntityIdError};
pub use event::{Event, EventData, EventOrigin, EventType};
pub use state::State;

/// State value for entities that are currently unreachable
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// State value used when the actual state is not known
pub const STATE_UNKNOWN: &str = "unknown";

/// Well-known state attribute keys
pub mod attributes {
    pub const ATTR_FRIENDLY_NAME: &str = "friendly_name";
    pub const ATTR_ICON: &str = "icon";
    pub const ATTR_LATITUDE: &str = "latitude";
    pub const ATTR_LONGITUDE: &str = "longitude";
    pub const ATTR_RADIUS: &str = "radius";
    pub const ATTR_PASSIVE: &str = "passive";

    /// Accuracy of a tracked device's GPS fix, in meters
    pub const ATTR_GPS_ACCURACY: &str = "gps_accuracy";
}

/// Standard event types used by Home Assistant
pub mod events {
    use super::*;

    /// Event type for state changes
    pub const STATE_CHANGED: &str = "state_changed";

    /// Event type for state reported (unchanged state was written)
    pub const STATE_REPORTED: &str = "state_reported";

    /// Data for STATE_CHANGED events
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateChangedData {
        pub entity_id: EntityId,
        pub old_state: Option<State>,
        pub new_state: Option<State>,
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }

    /// Data for STATE_REPORTED events (when state is unchanged but reported)
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateReportedData {
        pub entity_id: EntityId,
        pub new_state: State,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub old_last_reported: Option<chrono::DateTime<chrono::Utc>>,
        pub last_reported: chrono::DateTime<chrono::Utc>,
    }

    impl EventData for StateReportedData {
        fn event_type() -> &'static str {
            STATE_REPORTED
        }
    }
}
