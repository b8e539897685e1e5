//! Entity state storage with domain indexing for Home Assistant
//!
//! This crate provides the StateStore, which tracks the current state of
//! all entities. It maintains indices by domain and announces every write on
//! the event bus: STATE_CHANGED when the value or attributes differ from the
//! previous state, STATE_REPORTED when an identical state is written again.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use ha_core::attributes::ATTR_FRIENDLY_NAME;
use ha_core::events::{StateChangedData, StateReportedData};
use ha_core::{Context, Entity, EntityId, State};
use ha_event_bus::EventBus;
use tracing::{debug, instrument, trace};

/// The state store tracks all entity states
pub struct StateStore {
    /// All entity states keyed by entity_id string
    states: DashMap<String, State>,
    /// Index of entity_ids by domain
    domain_index: DashMap<String, Vec<String>>,
    event_bus: Arc<EventBus>,
}

impl StateStore {
    /// Create a new state store firing on the given event bus
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            states: DashMap::new(),
            domain_index: DashMap::new(),
            event_bus,
        }
    }

    /// Set the state of an entity
    ///
    /// `last_changed` only moves when the state value differs. Writing a
    /// state identical to the current one (value and attributes) fires
    /// STATE_REPORTED instead of STATE_CHANGED.
    #[instrument(skip(self, state, attributes, context), fields(entity_id = %entity_id))]
    pub fn set(
        &self,
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> State {
        let entity_id_str = entity_id.to_string();
        let state = state.into();

        let old_state = self.get(&entity_id_str);

        if let Some(existing) = &old_state {
            if existing.state == state && existing.attributes == attributes {
                return self.report(existing, context);
            }
        }

        let new_state = match &old_state {
            Some(existing) => existing.with_update(state, attributes, context.clone()),
            None => State::new(entity_id.clone(), state, attributes, context.clone()),
        };

        debug!(
            state = %new_state.state,
            changed = old_state.as_ref().map(|s| s.state != new_state.state).unwrap_or(true),
            "Setting entity state"
        );

        self.states.insert(entity_id_str.clone(), new_state.clone());

        if old_state.is_none() {
            self.domain_index
                .entry(entity_id.domain().to_string())
                .or_default()
                .push(entity_id_str);
        }

        self.event_bus.fire_typed(
            StateChangedData {
                entity_id,
                old_state,
                new_state: Some(new_state.clone()),
            },
            context,
        );

        new_state
    }

    /// Refresh `last_reported` on an unchanged state
    fn report(&self, existing: &State, context: Context) -> State {
        trace!("State unchanged, reporting");

        let mut reported = existing.clone();
        let now = chrono::Utc::now();
        reported.last_reported = Some(now);
        self.states
            .insert(existing.entity_id.to_string(), reported.clone());

        self.event_bus.fire_typed(
            StateReportedData {
                entity_id: existing.entity_id.clone(),
                new_state: reported.clone(),
                old_last_reported: existing.last_reported,
                last_reported: now,
            },
            context,
        );

        reported
    }

    /// Publish the current state of an entity
    ///
    /// The entity's name becomes the `friendly_name` attribute.
    pub fn write_entity(&self, entity: &dyn Entity, context: Context) -> State {
        let mut attributes = entity.extra_state_attributes();
        if let Some(name) = entity.name() {
            attributes.insert(ATTR_FRIENDLY_NAME.to_string(), name.into());
        }

        self.set(entity.entity_id().clone(), entity.state(), attributes, context)
    }

    /// Get the current state of an entity
    pub fn get(&self, entity_id: &str) -> Option<State> {
        self.states.get(entity_id).map(|s| s.clone())
    }

    /// Get the state value as a string, or None if entity doesn't exist
    pub fn get_state(&self, entity_id: &str) -> Option<String> {
        self.states.get(entity_id).map(|s| s.state.clone())
    }

    pub fn is_state(&self, entity_id: &str, state: &str) -> bool {
        self.get_state(entity_id).as_deref() == Some(state)
    }

    /// Get all entity IDs for a domain
    pub fn entity_ids(&self, domain: &str) -> Vec<String> {
        self.domain_index
            .get(domain)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Get all states for a domain
    pub fn domain_states(&self, domain: &str) -> Vec<State> {
        self.entity_ids(domain)
            .iter()
            .filter_map(|id| self.get(id))
            .collect()
    }

    /// Remove an entity's state
    ///
    /// Fires a STATE_CHANGED event with the old state and None for new_state.
    #[instrument(skip(self, context), fields(entity_id = %entity_id))]
    pub fn remove(&self, entity_id: &EntityId, context: Context) -> Option<State> {
        let entity_id_str = entity_id.to_string();

        let old_state = self.states.remove(&entity_id_str).map(|(_, s)| s);

        if let Some(ref state) = old_state {
            trace!("Removing entity state");

            if let Some(mut ids) = self.domain_index.get_mut(entity_id.domain()) {
                ids.retain(|id| id != &entity_id_str);
            }

            self.event_bus.fire_typed(
                StateChangedData {
                    entity_id: entity_id.clone(),
                    old_state: Some(state.clone()),
                    new_state: None,
                },
                context,
            );
        }

        old_state
    }

    pub fn entity_count(&self) -> usize {
        self.states.len()
    }
}

/// Thread-safe wrapper for StateStore
pub type SharedStateStore = Arc<StateStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use ha_core::events::{STATE_CHANGED, STATE_REPORTED};
    use serde_json::json;
    use std::sync::Mutex;

    fn store_with_log() -> (StateStore, Arc<Mutex<Vec<String>>>) {
        let bus = Arc::new(EventBus::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        for event_type in [STATE_CHANGED, STATE_REPORTED] {
            let log = log.clone();
            bus.listen(event_type, move |event| {
                log.lock().unwrap().push(event.event_type.to_string());
            });
        }
        (StateStore::new(bus), log)
    }

    fn id(s: &str) -> EntityId {
        s.parse().unwrap()
    }

    #[test]
    fn test_set_and_domain_index() {
        let (store, log) = store_with_log();

        store.set(id("zone.home"), "0", HashMap::new(), Context::new());
        store.set(id("zone.work"), "0", HashMap::new(), Context::new());
        store.set(id("person.alice"), "home", HashMap::new(), Context::new());

        assert_eq!(store.entity_count(), 3);
        assert_eq!(store.entity_ids("zone"), vec!["zone.home", "zone.work"]);
        assert_eq!(store.domain_states("person").len(), 1);
        assert!(store.is_state("person.alice", "home"));
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_identical_write_is_reported_not_changed() {
        let (store, log) = store_with_log();
        let attrs = HashMap::from([("latitude".to_string(), json!(2.1))]);

        let first = store.set(
            id("device_tracker.test1"),
            "home",
            attrs.clone(),
            Context::new(),
        );
        let second = store.set(id("device_tracker.test1"), "home", attrs, Context::new());

        assert_eq!(second.last_changed, first.last_changed);
        assert_eq!(second.last_updated, first.last_updated);
        assert_eq!(
            *log.lock().unwrap(),
            vec![STATE_CHANGED.to_string(), STATE_REPORTED.to_string()]
        );
    }

    #[test]
    fn test_attribute_change_fires_state_changed() {
        let (store, log) = store_with_log();

        store.set(
            id("device_tracker.test1"),
            "not_home",
            HashMap::from([("latitude".to_string(), json!(2.1))]),
            Context::new(),
        );
        store.set(
            id("device_tracker.test1"),
            "not_home",
            HashMap::from([("latitude".to_string(), json!(2.5))]),
            Context::new(),
        );

        assert_eq!(
            *log.lock().unwrap(),
            vec![STATE_CHANGED.to_string(), STATE_CHANGED.to_string()]
        );
    }

    #[test]
    fn test_remove() {
        let (store, log) = store_with_log();
        let entity_id = id("zone_occupancy.home");

        store.set(entity_id.clone(), "0", HashMap::new(), Context::new());
        assert!(store.remove(&entity_id, Context::new()).is_some());
        assert!(store.remove(&entity_id, Context::new()).is_none());

        assert!(store.get("zone_occupancy.home").is_none());
        assert!(store.entity_ids("zone_occupancy").is_empty());
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    struct Counter {
        entity_id: EntityId,
        value: usize,
    }

    impl Entity for Counter {
        fn entity_id(&self) -> &EntityId {
            &self.entity_id
        }

        fn name(&self) -> Option<&str> {
            Some("Counter")
        }

        fn state(&self) -> String {
            self.value.to_string()
        }
    }

    #[test]
    fn test_write_entity_adds_friendly_name() {
        let (store, _) = store_with_log();
        let counter = Counter {
            entity_id: id("sensor.counter"),
            value: 3,
        };

        let state = store.write_entity(&counter, Context::new());
        assert_eq!(state.state, "3");
        assert_eq!(
            state.attribute::<String>(ATTR_FRIENDLY_NAME).as_deref(),
            Some("Counter")
        );
    }
}
