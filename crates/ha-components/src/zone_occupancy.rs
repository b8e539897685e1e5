//! Zone Occupancy Component
//!
//! Counts how many tracked devices are inside a zone. Each configured zone
//! gets a `zone_occupancy.<zone>` entity whose state is the number of its
//! devices currently located in `zone.<zone>`, recomputed whenever one of
//! those devices changes state.
//!
//! ```yaml
//! zone_occupancy:
//!   home:
//!     devices:
//!       - device_tracker.test1
//!       - person.alice
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use ha_config::validation::{component_section, entity_ids, slug_keyed};
use ha_config::{ConfigResult, Value};
use ha_core::{Context, Entity, EntityId, State};
use ha_event_bus::{track_state_change, EventBus, ListenerId};
use ha_state_store::StateStore;
use indexmap::IndexMap;
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::zone;

pub const DOMAIN: &str = "zone_occupancy";

/// Domains whose entities report a location
pub const TRACKABLE_DOMAINS: &[&str] = &["person", "device_tracker"];

/// Per-zone configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoneOccupancyConfig {
    /// Devices to count (default: none)
    #[serde(default, deserialize_with = "entity_ids")]
    pub devices: Vec<EntityId>,
}

/// Validate the `zone_occupancy:` section of the full configuration
///
/// Keys are zone slugs, in configuration order. A missing section yields no
/// zones.
pub fn validate_config(config: &Value) -> ConfigResult<IndexMap<String, ZoneOccupancyConfig>> {
    match component_section(config, DOMAIN)? {
        Some(section) => slug_keyed(DOMAIN, section),
        None => Ok(IndexMap::new()),
    }
}

/// Set up one occupancy entity per configured zone
///
/// Zones listing untrackable devices are skipped; the others are created
/// and returned in configuration order.
pub fn setup(
    bus: &Arc<EventBus>,
    states: &Arc<StateStore>,
    config: &Value,
) -> ConfigResult<Vec<Arc<Occupancy>>> {
    let zones = validate_config(config)?;

    let entities: Vec<Arc<Occupancy>> = zones
        .iter()
        .filter_map(|(name, zone_config)| {
            setup_occupancy_component(bus, states, name, zone_config)
        })
        .collect();

    info!(
        "Set up {} of {} {} entities",
        entities.len(),
        zones.len(),
        DOMAIN
    );
    Ok(entities)
}

/// Set up the occupancy entity for a single zone
///
/// Returns `None` (after logging) when any device is outside the trackable
/// domains. Otherwise publishes the initial count of 0 and starts tracking
/// the devices.
pub fn setup_occupancy_component(
    bus: &Arc<EventBus>,
    states: &Arc<StateStore>,
    name: &str,
    config: &ZoneOccupancyConfig,
) -> Option<Arc<Occupancy>> {
    let mut untrackable = false;
    for device in &config.devices {
        if !device.in_domains(TRACKABLE_DOMAINS) {
            error!("{} Not trackable", device);
            untrackable = true;
        }
    }
    if untrackable {
        error!("{} config contains untrackable device", name);
        return None;
    }

    let (zone_id, entity_id) = match (
        EntityId::new(zone::DOMAIN, name),
        EntityId::new(DOMAIN, name),
    ) {
        (Ok(zone_id), Ok(entity_id)) => (zone_id, entity_id),
        (Err(e), _) | (_, Err(e)) => {
            error!("Invalid zone name '{}': {}", name, e);
            return None;
        }
    };

    let occupancy = Arc::new(Occupancy {
        unique_id: entity_id.to_string(),
        entity_id,
        name: name.to_string(),
        zone_id,
        tracked_devices: config.devices.clone(),
        count: AtomicUsize::new(0),
        removed: AtomicBool::new(false),
        bus: bus.clone(),
        states: states.clone(),
        listener: OnceLock::new(),
    });

    states.write_entity(&*occupancy, Context::new());

    let weak: Weak<Occupancy> = Arc::downgrade(&occupancy);
    let listener = track_state_change(bus, &occupancy.tracked_devices, move |entity_id, old, new| {
        if let Some(occupancy) = weak.upgrade() {
            occupancy.check_occupancy_state_change(entity_id, old, new);
        }
    });
    // Freshly created, so the cell is empty
    let _ = occupancy.listener.set(listener);

    debug!(
        zone = %occupancy.zone_id,
        devices = occupancy.tracked_devices.len(),
        "Set up {}",
        occupancy.entity_id
    );
    Some(occupancy)
}

/// Number of tracked devices inside one zone
pub struct Occupancy {
    entity_id: EntityId,
    unique_id: String,
    /// Zone name, also used as the display name
    name: String,
    zone_id: EntityId,
    tracked_devices: Vec<EntityId>,
    count: AtomicUsize,
    /// Set by `remove`; later recounts are ignored
    removed: AtomicBool,
    bus: Arc<EventBus>,
    states: Arc<StateStore>,
    listener: OnceLock<ListenerId>,
}

impl Occupancy {
    pub fn zone_id(&self) -> &EntityId {
        &self.zone_id
    }

    pub fn tracked_devices(&self) -> &[EntityId] {
        &self.tracked_devices
    }

    /// Devices counted in the last recomputation
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Recount the tracked devices inside the zone and publish the result
    ///
    /// Called for every state change of a tracked device. The published
    /// state carries a child of the triggering state's context. Does nothing
    /// once the entity has been removed.
    pub fn check_occupancy_state_change(
        &self,
        entity_id: &EntityId,
        _old_state: Option<&State>,
        new_state: Option<&State>,
    ) {
        if self.removed.load(Ordering::SeqCst) {
            debug!(trigger = %entity_id, "{} already removed", self.entity_id);
            return;
        }

        let zone_id = self.zone_id.to_string();
        let count = self
            .tracked_devices
            .iter()
            .filter(|device| zone::zone_condition(&self.states, &zone_id, &device.to_string()))
            .count();

        self.count.store(count, Ordering::SeqCst);
        info!(trigger = %entity_id, zone = %zone_id, "counted {}", count);

        let context = new_state
            .map(|state| state.context.child())
            .unwrap_or_default();
        self.states.write_entity(self, context);
    }

    /// Stop tracking and remove the entity's state
    pub fn remove(&self) {
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(listener) = self.listener.get() {
            self.bus.remove_listener(*listener);
        }
        self.states.remove(&self.entity_id, Context::new());
        debug!("Removed {}", self.entity_id);
    }
}

impl Entity for Occupancy {
    fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    fn unique_id(&self) -> Option<&str> {
        Some(&self.unique_id)
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn state(&self) -> String {
        self.count().to_string()
    }
}

impl std::fmt::Debug for Occupancy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Occupancy")
            .field("entity_id", &self.entity_id)
            .field("zone_id", &self.zone_id)
            .field("tracked_devices", &self.tracked_devices)
            .field("count", &self.count())
            .finish()
    }
}
