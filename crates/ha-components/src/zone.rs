//! Zone Component
//!
//! Publishes `zone.*` entities (the home zone from the core configuration
//! plus every zone listed under `zone:`) and provides the membership
//! predicate other components use to decide whether a tracked device is
//! inside a zone.

use std::collections::{HashMap, HashSet};

use ha_config::validation::{component_section, ensure_list};
use ha_config::{ConfigError, ConfigResult, CoreConfig, Value};
use ha_core::attributes::{
    ATTR_GPS_ACCURACY, ATTR_ICON, ATTR_LATITUDE, ATTR_LONGITUDE, ATTR_PASSIVE, ATTR_RADIUS,
};
use ha_core::{slugify, Context, Entity, EntityId, State};
use ha_state_store::StateStore;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, trace};

pub const DOMAIN: &str = "zone";

/// Slug of the zone created from the core configuration
pub const HOME_ZONE: &str = "home";

/// State value published for every zone
pub const STATE_ZONING: &str = "zoning";

const DEFAULT_RADIUS: f64 = 100.0;
const HOME_ICON: &str = "mdi:home";

/// Mean Earth radius in meters
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Zone configuration from YAML
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoneConfig {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Radius in meters (default: 100)
    #[serde(default = "default_radius")]
    pub radius: f64,
    /// Passive zones are only used for automations
    #[serde(default)]
    pub passive: bool,
    #[serde(default)]
    pub icon: Option<String>,
}

fn default_radius() -> f64 {
    DEFAULT_RADIUS
}

#[derive(Deserialize)]
struct ZoneSection(#[serde(deserialize_with = "ensure_list")] Vec<ZoneConfig>);

/// Read the `zone:` section, which may hold a single zone or a list
pub fn zone_configs(config: &Value) -> ConfigResult<Vec<ZoneConfig>> {
    let Some(section) = component_section(config, DOMAIN)? else {
        return Ok(Vec::new());
    };

    serde_yaml::from_value::<ZoneSection>(section.clone())
        .map(|section| section.0)
        .map_err(|e| ConfigError::InvalidValue {
            key: DOMAIN.to_string(),
            reason: e.to_string(),
        })
}

/// A circular area on the map
#[derive(Debug, Clone)]
pub struct Zone {
    entity_id: EntityId,
    name: String,
    latitude: f64,
    longitude: f64,
    radius: f64,
    passive: bool,
    icon: Option<String>,
}

impl Zone {
    /// The home zone, located at the configured home coordinates
    ///
    /// Its ID is always `zone.home`, whatever the location is called.
    pub fn home(core: &CoreConfig) -> ConfigResult<Self> {
        let entity_id =
            EntityId::new(DOMAIN, HOME_ZONE).map_err(|e| ConfigError::InvalidValue {
                key: DOMAIN.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            entity_id,
            name: core.name.clone(),
            latitude: core.latitude,
            longitude: core.longitude,
            radius: core.radius,
            passive: false,
            icon: Some(HOME_ICON.to_string()),
        })
    }

    /// Build a zone whose object ID is the slug of its name
    pub fn from_config(config: &ZoneConfig) -> ConfigResult<Self> {
        let entity_id = EntityId::new(DOMAIN, slugify(&config.name)).map_err(|e| {
            ConfigError::InvalidValue {
                key: format!("{}.name", DOMAIN),
                reason: format!("'{}' does not give a valid zone id: {}", config.name, e),
            }
        })?;

        Ok(Self {
            entity_id,
            name: config.name.clone(),
            latitude: config.latitude,
            longitude: config.longitude,
            radius: config.radius,
            passive: config.passive,
            icon: config.icon.clone(),
        })
    }
}

impl Entity for Zone {
    fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn state(&self) -> String {
        STATE_ZONING.to_string()
    }

    fn extra_state_attributes(&self) -> HashMap<String, serde_json::Value> {
        let mut attributes = HashMap::from([
            (ATTR_LATITUDE.to_string(), json!(self.latitude)),
            (ATTR_LONGITUDE.to_string(), json!(self.longitude)),
            (ATTR_RADIUS.to_string(), json!(self.radius)),
            (ATTR_PASSIVE.to_string(), json!(self.passive)),
        ]);
        if let Some(icon) = &self.icon {
            attributes.insert(ATTR_ICON.to_string(), json!(icon));
        }
        attributes
    }
}

/// Publish the home zone and every configured zone
///
/// The home zone is skipped when a configured zone already uses its slug.
/// Zones whose name does not produce a usable ID, or whose ID repeats an
/// earlier zone, are logged and skipped.
pub fn load_zones(core: &CoreConfig, zones: &[ZoneConfig], states: &StateStore) -> Vec<Zone> {
    let mut loaded: Vec<Zone> = Vec::new();
    let mut seen = HashSet::new();

    for config in zones {
        let zone = match Zone::from_config(config) {
            Ok(zone) => zone,
            Err(e) => {
                error!("Invalid zone '{}': {}", config.name, e);
                continue;
            }
        };
        if !seen.insert(zone.entity_id.clone()) {
            error!("Duplicate zone {}, ignoring '{}'", zone.entity_id, config.name);
            continue;
        }
        loaded.push(zone);
    }

    if !loaded.iter().any(|z| z.entity_id.object_id() == HOME_ZONE) {
        match Zone::home(core) {
            Ok(home) => loaded.insert(0, home),
            Err(e) => error!("Unable to create home zone: {}", e),
        }
    }

    for zone in &loaded {
        states.write_entity(zone, Context::new());
        debug!("Loaded {} ({})", zone.entity_id, zone.name);
    }

    info!("Loaded {} zones", loaded.len());
    loaded
}

/// Great-circle distance between two coordinates, in meters
pub fn distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Check whether a point lies inside a zone
///
/// `radius` is the accuracy of the point in meters; a fix whose accuracy
/// circle reaches into the zone counts as inside. Unavailable zones and
/// zones without coordinates or radius contain nothing.
pub fn in_zone(zone: &State, latitude: f64, longitude: f64, radius: f64) -> bool {
    if zone.is_unavailable() {
        return false;
    }

    let (Some(zone_lat), Some(zone_lon), Some(zone_radius)) = (
        zone.attribute_f64(ATTR_LATITUDE),
        zone.attribute_f64(ATTR_LONGITUDE),
        zone.attribute_f64(ATTR_RADIUS),
    ) else {
        return false;
    };

    distance(latitude, longitude, zone_lat, zone_lon) - radius < zone_radius
}

/// Check whether an entity is currently located inside a zone
///
/// False when either entity has no state or the entity does not report
/// `latitude` and `longitude` attributes.
pub fn zone_condition(states: &StateStore, zone_entity_id: &str, entity_id: &str) -> bool {
    let Some(zone) = states.get(zone_entity_id) else {
        trace!(zone = zone_entity_id, "Zone has no state");
        return false;
    };
    let Some(entity) = states.get(entity_id) else {
        return false;
    };

    let (Some(latitude), Some(longitude)) = (
        entity.attribute_f64(ATTR_LATITUDE),
        entity.attribute_f64(ATTR_LONGITUDE),
    ) else {
        trace!(entity_id, "Entity has no coordinates");
        return false;
    };
    let accuracy = entity.attribute_f64(ATTR_GPS_ACCURACY).unwrap_or(0.0);

    in_zone(&zone, latitude, longitude, accuracy)
}
