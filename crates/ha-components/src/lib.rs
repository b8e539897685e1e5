//! Home Assistant Built-in Components
//!
//! Native implementations of built-in components: `zone` publishes the
//! configured zones, `zone_occupancy` counts tracked devices inside them.

pub mod zone;
pub mod zone_occupancy;

pub use zone::{in_zone, load_zones, zone_condition, zone_configs, Zone, ZoneConfig};
pub use zone_occupancy::{
    setup_occupancy_component, validate_config, Occupancy, ZoneOccupancyConfig,
    TRACKABLE_DOMAINS,
};
