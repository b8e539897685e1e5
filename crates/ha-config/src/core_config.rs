//! Core Home Assistant configuration
//!
//! Parses the `homeassistant:` section from configuration.yaml. The home
//! location and radius define the `zone.home` zone.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::load_yaml;

/// Core configuration from the `homeassistant:` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Name of the location (e.g., "Home")
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub latitude: f64,

    #[serde(default)]
    pub longitude: f64,

    /// Elevation in meters
    #[serde(default)]
    pub elevation: i32,

    /// Radius of the home zone in meters
    #[serde(default = "default_radius")]
    pub radius: f64,

    /// Time zone (e.g., "Europe/Amsterdam")
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
}

fn default_name() -> String {
    "Home".to_string()
}

fn default_radius() -> f64 {
    100.0
}

fn default_time_zone() -> String {
    "UTC".to_string()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            latitude: 0.0,
            longitude: 0.0,
            elevation: 0,
            radius: default_radius(),
            time_zone: default_time_zone(),
        }
    }
}

impl CoreConfig {
    /// Load core configuration from a config directory
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let yaml = load_yaml(config_dir.as_ref(), "configuration.yaml")?;
        Self::from_yaml(&yaml)
    }

    /// Parse core configuration from the full configuration document
    pub fn from_yaml(yaml: &Value) -> ConfigResult<Self> {
        let mapping = yaml.as_mapping().ok_or_else(|| ConfigError::InvalidValue {
            key: "root".to_string(),
            reason: "configuration must be a mapping".to_string(),
        })?;

        let section = match mapping.get("homeassistant") {
            None | Some(Value::Null) => return Ok(Self::default()),
            Some(section) => section.clone(),
        };

        serde_yaml::from_value(section).map_err(|e| ConfigError::InvalidValue {
            key: "homeassistant".to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoreConfig::default();
        assert_eq!(config.name, "Home");
        assert_eq!(config.radius, 100.0);
        assert_eq!(config.time_zone, "UTC");
    }

    #[test]
    fn test_parse_from_yaml() {
        let yaml: Value = serde_yaml::from_str(
            r#"
homeassistant:
  name: Test Home
  latitude: 2.1
  longitude: 1.1
  elevation: 11
  radius: 10
zone_occupancy:
  home: {}
"#,
        )
        .unwrap();

        let config = CoreConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.name, "Test Home");
        assert_eq!(config.latitude, 2.1);
        assert_eq!(config.longitude, 1.1);
        assert_eq!(config.elevation, 11);
        assert_eq!(config.radius, 10.0);
    }

    #[test]
    fn test_missing_section_uses_defaults() {
        let yaml: Value = serde_yaml::from_str("zone_occupancy: {}\n").unwrap();
        let config = CoreConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.name, "Home");
    }

    #[test]
    fn test_non_mapping_root() {
        let yaml: Value = serde_yaml::from_str("- just\n- a list\n").unwrap();
        assert!(matches!(
            CoreConfig::from_yaml(&yaml),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
