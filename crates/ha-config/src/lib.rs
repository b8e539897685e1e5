//! YAML configuration loading and validation for Home Assistant
//!
//! - [`load_yaml`] reads `configuration.yaml` with the `!include`,
//!   `!secret` and `!env_var` tags resolved
//! - [`CoreConfig`] holds the `homeassistant:` section (home location)
//! - [`validation`] has the schema helpers integrations use to check their
//!   own sections
//!
//! ```ignore
//! use ha_config::{load_yaml, CoreConfig};
//!
//! let config = load_yaml("/config", "configuration.yaml")?;
//! let core = CoreConfig::from_yaml(&config)?;
//! ```

mod core_config;
mod error;
mod loader;
mod secrets;
pub mod validation;

pub use core_config::CoreConfig;
pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, load_yaml_string, YamlLoader};
pub use secrets::Secrets;

// Re-export serde_yaml::Value for convenience
pub use serde_yaml::Value;
