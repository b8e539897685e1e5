//! Home Assistant Rust Server
//!
//! Loads `configuration.yaml` from `HA_CONFIG_DIR` (default `config`), sets
//! up the zone and zone_occupancy components and runs until Ctrl-C.

mod state_logger;

use anyhow::{Context as _, Result};
use ha_components::{load_zones, zone_configs, zone_occupancy};
use ha_config::{load_yaml, CoreConfig};
use ha_event_bus::EventBus;
use ha_state_store::StateStore;
use state_logger::StateLogger;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_DIR: &str = "config";

/// The central Home Assistant instance
pub struct HomeAssistant {
    /// Event bus for pub/sub communication
    pub bus: Arc<EventBus>,
    /// State store for entity states
    pub states: Arc<StateStore>,
}

impl HomeAssistant {
    pub fn new() -> Self {
        let bus = Arc::new(EventBus::new());
        let states = Arc::new(StateStore::new(bus.clone()));
        Self { bus, states }
    }
}

impl Default for HomeAssistant {
    fn default() -> Self {
        Self::new()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config_dir = std::env::var_os("HA_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR));
    info!("Starting Home Assistant (Rust) from {:?}", config_dir);

    let config = load_yaml(&config_dir, "configuration.yaml")
        .with_context(|| format!("loading configuration from {:?}", config_dir))?;
    let core = CoreConfig::from_yaml(&config)?;
    info!(
        name = %core.name,
        time_zone = %core.time_zone,
        "Core configuration loaded"
    );

    let hass = HomeAssistant::new();

    let logger = StateLogger::new(hass.bus.clone(), &[zone_occupancy::DOMAIN]);
    let logger_task = logger.start();

    load_zones(&core, &zone_configs(&config)?, &hass.states);
    let occupancies = zone_occupancy::setup(&hass.bus, &hass.states, &config)
        .context("setting up zone_occupancy")?;

    info!("Home Assistant is running");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    for occupancy in &occupancies {
        occupancy.remove();
    }
    logger.stop();
    if let Some(task) = logger_task {
        task.await?;
    }

    Ok(())
}
