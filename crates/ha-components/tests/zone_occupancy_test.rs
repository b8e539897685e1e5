//! End-to-end tests for zone occupancy, driven from a configuration
//! directory the same way the server sets the component up.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::sync::{Arc, Mutex};

use ha_components::{load_zones, zone_configs, zone_occupancy};
use ha_config::{load_yaml, CoreConfig, Value};
use ha_core::{Context, Entity, EntityId};
use ha_event_bus::EventBus;
use ha_state_store::StateStore;
use serde_json::json;
use tempfile::TempDir;
use tracing_subscriber::fmt::MakeWriter;

const CONFIGURATION: &str = r#"
homeassistant:
  name: Home
  latitude: 2.1
  longitude: 1.1
  radius: 10

zone:
  - name: Work
    latitude: 2.3
    longitude: 1.3
    radius: 10

zone_occupancy: !include occupancy.yaml

logger:
  default: info
"#;

const OCCUPANCY: &str = r#"
home:
  devices:
    - device_tracker.test1
    - device_tracker.test2
work:
  devices: device_tracker.test1
garage:
  devices:
    - device_tracker.test1
    - switch.garage_door
"#;

/// Isolated host with the configuration above loaded
struct TestHass {
    bus: Arc<EventBus>,
    states: Arc<StateStore>,
    _dir: TempDir,
    config: Value,
}

impl TestHass {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("configuration.yaml"), CONFIGURATION).unwrap();
        fs::write(dir.path().join("occupancy.yaml"), OCCUPANCY).unwrap();

        let config = load_yaml(dir.path(), "configuration.yaml").unwrap();
        let bus = Arc::new(EventBus::new());
        let states = Arc::new(StateStore::new(bus.clone()));

        let core = CoreConfig::from_yaml(&config).unwrap();
        load_zones(&core, &zone_configs(&config).unwrap(), &states);

        Self {
            bus,
            states,
            _dir: dir,
            config,
        }
    }

    fn setup(&self) -> Vec<Arc<zone_occupancy::Occupancy>> {
        zone_occupancy::setup(&self.bus, &self.states, &self.config).unwrap()
    }

    fn move_to(&self, entity_id: &str, state: &str, latitude: f64, longitude: f64) {
        let entity_id: EntityId = entity_id.parse().unwrap();
        let attributes = HashMap::from([
            ("friendly_name".to_string(), json!(entity_id.object_id())),
            ("latitude".to_string(), json!(latitude)),
            ("longitude".to_string(), json!(longitude)),
        ]);
        self.states.set(entity_id, state, attributes, Context::new());
    }

    fn assert_state(&self, entity_id: &str, expected: &str) {
        let state = self.states.get_state(entity_id);
        assert_eq!(
            state.as_deref(),
            Some(expected),
            "Expected entity {} to be in state '{}', but was {:?}",
            entity_id,
            expected,
            state
        );
    }
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[test]
fn test_setup_from_configuration() {
    let hass = TestHass::new();
    let entities = hass.setup();

    let ids: Vec<String> = entities.iter().map(|e| e.entity_id().to_string()).collect();
    assert_eq!(ids, vec!["zone_occupancy.home", "zone_occupancy.work"]);

    hass.assert_state("zone_occupancy.home", "0");
    hass.assert_state("zone_occupancy.work", "0");
    assert!(hass.states.get("zone_occupancy.garage").is_none());

    let home = hass.states.get("zone_occupancy.home").unwrap();
    assert_eq!(home.attribute::<String>("friendly_name").as_deref(), Some("home"));
}

#[test]
fn test_untrackable_device_is_logged() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::ERROR)
        .finish();

    let hass = TestHass::new();
    let entities = tracing::subscriber::with_default(subscriber, || hass.setup());

    assert_eq!(entities.len(), 2);
    let output = logs.contents();
    assert!(output.contains("switch.garage_door Not trackable"), "{}", output);
    assert!(output.contains("garage config contains untrackable device"), "{}", output);
    assert!(!output.contains("device_tracker.test1 Not trackable"), "{}", output);
}

#[test]
fn test_devices_moving_between_zones() {
    let hass = TestHass::new();
    let entities = hass.setup();
    let home = &entities[0];
    let work = &entities[1];

    hass.move_to("device_tracker.test1", "home", 2.1, 1.1);
    assert_eq!(home.count(), 1);
    hass.assert_state("zone_occupancy.home", "1");

    hass.move_to("device_tracker.test2", "home", 2.1, 1.1);
    assert_eq!(home.count(), 2);
    hass.assert_state("zone_occupancy.home", "2");

    hass.move_to("device_tracker.test1", "work", 2.3, 1.3);
    assert_eq!(home.count(), 1);
    assert_eq!(work.count(), 1);
    hass.assert_state("zone_occupancy.home", "1");
    hass.assert_state("zone_occupancy.work", "1");
}

#[test]
fn test_repeated_update_leaves_count_unchanged() {
    let hass = TestHass::new();
    let entities = hass.setup();

    hass.move_to("device_tracker.test1", "home", 2.1, 1.1);
    hass.move_to("device_tracker.test1", "home", 2.1, 1.1);
    // Moving within the zone changes attributes but not membership
    hass.move_to("device_tracker.test1", "home", 2.10001, 1.1);

    assert_eq!(entities[0].count(), 1);
    hass.assert_state("zone_occupancy.home", "1");
}

#[test]
fn test_removed_tracker_is_no_longer_counted() {
    let hass = TestHass::new();
    let entities = hass.setup();

    hass.move_to("device_tracker.test1", "home", 2.1, 1.1);
    hass.move_to("device_tracker.test2", "home", 2.1, 1.1);
    assert_eq!(entities[0].count(), 2);

    let test2: EntityId = "device_tracker.test2".parse().unwrap();
    hass.states.remove(&test2, Context::new());
    assert_eq!(entities[0].count(), 1);
}

#[test]
fn test_teardown() {
    let hass = TestHass::new();
    let entities = hass.setup();

    for entity in &entities {
        entity.remove();
    }
    assert_eq!(hass.bus.listener_count(), 0);
    assert!(hass.states.entity_ids("zone_occupancy").is_empty());
}

#[test]
fn test_event_stream_keeps_cause_before_recount() {
    let hass = TestHass::new();
    let _entities = hass.setup();
    let mut rx = hass.bus.subscribe_all();

    hass.move_to("device_tracker.test1", "home", 2.1, 1.1);

    let mut order = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let Some(entity_id) = event.data.get("entity_id").and_then(|v| v.as_str()) {
            order.push(entity_id.to_string());
        }
    }
    // work recounts to an unchanged "0", which arrives as state_reported
    assert_eq!(
        order,
        vec![
            "device_tracker.test1",
            "zone_occupancy.home",
            "zone_occupancy.work"
        ]
    );
}
