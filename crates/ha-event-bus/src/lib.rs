//! Event bus with typed pub/sub for Home Assistant
//!
//! The EventBus is the central message broker. It offers two kinds of
//! subscribers:
//!
//! - callback listeners, invoked synchronously and serially inside
//!   [`EventBus::fire`] (used by components reacting to state changes)
//! - broadcast receivers for async consumers running on their own task

mod tracking;

use dashmap::DashMap;
use ha_core::{Context, Event, EventData, EventType};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

pub use tracking::track_state_change;

/// Default channel capacity for event subscriptions
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A unique identifier for an event listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Callback invoked for every matching event
pub type EventCallback = Arc<dyn Fn(&Event<serde_json::Value>) + Send + Sync>;

struct Listener {
    event_type: EventType,
    callback: EventCallback,
}

/// The event bus for publishing and subscribing to events
pub struct EventBus {
    /// Callback listeners keyed by their ID
    listeners: DashMap<ListenerId, Listener>,
    /// Broadcast senders per event type
    channels: DashMap<EventType, broadcast::Sender<Event<serde_json::Value>>>,
    /// Special sender for MATCH_ALL subscribers
    match_all_sender: broadcast::Sender<Event<serde_json::Value>>,
    next_listener_id: AtomicU64,
    capacity: usize,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with specified channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (match_all_sender, _) = broadcast::channel(capacity);
        Self {
            listeners: DashMap::new(),
            channels: DashMap::new(),
            match_all_sender,
            next_listener_id: AtomicU64::new(1),
            capacity,
        }
    }

    /// Register a callback for events of the given type
    ///
    /// The callback runs on the thread that fires the event, after all
    /// previously registered listeners. It may fire further events.
    pub fn listen<F>(&self, event_type: impl Into<EventType>, callback: F) -> ListenerId
    where
        F: Fn(&Event<serde_json::Value>) + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::SeqCst));
        trace!(event_type = %event_type, listener = id.0, "Registering listener");

        self.listeners.insert(
            id,
            Listener {
                event_type,
                callback: Arc::new(callback),
            },
        );
        id
    }

    /// Remove a callback listener
    ///
    /// Returns false if the listener was already removed.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        trace!(listener = id.0, "Removing listener");
        self.listeners.remove(&id).is_some()
    }

    /// Subscribe to events of a specific type over a broadcast channel
    pub fn subscribe(
        &self,
        event_type: impl Into<EventType>,
    ) -> broadcast::Receiver<Event<serde_json::Value>> {
        let event_type = event_type.into();
        trace!(event_type = %event_type, "Subscribing to event type");

        if event_type.is_match_all() {
            return self.match_all_sender.subscribe();
        }

        self.channels
            .entry(event_type)
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(self.capacity);
                tx
            })
            .subscribe()
    }

    /// Subscribe to events carrying a specific typed payload
    pub fn subscribe_typed<T: EventData + serde::de::DeserializeOwned>(
        &self,
    ) -> TypedEventReceiver<T> {
        let rx = self.subscribe(T::event_type());
        TypedEventReceiver::new(rx)
    }

    /// Subscribe to all events
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event<serde_json::Value>> {
        self.match_all_sender.subscribe()
    }

    /// Fire an event
    ///
    /// The event is sent to broadcast subscribers of its type and to
    /// MATCH_ALL first, then callback listeners run in registration order.
    /// Events fired from a callback are therefore broadcast after the event
    /// that caused them.
    pub fn fire(&self, event: Event<serde_json::Value>) {
        debug!(event_type = %event.event_type, "Firing event");

        if let Some(sender) = self.channels.get(&event.event_type) {
            // Send errors only mean there are no active receivers
            let _ = sender.send(event.clone());
        }
        let _ = self.match_all_sender.send(event.clone());

        // Snapshot so no map guard is held while callbacks run
        let mut matching: Vec<(ListenerId, EventCallback)> = self
            .listeners
            .iter()
            .filter(|entry| {
                let listener = entry.value();
                listener.event_type.is_match_all() || listener.event_type == event.event_type
            })
            .map(|entry| (*entry.key(), entry.value().callback.clone()))
            .collect();
        matching.sort_by_key(|(id, _)| *id);

        for (id, callback) in matching {
            // Skip listeners removed by an earlier callback of this same event
            if self.listeners.contains_key(&id) {
                callback(&event);
            }
        }
    }

    /// Fire a typed event
    pub fn fire_typed<T: EventData + serde::Serialize>(&self, data: T, context: Context) {
        let event = Event::typed(data, context);
        let json_data = serde_json::to_value(&event.data).unwrap_or_default();
        self.fire(Event {
            event_type: event.event_type,
            data: json_data,
            origin: event.origin,
            time_fired: event.time_fired,
            context: event.context,
        });
    }

    /// Number of registered callback listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A receiver for typed events
pub struct TypedEventReceiver<T> {
    rx: broadcast::Receiver<Event<serde_json::Value>>,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: EventData + serde::de::DeserializeOwned> TypedEventReceiver<T> {
    fn new(rx: broadcast::Receiver<Event<serde_json::Value>>) -> Self {
        Self {
            rx,
            _phantom: std::marker::PhantomData,
        }
    }

    /// Receive the next event whose data parses as `T`
    pub async fn recv(&mut self) -> Result<Event<T>, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if let Ok(data) = serde_json::from_value::<T>(event.data.clone()) {
                return Ok(Event {
                    event_type: event.event_type,
                    data,
                    origin: event.origin,
                    time_fired: event.time_fired,
                    context: event.context,
                });
            }
        }
    }
}

/// Thread-safe wrapper for EventBus
pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use ha_core::events::StateChangedData;
    use ha_core::{EntityId, State};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[test]
    fn test_listen_runs_synchronously() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = seen.clone();
        bus.listen("test_event", move |event| {
            seen_clone.lock().unwrap().push(event.data["n"].clone());
        });

        bus.fire(Event::new("test_event", json!({"n": 1}), Context::new()));
        bus.fire(Event::new("other_event", json!({"n": 2}), Context::new()));
        bus.fire(Event::new("test_event", json!({"n": 3}), Context::new()));

        assert_eq!(*seen.lock().unwrap(), vec![json!(1), json!(3)]);
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for n in 0..5 {
            let order = order.clone();
            bus.listen("ordered", move |_| order.lock().unwrap().push(n));
        }
        bus.fire(Event::new("ordered", json!({}), Context::new()));

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_remove_listener() {
        let bus = EventBus::new();
        let calls = Arc::new(Mutex::new(0));

        let calls_clone = calls.clone();
        let id = bus.listen("test_event", move |_| *calls_clone.lock().unwrap() += 1);
        bus.fire(Event::new("test_event", json!({}), Context::new()));

        assert!(bus.remove_listener(id));
        assert!(!bus.remove_listener(id));
        bus.fire(Event::new("test_event", json!({}), Context::new()));

        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_listener_can_fire_reentrantly() {
        let bus = Arc::new(EventBus::new());
        let echoed = Arc::new(Mutex::new(false));

        let inner_bus = bus.clone();
        bus.listen("ping", move |_| {
            inner_bus.fire(Event::new("pong", json!({}), Context::new()));
        });
        let echoed_clone = echoed.clone();
        bus.listen("pong", move |_| *echoed_clone.lock().unwrap() = true);

        bus.fire(Event::new("ping", json!({}), Context::new()));
        assert!(*echoed.lock().unwrap());
    }

    #[tokio::test]
    async fn test_nested_fire_is_broadcast_after_its_cause() {
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe_all();

        let inner_bus = bus.clone();
        bus.listen("device_moved", move |_| {
            inner_bus.fire(Event::new("count_updated", json!({}), Context::new()));
        });

        bus.fire(Event::new("device_moved", json!({}), Context::new()));

        assert_eq!(rx.recv().await.unwrap().event_type.as_str(), "device_moved");
        assert_eq!(rx.recv().await.unwrap().event_type.as_str(), "count_updated");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_subscribe_and_fire() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("test_event");

        bus.fire(Event::new("test_event", json!({"key": "value"}), Context::new()));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type.as_str(), "test_event");
        assert_eq!(received.data["key"], "value");
    }

    #[tokio::test]
    async fn test_match_all_subscription() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_all();

        let ctx = Context::new();
        bus.fire(Event::new("event_a", json!({}), ctx.clone()));
        bus.fire(Event::new("event_b", json!({}), ctx));

        assert_eq!(rx.recv().await.unwrap().event_type.as_str(), "event_a");
        assert_eq!(rx.recv().await.unwrap().event_type.as_str(), "event_b");
    }

    #[tokio::test]
    async fn test_typed_subscription() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_typed::<StateChangedData>();

        let entity_id = EntityId::new("device_tracker", "test1").unwrap();
        let new_state = State::new(entity_id.clone(), "home", HashMap::new(), Context::new());

        bus.fire_typed(
            StateChangedData {
                entity_id,
                old_state: None,
                new_state: Some(new_state),
            },
            Context::new(),
        );

        let received = rx.recv().await.unwrap();
        assert_eq!(received.data.entity_id.to_string(), "device_tracker.test1");
        assert!(received.data.new_state.is_some());
    }

    #[tokio::test]
    async fn test_no_cross_event_pollution() {
        let bus = EventBus::new();
        let mut rx_a = bus.subscribe("event_a");
        let mut rx_b = bus.subscribe("event_b");

        bus.fire(Event::new("event_a", json!({"type": "a"}), Context::new()));

        assert_eq!(rx_a.recv().await.unwrap().data["type"], "a");
        assert!(rx_b.try_recv().is_err());
    }
}
