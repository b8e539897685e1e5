//! Background task that logs occupancy changes
//!
//! Subscribes to STATE_CHANGED over the bus's broadcast channel and logs
//! every new value of a watched domain until stopped.

use ha_core::events::StateChangedData;
use ha_event_bus::EventBus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct StateLogger {
    event_bus: Arc<EventBus>,
    /// Domains whose changes are logged at info level
    domains: Vec<String>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl StateLogger {
    pub fn new(event_bus: Arc<EventBus>, domains: &[&str]) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            event_bus,
            domains: domains.iter().map(|d| d.to_string()).collect(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Start logging on a background task
    ///
    /// Returns `None` if the logger is already running.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("State logger already running");
            return None;
        }

        let mut rx = self.event_bus.subscribe_typed::<StateChangedData>();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let domains = self.domains.clone();
        let running = self.running.clone();

        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = rx.recv() => {
                        match result {
                            Ok(event) => {
                                let data = event.data;
                                if !domains.iter().any(|d| d == data.entity_id.domain()) {
                                    continue;
                                }
                                match data.new_state {
                                    Some(state) => info!(
                                        entity_id = %data.entity_id,
                                        state = %state.state,
                                        "State changed"
                                    ),
                                    None => info!(entity_id = %data.entity_id, "Entity removed"),
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!("State logger lagged by {} events", n);
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                debug!("Event bus closed, stopping state logger");
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }

            running.store(false, Ordering::SeqCst);
            debug!("State logger stopped");
        }))
    }

    pub fn stop(&self) {
        if self.running.load(Ordering::SeqCst) {
            let _ = self.shutdown_tx.send(());
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
