//! Device state store
//!
//! Accumulated snapshot of last-known device data. Sessions write named
//! sub-objects into it; consumers read copies and subscribe to change events.
//! Nothing ever resets the whole map: a key keeps its value until a newer
//! message of the same kind overwrites it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// Keyed map of sub-objects, as read by consumers
pub type Snapshot = Map<String, Value>;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Change notifications broadcast to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    /// One inbound message or poll result has been merged
    Updated { source: String },

    /// A firmware version was observed for a device registry entry
    FirmwareObserved { identifier: String, version: String },
}

/// Per-session state store
#[derive(Debug)]
pub struct DeviceStateStore {
    data: RwLock<Snapshot>,
    events: broadcast::Sender<StateEvent>,
}

impl Default for DeviceStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStateStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            data: RwLock::new(Snapshot::new()),
            events,
        }
    }

    /// Deep-merge `value` into the sub-object stored under `key`.
    ///
    /// Objects are merged field by field (recursively); any other value
    /// replaces what was stored. Does not notify observers.
    pub async fn merge(&self, key: &str, value: Value) {
        let mut data = self.data.write().await;
        match data.get_mut(key) {
            Some(existing) => deep_merge(existing, value),
            None => {
                data.insert(key.to_string(), value);
            }
        }
    }

    /// Replace the sub-object stored under `key` wholesale
    pub async fn replace(&self, key: &str, value: Value) {
        self.data.write().await.insert(key.to_string(), value);
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.data.read().await.get(key).cloned()
    }

    /// Typed read of a sub-object
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        serde_json::from_value(value).ok()
    }

    /// Shallow copy of the whole snapshot
    pub async fn snapshot(&self) -> Snapshot {
        self.data.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    /// Receive every event broadcast after this call
    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    /// Broadcast an event; having no observers is not an error
    pub fn notify(&self, event: StateEvent) {
        match self.events.send(event) {
            Ok(receivers) => debug!("State event delivered to {receivers} observers"),
            Err(_) => debug!("State event dropped, no observers"),
        }
    }

    pub fn notify_updated(&self, source: impl Into<String>) {
        self.notify(StateEvent::Updated {
            source: source.into(),
        });
    }
}

fn deep_merge(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match existing.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (slot, incoming) => *slot = incoming,
    }
}
