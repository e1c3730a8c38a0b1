//! Device registry collaborator
//!
//! Sessions never touch a registry. They publish
//! [`StateEvent::FirmwareObserved`] and a [`FirmwareListener`], owned by the
//! host integration, forwards new versions to whatever registry it is given.

use crate::error::Result;
use crate::state::{DeviceStateStore, StateEvent};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Narrow update interface of the host's device registry
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn update_sw_version(&self, identifier: &str, version: &str) -> Result<()>;
}

/// Registry kept in memory, keyed by device identifier
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    versions: RwLock<HashMap<String, String>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sw_version(&self, identifier: &str) -> Option<String> {
        self.versions.read().await.get(identifier).cloned()
    }
}

#[async_trait]
impl DeviceRegistry for InMemoryRegistry {
    async fn update_sw_version(&self, identifier: &str, version: &str) -> Result<()> {
        self.versions
            .write()
            .await
            .insert(identifier.to_string(), version.to_string());
        Ok(())
    }
}

/// Forwards firmware observations from one store to a registry
pub struct FirmwareListener;

impl FirmwareListener {
    /// Spawn the listener; it ends when the store is dropped
    pub fn spawn(store: &DeviceStateStore, registry: Arc<dyn DeviceRegistry>) -> JoinHandle<()> {
        let events = store.subscribe();
        tokio::spawn(Self::run(events, registry))
    }

    async fn run(mut events: broadcast::Receiver<StateEvent>, registry: Arc<dyn DeviceRegistry>) {
        let mut last_seen: HashMap<String, String> = HashMap::new();

        loop {
            match events.recv().await {
                Ok(StateEvent::FirmwareObserved {
                    identifier,
                    version,
                }) => {
                    if last_seen.get(&identifier) == Some(&version) {
                        continue;
                    }
                    match registry.update_sw_version(&identifier, &version).await {
                        Ok(()) => {
                            info!("Firmware for {identifier}: {version}");
                            last_seen.insert(identifier, version);
                        }
                        Err(e) => warn!("Registry update for {identifier} failed: {e}"),
                    }
                }
                Ok(StateEvent::Updated { .. }) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Firmware listener lagged, {skipped} events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("State store closed, firmware listener exiting");
                    break;
                }
            }
        }
    }
}
