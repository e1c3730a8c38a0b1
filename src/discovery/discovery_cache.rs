//! Discovery result cache
//!
//! Holds devices seen on the network until a configuration step picks one.
//! Owned by whoever orchestrates configuration and passed by reference; there
//! is no process-wide instance.

use super::{identity_from_advertisement, DiscoveryAbort};
use crate::device::{DeviceFamily, DeviceIdentity};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// One advertised device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveredDevice {
    pub host: String,
    pub port: u16,

    /// Advertised name, service suffix included
    pub name: String,

    pub identity: DeviceIdentity,

    /// When this device was first discovered
    pub first_seen: SystemTime,

    /// When this device was last seen
    pub last_seen: SystemTime,
}

impl DiscoveredDevice {
    pub fn new(identity: DeviceIdentity, name: impl Into<String>) -> Self {
        let now = SystemTime::now();
        Self {
            host: identity.host.clone(),
            port: identity.port,
            name: name.into(),
            identity,
            first_seen: now,
            last_seen: now,
        }
    }

    pub fn family(&self) -> DeviceFamily {
        self.identity.family
    }

    /// Name shown in device pickers: instance name without the service suffix
    pub fn display_name(&self) -> &str {
        super::instance_name(&self.name)
    }

    pub fn update_last_seen(&mut self) {
        self.last_seen = SystemTime::now();
    }

    /// Check if the device is considered stale
    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.last_seen.elapsed().unwrap_or(Duration::from_secs(0)) > max_age
    }
}

/// Cache counters
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveryCacheStats {
    pub added: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub evicted: u64,
}

type Key = (String, u16);

/// Devices discovered but not yet configured, keyed by host and port
#[derive(Debug, Default)]
pub struct DiscoveryCache {
    devices: RwLock<HashMap<Key, DiscoveredDevice>>,
    stats: RwLock<DiscoveryCacheStats>,
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a device; a known host and port aborts with `already_discovered`
    pub async fn add(&self, device: DiscoveredDevice) -> Result<(), DiscoveryAbort> {
        let key = (device.host.clone(), device.port);
        let mut devices = self.devices.write().await;

        if let Some(existing) = devices.get_mut(&key) {
            existing.update_last_seen();
            self.stats.write().await.duplicates += 1;
            debug!("{}:{} already discovered", key.0, key.1);
            return Err(DiscoveryAbort::AlreadyDiscovered);
        }

        info!(
            "✅ Discovered Eway {} {} ({}:{})",
            device.family(),
            device.display_name(),
            device.host,
            device.port
        );
        devices.insert(key, device);
        self.stats.write().await.added += 1;
        Ok(())
    }

    /// Handle one advertisement end to end.
    ///
    /// `configured` holds unique ids of devices the host already manages.
    pub async fn admit(
        &self,
        host: &str,
        port: u16,
        name: &str,
        configured: &HashSet<String>,
    ) -> Result<DiscoveredDevice, DiscoveryAbort> {
        let identity = match identity_from_advertisement(host, port, name) {
            Ok(identity) => identity,
            Err(reason) => {
                if reason == DiscoveryAbort::NotEwayDevice {
                    debug!("Skipping non-Eway advertisement {name}");
                } else {
                    warn!("Discarding advertisement {name:?} from {host:?}: {reason}");
                }
                self.stats.write().await.rejected += 1;
                return Err(reason);
            }
        };

        if configured.contains(&identity.unique_id()) {
            return Err(DiscoveryAbort::AlreadyConfigured);
        }

        let device = DiscoveredDevice::new(identity, name);
        self.add(device.clone()).await?;
        Ok(device)
    }

    pub async fn get(&self, host: &str, port: u16) -> Option<DiscoveredDevice> {
        self.devices
            .read()
            .await
            .get(&(host.to_string(), port))
            .cloned()
    }

    /// All cached devices, oldest first
    pub async fn list(&self) -> Vec<DiscoveredDevice> {
        let mut devices: Vec<_> = self.devices.read().await.values().cloned().collect();
        devices.sort_by_key(|d| d.first_seen);
        devices
    }

    /// Cached devices of one family; `no_devices_found` when there are none
    pub async fn list_family(
        &self,
        family: DeviceFamily,
    ) -> Result<Vec<DiscoveredDevice>, DiscoveryAbort> {
        let devices: Vec<_> = self
            .list()
            .await
            .into_iter()
            .filter(|d| d.family() == family)
            .collect();
        if devices.is_empty() {
            return Err(DiscoveryAbort::NoDevicesFound);
        }
        Ok(devices)
    }

    /// Pick a device for configuration, by its instance name
    pub async fn select(
        &self,
        family: DeviceFamily,
        name: &str,
    ) -> Result<DiscoveredDevice, DiscoveryAbort> {
        self.list_family(family)
            .await?
            .into_iter()
            .find(|d| d.display_name() == super::instance_name(name))
            .ok_or(DiscoveryAbort::DeviceNotFound)
    }

    pub async fn remove(&self, host: &str, port: u16) -> Option<DiscoveredDevice> {
        self.devices.write().await.remove(&(host.to_string(), port))
    }

    /// Drop entries not seen within `max_age`
    pub async fn evict_stale(&self, max_age: Duration) -> usize {
        let mut devices = self.devices.write().await;
        let before = devices.len();
        devices.retain(|_, d| !d.is_stale(max_age));
        let evicted = before - devices.len();
        if evicted > 0 {
            self.stats.write().await.evicted += evicted as u64;
            debug!("Evicted {evicted} stale discovery entries");
        }
        evicted
    }

    pub async fn clear(&self) {
        self.devices.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    pub async fn stats(&self) -> DiscoveryCacheStats {
        self.stats.read().await.clone()
    }
}
