//! Per-device coordinators
//!
//! A coordinator owns one device's session and state store and exposes the
//! periodic refresh entry point a host scheduler drives. A refresh that
//! returns an error means "mark the device unavailable", never "crash".

pub mod charger;
pub mod ct;
pub mod poll;
pub mod smart_plug;

pub use charger::{ChargerCoordinator, ChargingMode};
pub use ct::CtCoordinator;
pub use poll::{HttpPollSession, LinkState, PollTracker};
pub use smart_plug::SmartPlugCoordinator;

use crate::config::EwayConfig;
use crate::device::{DeviceFamily, DeviceIdentity};
use crate::error::Result;
use crate::state::{DeviceStateStore, Snapshot};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Scheduler-facing surface shared by every device family
#[async_trait]
pub trait Coordinator: Send + Sync {
    fn identity(&self) -> &DeviceIdentity;

    fn store(&self) -> &Arc<DeviceStateStore>;

    /// Period at which the scheduler should call [`Coordinator::refresh`]
    fn scan_interval(&self) -> Duration;

    /// One refresh cycle; errors are `UpdateFailed`
    async fn refresh(&self) -> Result<Snapshot>;

    async fn is_available(&self) -> bool;

    async fn shutdown(&self) -> Result<()>;
}

/// Build the coordinator matching the identity's family
pub fn build_coordinator(
    identity: DeviceIdentity,
    config: &EwayConfig,
) -> Result<Arc<dyn Coordinator>> {
    let coordinator: Arc<dyn Coordinator> = match identity.family {
        DeviceFamily::Charger | DeviceFamily::EnergyStorage => Arc::new(ChargerCoordinator::new(
            identity,
            config.websocket.clone(),
        )?),
        DeviceFamily::Ct => Arc::new(CtCoordinator::new(identity, config.http.clone())?),
        DeviceFamily::SmartPlug => {
            Arc::new(SmartPlugCoordinator::new(identity, config.http.clone())?)
        }
    };
    Ok(coordinator)
}
