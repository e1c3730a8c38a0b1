//! Coordinator for WebSocket devices (chargers and energy storage)
//!
//! One lock per coordinator serializes the connect/ping/request sequence of a
//! refresh against user commands so their frames never interleave on the
//! socket. Inbound frames bypass the lock: the read loop routes them straight
//! into the state store.

use super::Coordinator;
use crate::client::{CommandId, DeviceSession, Envelope, EwayWebSocketClient};
use crate::config::WebSocketConfig;
use crate::device::{DeviceIdentity, Protocol};
use crate::error::{EwayError, Result};
use crate::router::MessageRouter;
use crate::state::{DeviceStateStore, Snapshot};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Charging mode accepted by `network-way`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargingMode {
    NetworkControl,
    PlugAndPlay,
}

impl ChargingMode {
    pub fn wire_value(&self) -> &'static str {
        match self {
            ChargingMode::NetworkControl => "1",
            ChargingMode::PlugAndPlay => "2",
        }
    }
}

/// Refresh entry point and command surface for one socket-backed device
pub struct ChargerCoordinator {
    identity: DeviceIdentity,
    config: WebSocketConfig,
    client: EwayWebSocketClient,
    store: Arc<DeviceStateStore>,
    lock: Mutex<()>,
}

impl ChargerCoordinator {
    pub fn new(identity: DeviceIdentity, config: WebSocketConfig) -> Result<Self> {
        if identity.family.protocol() != Protocol::WebSocket {
            return Err(EwayError::invalid_configuration(format!(
                "Charger coordinator cannot drive a {} device",
                identity.family
            )));
        }

        let store = Arc::new(DeviceStateStore::new());
        let router = Arc::new(MessageRouter::new(identity.clone(), Arc::clone(&store)));
        let client = EwayWebSocketClient::new(identity.clone(), config.clone(), router)?;

        Ok(Self {
            identity,
            config,
            client,
            store,
            lock: Mutex::new(()),
        })
    }

    pub fn client(&self) -> &EwayWebSocketClient {
        &self.client
    }

    pub async fn start_charging(&self) -> Result<()> {
        self.send_control(CommandId::ChargeSwitch, "0", "app_charging")
            .await
    }

    pub async fn stop_charging(&self) -> Result<()> {
        self.send_control(CommandId::ChargeSwitch, "1", "stop_charging")
            .await
    }

    pub async fn set_max_current(&self, amps: u32) -> Result<()> {
        self.send_control(CommandId::ChargeCurrent, amps.to_string(), "set_current")
            .await
    }

    pub async fn set_charging_mode(&self, mode: ChargingMode) -> Result<()> {
        self.send_control(CommandId::NetworkWay, mode.wire_value(), "set_network_way")
            .await
    }

    /// The device flag is inverted: `"0"` means enabled
    pub async fn set_nfc_enabled(&self, enabled: bool) -> Result<()> {
        let value = if enabled { "0" } else { "1" };
        self.send_control(CommandId::NfcEnable, value, "set_nfc")
            .await
    }

    pub async fn reset_screen_password(&self) -> Result<()> {
        self.send_control(CommandId::ResetPassword, "", "reset_password")
            .await
    }

    pub async fn add_nfc_card(&self, card_id: &str) -> Result<()> {
        self.send_control(CommandId::CardAdd, card_id, "add_card")
            .await
    }

    pub async fn delete_nfc_card(&self, card_id: &str) -> Result<()> {
        self.send_control(CommandId::CardDelete, card_id, "delete_card")
            .await
    }

    async fn send_control(
        &self,
        id: CommandId,
        value: impl Into<String>,
        remark: &str,
    ) -> Result<()> {
        let _guard = self.lock.lock().await;
        let value = value.into();

        if !self.client.is_connected().await {
            error!(
                device = %self.identity,
                "Cannot send {}: not connected",
                id.as_str()
            );
            return Err(EwayError::not_connected(format!(
                "{} is not connected",
                self.identity
            )));
        }

        let envelope = Envelope::control(&self.identity, id, value.clone(), remark)?;
        self.client.send(envelope).await.map_err(|e| {
            error!(
                device = %self.identity,
                "Command {}={value:?} ({remark}) failed: {e}",
                id.as_str()
            );
            e
        })?;
        info!(device = %self.identity, "Sent {}={value:?} ({remark})", id.as_str());
        Ok(())
    }

    async fn ensure_connected(&self) -> Result<()> {
        if !self.client.is_connected().await {
            self.client
                .connect()
                .await
                .map_err(|e| e.into_update_failed("connect"))?;
        }

        if !self.client.ping().await {
            warn!(device = %self.identity, "Ping failed, reconnecting");
            self.client.disconnect().await?;
            self.client
                .connect()
                .await
                .map_err(|e| e.into_update_failed("reconnect after failed ping"))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Coordinator for ChargerCoordinator {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn store(&self) -> &Arc<DeviceStateStore> {
        &self.store
    }

    fn scan_interval(&self) -> Duration {
        self.config.scan_interval
    }

    async fn refresh(&self) -> Result<Snapshot> {
        let _guard = self.lock.lock().await;
        self.ensure_connected().await?;

        if self.identity.is_complete() {
            if let Err(e) = self.client.get_device_info().await {
                warn!(device = %self.identity, "info/get failed: {e}");
            }
            if let Err(e) = self.client.get_device_status().await {
                warn!(device = %self.identity, "property/get failed: {e}");
            }
        }

        Ok(self.store.snapshot().await)
    }

    async fn is_available(&self) -> bool {
        self.client.is_connected().await
    }

    async fn shutdown(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.client.disconnect().await
    }
}
