//! Smart plug coordinator

use super::poll::HttpPollSession;
use super::Coordinator;
use crate::config::HttpPollConfig;
use crate::device::{DeviceFamily, DeviceIdentity};
use crate::error::{EwayError, Result};
use crate::router::normalize::f64_or;
use crate::state::{DeviceStateStore, Snapshot};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const STATUS_METHOD: &str = "Switch.GetStatus";
pub const SET_METHOD: &str = "Switch.Set";

/// One `Switch.GetStatus` answer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlugReading {
    pub switch_state: bool,
    pub power: f64,
    pub voltage: f64,
    pub current: f64,
    pub frequency: f64,
    pub temperature: f64,
    pub energy_total: f64,
    pub ret_energy_total: f64,
}

impl PlugReading {
    pub fn from_status(body: &Value) -> Self {
        let nested = |outer: &str, inner: &str| {
            body.get(outer)
                .map(|v| f64_or(v, inner, 0.0))
                .unwrap_or_default()
        };

        Self {
            switch_state: body.get("output").and_then(Value::as_bool).unwrap_or(false),
            power: f64_or(body, "apower", 0.0),
            voltage: f64_or(body, "voltage", 0.0),
            current: f64_or(body, "current", 0.0),
            frequency: f64_or(body, "freq", 0.0),
            temperature: nested("temperature", "tC"),
            energy_total: nested("aenergy", "total"),
            ret_energy_total: nested("ret_aenergy", "total"),
        }
    }
}

/// Smart plug coordinator
pub struct SmartPlugCoordinator {
    session: HttpPollSession,
}

impl SmartPlugCoordinator {
    pub fn new(identity: DeviceIdentity, config: HttpPollConfig) -> Result<Self> {
        if identity.family != DeviceFamily::SmartPlug {
            return Err(EwayError::invalid_configuration(format!(
                "Smart plug coordinator cannot drive a {} device",
                identity.family
            )));
        }
        Ok(Self::from_session(HttpPollSession::new(identity, config)?))
    }

    pub fn from_session(session: HttpPollSession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &HttpPollSession {
        &self.session
    }

    /// Last known relay state
    pub async fn switch_state(&self) -> Option<bool> {
        self.session
            .store()
            .get("switch_state")
            .await
            .and_then(|v| v.as_bool())
    }

    /// Switch the relay, then poll once to confirm.
    ///
    /// `Switch.Set` answers with the previous state only, so the requested
    /// state is written first and the follow-up poll overwrites it with what
    /// the plug reports.
    pub async fn set_switch(&self, on: bool) -> Result<()> {
        {
            let _guard = self.session.lock().await;
            let on_param = on.to_string();
            let ack = self
                .session
                .command(SET_METHOD, &[("id", "0"), ("on", &on_param)])
                .await?;
            debug!(host = %self.session.identity().host, "Switch.Set ack: {ack}");

            let store = self.session.store();
            store.replace("switch_state", Value::Bool(on)).await;
            store.notify_updated(SET_METHOD);
            info!(
                host = %self.session.identity().host,
                "Smart plug switched {}",
                if on { "on" } else { "off" }
            );
        }

        if let Err(e) = self.refresh().await {
            warn!(host = %self.session.identity().host, "Confirming poll failed: {e}");
        }
        Ok(())
    }

    /// Bounded connectivity test
    pub async fn probe(&self) -> bool {
        self.session.probe(STATUS_METHOD).await
    }

    async fn write_reading(&self, reading: &PlugReading) {
        let store = self.session.store();
        let entries = [
            ("switch_state", json!(reading.switch_state)),
            ("power", json!(reading.power)),
            ("voltage", json!(reading.voltage)),
            ("current", json!(reading.current)),
            ("frequency", json!(reading.frequency)),
            ("temperature", json!(reading.temperature)),
            ("energy_total", json!(reading.energy_total)),
            ("ret_energy_total", json!(reading.ret_energy_total)),
            ("last_update", json!(chrono::Utc::now().to_rfc3339())),
        ];
        for (key, value) in entries {
            store.replace(key, value).await;
        }
        store.notify_updated(STATUS_METHOD);
    }
}

#[async_trait]
impl Coordinator for SmartPlugCoordinator {
    fn identity(&self) -> &DeviceIdentity {
        self.session.identity()
    }

    fn store(&self) -> &Arc<DeviceStateStore> {
        self.session.store()
    }

    fn scan_interval(&self) -> Duration {
        self.session.config().plug_scan_interval
    }

    async fn refresh(&self) -> Result<Snapshot> {
        let mut tracker = self.session.lock().await;
        if let Some(body) = self.session.poll(&mut tracker, STATUS_METHOD).await? {
            self.write_reading(&PlugReading::from_status(&body)).await;
        }
        Ok(self.session.store().snapshot().await)
    }

    async fn is_available(&self) -> bool {
        self.session.is_connected().await
    }

    async fn shutdown(&self) -> Result<()> {
        debug!(host = %self.session.identity().host, "Smart plug coordinator shut down");
        Ok(())
    }
}
