//! CT meter coordinator
//!
//! Polls `EM1.GetStatus`, maps the vendor's field aliases onto fixed snapshot
//! keys and, once after the first good poll, fetches `EM1.GetConfig` for the
//! anti-backflow flag.

use super::poll::HttpPollSession;
use super::Coordinator;
use crate::config::HttpPollConfig;
use crate::device::{DeviceFamily, DeviceIdentity};
use crate::error::{EwayError, Result};
use crate::router::normalize::{f64_field, list_field, string_field};
use crate::state::{DeviceStateStore, Snapshot, StateEvent};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const STATUS_METHOD: &str = "EM1.GetStatus";
pub const GET_CONFIG_METHOD: &str = "EM1.GetConfig";
pub const SET_CONFIG_METHOD: &str = "EM1.SetConfig";

const VOLTAGE_ALIASES: &[&str] = &["voltage", "volt", "v", "ct_voltage"];
const CURRENT_ALIASES: &[&str] = &["current", "curr", "amp", "a", "ct_current"];
const ACT_POWER_ALIASES: &[&str] = &[
    "act_power",
    "active_power",
    "power",
    "watt",
    "w",
    "ct_act_power",
];
const APRT_POWER_ALIASES: &[&str] = &["aprt_power", "apparent_power", "va", "ct_aprt_power"];
const PF_ALIASES: &[&str] = &["pf", "power_factor", "factor", "ct_pf"];
const FREQ_ALIASES: &[&str] = &["freq", "frequency", "hz", "ct_freq"];
const ERRORS_ALIASES: &[&str] = &["errors", "error", "ct_errors"];
const FLAGS_ALIASES: &[&str] = &["flags", "status", "ct_flags"];
const CALIBRATION_ALIASES: &[&str] = &["calibration", "cal", "ct_calibration"];

/// One CT status poll, mapped onto logical fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CtReading {
    pub voltage: f64,
    pub current: f64,
    pub act_power: f64,
    pub aprt_power: f64,
    pub pf: f64,
    pub freq: f64,
    pub calibration: String,
    pub errors: Vec<Value>,
    pub flags: Vec<Value>,
    /// Only present when the firmware includes it in the status body
    pub anti_backflow: Option<bool>,
    /// Fields were inferred from value ranges rather than names
    pub guessed: bool,
}

impl CtReading {
    /// Snapshot entries written for this reading
    fn entries(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("ct_voltage", json!(self.voltage)),
            ("ct_current", json!(self.current)),
            ("ct_act_power", json!(self.act_power)),
            ("ct_aprt_power", json!(self.aprt_power)),
            ("ct_pf", json!(self.pf)),
            ("ct_freq", json!(self.freq)),
            ("ct_calibration", json!(self.calibration)),
            ("ct_errors", Value::Array(self.errors.clone())),
            ("ct_flags", Value::Array(self.flags.clone())),
        ]
    }
}

fn first_alias<'a>(body: &Value, aliases: &[&'a str]) -> Option<&'a str> {
    aliases
        .iter()
        .copied()
        .find(|key| body.get(key).is_some_and(|v| !v.is_null()))
}

/// Map a status body onto [`CtReading`].
///
/// Each field takes the first alias present, in preference order. Only when
/// no alias at all is present are numeric fields assigned by value range.
pub fn map_ct_status(body: &Value) -> CtReading {
    let mut reading = CtReading::default();
    let mut matched = false;

    let mut number = |aliases: &[&str], slot: &mut f64| {
        if let Some(key) = first_alias(body, aliases) {
            matched = true;
            *slot = f64_field(body, key).unwrap_or_default();
        }
    };
    number(VOLTAGE_ALIASES, &mut reading.voltage);
    number(CURRENT_ALIASES, &mut reading.current);
    number(ACT_POWER_ALIASES, &mut reading.act_power);
    number(APRT_POWER_ALIASES, &mut reading.aprt_power);
    number(PF_ALIASES, &mut reading.pf);
    number(FREQ_ALIASES, &mut reading.freq);

    if let Some(key) = first_alias(body, ERRORS_ALIASES) {
        matched = true;
        reading.errors = list_field(body, key);
    }
    if let Some(key) = first_alias(body, FLAGS_ALIASES) {
        matched = true;
        reading.flags = list_field(body, key);
    }
    if let Some(key) = first_alias(body, CALIBRATION_ALIASES) {
        matched = true;
        reading.calibration = string_field(body, key).unwrap_or_default();
    }

    reading.anti_backflow = body.get("anti_backflow").and_then(Value::as_bool);

    if !matched {
        guess_by_range(body, &mut reading);
    }
    reading
}

/// Last-resort mapping for firmware that renames every field
fn guess_by_range(body: &Value, reading: &mut CtReading) {
    let Some(fields) = body.as_object() else {
        return;
    };

    let mut voltage = None;
    let mut pf = None;
    let mut freq = None;
    let mut current = None;
    let mut act_power = None;

    for (key, value) in fields {
        if key == "id" {
            continue;
        }
        let Some(v) = value.as_f64() else {
            continue;
        };
        let slot = if (200.0..=250.0).contains(&v) {
            &mut voltage
        } else if (0.0..=1.0).contains(&v) {
            &mut pf
        } else if (45.0..=65.0).contains(&v) {
            &mut freq
        } else if (0.0..=100.0).contains(&v) {
            &mut current
        } else if v > 100.0 {
            &mut act_power
        } else {
            continue;
        };
        if slot.is_none() {
            *slot = Some((key.as_str(), v));
        }
    }

    let mut guessed = Vec::new();
    for (name, found, target) in [
        ("voltage", voltage, &mut reading.voltage),
        ("pf", pf, &mut reading.pf),
        ("freq", freq, &mut reading.freq),
        ("current", current, &mut reading.current),
        ("act_power", act_power, &mut reading.act_power),
    ] {
        if let Some((key, v)) = found {
            *target = v;
            guessed.push(format!("{name}<-{key}"));
        }
    }

    if !guessed.is_empty() {
        reading.guessed = true;
        warn!(
            "CT status carried no known field names; guessed by value range: {}",
            guessed.join(", ")
        );
    }
}

/// CT meter coordinator
pub struct CtCoordinator {
    session: HttpPollSession,
    config_fetch_scheduled: Arc<AtomicBool>,
    config_task: Mutex<Option<JoinHandle<()>>>,
}

impl CtCoordinator {
    pub fn new(identity: DeviceIdentity, config: HttpPollConfig) -> Result<Self> {
        if identity.family != DeviceFamily::Ct {
            return Err(EwayError::invalid_configuration(format!(
                "CT coordinator cannot drive a {} device",
                identity.family
            )));
        }
        Ok(Self::from_session(HttpPollSession::new(identity, config)?))
    }

    pub fn from_session(session: HttpPollSession) -> Self {
        Self {
            session,
            config_fetch_scheduled: Arc::new(AtomicBool::new(false)),
            config_task: Mutex::new(None),
        }
    }

    pub fn session(&self) -> &HttpPollSession {
        &self.session
    }

    /// Last known anti-backflow flag
    pub async fn anti_backflow(&self) -> Option<bool> {
        self.session
            .store()
            .get("anti_backflow")
            .await
            .and_then(|v| v.as_bool())
    }

    /// Whether the delayed config fetch has been scheduled
    pub fn config_fetch_scheduled(&self) -> bool {
        self.config_fetch_scheduled.load(Ordering::SeqCst)
    }

    /// Fetch `EM1.GetConfig` now and store `anti_backflow` when present
    pub async fn fetch_config(&self) -> Result<Option<bool>> {
        fetch_anti_backflow(&self.config_fetch()).await
    }

    /// Enable or disable anti-backflow.
    ///
    /// The device acknowledges with `{"restart_required": false}` and never
    /// echoes the new value, so on success the requested value is written
    /// into the snapshot as-is. The next `EM1.GetConfig` is the first real
    /// confirmation of it.
    pub async fn set_anti_backflow(&self, enable: bool) -> Result<()> {
        let _guard = self.session.lock().await;
        let config = json!({ "anti_backflow": enable }).to_string();
        let ack = self
            .session
            .command(SET_CONFIG_METHOD, &[("id", "0"), ("config", &config)])
            .await?;
        debug!(host = %self.session.identity().host, "SetConfig ack: {ack}");

        let store = self.session.store();
        store.merge("anti_backflow", Value::Bool(enable)).await;
        store.notify_updated(SET_CONFIG_METHOD);
        info!(
            host = %self.session.identity().host,
            "Anti-backflow {}",
            if enable { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    /// Bounded connectivity test
    pub async fn probe(&self) -> bool {
        self.session.probe(STATUS_METHOD).await
    }

    async fn write_reading(&self, reading: &CtReading) {
        let store = self.session.store();
        for (key, value) in reading.entries() {
            store.replace(key, value).await;
        }
        match reading.anti_backflow {
            Some(flag) => store.merge("anti_backflow", Value::Bool(flag)).await,
            None => {
                if store.get("anti_backflow").await.is_none() {
                    store.replace("anti_backflow", Value::Null).await;
                }
            }
        }
        store
            .replace("last_update", json!(chrono::Utc::now().to_rfc3339()))
            .await;
        store.notify_updated(STATUS_METHOD);

        let identifier = self.session.identity().registry_identifier();
        if !reading.calibration.is_empty() && !identifier.is_empty() {
            store.notify(StateEvent::FirmwareObserved {
                identifier: identifier.to_string(),
                version: reading.calibration.clone(),
            });
        }
    }

    fn config_fetch(&self) -> ConfigFetch {
        ConfigFetch {
            rpc: self.session.rpc().clone(),
            store: Arc::clone(self.session.store()),
            host: self.session.identity().host.clone(),
            timeout: self.session.config().command_timeout,
        }
    }

    /// Schedule the config fetch once; a failed fetch re-arms it
    fn schedule_config_fetch(&self) {
        if self.config_fetch_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }

        let fetch = self.config_fetch();
        let flag = Arc::clone(&self.config_fetch_scheduled);
        let delay = self.session.config().config_fetch_delay;
        debug!(host = %fetch.host, "Config fetch scheduled in {delay:?}");

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = fetch_anti_backflow(&fetch).await {
                warn!(host = %fetch.host, "Config fetch failed: {e}");
                flag.store(false, Ordering::SeqCst);
            }
        });

        if let Ok(mut slot) = self.config_task.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
    }
}

/// Everything the detached config fetch needs
struct ConfigFetch {
    rpc: crate::client::RpcClient,
    store: Arc<DeviceStateStore>,
    host: String,
    timeout: Duration,
}

async fn fetch_anti_backflow(fetch: &ConfigFetch) -> Result<Option<bool>> {
    let body = fetch
        .rpc
        .call(GET_CONFIG_METHOD, &[("id", "0")], fetch.timeout)
        .await?;

    match body.get("anti_backflow").and_then(Value::as_bool) {
        Some(flag) => {
            let previous = fetch.store.get("anti_backflow").await;
            fetch.store.merge("anti_backflow", Value::Bool(flag)).await;
            fetch.store.notify_updated(GET_CONFIG_METHOD);
            info!(host = %fetch.host, "Anti-backflow {previous:?} -> {flag}");
            Ok(Some(flag))
        }
        None => {
            warn!(host = %fetch.host, "anti_backflow missing from CT config");
            Ok(None)
        }
    }
}

#[async_trait]
impl Coordinator for CtCoordinator {
    fn identity(&self) -> &DeviceIdentity {
        self.session.identity()
    }

    fn store(&self) -> &Arc<DeviceStateStore> {
        self.session.store()
    }

    fn scan_interval(&self) -> Duration {
        self.session.config().ct_scan_interval
    }

    async fn refresh(&self) -> Result<Snapshot> {
        let mut tracker = self.session.lock().await;
        if let Some(body) = self.session.poll(&mut tracker, STATUS_METHOD).await? {
            let reading = map_ct_status(&body);
            self.write_reading(&reading).await;
            self.schedule_config_fetch();
        }
        Ok(self.session.store().snapshot().await)
    }

    async fn is_available(&self) -> bool {
        self.session.is_connected().await
    }

    async fn shutdown(&self) -> Result<()> {
        let task = self.config_task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            task.abort();
        }
        debug!(host = %self.session.identity().host, "CT coordinator shut down");
        Ok(())
    }
}
