//! Defensive field extraction for vendor payloads
//!
//! Every accessor tolerates a missing field, a null, or a number sent as a
//! string. A bad field yields its default and never aborts the message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sentinel the firmware uses for "no signal reading"
pub const SIGNAL_UNAVAILABLE: i64 = -1;

pub fn f64_field(payload: &Value, key: &str) -> Option<f64> {
    match payload.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

pub fn f64_or(payload: &Value, key: &str, default: f64) -> f64 {
    f64_field(payload, key).unwrap_or(default)
}

pub fn i64_field(payload: &Value, key: &str) -> Option<i64> {
    match payload.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => parse_code(s),
        _ => None,
    }
}

pub fn i64_or(payload: &Value, key: &str, default: i64) -> i64 {
    i64_field(payload, key).unwrap_or(default)
}

/// Strings pass through, numbers and booleans are rendered
pub fn string_field(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn string_or(payload: &Value, key: &str, default: &str) -> String {
    string_field(payload, key).unwrap_or_else(|| default.to_string())
}

pub fn list_field(payload: &Value, key: &str) -> Vec<Value> {
    match payload.get(key) {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

/// Raw value, null when absent
pub fn raw_field(payload: &Value, key: &str) -> Option<Value> {
    payload.get(key).filter(|v| !v.is_null()).cloned()
}

/// Signal strength with the `-1` sentinel mapped to `None`
pub fn signal_strength(payload: &Value, key: &str) -> Option<i64> {
    i64_field(payload, key).filter(|v| *v != SIGNAL_UNAVAILABLE)
}

/// Integer code from a string value; blank means 0
pub fn parse_code(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return Some(0);
    }
    value
        .parse::<i64>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().map(|f| f as i64))
}

/// Milliseconds since epoch rendered as RFC 3339 UTC; empty when not positive
pub fn format_timestamp_ms(ms: i64) -> String {
    if ms <= 0 {
        return String::new();
    }
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

/// Charge status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    NotCharging,
    Charging,
    Complete,
}

impl ChargeStatus {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::NotCharging),
            1 => Some(Self::Charging),
            2 => Some(Self::Complete),
            _ => None,
        }
    }
}

/// Gun (connector) status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GunStatus {
    Unplugged,
    PluggedIn,
}

impl GunStatus {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Unplugged),
            1 => Some(Self::PluggedIn),
            _ => None,
        }
    }
}

/// Pile (charger body) status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PileStatus {
    Idle,
    Charging,
    Fault,
}

impl PileStatus {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Idle),
            1 => Some(Self::Charging),
            2 => Some(Self::Fault),
            _ => None,
        }
    }
}

/// `device_info`, written by `/info/post`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub app_firmware_version: Option<String>,
    pub mcb_firmware_version: Option<String>,
    pub net_firmware_version: Option<String>,
    pub ui_firmware_version: Option<String>,
    pub charge_current: Option<f64>,
    pub charge_status: Option<i64>,
    pub gun_status: Option<i64>,
    pub gun_lock: Option<i64>,
    pub pile_status: Option<i64>,
    pub error_codes: Vec<Value>,
    pub block_errors: Option<Value>,
    pub card_list: Vec<Value>,
    pub network_way: Option<String>,
    pub net_source: Option<String>,
    pub wifi_ssid: Option<String>,
    pub nfc_enable: Option<i64>,
    pub time_zone: Option<String>,
    pub work_charge: Option<f64>,
    pub work_this: Option<f64>,
    pub work_total: Option<f64>,
    pub board_info: Vec<Value>,
    /// Set by storage telemetry, absent from `/info/post`
    #[serde(default)]
    pub protocol_version: Option<String>,
}

impl DeviceInfo {
    pub fn from_payload(p: &Value) -> Self {
        Self {
            app_firmware_version: string_field(p, "appFirmVer"),
            mcb_firmware_version: string_field(p, "mcbFirmVer"),
            net_firmware_version: string_field(p, "netFirmVer"),
            ui_firmware_version: string_field(p, "uiFirmVer"),
            charge_current: f64_field(p, "chargCurrent"),
            charge_status: i64_field(p, "chargeStatus"),
            gun_status: i64_field(p, "gunStatus"),
            gun_lock: i64_field(p, "gunLock"),
            pile_status: i64_field(p, "pileStatus"),
            error_codes: list_field(p, "errCode"),
            block_errors: raw_field(p, "blockError"),
            card_list: list_field(p, "cardList"),
            network_way: string_field(p, "networkWay"),
            net_source: string_field(p, "netSource"),
            wifi_ssid: string_field(p, "wifiSsid"),
            nfc_enable: i64_field(p, "nfcEnable"),
            time_zone: string_field(p, "timeZone"),
            work_charge: f64_field(p, "workCharg"),
            work_this: f64_field(p, "workThis"),
            work_total: f64_field(p, "workTotal"),
            board_info: list_field(p, "board"),
            protocol_version: None,
        }
    }
}

/// `device_status`, written by `/property/post`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub charging_status: Option<i64>,
    pub gun_status: Option<i64>,
    pub pile_status: Option<i64>,
}

impl DeviceStatus {
    pub fn from_payload(p: &Value) -> Self {
        Self {
            charging_status: i64_field(p, "chargingStatus"),
            gun_status: i64_field(p, "gunStatus"),
            pile_status: i64_field(p, "pileStatus"),
        }
    }

    pub fn charge(&self) -> Option<ChargeStatus> {
        self.charging_status.and_then(ChargeStatus::from_code)
    }

    pub fn gun(&self) -> Option<GunStatus> {
        self.gun_status.and_then(GunStatus::from_code)
    }

    pub fn pile(&self) -> Option<PileStatus> {
        self.pile_status.and_then(PileStatus::from_code)
    }
}

/// `charging_realtime`, written by `/monitor2/post`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChargingRealtime {
    pub amount: f64,
    pub current: f64,
    pub current_l1: f64,
    pub current_l2: f64,
    pub current_l3: f64,
    pub duration: i64,
    pub duty_cycle: i64,
    pub imt4g_rssi: Option<i64>,
    pub moisture: f64,
    pub power: f64,
    pub temperature: f64,
    pub voltage: f64,
    pub wifi_rssi: Option<i64>,
}

impl ChargingRealtime {
    pub fn from_payload(p: &Value) -> Self {
        Self {
            amount: f64_or(p, "amount", 0.0),
            current: f64_or(p, "current", 0.0),
            current_l1: f64_or(p, "currentL1", 0.0),
            current_l2: f64_or(p, "currentL2", 0.0),
            current_l3: f64_or(p, "currentL3", 0.0),
            duration: i64_or(p, "duration", 0),
            duty_cycle: i64_or(p, "dutyCycle", 0),
            imt4g_rssi: signal_strength(p, "imt4gRssi"),
            moisture: f64_or(p, "moisture", 0.0),
            power: f64_or(p, "power", 0.0),
            temperature: f64_or(p, "temperature", 0.0),
            voltage: f64_or(p, "voltage", 0.0),
            wifi_rssi: signal_strength(p, "wifiRssi"),
        }
    }
}

/// `last_charging_session`, written by `/event/post`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChargingSession {
    pub degrees: f64,
    pub duration: i64,
    pub start_time: Option<i64>,
    pub start_time_formatted: String,
    pub end_time: Option<i64>,
    pub end_time_formatted: String,
    pub stop_reason: String,
    pub error_codes: Vec<Value>,
    pub user_id: String,
}

impl ChargingSession {
    pub fn from_payload(p: &Value) -> Self {
        let start_time = i64_field(p, "startTime");
        let end_time = i64_field(p, "endTime");
        Self {
            degrees: f64_or(p, "degrees", 0.0),
            duration: i64_or(p, "duration", 0),
            start_time,
            start_time_formatted: start_time.map(format_timestamp_ms).unwrap_or_default(),
            end_time,
            end_time_formatted: end_time.map(format_timestamp_ms).unwrap_or_default(),
            stop_reason: string_or(p, "stopReason", ""),
            error_codes: list_field(p, "errCode"),
            user_id: string_or(p, "userId", ""),
        }
    }
}

/// `storage_mini`, written by `/event/storage/mini/post`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageMini {
    pub timestamp: i64,
    pub timestamp_formatted: String,
    pub protocol_version: String,
    pub output_power: f64,
    pub pv_power: Option<f64>,
    pub battery_power: Option<f64>,
    pub battery_soc: Option<f64>,
}

impl StorageMini {
    pub fn from_payload(p: &Value) -> Self {
        let timestamp = i64_or(p, "timestamp", 0);
        let pv = p.get("pv").cloned().unwrap_or(Value::Null);
        let battery = p.get("battery").cloned().unwrap_or(Value::Null);
        Self {
            timestamp,
            timestamp_formatted: format_timestamp_ms(timestamp),
            protocol_version: string_or(p, "protocolVer", ""),
            output_power: f64_or(p, "outputPower", 0.0),
            pv_power: f64_field(&pv, "power"),
            battery_power: f64_field(&battery, "batteryPower"),
            battery_soc: f64_field(&battery, "batteryTotalSOC"),
        }
    }
}
