//! Message router and normalizer
//!
//! Classifies inbound envelopes by topic suffix and reshapes vendor payloads
//! into stable snapshot keys. Extraction ([`extract`]) is a pure function of
//! the envelope; [`MessageRouter`] applies the result to a state store and
//! notifies observers once per message.

pub mod normalize;

use crate::client::{CommandId, ControlRecord, Envelope, MessageHandler};
use crate::device::{DeviceFamily, DeviceIdentity};
use crate::state::{DeviceStateStore, StateEvent};
use async_trait::async_trait;
use normalize::{
    parse_code, ChargingRealtime, ChargingSession, DeviceInfo, DeviceStatus, StorageMini,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Ids of the three-entry batched status change
const BATCH_STATUS_IDS: [(&str, &str); 3] = [
    ("gun-status", "gun_status"),
    ("charge-status", "charging_status"),
    ("pile-status", "pile_status"),
];

/// Inbound message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Info,
    Function,
    Event,
    Property,
    Monitor,
    StorageMini,
}

impl MessageKind {
    /// Checked in this order
    const BY_SUFFIX: [(&'static str, MessageKind); 6] = [
        ("/info/post", MessageKind::Info),
        ("/function/post", MessageKind::Function),
        ("/event/post", MessageKind::Event),
        ("/property/post", MessageKind::Property),
        ("/monitor2/post", MessageKind::Monitor),
        ("/event/storage/mini/post", MessageKind::StorageMini),
    ];

    pub fn classify(topic: &str) -> Option<Self> {
        Self::BY_SUFFIX
            .iter()
            .find(|(suffix, _)| topic.ends_with(suffix))
            .map(|(_, kind)| *kind)
    }

    pub fn suffix(&self) -> &'static str {
        Self::BY_SUFFIX
            .iter()
            .find(|(_, kind)| kind == self)
            .map(|(suffix, _)| *suffix)
            .unwrap_or_default()
    }
}

/// One snapshot write
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Deep-merge into the existing sub-object
    Merge(String, Value),
    /// Overwrite the key
    Replace(String, Value),
}

impl Write {
    fn merge(key: &str, value: Value) -> Self {
        Write::Merge(key.to_string(), value)
    }

    fn replace(key: &str, value: Value) -> Self {
        Write::Replace(key.to_string(), value)
    }

    pub fn key(&self) -> &str {
        match self {
            Write::Merge(key, _) | Write::Replace(key, _) => key,
        }
    }

    pub fn value(&self) -> &Value {
        match self {
            Write::Merge(_, value) | Write::Replace(_, value) => value,
        }
    }
}

/// Writes derived from one envelope
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub kind: Option<MessageKind>,
    pub writes: Vec<Write>,
}

impl Extraction {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.writes
            .iter()
            .rev()
            .find(|w| w.key() == key)
            .map(Write::value)
    }

    /// Whether the message can change firmware metadata
    fn carries_firmware(&self) -> bool {
        matches!(
            self.kind,
            Some(MessageKind::Info) | Some(MessageKind::StorageMini)
        ) && !self.writes.is_empty()
    }
}

/// Derive snapshot writes from an envelope; `now_ms` stamps control records
pub fn extract(envelope: &Envelope, now_ms: i64) -> Extraction {
    let kind = MessageKind::classify(&envelope.topic);
    let Some(kind) = kind else {
        return Extraction::default();
    };

    let writes = match &envelope.payload {
        Value::Array(items) => extract_array(items, now_ms),
        Value::Object(_) => extract_object(kind, &envelope.payload, now_ms),
        other => {
            warn!(topic = %envelope.topic, "Ignoring non-structured payload: {other}");
            Vec::new()
        }
    };

    Extraction {
        kind: Some(kind),
        writes,
    }
}

fn extract_array(items: &[Value], now_ms: i64) -> Vec<Write> {
    if let Some(writes) = batch_status(items, now_ms) {
        return writes;
    }

    match items.first().and_then(ControlRecord::from_value) {
        Some(record) => acknowledgement(&record, now_ms),
        None => {
            debug!("Array payload without a control record, nothing to extract");
            Vec::new()
        }
    }
}

fn extract_object(kind: MessageKind, payload: &Value, now_ms: i64) -> Vec<Write> {
    match kind {
        MessageKind::Info => vec![Write::replace(
            "device_info",
            to_value(&DeviceInfo::from_payload(payload)),
        )],
        MessageKind::Function => match ControlRecord::from_value(payload) {
            Some(record) if !record.id.is_empty() => acknowledgement(&record, now_ms),
            _ => Vec::new(),
        },
        MessageKind::Event => vec![
            Write::replace(
                "last_charging_session",
                to_value(&ChargingSession::from_payload(payload)),
            ),
            Write::replace("charging_status", json!("completed")),
        ],
        MessageKind::Property => vec![Write::merge(
            "device_status",
            to_value(&DeviceStatus::from_payload(payload)),
        )],
        MessageKind::Monitor => vec![Write::replace(
            "charging_realtime",
            to_value(&ChargingRealtime::from_payload(payload)),
        )],
        MessageKind::StorageMini => {
            let mini = StorageMini::from_payload(payload);
            vec![
                Write::merge(
                    "device_info",
                    json!({ "protocol_version": mini.protocol_version }),
                ),
                Write::replace("storage_mini", to_value(&mini)),
            ]
        }
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Exactly three records whose ids are the fixed status set
fn batch_status(items: &[Value], now_ms: i64) -> Option<Vec<Write>> {
    if items.len() != BATCH_STATUS_IDS.len() {
        return None;
    }

    let records: Vec<ControlRecord> = items
        .iter()
        .map(ControlRecord::from_value)
        .collect::<Option<_>>()?;

    let mut status = Map::new();
    let mut responses = Vec::with_capacity(BATCH_STATUS_IDS.len());
    for (id, field) in BATCH_STATUS_IDS {
        let mut matching = records.iter().filter(|r| r.id == id);
        let record = matching.next()?;
        if matching.next().is_some() {
            return None;
        }

        let code = parse_code(&record.value).unwrap_or_else(|| {
            warn!("Unparsable {id} value {:?}, using 0", record.value);
            0
        });
        status.insert(field.to_string(), json!(code));
        responses.push(Value::Object(record_value(record, now_ms)));
    }

    Some(vec![
        Write::merge("device_status", Value::Object(status)),
        Write::replace("device_status_responses", Value::Array(responses)),
    ])
}

fn record_value(record: &ControlRecord, now_ms: i64) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("id".into(), json!(record.id));
    map.insert("value".into(), json!(record.value));
    map.insert("remark".into(), json!(record.remark));
    map.insert("user_id".into(), json!(record.user_id));
    map.insert("timestamp".into(), json!(now_ms));
    map
}

fn with_fields(mut base: Map<String, Value>, extra: Value) -> Value {
    if let Value::Object(extra) = extra {
        base.extend(extra);
    }
    Value::Object(base)
}

/// Single control-acknowledgement record
fn acknowledgement(record: &ControlRecord, now_ms: i64) -> Vec<Write> {
    let base = record_value(record, now_ms);
    let mut writes = vec![Write::replace(
        "charging_control_response",
        Value::Object(base.clone()),
    )];

    let Some(command) = CommandId::parse(&record.id) else {
        debug!(id = %record.id, "Unrecognized acknowledgement id");
        return writes;
    };

    let value = record.value.trim();
    match command {
        CommandId::ChargeSwitch => match value {
            "0" => writes.push(Write::replace("charging_status", json!("charging"))),
            "1" => writes.push(Write::replace("charging_status", json!("stopped"))),
            other => debug!("Unknown charg-switch value {other:?}"),
        },
        CommandId::NetworkWay => {
            let mode = match value {
                "1" => Some("network_control"),
                "2" => Some("plug_and_play"),
                _ => None,
            };
            if let Some(mode) = mode {
                writes.push(Write::replace("charging_mode", json!(mode)));
                writes.push(Write::replace("charging_mode_display", json!(mode)));
            }
            writes.push(Write::replace(
                "charging_mode_response",
                with_fields(base, json!({ "mode": mode })),
            ));
        }
        CommandId::ChargeCurrent => {
            match parse_code(value) {
                Some(amps) => writes.push(Write::replace("max_current", json!(amps))),
                None => warn!("Unparsable charg-current value {value:?}"),
            }
            writes.push(Write::replace(
                "charging_current_response",
                Value::Object(base),
            ));
        }
        CommandId::ResetPassword => {
            writes.push(Write::replace(
                "screen_password_reset",
                json!({ "success": true, "timestamp": now_ms }),
            ));
            writes.push(Write::replace("password_reset_response", Value::Object(base)));
        }
        CommandId::NfcEnable => {
            // Inverted on the wire: 0 enables, 1 disables
            let enabled = match value {
                "0" => Some(true),
                "1" => Some(false),
                _ => None,
            };
            if let Some(enabled) = enabled {
                writes.push(Write::replace("nfc_enabled", json!(enabled)));
            }
            writes.push(Write::replace(
                "nfc_status_response",
                with_fields(base, json!({ "enabled": enabled })),
            ));
        }
        CommandId::CardAdd | CommandId::CardDelete => {
            let key = if command == CommandId::CardAdd {
                "nfc_card_add_response"
            } else {
                "nfc_card_delete_response"
            };
            writes.push(Write::replace(
                key,
                with_fields(base, json!({ "card_id": value, "success": true })),
            ));
        }
        CommandId::ChargeError => {
            let error_codes = match serde_json::from_str::<Value>(value) {
                Ok(Value::Array(codes)) => codes,
                Ok(other) => vec![other],
                Err(_) if value.is_empty() => Vec::new(),
                Err(e) => {
                    warn!("Unparsable charg-error value {value:?}: {e}");
                    Vec::new()
                }
            };
            writes.push(Write::replace("error_codes", json!(error_codes)));
            writes.push(Write::replace(
                "device_error_response",
                with_fields(base, json!({ "error_codes": error_codes })),
            ));
        }
    }

    writes
}

/// Firmware string the registry should show for this family
pub fn select_firmware(family: DeviceFamily, device_info: &Value) -> Option<String> {
    let field = |name: &str| {
        device_info
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    match family {
        DeviceFamily::EnergyStorage => {
            field("protocol_version").or_else(|| field("app_firmware_version"))
        }
        _ => field("app_firmware_version"),
    }
}

/// Applies extracted writes to one device's state store
pub struct MessageRouter {
    identity: DeviceIdentity,
    store: Arc<DeviceStateStore>,
}

impl MessageRouter {
    pub fn new(identity: DeviceIdentity, store: Arc<DeviceStateStore>) -> Self {
        Self { identity, store }
    }

    pub fn store(&self) -> &Arc<DeviceStateStore> {
        &self.store
    }

    /// Route one envelope: apply its writes, then notify once
    pub async fn route(&self, envelope: Envelope) -> Extraction {
        let extraction = extract(&envelope, chrono::Utc::now().timestamp_millis());

        match extraction.kind {
            Some(kind) => debug!(
                topic = %envelope.topic,
                ?kind,
                writes = extraction.writes.len(),
                "Routing message"
            ),
            None => debug!(topic = %envelope.topic, "No handler for topic"),
        }

        for write in &extraction.writes {
            match write {
                Write::Merge(key, value) => self.store.merge(key, value.clone()).await,
                Write::Replace(key, value) => self.store.replace(key, value.clone()).await,
            }
        }

        self.store
            .replace(
                "last_message",
                json!({ "topic": envelope.topic, "payload": envelope.payload }),
            )
            .await;
        self.store.notify_updated(envelope.topic.clone());

        if extraction.carries_firmware() {
            self.publish_firmware().await;
        }

        extraction
    }

    async fn publish_firmware(&self) {
        let Some(device_info) = self.store.get("device_info").await else {
            return;
        };
        let Some(version) = select_firmware(self.identity.family, &device_info) else {
            return;
        };

        let identifier = self.identity.registry_identifier().to_string();
        if identifier.is_empty() {
            debug!("No registry identifier, skipping firmware event");
            return;
        }

        self.store.notify(StateEvent::FirmwareObserved {
            identifier,
            version,
        });
    }
}

#[async_trait]
impl MessageHandler for MessageRouter {
    async fn handle(&self, envelope: Envelope) {
        self.route(envelope).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    const NOW: i64 = 1_700_000_000_000;

    fn envelope(suffix: &str, payload: Value) -> Envelope {
        Envelope::new(format!("/ABC/123{suffix}"), payload)
    }

    #[rstest]
    #[case("/ABC/123/info/post", Some(MessageKind::Info))]
    #[case("/ABC/123/function/post", Some(MessageKind::Function))]
    #[case("/ABC/123/event/post", Some(MessageKind::Event))]
    #[case("/ABC/123/property/post", Some(MessageKind::Property))]
    #[case("/ABC/123/monitor2/post", Some(MessageKind::Monitor))]
    #[case("/SN/event/storage/mini/post", Some(MessageKind::StorageMini))]
    #[case("/ABC/123/info/get", None)]
    #[case("", None)]
    fn test_classify(#[case] topic: &str, #[case] expected: Option<MessageKind>) {
        assert_eq!(MessageKind::classify(topic), expected);
    }

    #[test]
    fn test_info_is_pure_function_of_payload() {
        let payload = json!({"appFirmVer": "V1.0.3", "gunStatus": 1, "cardList": ["A1"]});
        let first = extract(&envelope("/info/post", payload.clone()), NOW);
        let second = extract(&envelope("/info/post", payload), NOW + 5_000);

        assert_eq!(first, second);
        let info = first.get("device_info").unwrap();
        assert_eq!(info["app_firmware_version"], json!("V1.0.3"));
        assert_eq!(info["card_list"], json!(["A1"]));
        assert_eq!(info["error_codes"], json!([]));
        assert_eq!(info["board_info"], json!([]));
        assert_eq!(info["wifi_ssid"], Value::Null);
    }

    #[test]
    fn test_batch_status_any_order() {
        let ordered = json!([
            {"id": "gun-status", "value": "1"},
            {"id": "charge-status", "value": "0"},
            {"id": "pile-status", "value": "1"}
        ]);
        let shuffled = json!([
            {"id": "pile-status", "value": "1"},
            {"id": "gun-status", "value": "1"},
            {"id": "charge-status", "value": "0"}
        ]);

        let a = extract(&envelope("/property/post", ordered), NOW);
        let b = extract(&envelope("/property/post", shuffled), NOW);

        assert_eq!(a.writes, b.writes);
        assert_eq!(
            a.get("device_status"),
            Some(&json!({"gun_status": 1, "charging_status": 0, "pile_status": 1}))
        );
        assert_eq!(a.get("device_status_responses").unwrap().as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_batch_responses_are_timestamped() {
        let batch = json!([
            {"id": "pile-status", "value": "1", "remark": "r", "userId": "u1"},
            {"id": "gun-status", "value": "1"},
            {"id": "charge-status", "value": "0"}
        ]);
        let extraction = extract(&envelope("/property/post", batch), NOW);

        let responses = extraction.get("device_status_responses").unwrap();
        let responses = responses.as_array().unwrap();
        assert!(responses.iter().all(|r| r["timestamp"] == json!(NOW)));
        assert_eq!(
            responses[2],
            json!({"id": "pile-status", "value": "1", "remark": "r", "user_id": "u1", "timestamp": NOW})
        );
    }

    #[test]
    fn test_batch_with_blank_value_is_zero() {
        let batch = json!([
            {"id": "gun-status", "value": ""},
            {"id": "charge-status", "value": "2"},
            {"id": "pile-status", "value": "0"}
        ]);
        let extraction = extract(&envelope("/function/post", batch), NOW);
        assert_eq!(
            extraction.get("device_status"),
            Some(&json!({"gun_status": 0, "charging_status": 2, "pile_status": 0}))
        );
    }

    #[test]
    fn test_three_records_with_duplicate_id_is_not_a_batch() {
        let not_batch = json!([
            {"id": "gun-status", "value": "1"},
            {"id": "gun-status", "value": "0"},
            {"id": "pile-status", "value": "1"}
        ]);
        let extraction = extract(&envelope("/property/post", not_batch), NOW);
        assert!(extraction.get("device_status").is_none());
        assert_eq!(
            extraction.get("charging_control_response").unwrap()["id"],
            json!("gun-status")
        );
    }

    #[rstest]
    #[case("0", Some(true))]
    #[case("1", Some(false))]
    fn test_nfc_enable_inversion(#[case] value: &str, #[case] expected: Option<bool>) {
        let ack = json!([{"id": "nfc-enable", "value": value, "remark": "", "userId": ""}]);
        let extraction = extract(&envelope("/function/post", ack), NOW);
        assert_eq!(extraction.get("nfc_enabled"), expected.map(|b| json!(b)).as_ref());
        assert_eq!(
            extraction.get("nfc_status_response").unwrap()["enabled"],
            json!(expected)
        );
    }

    #[rstest]
    #[case("0", "charging")]
    #[case("1", "stopped")]
    fn test_charge_switch_ack(#[case] value: &str, #[case] status: &str) {
        let ack = json!([{"id": "charg-switch", "value": value, "remark": "app_charging"}]);
        let extraction = extract(&envelope("/function/post", ack), NOW);
        assert_eq!(extraction.get("charging_status"), Some(&json!(status)));

        let record = extraction.get("charging_control_response").unwrap();
        assert_eq!(record["remark"], json!("app_charging"));
        assert_eq!(record["timestamp"], json!(NOW));
    }

    #[test]
    fn test_other_acknowledgements() {
        let current = extract(
            &envelope("/property/post", json!([{"id": "charg-current", "value": "16"}])),
            NOW,
        );
        assert_eq!(current.get("max_current"), Some(&json!(16)));

        let mode = extract(
            &envelope("/property/post", json!([{"id": "network-way", "value": "2"}])),
            NOW,
        );
        assert_eq!(mode.get("charging_mode"), Some(&json!("plug_and_play")));

        let card = extract(
            &envelope("/function/post", json!([{"id": "card-add", "value": "04AB"}])),
            NOW,
        );
        assert_eq!(card.get("nfc_card_add_response").unwrap()["card_id"], json!("04AB"));

        let reset = extract(
            &envelope("/function/post", json!([{"id": "reset-pwd", "value": ""}])),
            NOW,
        );
        assert_eq!(reset.get("screen_password_reset").unwrap()["success"], json!(true));
    }

    #[test]
    fn test_charge_error_event() {
        let event = json!([{"id": "charg-error", "value": "[3, 17]"}]);
        let extraction = extract(&envelope("/event/post", event), NOW);
        assert_eq!(extraction.get("error_codes"), Some(&json!([3, 17])));
    }

    #[test]
    fn test_session_summary_event() {
        let extraction = extract(
            &envelope(
                "/event/post",
                json!({"degrees": 12.5, "duration": 3600, "stopReason": "full"}),
            ),
            NOW,
        );
        let session = extraction.get("last_charging_session").unwrap();
        assert_eq!(session["degrees"], json!(12.5));
        assert_eq!(session["stop_reason"], json!("full"));
        assert_eq!(session["user_id"], json!(""));
        assert_eq!(extraction.get("charging_status"), Some(&json!("completed")));
    }

    #[test]
    fn test_monitor_signal_sentinel() {
        let extraction = extract(
            &envelope("/monitor2/post", json!({"wifiRssi": -1, "power": 7.1})),
            NOW,
        );
        let realtime = extraction.get("charging_realtime").unwrap();
        assert_eq!(realtime["wifi_rssi"], Value::Null);
        assert_eq!(realtime["power"], json!(7.1));
    }

    #[test]
    fn test_unknown_topic_and_scalar_payload() {
        assert!(extract(&envelope("/ota/post", json!({})), NOW).writes.is_empty());
        assert!(extract(&envelope("/info/post", json!("x")), NOW).writes.is_empty());
        assert!(extract(&envelope("/info/post", json!([])), NOW).writes.is_empty());
    }

    #[test]
    fn test_select_firmware() {
        let info = json!({"app_firmware_version": "A1", "protocol_version": "P2"});
        assert_eq!(select_firmware(DeviceFamily::Charger, &info).as_deref(), Some("A1"));
        assert_eq!(
            select_firmware(DeviceFamily::EnergyStorage, &info).as_deref(),
            Some("P2")
        );
        let info = json!({"app_firmware_version": "A1", "protocol_version": ""});
        assert_eq!(
            select_firmware(DeviceFamily::EnergyStorage, &info).as_deref(),
            Some("A1")
        );
        assert_eq!(select_firmware(DeviceFamily::Charger, &json!({})), None);
    }

    #[tokio::test]
    async fn test_route_notifies_once_plus_firmware() {
        let identity = DeviceIdentity::new(DeviceFamily::Charger, "h")
            .with_device_id("ABC")
            .with_device_sn("123");
        let store = Arc::new(DeviceStateStore::new());
        let mut events = store.subscribe();
        let router = MessageRouter::new(identity, Arc::clone(&store));

        router
            .route(envelope("/info/post", json!({"appFirmVer": "V2"})))
            .await;

        assert_eq!(
            events.recv().await.unwrap(),
            StateEvent::Updated {
                source: "/ABC/123/info/post".to_string()
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            StateEvent::FirmwareObserved {
                identifier: "ABC".to_string(),
                version: "V2".to_string()
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_route_batch_is_one_update() {
        let identity = DeviceIdentity::new(DeviceFamily::Charger, "h");
        let store = Arc::new(DeviceStateStore::new());
        let mut events = store.subscribe();
        let router = MessageRouter::new(identity, Arc::clone(&store));

        router
            .route(envelope(
                "/property/post",
                json!([
                    {"id": "gun-status", "value": "1"},
                    {"id": "charge-status", "value": "1"},
                    {"id": "pile-status", "value": "1"}
                ]),
            ))
            .await;

        assert!(matches!(
            events.recv().await.unwrap(),
            StateEvent::Updated { .. }
        ));
        assert!(events.try_recv().is_err());
        assert_eq!(
            store.get("device_status").await,
            Some(json!({"gun_status": 1, "charging_status": 1, "pile_status": 1}))
        );
    }

    #[tokio::test]
    async fn test_storage_mini_merges_protocol_version() {
        let identity = DeviceIdentity::new(DeviceFamily::EnergyStorage, "h").with_device_sn("SN1");
        let store = Arc::new(DeviceStateStore::new());
        let router = MessageRouter::new(identity, Arc::clone(&store));

        router
            .route(envelope("/info/post", json!({"appFirmVer": "A7"})))
            .await;
        let mut events = store.subscribe();
        router
            .route(Envelope::new(
                "/SN1/event/storage/mini/post",
                json!({"protocolVer": "P9", "battery": {"batteryTotalSOC": 55}}),
            ))
            .await;

        let info = store.get("device_info").await.unwrap();
        assert_eq!(info["app_firmware_version"], json!("A7"));
        assert_eq!(info["protocol_version"], json!("P9"));
        assert_eq!(store.get("storage_mini").await.unwrap()["battery_soc"], json!(55.0));

        assert!(matches!(events.recv().await.unwrap(), StateEvent::Updated { .. }));
        assert_eq!(
            events.recv().await.unwrap(),
            StateEvent::FirmwareObserved {
                identifier: "SN1".to_string(),
                version: "P9".to_string()
            }
        );
    }
}
