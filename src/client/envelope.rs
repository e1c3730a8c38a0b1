//! Topic-addressed message envelope
//!
//! Every frame on the device socket is a JSON object
//! `{"topic": "/<id>/<sn>/<verb>/<direction>", "payload": ...}`.

use crate::device::DeviceIdentity;
use crate::error::{EwayError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One message exchanged with a device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub topic: String,
    #[serde(default = "empty_payload")]
    pub payload: Value,
}

fn empty_payload() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Command verb of an outbound `.../get` topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// Read device info
    Info,
    /// Read status
    Property,
    /// Control command
    Function,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Info => "info",
            Verb::Property => "property",
            Verb::Function => "function",
        }
    }
}

/// Control command identifiers understood by chargers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandId {
    ChargeSwitch,
    NetworkWay,
    ChargeCurrent,
    ResetPassword,
    NfcEnable,
    CardAdd,
    CardDelete,
    ChargeError,
}

impl CommandId {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandId::ChargeSwitch => "charg-switch",
            CommandId::NetworkWay => "network-way",
            CommandId::ChargeCurrent => "charg-current",
            CommandId::ResetPassword => "reset-pwd",
            CommandId::NfcEnable => "nfc-enable",
            CommandId::CardAdd => "card-add",
            CommandId::CardDelete => "card-del",
            CommandId::ChargeError => "charg-error",
        }
    }

    pub fn parse(id: &str) -> Option<Self> {
        Some(match id {
            "charg-switch" => CommandId::ChargeSwitch,
            "network-way" => CommandId::NetworkWay,
            "charg-current" => CommandId::ChargeCurrent,
            "reset-pwd" => CommandId::ResetPassword,
            "nfc-enable" => CommandId::NfcEnable,
            "card-add" => CommandId::CardAdd,
            "card-del" => CommandId::CardDelete,
            "charg-error" => CommandId::ChargeError,
            _ => return None,
        })
    }
}

/// Control-acknowledgement record carried in array payloads
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ControlRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub value: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub remark: String,
    #[serde(default, rename = "userId", deserialize_with = "lenient_string")]
    pub user_id: String,
}

impl ControlRecord {
    /// Read a record out of an arbitrary JSON value, tolerating missing fields
    pub fn from_value(value: &Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }
}

/// Vendor firmware sends numbers, strings or null for the same field
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

impl Envelope {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    /// Build an outbound `/<id>/<sn>/<verb>/get` command
    pub fn command(identity: &DeviceIdentity, verb: Verb, payload: Value) -> Result<Self> {
        if identity.device_id.is_empty() {
            return Err(EwayError::invalid_configuration(
                "device_id is required to build a command topic",
            ));
        }
        if identity.device_sn.is_empty() {
            return Err(EwayError::invalid_configuration(
                "device_sn is required to build a command topic",
            ));
        }

        let topic = format!(
            "/{}/{}/{}/get",
            identity.device_id,
            identity.device_sn,
            verb.as_str()
        );
        Ok(Self::new(topic, payload))
    }

    /// `info/get` request
    pub fn get_device_info(identity: &DeviceIdentity) -> Result<Self> {
        Self::command(identity, Verb::Info, empty_payload())
    }

    /// `property/get` request
    pub fn get_device_status(identity: &DeviceIdentity) -> Result<Self> {
        Self::command(identity, Verb::Property, empty_payload())
    }

    /// `function/get` control command
    pub fn control(
        identity: &DeviceIdentity,
        id: CommandId,
        value: impl Into<String>,
        remark: &str,
    ) -> Result<Self> {
        let payload = json!({
            "id": id.as_str(),
            "value": value.into(),
            "remark": remark,
            "userId": "",
        });
        Self::command(identity, Verb::Function, payload)
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode one frame.
    ///
    /// A top-level array carries several envelopes; each element decodes on
    /// its own, so one bad element does not cost the others. The outer error
    /// covers frames that are not JSON or not a single envelope.
    pub fn decode_frame(text: &str) -> Result<Vec<Result<Envelope>>> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| EwayError::decode_failed(format!("invalid JSON frame: {e}")))?;

        match value {
            Value::Array(items) => Ok(items.into_iter().map(Self::from_frame_value).collect()),
            other => Ok(vec![Ok(Self::from_frame_value(other)?)]),
        }
    }

    fn from_frame_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(_) => serde_json::from_value(value)
                .map_err(|e| EwayError::decode_failed(format!("not an envelope: {e}"))),
            other => Err(EwayError::decode_failed(format!(
                "expected an object frame, got {other}"
            ))),
        }
    }
}
