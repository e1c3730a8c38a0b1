//! Device identity and family conventions

use crate::config::{DEFAULT_HTTP_PORT, DEFAULT_WS_PORT};
use crate::error::{EwayError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Manufacturer reported to device registries
pub const MANUFACTURER: &str = "Eway";

/// Device family, determines protocol, port convention and router behavior
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFamily {
    Charger,
    EnergyStorage,
    Ct,
    SmartPlug,
}

/// Wire protocol spoken by a family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    WebSocket,
    HttpRpc,
}

impl DeviceFamily {
    pub fn protocol(&self) -> Protocol {
        match self {
            DeviceFamily::Charger | DeviceFamily::EnergyStorage => Protocol::WebSocket,
            DeviceFamily::Ct | DeviceFamily::SmartPlug => Protocol::HttpRpc,
        }
    }

    pub fn default_port(&self) -> u16 {
        match self.protocol() {
            Protocol::WebSocket => DEFAULT_WS_PORT,
            Protocol::HttpRpc => DEFAULT_HTTP_PORT,
        }
    }

    /// Model string shown in device registries
    pub fn model(&self) -> &'static str {
        match self {
            DeviceFamily::Charger => "Smart Charger",
            DeviceFamily::EnergyStorage => "Energy Storage",
            DeviceFamily::Ct => "CT",
            DeviceFamily::SmartPlug => "Smart Plug",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceFamily::Charger => "charger",
            DeviceFamily::EnergyStorage => "energy_storage",
            DeviceFamily::Ct => "ct",
            DeviceFamily::SmartPlug => "smart_plug",
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceFamily {
    type Err = EwayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "charger" => Ok(DeviceFamily::Charger),
            "energy_storage" | "storage" => Ok(DeviceFamily::EnergyStorage),
            "ct" => Ok(DeviceFamily::Ct),
            "smart_plug" | "plug" => Ok(DeviceFamily::SmartPlug),
            other => Err(EwayError::invalid_configuration(format!(
                "Unknown device family: {other}"
            ))),
        }
    }
}

/// Immutable identity of one configured device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub family: DeviceFamily,
    pub host: String,
    pub port: u16,
    /// Stable device identifier, empty for devices that only advertise a serial
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub device_sn: String,
}

impl DeviceIdentity {
    pub fn new(family: DeviceFamily, host: impl Into<String>) -> Self {
        Self {
            family,
            host: host.into(),
            port: family.default_port(),
            device_id: String::new(),
            device_sn: String::new(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    pub fn with_device_sn(mut self, device_sn: impl Into<String>) -> Self {
        self.device_sn = device_sn.into();
        self
    }

    /// Both identity components required for command topics are present
    pub fn is_complete(&self) -> bool {
        !self.device_id.is_empty() && !self.device_sn.is_empty()
    }

    /// Key used for the host's device registry
    pub fn registry_identifier(&self) -> &str {
        match self.family {
            DeviceFamily::Charger => &self.device_id,
            DeviceFamily::EnergyStorage if self.device_id.is_empty() => &self.device_sn,
            DeviceFamily::EnergyStorage => &self.device_id,
            DeviceFamily::Ct | DeviceFamily::SmartPlug if self.device_sn.is_empty() => &self.host,
            DeviceFamily::Ct | DeviceFamily::SmartPlug => &self.device_sn,
        }
    }

    /// Human-readable device name
    pub fn display_name(&self) -> String {
        match self.family {
            DeviceFamily::Charger => format!("Eway Charger {}", self.device_id),
            DeviceFamily::EnergyStorage => {
                format!("Energy Storage {}", self.registry_identifier())
            }
            DeviceFamily::Ct => format!("Eway CT {}", self.registry_identifier()),
            DeviceFamily::SmartPlug => format!("Eway Smart Plug {}", self.registry_identifier()),
        }
    }

    /// Unique id used when the device is configured
    pub fn unique_id(&self) -> String {
        format!("{}_{}_{}", self.host, self.port, self.device_id)
    }

    /// WebSocket endpoint for socket-backed families
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }

    /// Base URL for HTTP RPC families
    pub fn http_base_url(&self) -> String {
        if self.port == DEFAULT_HTTP_PORT {
            format!("http://{}/", self.host)
        } else {
            format!("http://{}:{}/", self.host, self.port)
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.family, self.host, self.port)
    }
}
