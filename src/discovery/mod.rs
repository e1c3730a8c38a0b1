//! Device discovery
//!
//! Devices advertise an HTTP service whose instance name encodes family and
//! identity. [`parse_service_name`] turns that name into a [`DeviceIdentity`];
//! [`DiscoveryCache`] holds what has been seen until a configuration step
//! consumes it.

pub mod discovery_cache;

pub use discovery_cache::{DiscoveredDevice, DiscoveryCache, DiscoveryCacheStats};

use crate::device::{DeviceFamily, DeviceIdentity};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Service type suffix appended to advertised names
pub const SERVICE_SUFFIX: &str = "._http._tcp.local.";

const CHARGER_PREFIX: &str = "EwayCS-TFT-";
const STORAGE_PREFIX: &str = "EwayEnergyStorage-";
const CT_PREFIX: &str = "EwayCT-";
const PLUG_PREFIX: &str = "EwayPlug-";

/// Name stems that identify an Eway advertisement at all
const EWAY_STEMS: [&str; 4] = ["EwayCS-TFT", "EwayEnergyStorage", "EwayCT", "EwayPlug"];

/// Fixed set of reasons a discovery or configuration step stops
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryAbort {
    #[error("incomplete_discovery_info")]
    IncompleteDiscoveryInfo,
    #[error("not_eway_device")]
    NotEwayDevice,
    #[error("already_discovered")]
    AlreadyDiscovered,
    #[error("already_configured")]
    AlreadyConfigured,
    #[error("cannot_connect")]
    CannotConnect,
    #[error("device_not_found")]
    DeviceNotFound,
    #[error("no_devices_found")]
    NoDevicesFound,
    #[error("unknown")]
    Unknown,
}

impl DiscoveryAbort {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryAbort::IncompleteDiscoveryInfo => "incomplete_discovery_info",
            DiscoveryAbort::NotEwayDevice => "not_eway_device",
            DiscoveryAbort::AlreadyDiscovered => "already_discovered",
            DiscoveryAbort::AlreadyConfigured => "already_configured",
            DiscoveryAbort::CannotConnect => "cannot_connect",
            DiscoveryAbort::DeviceNotFound => "device_not_found",
            DiscoveryAbort::NoDevicesFound => "no_devices_found",
            DiscoveryAbort::Unknown => "unknown",
        }
    }
}

/// Family and identity parts encoded in an advertised name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub family: DeviceFamily,
    pub device_id: String,
    pub device_sn: String,
}

/// Strip the service suffix from an advertised name
pub fn instance_name(name: &str) -> &str {
    name.strip_suffix(SERVICE_SUFFIX)
        .or_else(|| name.strip_suffix(SERVICE_SUFFIX.trim_end_matches('.')))
        .unwrap_or(name)
}

/// Parse an advertised instance name.
///
/// Chargers: `EwayCS-TFT-{id}_{sn}`. Storage, CT and plug carry a serial
/// only: `EwayEnergyStorage-{sn}`, `EwayCT-{sn}`, `EwayPlug-{sn}`.
pub fn parse_service_name(name: &str) -> Result<ParsedName, DiscoveryAbort> {
    let name = instance_name(name.trim());
    if !EWAY_STEMS.iter().any(|stem| name.starts_with(stem)) {
        return Err(DiscoveryAbort::NotEwayDevice);
    }

    if let Some(rest) = name.strip_prefix(CHARGER_PREFIX) {
        let (id, sn) = rest
            .split_once('_')
            .ok_or(DiscoveryAbort::IncompleteDiscoveryInfo)?;
        let (id, sn) = (id.trim(), sn.trim());
        if id.is_empty() || sn.is_empty() {
            return Err(DiscoveryAbort::IncompleteDiscoveryInfo);
        }
        return Ok(ParsedName {
            family: DeviceFamily::Charger,
            device_id: id.to_string(),
            device_sn: sn.to_string(),
        });
    }

    let (family, rest) = [
        (DeviceFamily::EnergyStorage, STORAGE_PREFIX),
        (DeviceFamily::Ct, CT_PREFIX),
        (DeviceFamily::SmartPlug, PLUG_PREFIX),
    ]
    .into_iter()
    .find_map(|(family, prefix)| name.strip_prefix(prefix).map(|rest| (family, rest)))
    .ok_or(DiscoveryAbort::IncompleteDiscoveryInfo)?;

    let sn = rest.trim();
    if sn.is_empty() {
        return Err(DiscoveryAbort::IncompleteDiscoveryInfo);
    }
    Ok(ParsedName {
        family,
        device_id: String::new(),
        device_sn: sn.to_string(),
    })
}

/// Turn one advertisement into an identity
pub fn identity_from_advertisement(
    host: &str,
    port: u16,
    name: &str,
) -> Result<DeviceIdentity, DiscoveryAbort> {
    if host.trim().is_empty() || name.trim().is_empty() {
        return Err(DiscoveryAbort::IncompleteDiscoveryInfo);
    }
    let parsed = parse_service_name(name)?;
    Ok(DeviceIdentity::new(parsed.family, host.trim())
        .with_port(port)
        .with_device_id(parsed.device_id)
        .with_device_sn(parsed.device_sn))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("EwayCS-TFT-ABC_123._http._tcp.local.", DeviceFamily::Charger, "ABC", "123")]
    #[case("EwayCS-TFT-ABC_12_3", DeviceFamily::Charger, "ABC", "12_3")]
    #[case("EwayEnergyStorage-SN42._http._tcp.local.", DeviceFamily::EnergyStorage, "", "SN42")]
    #[case("EwayCT-CT001", DeviceFamily::Ct, "", "CT001")]
    #[case("EwayPlug-P9._http._tcp.local", DeviceFamily::SmartPlug, "", "P9")]
    fn test_parse_service_name(
        #[case] name: &str,
        #[case] family: DeviceFamily,
        #[case] id: &str,
        #[case] sn: &str,
    ) {
        let parsed = parse_service_name(name).unwrap();
        assert_eq!(parsed.family, family);
        assert_eq!(parsed.device_id, id);
        assert_eq!(parsed.device_sn, sn);
    }

    #[rstest]
    #[case("Shelly-1234._http._tcp.local.", DiscoveryAbort::NotEwayDevice)]
    #[case("EwayCS-TFT-ABC", DiscoveryAbort::IncompleteDiscoveryInfo)]
    #[case("EwayCS-TFT-_123", DiscoveryAbort::IncompleteDiscoveryInfo)]
    #[case("EwayCT-", DiscoveryAbort::IncompleteDiscoveryInfo)]
    #[case("EwayCTX", DiscoveryAbort::IncompleteDiscoveryInfo)]
    fn test_parse_rejects(#[case] name: &str, #[case] reason: DiscoveryAbort) {
        assert_eq!(parse_service_name(name), Err(reason));
    }

    #[test]
    fn test_identity_from_advertisement() {
        let identity =
            identity_from_advertisement("192.168.1.50", 8888, "EwayCS-TFT-ABC_123").unwrap();
        assert_eq!(identity.family, DeviceFamily::Charger);
        assert_eq!(identity.unique_id(), "192.168.1.50_8888_ABC");

        assert_eq!(
            identity_from_advertisement("", 8888, "EwayCT-1"),
            Err(DiscoveryAbort::IncompleteDiscoveryInfo)
        );
    }

    #[test]
    fn test_abort_reason_strings() {
        assert_eq!(DiscoveryAbort::AlreadyDiscovered.to_string(), "already_discovered");
        assert_eq!(DiscoveryAbort::NoDevicesFound.as_str(), "no_devices_found");
    }
}
