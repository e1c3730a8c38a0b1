//! Reading table
//!
//! Every value a consumer can display is a [`ReadingKind`]. Each kind knows
//! where it lives in a snapshot and what unit it carries; the set offered per
//! device family is fixed at compile time.

use crate::device::DeviceFamily;
use crate::state::Snapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingKind {
    // Charger
    ChargingPower,
    ChargingVoltage,
    ChargingCurrent,
    ChargingCurrentL1,
    ChargingCurrentL2,
    ChargingCurrentL3,
    ChargingTemperature,
    ChargingAmount,
    ChargingDuration,
    WifiRssi,
    ChargingStatus,
    GunStatus,
    PileStatus,
    MaxCurrent,
    ChargingMode,
    NfcEnabled,
    FirmwareVersion,
    LastSessionEnergy,
    LastSessionDuration,
    LastSessionStopReason,
    TotalEnergy,

    // Energy storage
    PvPower,
    BatteryPower,
    BatterySoc,
    OutputPower,
    ProtocolVersion,

    // CT meter
    CtVoltage,
    CtCurrent,
    CtActivePower,
    CtApparentPower,
    CtPowerFactor,
    CtFrequency,
    CtCalibration,
    AntiBackflow,

    // Smart plug
    PlugSwitch,
    PlugPower,
    PlugVoltage,
    PlugCurrent,
    PlugFrequency,
    PlugTemperature,
    PlugEnergyTotal,
    PlugReturnedEnergyTotal,
}

use ReadingKind::*;

const CHARGER: &[ReadingKind] = &[
    ChargingPower,
    ChargingVoltage,
    ChargingCurrent,
    ChargingCurrentL1,
    ChargingCurrentL2,
    ChargingCurrentL3,
    ChargingTemperature,
    ChargingAmount,
    ChargingDuration,
    WifiRssi,
    ChargingStatus,
    GunStatus,
    PileStatus,
    MaxCurrent,
    ChargingMode,
    NfcEnabled,
    FirmwareVersion,
    LastSessionEnergy,
    LastSessionDuration,
    LastSessionStopReason,
    TotalEnergy,
];

const ENERGY_STORAGE: &[ReadingKind] = &[
    PvPower,
    BatteryPower,
    BatterySoc,
    OutputPower,
    ProtocolVersion,
];

const CT: &[ReadingKind] = &[
    CtVoltage,
    CtCurrent,
    CtActivePower,
    CtApparentPower,
    CtPowerFactor,
    CtFrequency,
    CtCalibration,
    AntiBackflow,
];

const SMART_PLUG: &[ReadingKind] = &[
    PlugSwitch,
    PlugPower,
    PlugVoltage,
    PlugCurrent,
    PlugFrequency,
    PlugTemperature,
    PlugEnergyTotal,
    PlugReturnedEnergyTotal,
];

impl ReadingKind {
    pub fn for_family(family: DeviceFamily) -> &'static [ReadingKind] {
        match family {
            DeviceFamily::Charger => CHARGER,
            DeviceFamily::EnergyStorage => ENERGY_STORAGE,
            DeviceFamily::Ct => CT,
            DeviceFamily::SmartPlug => SMART_PLUG,
        }
    }

    /// Location in the snapshot: top-level key, then nested keys
    fn path(&self) -> &'static [&'static str] {
        match self {
            ChargingPower => &["charging_realtime", "power"],
            ChargingVoltage => &["charging_realtime", "voltage"],
            ChargingCurrent => &["charging_realtime", "current"],
            ChargingCurrentL1 => &["charging_realtime", "current_l1"],
            ChargingCurrentL2 => &["charging_realtime", "current_l2"],
            ChargingCurrentL3 => &["charging_realtime", "current_l3"],
            ChargingTemperature => &["charging_realtime", "temperature"],
            ChargingAmount => &["charging_realtime", "amount"],
            ChargingDuration => &["charging_realtime", "duration"],
            WifiRssi => &["charging_realtime", "wifi_rssi"],
            ChargingStatus => &["charging_status"],
            GunStatus => &["device_status", "gun_status"],
            PileStatus => &["device_status", "pile_status"],
            MaxCurrent => &["max_current"],
            ChargingMode => &["charging_mode"],
            NfcEnabled => &["nfc_enabled"],
            FirmwareVersion => &["device_info", "app_firmware_version"],
            LastSessionEnergy => &["last_charging_session", "degrees"],
            LastSessionDuration => &["last_charging_session", "duration"],
            LastSessionStopReason => &["last_charging_session", "stop_reason"],
            TotalEnergy => &["device_info", "work_total"],
            PvPower => &["storage_mini", "pv_power"],
            BatteryPower => &["storage_mini", "battery_power"],
            BatterySoc => &["storage_mini", "battery_soc"],
            OutputPower => &["storage_mini", "output_power"],
            ProtocolVersion => &["storage_mini", "protocol_version"],
            CtVoltage => &["ct_voltage"],
            CtCurrent => &["ct_current"],
            CtActivePower => &["ct_act_power"],
            CtApparentPower => &["ct_aprt_power"],
            CtPowerFactor => &["ct_pf"],
            CtFrequency => &["ct_freq"],
            CtCalibration => &["ct_calibration"],
            AntiBackflow => &["anti_backflow"],
            PlugSwitch => &["switch_state"],
            PlugPower => &["power"],
            PlugVoltage => &["voltage"],
            PlugCurrent => &["current"],
            PlugFrequency => &["frequency"],
            PlugTemperature => &["temperature"],
            PlugEnergyTotal => &["energy_total"],
            PlugReturnedEnergyTotal => &["ret_energy_total"],
        }
    }

    /// Current value, or `None` when absent or null
    pub fn read(&self, snapshot: &Snapshot) -> Option<Value> {
        let (first, rest) = self.path().split_first()?;
        let mut value = snapshot.get(*first)?;
        for key in rest {
            value = value.get(*key)?;
        }
        (!value.is_null()).then(|| value.clone())
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChargingPower => "Charging Power",
            ChargingVoltage => "Charging Voltage",
            ChargingCurrent => "Charging Current",
            ChargingCurrentL1 => "Current L1",
            ChargingCurrentL2 => "Current L2",
            ChargingCurrentL3 => "Current L3",
            ChargingTemperature => "Temperature",
            ChargingAmount => "Charged Amount",
            ChargingDuration => "Charging Duration",
            WifiRssi => "WiFi Signal",
            ChargingStatus => "Charging Status",
            GunStatus => "Gun Status",
            PileStatus => "Pile Status",
            MaxCurrent => "Max Current",
            ChargingMode => "Charging Mode",
            NfcEnabled => "NFC Enabled",
            FirmwareVersion => "Firmware Version",
            LastSessionEnergy => "Last Session Energy",
            LastSessionDuration => "Last Session Duration",
            LastSessionStopReason => "Last Session Stop Reason",
            TotalEnergy => "Total Energy",
            PvPower => "PV Power",
            BatteryPower => "Battery Power",
            BatterySoc => "Battery SOC",
            OutputPower => "Output Power",
            ProtocolVersion => "Protocol Version",
            CtVoltage => "CT Voltage",
            CtCurrent => "CT Current",
            CtActivePower => "CT Active Power",
            CtApparentPower => "CT Apparent Power",
            CtPowerFactor => "CT Power Factor",
            CtFrequency => "CT Frequency",
            CtCalibration => "CT Calibration",
            AntiBackflow => "Anti-Backflow",
            PlugSwitch => "Switch",
            PlugPower => "Power",
            PlugVoltage => "Voltage",
            PlugCurrent => "Current",
            PlugFrequency => "Frequency",
            PlugTemperature => "Temperature",
            PlugEnergyTotal => "Total Energy",
            PlugReturnedEnergyTotal => "Returned Energy",
        }
    }

    pub fn unit(&self) -> Option<&'static str> {
        match self {
            ChargingPower | PvPower | BatteryPower | OutputPower | CtActivePower | PlugPower => {
                Some("W")
            }
            ChargingVoltage | CtVoltage | PlugVoltage => Some("V"),
            ChargingCurrent | ChargingCurrentL1 | ChargingCurrentL2 | ChargingCurrentL3
            | MaxCurrent | CtCurrent | PlugCurrent => Some("A"),
            ChargingTemperature | PlugTemperature => Some("°C"),
            ChargingAmount | LastSessionEnergy | TotalEnergy => Some("kWh"),
            PlugEnergyTotal | PlugReturnedEnergyTotal => Some("Wh"),
            ChargingDuration | LastSessionDuration => Some("min"),
            WifiRssi => Some("dBm"),
            BatterySoc => Some("%"),
            CtApparentPower => Some("VA"),
            CtFrequency | PlugFrequency => Some("Hz"),
            ChargingStatus | GunStatus | PileStatus | ChargingMode | NfcEnabled
            | FirmwareVersion | LastSessionStopReason | ProtocolVersion | CtPowerFactor
            | CtCalibration | AntiBackflow | PlugSwitch => None,
        }
    }
}

impl fmt::Display for ReadingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
