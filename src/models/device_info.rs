//! Device information payload (`GET /api/v1/device_info`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Payload;

/// Hardware details, operational status and sensor readings of a switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Switch serial number.
    pub serial_number: String,
    /// MAC address, `XX:XX:XX:XX:XX:XX`.
    pub mac_addr: String,
    /// Model number, e.g. "M4300-52G-PoE+".
    pub model: String,
    /// Active firmware version.
    pub sw_ver: String,
    /// Total number of ports.
    pub num_of_ports: u32,
    /// Currently active ports.
    pub num_of_active_ports: u32,
    /// Memory usage, e.g. "90.58%".
    pub memory_usage: String,
    /// CPU usage, e.g. "17.53%".
    pub cpu_usage: String,
    /// Fan states, e.g. `[{"FAN-1": "Operational"}]`.
    pub fan_state: Vec<BTreeMap<String, String>>,
    /// Whether PoE is enabled.
    pub poe_state: bool,
    /// Uptime, e.g. "00 Days 01 Hrs 07 Mins 11 Secs".
    pub up_time: String,
    /// Temperature sensor readings.
    pub temperature_sensors: Vec<TemperatureSensor>,
    /// Bootcode version.
    pub boot_version: String,
    /// Bytes received.
    pub rx_data: u64,
    /// Bytes transmitted.
    pub tx_data: u64,
}

impl Payload for DeviceInfo {
    const KEY: &'static str = "deviceInfo";
}

/// One temperature sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureSensor {
    /// Sensor number.
    pub sensor_num: u32,
    /// Description (MAC-A, MAC-B, System).
    pub sensor_desc: String,
    /// Temperature in Celsius.
    pub sensor_temp: i32,
    /// Operational state.
    pub sensor_state: SensorState,
}

/// Sensor state code reported by the switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SensorState {
    /// 0
    None,
    /// 1
    Normal,
    /// 2
    Warning,
    /// 3
    Critical,
    /// 4
    Shutdown,
    /// 5
    NotPresent,
    /// 6
    NotOperational,
}

impl TryFrom<u8> for SensorState {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => SensorState::None,
            1 => SensorState::Normal,
            2 => SensorState::Warning,
            3 => SensorState::Critical,
            4 => SensorState::Shutdown,
            5 => SensorState::NotPresent,
            6 => SensorState::NotOperational,
            other => return Err(format!("unknown sensor state {}", other)),
        })
    }
}

impl From<SensorState> for u8 {
    fn from(state: SensorState) -> u8 {
        state as u8
    }
}
