//! Telemetry and control values exchanged with a base-station device.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Metrics ───────────────────────────────────────────────────────────────────

/// Identifies what a [`Metric`] measures.
///
/// Ids this build does not know are preserved as `Unknown(id)` so a newer
/// device firmware does not break older gateways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Temperature,
    Humidity,
    SupplyVoltage,
    PowerConsumption,
    SignalStrength,
    TransmitPower,
    DataThroughput,
    ConnectedUsers,
    BatteryLevel,
    FanSpeed,
    Unknown(u8),
}

impl MetricKind {
    /// Every kind with a defined wire id, in id order.
    pub const KNOWN: [MetricKind; 10] = [
        MetricKind::Temperature,
        MetricKind::Humidity,
        MetricKind::SupplyVoltage,
        MetricKind::PowerConsumption,
        MetricKind::SignalStrength,
        MetricKind::TransmitPower,
        MetricKind::DataThroughput,
        MetricKind::ConnectedUsers,
        MetricKind::BatteryLevel,
        MetricKind::FanSpeed,
    ];

    pub fn id(self) -> u8 {
        match self {
            MetricKind::Temperature => 0x01,
            MetricKind::Humidity => 0x02,
            MetricKind::SupplyVoltage => 0x03,
            MetricKind::PowerConsumption => 0x04,
            MetricKind::SignalStrength => 0x05,
            MetricKind::TransmitPower => 0x06,
            MetricKind::DataThroughput => 0x07,
            MetricKind::ConnectedUsers => 0x08,
            MetricKind::BatteryLevel => 0x09,
            MetricKind::FanSpeed => 0x0A,
            MetricKind::Unknown(id) => id,
        }
    }

    pub fn from_id(id: u8) -> Self {
        Self::KNOWN
            .iter()
            .copied()
            .find(|kind| kind.id() == id)
            .unwrap_or(MetricKind::Unknown(id))
    }

    /// The `snake_case` name, as serde writes it.  `None` for unknown ids.
    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            MetricKind::Temperature => "temperature",
            MetricKind::Humidity => "humidity",
            MetricKind::SupplyVoltage => "supply_voltage",
            MetricKind::PowerConsumption => "power_consumption",
            MetricKind::SignalStrength => "signal_strength",
            MetricKind::TransmitPower => "transmit_power",
            MetricKind::DataThroughput => "data_throughput",
            MetricKind::ConnectedUsers => "connected_users",
            MetricKind::BatteryLevel => "battery_level",
            MetricKind::FanSpeed => "fan_speed",
            MetricKind::Unknown(_) => return None,
        })
    }

    /// Unit suffix used when printing values.
    pub fn unit(self) -> &'static str {
        match self {
            MetricKind::Temperature => "°C",
            MetricKind::Humidity | MetricKind::BatteryLevel => "%",
            MetricKind::SupplyVoltage => "V",
            MetricKind::PowerConsumption => "W",
            MetricKind::SignalStrength | MetricKind::TransmitPower => "dBm",
            MetricKind::DataThroughput => "Mbit/s",
            MetricKind::ConnectedUsers => "",
            MetricKind::FanSpeed => "rpm",
            MetricKind::Unknown(_) => "",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Unknown(id) => write!(f, "metric#0x{id:02X}"),
            other => write!(f, "{other:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown metric '{0}'")]
pub struct ParseMetricKindError(pub String);

/// Accepts a `snake_case` name or a decimal wire id.
impl FromStr for MetricKind {
    type Err = ParseMetricKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(id) = s.parse::<u8>() {
            return Ok(MetricKind::from_id(id));
        }
        MetricKind::KNOWN
            .into_iter()
            .find(|kind| kind.name() == Some(s))
            .ok_or_else(|| ParseMetricKindError(s.to_string()))
    }
}

/// One measured value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub kind: MetricKind,
    pub value: f32,
}

impl Metric {
    pub fn new(kind: MetricKind, value: f32) -> Self {
        Self { kind, value }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {:.2}{}", self.kind, self.value, self.kind.unit())
    }
}

// ── Device status ─────────────────────────────────────────────────────────────

/// Operational state reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeviceState {
    Offline = 0x00,
    Booting = 0x01,
    Operational = 0x02,
    Degraded = 0x03,
    Maintenance = 0x04,
    Fault = 0x05,
}

impl TryFrom<u8> for DeviceState {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0x00 => Ok(DeviceState::Offline),
            0x01 => Ok(DeviceState::Booting),
            0x02 => Ok(DeviceState::Operational),
            0x03 => Ok(DeviceState::Degraded),
            0x04 => Ok(DeviceState::Maintenance),
            0x05 => Ok(DeviceState::Fault),
            other => Err(other),
        }
    }
}

/// Snapshot answered to a status request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub state: DeviceState,
    pub uptime_secs: u32,
    pub active_alarms: u16,
    /// CPU load in percent, 0–100.
    pub cpu_load_pct: u8,
    pub temperature_c: f32,
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// A control command the gateway can ask the device to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Reboot,
    ResetStatistics,
    SetTransmitPower { dbm: f32 },
    RunSelfTest,
    /// Vendor-specific command passed through untouched.  The id must lie
    /// outside `0x01..=0x04`; encoding a standard id here is rejected.
    Raw { id: u8, args: Vec<u8> },
}

impl Command {
    pub const REBOOT: u8 = 0x01;
    pub const RESET_STATISTICS: u8 = 0x02;
    pub const SET_TRANSMIT_POWER: u8 = 0x03;
    pub const RUN_SELF_TEST: u8 = 0x04;

    pub fn id(&self) -> u8 {
        match self {
            Command::Reboot => Self::REBOOT,
            Command::ResetStatistics => Self::RESET_STATISTICS,
            Command::SetTransmitPower { .. } => Self::SET_TRANSMIT_POWER,
            Command::RunSelfTest => Self::RUN_SELF_TEST,
            Command::Raw { id, .. } => *id,
        }
    }
    /// True for the ids `0x01..=0x04` that decode as typed commands.
    pub fn is_standard_id(id: u8) -> bool {
        (Self::REBOOT..=Self::RUN_SELF_TEST).contains(&id)
    }
}

/// Outcome code carried in a command result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandStatus {
    Success = 0x00,
    Rejected = 0x01,
    Failed = 0x02,
    Unsupported = 0x03,
    Busy = 0x04,
}

impl TryFrom<u8> for CommandStatus {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0x00 => Ok(CommandStatus::Success),
            0x01 => Ok(CommandStatus::Rejected),
            0x02 => Ok(CommandStatus::Failed),
            0x03 => Ok(CommandStatus::Unsupported),
            0x04 => Ok(CommandStatus::Busy),
            other => Err(other),
        }
    }
}

/// The device's answer to an executed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub command_id: u8,
    pub status: CommandStatus,
    pub message: String,
}

impl CommandResult {
    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }
}

// ── Alerts and errors ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Severity {
    Info = 0x00,
    Warning = 0x01,
    Major = 0x02,
    Critical = 0x03,
}

impl TryFrom<u8> for Severity {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0x00 => Ok(Severity::Info),
            0x01 => Ok(Severity::Warning),
            0x02 => Ok(Severity::Major),
            0x03 => Ok(Severity::Critical),
            other => Err(other),
        }
    }
}

/// A metric crossed its configured limit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdAlert {
    pub metric: MetricKind,
    pub value: f32,
    pub threshold: f32,
    pub severity: Severity,
}

/// The device moved from one operational state to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub previous: DeviceState,
    pub current: DeviceState,
}

/// Unsolicited conditions pushed by the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Alert {
    Threshold(ThresholdAlert),
    StateChange(StateChange),
}

/// A failure reported by the device, or by the gateway when a device frame
/// could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceError {
    pub code: u8,
    pub message: String,
}

impl DeviceError {
    /// Code used for errors raised locally rather than by the device.
    pub const LOCAL_DECODE_FAILURE: u8 = 0xFE;

    pub fn new(code: u8, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device error 0x{:02X}: {}", self.code, self.message)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_kind_ids_round_trip() {
        for kind in MetricKind::KNOWN {
            assert_eq!(MetricKind::from_id(kind.id()), kind);
        }
    }

    #[test]
    fn test_unknown_metric_id_is_preserved() {
        let kind = MetricKind::from_id(0x99);
        assert_eq!(kind, MetricKind::Unknown(0x99));
        assert_eq!(kind.id(), 0x99);
        assert_eq!(kind.to_string(), "metric#0x99");
    }

    #[test]
    fn test_metric_kind_parses_serde_names_and_ids() {
        // Arrange
        let names: Vec<String> = MetricKind::KNOWN
            .iter()
            .map(|kind| toml::Value::try_from(kind).unwrap().as_str().unwrap().to_string())
            .collect();

        // Act
        let parsed: Vec<MetricKind> = names.iter().map(|n| n.parse().unwrap()).collect();

        // Assert
        assert_eq!(parsed, MetricKind::KNOWN.to_vec());
        assert_eq!("10".parse::<MetricKind>().unwrap(), MetricKind::FanSpeed);
        assert_eq!("200".parse::<MetricKind>().unwrap(), MetricKind::Unknown(200));
        assert_eq!(
            "SupplyVoltage".parse::<MetricKind>(),
            Err(ParseMetricKindError("SupplyVoltage".to_string()))
        );
    }

    #[test]
    fn test_metric_display_includes_unit() {
        let metric = Metric::new(MetricKind::Temperature, 41.5);
        assert_eq!(metric.to_string(), "Temperature = 41.50°C");
    }

    #[test]
    fn test_device_state_rejects_unknown_byte() {
        assert_eq!(DeviceState::try_from(0x02), Ok(DeviceState::Operational));
        assert_eq!(DeviceState::try_from(0x09), Err(0x09));
    }

    #[test]
    fn test_command_ids() {
        assert_eq!(Command::Reboot.id(), 0x01);
        assert_eq!(Command::SetTransmitPower { dbm: 20.0 }.id(), 0x03);
        assert_eq!(Command::Raw { id: 0x42, args: vec![] }.id(), 0x42);
        assert!(Command::is_standard_id(Command::RUN_SELF_TEST));
        assert!(!Command::is_standard_id(0x42));
        assert!(!Command::is_standard_id(0x00));
    }

    #[test]
    fn test_severity_is_ordered() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Info < Severity::Major);
    }
}
