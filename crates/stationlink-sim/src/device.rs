//! The simulated base station itself, free of any I/O.
//!
//! [`SimulatedDevice`] answers requests the way real firmware does and
//! produces periodic telemetry when [`tick`](SimulatedDevice::tick) is
//! called.  The connection task in [`crate::server`] owns one device per
//! client and moves the frames to and from the socket.
//!
//! Metric values follow a fixed waveform driven by the tick count, so tests
//! see the same numbers on every run.

use std::time::Instant;

use stationlink_core::{
    Command, CommandResult, CommandStatus, DeviceError, DeviceMessage, DeviceState, DeviceStatus,
    Message, Metric, MetricKind, SequenceCounter, Severity, StateChange,
    ThresholdAlert,
};
use tracing::{debug, info, warn};

/// Error code sent when a request payload cannot be decoded.
pub const ERR_MALFORMED_REQUEST: u8 = 0x01;
/// Error code sent when a metrics request names an id the device lacks.
pub const ERR_UNKNOWN_METRIC: u8 = 0x02;

/// Highest transmit power the simulated radio accepts, in dBm.
pub const MAX_TRANSMIT_POWER_DBM: f32 = 46.0;

/// Degrees above the threshold at which an alert becomes critical.
const CRITICAL_MARGIN_C: f32 = 10.0;

/// One simulated base station.
#[derive(Debug)]
pub struct SimulatedDevice {
    state: DeviceState,
    booted_at: Instant,
    ticks: u64,
    transmit_power_dbm: f32,
    active_alarms: u16,
    temperature_threshold: f32,
    over_threshold: bool,
    events: SequenceCounter,
}

impl SimulatedDevice {
    /// Creates an operational device that raises a threshold alert whenever
    /// its temperature rises above `temperature_threshold` °C.
    pub fn new(temperature_threshold: f32) -> Self {
        Self {
            state: DeviceState::Operational,
            booted_at: Instant::now(),
            ticks: 0,
            transmit_power_dbm: 40.0,
            active_alarms: 0,
            temperature_threshold,
            over_threshold: false,
            events: SequenceCounter::new(),
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn transmit_power_dbm(&self) -> f32 {
        self.transmit_power_dbm
    }

    pub fn active_alarms(&self) -> u16 {
        self.active_alarms
    }

    /// Current value of `kind`, or `None` for ids the device does not have.
    pub fn metric_value(&self, kind: MetricKind) -> Option<f32> {
        let value = match kind {
            MetricKind::Temperature => self.temperature(),
            MetricKind::Humidity => 55.0,
            MetricKind::SupplyVoltage => 48.0,
            MetricKind::PowerConsumption => 120.0 + 2.0 * self.transmit_power_dbm,
            MetricKind::SignalStrength => -67.5,
            MetricKind::TransmitPower => self.transmit_power_dbm,
            MetricKind::DataThroughput => 250.0 + (self.ticks % 10) as f32,
            MetricKind::ConnectedUsers => 12.0,
            MetricKind::BatteryLevel => 100.0,
            MetricKind::FanSpeed => 3200.0,
            MetricKind::Unknown(_) => return None,
        };
        Some(value)
    }

    /// Temperature in °C: a slow triangle wave between 40 and 50.
    fn temperature(&self) -> f32 {
        let phase = (self.ticks % 20) as f32;
        let offset = if phase < 10.0 { phase } else { 20.0 - phase };
        40.0 + offset
    }

    fn snapshot(&self) -> Vec<Metric> {
        MetricKind::KNOWN
            .into_iter()
            .filter_map(|kind| self.metric_value(kind).map(|v| Metric::new(kind, v)))
            .collect()
    }

    fn status(&self) -> DeviceStatus {
        DeviceStatus {
            state: self.state,
            uptime_secs: u32::try_from(self.booted_at.elapsed().as_secs()).unwrap_or(u32::MAX),
            active_alarms: self.active_alarms,
            cpu_load_pct: 15 + (self.ticks % 20) as u8,
            temperature_c: self.temperature(),
        }
    }

    fn change_state(&mut self, next: DeviceState) -> Option<DeviceMessage> {
        if next == self.state {
            return None;
        }
        let change = StateChange {
            previous: self.state,
            current: next,
        };
        info!(previous = ?change.previous, current = ?change.current, "device state change");
        self.state = next;
        Some(DeviceMessage::DeviceStateChange(change))
    }

    /// Handles one frame from the gateway.
    ///
    /// Returns the frames to send back: the reply, echoing the request's
    /// sequence number, followed by any events the request triggered.
    pub fn handle(&mut self, msg: &Message) -> Vec<Message> {
        let request = match DeviceMessage::decode(msg) {
            Ok(request) => request,
            Err(e) => {
                warn!(message_type = ?msg.message_type, "malformed request: {e}");
                let error = DeviceError::new(ERR_MALFORMED_REQUEST, e.to_string());
                return self.wire(msg.sequence, DeviceMessage::Error(error), Vec::new());
            }
        };
        debug!(message_type = ?msg.message_type, sequence = msg.sequence, "request");

        let mut events = Vec::new();
        let reply = match request {
            DeviceMessage::Ping => DeviceMessage::Pong,
            DeviceMessage::MetricsRequest(kinds) => self.answer_metrics(&kinds),
            DeviceMessage::StatusRequest => DeviceMessage::StatusResponse(self.status()),
            DeviceMessage::ExecuteCommand(command) => {
                let (result, event) = self.execute(&command);
                events.extend(event);
                DeviceMessage::CommandResult(result)
            }
            other => {
                debug!(message_type = ?other.message_type(), "ignoring non-request frame");
                return Vec::new();
            }
        };
        self.wire(msg.sequence, reply, events)
    }

    fn answer_metrics(&self, kinds: &[MetricKind]) -> DeviceMessage {
        if kinds.is_empty() {
            return DeviceMessage::MetricsResponse(self.snapshot());
        }
        let mut metrics = Vec::with_capacity(kinds.len());
        for &kind in kinds {
            match self.metric_value(kind) {
                Some(value) => metrics.push(Metric::new(kind, value)),
                None => {
                    return DeviceMessage::Error(DeviceError::new(
                        ERR_UNKNOWN_METRIC,
                        format!("unknown metric id {}", kind.id()),
                    ))
                }
            }
        }
        DeviceMessage::MetricsResponse(metrics)
    }

    fn execute(&mut self, command: &Command) -> (CommandResult, Option<DeviceMessage>) {
        let command_id = command.id();
        let done = |status, message: &str| CommandResult {
            command_id,
            status,
            message: message.to_string(),
        };

        match *command {
            Command::Reboot => {
                self.booted_at = Instant::now();
                let event = self.change_state(DeviceState::Booting);
                (done(CommandStatus::Success, "rebooting"), event)
            }
            Command::ResetStatistics => {
                self.active_alarms = 0;
                (done(CommandStatus::Success, "statistics reset"), None)
            }
            Command::SetTransmitPower { dbm } => {
                if !(0.0..=MAX_TRANSMIT_POWER_DBM).contains(&dbm) {
                    let message = format!("{dbm} dBm outside 0..={MAX_TRANSMIT_POWER_DBM}");
                    return (done(CommandStatus::Rejected, &message), None);
                }
                self.transmit_power_dbm = dbm;
                (done(CommandStatus::Success, "transmit power set"), None)
            }
            Command::RunSelfTest if self.state == DeviceState::Booting => {
                (done(CommandStatus::Busy, "device is booting"), None)
            }
            Command::RunSelfTest => (done(CommandStatus::Success, "self test passed"), None),
            Command::Raw { .. } => (done(CommandStatus::Unsupported, "unknown command"), None),
        }
    }

    /// Advances simulated time by one event interval.
    ///
    /// Returns the unsolicited frames for this tick: a finished boot's state
    /// change, a metrics event, and a threshold alert when the temperature
    /// has just crossed the limit.
    pub fn tick(&mut self) -> Vec<Message> {
        self.ticks += 1;
        let mut events = Vec::new();

        if self.state == DeviceState::Booting {
            events.extend(self.change_state(DeviceState::Operational));
        }

        events.push(DeviceMessage::MetricsEvent(self.snapshot()));

        let temperature = self.temperature();
        let over = temperature > self.temperature_threshold;
        if over && !self.over_threshold {
            let severity = if temperature > self.temperature_threshold + CRITICAL_MARGIN_C {
                Severity::Critical
            } else {
                Severity::Warning
            };
            self.active_alarms = self.active_alarms.saturating_add(1);
            events.push(DeviceMessage::ThresholdExceeded(ThresholdAlert {
                metric: MetricKind::Temperature,
                value: temperature,
                threshold: self.temperature_threshold,
                severity,
            }));
        }
        self.over_threshold = over;

        events
            .into_iter()
            .filter_map(|event| self.event(event))
            .collect()
    }

    fn wire(&mut self, sequence: u8, reply: DeviceMessage, events: Vec<DeviceMessage>) -> Vec<Message> {
        let mut out = Vec::with_capacity(1 + events.len());
        match reply.into_message(sequence) {
            Ok(msg) => out.push(msg),
            Err(e) => warn!("could not encode reply: {e}"),
        }
        out.extend(events.into_iter().filter_map(|event| self.event(event)));
        out
    }

    fn event(&mut self, event: DeviceMessage) -> Option<Message> {
        event
            .into_message(self.events.next())
            .map_err(|e| warn!("could not encode event: {e}"))
            .ok()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use stationlink_core::MessageType;

    fn request(msg: DeviceMessage, sequence: u8) -> Message {
        msg.into_message(sequence).unwrap()
    }

    fn decode(msg: &Message) -> DeviceMessage {
        DeviceMessage::decode(msg).unwrap()
    }

    #[test]
    fn test_ping_is_answered_with_pong_on_same_sequence() {
        let mut device = SimulatedDevice::new(75.0);

        let out = device.handle(&Message::empty(MessageType::Ping, 77));

        assert_eq!(out, vec![Message::empty(MessageType::Pong, 77)]);
    }

    #[test]
    fn test_empty_metrics_request_returns_every_metric() {
        let mut device = SimulatedDevice::new(75.0);

        let out = device.handle(&request(DeviceMessage::MetricsRequest(vec![]), 3));

        let DeviceMessage::MetricsResponse(metrics) = decode(&out[0]) else {
            panic!("expected metrics response");
        };
        assert_eq!(metrics.len(), MetricKind::KNOWN.len());
        assert_eq!(out[0].sequence, 3);
    }

    #[test]
    fn test_metrics_request_keeps_requested_order() {
        // Arrange
        let mut device = SimulatedDevice::new(75.0);
        let kinds = vec![MetricKind::FanSpeed, MetricKind::SupplyVoltage];

        // Act
        let out = device.handle(&request(DeviceMessage::MetricsRequest(kinds), 4));

        // Assert
        assert_eq!(
            decode(&out[0]),
            DeviceMessage::MetricsResponse(vec![
                Metric::new(MetricKind::FanSpeed, 3200.0),
                Metric::new(MetricKind::SupplyVoltage, 48.0),
            ])
        );
    }

    #[test]
    fn test_unknown_metric_is_answered_with_error() {
        let mut device = SimulatedDevice::new(75.0);

        let out = device.handle(&request(
            DeviceMessage::MetricsRequest(vec![MetricKind::Unknown(0x99)]),
            5,
        ));

        assert_eq!(out[0].message_type, MessageType::Error);
        let DeviceMessage::Error(err) = decode(&out[0]) else {
            panic!("expected error");
        };
        assert_eq!(err.code, ERR_UNKNOWN_METRIC);
    }

    #[test]
    fn test_malformed_request_is_answered_with_error() {
        let mut device = SimulatedDevice::new(75.0);

        // Claims two metric ids but carries one.
        let out = device.handle(&Message::new(MessageType::MetricsRequest, 6, vec![2, 1]));

        let DeviceMessage::Error(err) = decode(&out[0]) else {
            panic!("expected error");
        };
        assert_eq!(err.code, ERR_MALFORMED_REQUEST);
        assert_eq!(out[0].sequence, 6);
    }

    #[test]
    fn test_status_reports_current_state() {
        let mut device = SimulatedDevice::new(75.0);

        let out = device.handle(&Message::empty(MessageType::StatusRequest, 9));

        let DeviceMessage::StatusResponse(status) = decode(&out[0]) else {
            panic!("expected status");
        };
        assert_eq!(status.state, DeviceState::Operational);
        assert_eq!(status.active_alarms, 0);
        assert_eq!(status.temperature_c, 40.0);
    }

    #[test]
    fn test_reboot_replies_then_emits_state_change() {
        // Arrange
        let mut device = SimulatedDevice::new(75.0);

        // Act
        let out = device.handle(&request(DeviceMessage::ExecuteCommand(Command::Reboot), 10));

        // Assert
        assert_eq!(out.len(), 2);
        let DeviceMessage::CommandResult(result) = decode(&out[0]) else {
            panic!("expected command result");
        };
        assert!(result.is_success());
        assert_eq!(
            decode(&out[1]),
            DeviceMessage::DeviceStateChange(StateChange {
                previous: DeviceState::Operational,
                current: DeviceState::Booting,
            })
        );
        assert_eq!(device.state(), DeviceState::Booting);
    }

    #[test]
    fn test_boot_finishes_on_next_tick() {
        let mut device = SimulatedDevice::new(75.0);
        device.handle(&request(DeviceMessage::ExecuteCommand(Command::Reboot), 1));

        let events = device.tick();

        assert_eq!(events[0].message_type, MessageType::DeviceStateChange);
        assert_eq!(events[1].message_type, MessageType::MetricsEvent);
        assert_eq!(device.state(), DeviceState::Operational);
    }

    #[test]
    fn test_self_test_is_busy_while_booting() {
        let mut device = SimulatedDevice::new(75.0);
        device.handle(&request(DeviceMessage::ExecuteCommand(Command::Reboot), 1));

        let out = device.handle(&request(DeviceMessage::ExecuteCommand(Command::RunSelfTest), 2));

        let DeviceMessage::CommandResult(result) = decode(&out[0]) else {
            panic!("expected command result");
        };
        assert_eq!(result.status, CommandStatus::Busy);
    }

    #[test]
    fn test_transmit_power_out_of_range_is_rejected() {
        // Arrange
        let mut device = SimulatedDevice::new(75.0);

        // Act
        let ok = device.handle(&request(
            DeviceMessage::ExecuteCommand(Command::SetTransmitPower { dbm: 43.0 }),
            1,
        ));
        let rejected = device.handle(&request(
            DeviceMessage::ExecuteCommand(Command::SetTransmitPower { dbm: 60.0 }),
            2,
        ));

        // Assert
        let DeviceMessage::CommandResult(ok) = decode(&ok[0]) else {
            panic!("expected command result");
        };
        let DeviceMessage::CommandResult(rejected) = decode(&rejected[0]) else {
            panic!("expected command result");
        };
        assert!(ok.is_success());
        assert_eq!(rejected.status, CommandStatus::Rejected);
        assert_eq!(device.transmit_power_dbm(), 43.0);
    }

    #[test]
    fn test_raw_command_is_unsupported() {
        let mut device = SimulatedDevice::new(75.0);

        let out = device.handle(&request(
            DeviceMessage::ExecuteCommand(Command::Raw { id: 0x42, args: vec![1] }),
            1,
        ));

        let DeviceMessage::CommandResult(result) = decode(&out[0]) else {
            panic!("expected command result");
        };
        assert_eq!(result.command_id, 0x42);
        assert_eq!(result.status, CommandStatus::Unsupported);
    }

    #[test]
    fn test_responses_from_gateway_are_ignored() {
        let mut device = SimulatedDevice::new(75.0);

        assert!(device.handle(&Message::empty(MessageType::Pong, 1)).is_empty());
    }

    #[test]
    fn test_tick_raises_alert_once_per_crossing() {
        // Arrange – ticks 1..=9 climb from 41 to 49 °C
        let mut device = SimulatedDevice::new(44.5);

        // Act
        let alerts: Vec<u64> = (1..=9)
            .filter(|_| {
                device
                    .tick()
                    .iter()
                    .any(|m| m.message_type == MessageType::ThresholdExceeded)
            })
            .collect();

        // Assert – only the tick that crossed 44.5 °C (45 °C at tick 5)
        assert_eq!(alerts, vec![5]);
        assert_eq!(device.active_alarms(), 1);
    }

    #[test]
    fn test_tick_alert_is_critical_far_above_threshold() {
        let mut device = SimulatedDevice::new(20.0);

        let events = device.tick();

        let alert = events
            .iter()
            .find(|m| m.message_type == MessageType::ThresholdExceeded)
            .expect("alert on first tick");
        let DeviceMessage::ThresholdExceeded(alert) = decode(alert) else {
            panic!("expected threshold alert");
        };
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.value, 41.0);
    }

    #[test]
    fn test_events_use_their_own_sequence_counter() {
        let mut device = SimulatedDevice::new(75.0);

        let first = device.tick();
        device.handle(&Message::empty(MessageType::Ping, 200));
        let second = device.tick();

        assert_eq!(first[0].sequence, 0);
        assert_eq!(second[0].sequence, 1);
    }
}
