//! Typed payload encodings for every [`MessageType`].
//!
//! A [`Message`] carries raw payload bytes; [`DeviceMessage`] is the typed view
//! of the same frame.  Gateway and device must agree on these layouts
//! bit-for-bit.  All multi-byte fields are big-endian and `f32` values travel
//! as their IEEE-754 bit pattern.
//!
//! | Type               | Payload                                                       |
//! |--------------------|---------------------------------------------------------------|
//! | Ping, Pong, StatusRequest | empty                                                  |
//! | MetricsRequest     | `count:u8, id:u8 × count` (count 0 = every metric)            |
//! | MetricsResponse / MetricsEvent | `count:u8, {id:u8, value:f32} × count`            |
//! | StatusResponse     | `state:u8, uptime:u32, alarms:u16, cpu:u8, temperature:f32`   |
//! | ExecuteCommand     | `command_id:u8, args…`                                        |
//! | CommandResult      | `command_id:u8, status:u8, len:u16, message`                  |
//! | ThresholdExceeded  | `id:u8, value:f32, threshold:f32, severity:u8`                |
//! | DeviceStateChange  | `previous:u8, current:u8`                                     |
//! | Error              | `code:u8, len:u16, message`                                   |

use crate::domain::telemetry::{
    Command, CommandResult, CommandStatus, DeviceError, DeviceState, DeviceStatus, Metric,
    MetricKind, Severity, StateChange, ThresholdAlert,
};
use crate::protocol::codec::{
    read_f32, read_length_prefixed_string, read_u16, read_u32, require_len, write_f32,
    write_length_prefixed_string, ProtocolError,
};
use crate::protocol::messages::{Message, MessageType};

/// Bytes per `{id, value}` metric entry.
const METRIC_ENTRY_SIZE: usize = 5;

/// Bytes in a status response payload.
const STATUS_SIZE: usize = 12;

/// Bytes in a threshold alert payload.
const THRESHOLD_SIZE: usize = 10;

/// Typed view of every message the link carries.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceMessage {
    Ping,
    Pong,
    /// Empty list requests every metric the device has.
    MetricsRequest(Vec<MetricKind>),
    MetricsResponse(Vec<Metric>),
    StatusRequest,
    StatusResponse(DeviceStatus),
    ExecuteCommand(Command),
    CommandResult(CommandResult),
    MetricsEvent(Vec<Metric>),
    ThresholdExceeded(ThresholdAlert),
    DeviceStateChange(StateChange),
    Error(DeviceError),
}

impl DeviceMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            DeviceMessage::Ping => MessageType::Ping,
            DeviceMessage::Pong => MessageType::Pong,
            DeviceMessage::MetricsRequest(_) => MessageType::MetricsRequest,
            DeviceMessage::MetricsResponse(_) => MessageType::MetricsResponse,
            DeviceMessage::StatusRequest => MessageType::StatusRequest,
            DeviceMessage::StatusResponse(_) => MessageType::StatusResponse,
            DeviceMessage::ExecuteCommand(_) => MessageType::ExecuteCommand,
            DeviceMessage::CommandResult(_) => MessageType::CommandResult,
            DeviceMessage::MetricsEvent(_) => MessageType::MetricsEvent,
            DeviceMessage::ThresholdExceeded(_) => MessageType::ThresholdExceeded,
            DeviceMessage::DeviceStateChange(_) => MessageType::DeviceStateChange,
            DeviceMessage::Error(_) => MessageType::Error,
        }
    }

    /// Encodes the payload bytes for this message.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] when a count does not fit its
    /// one-byte field (more than 255 metrics).
    pub fn encode_payload(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::new();
        match self {
            DeviceMessage::Ping | DeviceMessage::Pong | DeviceMessage::StatusRequest => {}
            DeviceMessage::MetricsRequest(kinds) => {
                buf.push(count_byte(kinds.len(), "MetricsRequest")?);
                buf.extend(kinds.iter().map(|k| k.id()));
            }
            DeviceMessage::MetricsResponse(metrics) | DeviceMessage::MetricsEvent(metrics) => {
                encode_metrics(&mut buf, metrics)?;
            }
            DeviceMessage::StatusResponse(status) => encode_status(&mut buf, status),
            DeviceMessage::ExecuteCommand(command) => encode_command(&mut buf, command)?,
            DeviceMessage::CommandResult(result) => {
                buf.push(result.command_id);
                buf.push(result.status as u8);
                write_length_prefixed_string(&mut buf, &result.message);
            }
            DeviceMessage::ThresholdExceeded(alert) => {
                buf.push(alert.metric.id());
                write_f32(&mut buf, alert.value);
                write_f32(&mut buf, alert.threshold);
                buf.push(alert.severity as u8);
            }
            DeviceMessage::DeviceStateChange(change) => {
                buf.push(change.previous as u8);
                buf.push(change.current as u8);
            }
            DeviceMessage::Error(err) => {
                buf.push(err.code);
                write_length_prefixed_string(&mut buf, &err.message);
            }
        }
        Ok(buf)
    }

    /// Wraps this message in a [`Message`] with the given sequence number.
    ///
    /// # Errors
    ///
    /// See [`encode_payload`](Self::encode_payload).
    pub fn into_message(self, sequence: u8) -> Result<Message, ProtocolError> {
        let payload = self.encode_payload()?;
        Ok(Message::new(self.message_type(), sequence, payload))
    }

    /// Interprets the payload of `msg` according to its type.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedPayload`] or
    /// [`ProtocolError::InsufficientData`] when the payload does not match the
    /// layout for its type.
    pub fn decode(msg: &Message) -> Result<Self, ProtocolError> {
        let p = msg.payload.as_slice();
        match msg.message_type {
            MessageType::Ping => Ok(DeviceMessage::Ping),
            MessageType::Pong => Ok(DeviceMessage::Pong),
            MessageType::StatusRequest => Ok(DeviceMessage::StatusRequest),
            MessageType::MetricsRequest => {
                require_len(p, 1, "MetricsRequest")?;
                let count = usize::from(p[0]);
                require_len(p, 1 + count, "MetricsRequest ids")?;
                Ok(DeviceMessage::MetricsRequest(
                    p[1..=count].iter().map(|&id| MetricKind::from_id(id)).collect(),
                ))
            }
            MessageType::MetricsResponse => decode_metrics(p).map(DeviceMessage::MetricsResponse),
            MessageType::MetricsEvent => decode_metrics(p).map(DeviceMessage::MetricsEvent),
            MessageType::StatusResponse => decode_status(p).map(DeviceMessage::StatusResponse),
            MessageType::ExecuteCommand => decode_command(p).map(DeviceMessage::ExecuteCommand),
            MessageType::CommandResult => {
                decode_command_result(p).map(DeviceMessage::CommandResult)
            }
            MessageType::ThresholdExceeded => {
                decode_threshold(p).map(DeviceMessage::ThresholdExceeded)
            }
            MessageType::DeviceStateChange => {
                require_len(p, 2, "DeviceStateChange")?;
                Ok(DeviceMessage::DeviceStateChange(StateChange {
                    previous: device_state(p[0])?,
                    current: device_state(p[1])?,
                }))
            }
            MessageType::Error => {
                require_len(p, 3, "Error")?;
                let (message, _) = read_length_prefixed_string(p, 1)?;
                Ok(DeviceMessage::Error(DeviceError { code: p[0], message }))
            }
        }
    }
}

// ── Encode helpers ────────────────────────────────────────────────────────────

fn count_byte(len: usize, context: &str) -> Result<u8, ProtocolError> {
    u8::try_from(len).map_err(|_| {
        ProtocolError::MalformedPayload(format!("{context}: {len} entries exceed the 255 limit"))
    })
}

fn encode_metrics(buf: &mut Vec<u8>, metrics: &[Metric]) -> Result<(), ProtocolError> {
    buf.push(count_byte(metrics.len(), "metrics")?);
    for metric in metrics {
        buf.push(metric.kind.id());
        write_f32(buf, metric.value);
    }
    Ok(())
}

fn encode_status(buf: &mut Vec<u8>, status: &DeviceStatus) {
    buf.push(status.state as u8);
    buf.extend_from_slice(&status.uptime_secs.to_be_bytes());
    buf.extend_from_slice(&status.active_alarms.to_be_bytes());
    buf.push(status.cpu_load_pct);
    write_f32(buf, status.temperature_c);
}

fn encode_command(buf: &mut Vec<u8>, command: &Command) -> Result<(), ProtocolError> {
    if let Command::Raw { id, .. } = command {
        if Command::is_standard_id(*id) {
            return Err(ProtocolError::MalformedPayload(format!(
                "raw command id {id:#04x} belongs to a standard command"
            )));
        }
    }
    buf.push(command.id());
    match command {
        Command::SetTransmitPower { dbm } => write_f32(buf, *dbm),
        Command::Raw { args, .. } => buf.extend_from_slice(args),
        Command::Reboot | Command::ResetStatistics | Command::RunSelfTest => {}
    }
    Ok(())
}

// ── Decode helpers ────────────────────────────────────────────────────────────

fn decode_metrics(p: &[u8]) -> Result<Vec<Metric>, ProtocolError> {
    require_len(p, 1, "metrics")?;
    let count = usize::from(p[0]);
    require_len(p, 1 + count * METRIC_ENTRY_SIZE, "metrics entries")?;
    (0..count)
        .map(|i| {
            let off = 1 + i * METRIC_ENTRY_SIZE;
            Ok(Metric::new(MetricKind::from_id(p[off]), read_f32(p, off + 1)?))
        })
        .collect()
}

fn decode_status(p: &[u8]) -> Result<DeviceStatus, ProtocolError> {
    require_len(p, STATUS_SIZE, "StatusResponse")?;
    Ok(DeviceStatus {
        state: device_state(p[0])?,
        uptime_secs: read_u32(p, 1)?,
        active_alarms: read_u16(p, 5)?,
        cpu_load_pct: p[7],
        temperature_c: read_f32(p, 8)?,
    })
}

fn decode_command(p: &[u8]) -> Result<Command, ProtocolError> {
    require_len(p, 1, "ExecuteCommand")?;
    let args = &p[1..];
    match p[0] {
        Command::REBOOT => Ok(Command::Reboot),
        Command::RESET_STATISTICS => Ok(Command::ResetStatistics),
        Command::RUN_SELF_TEST => Ok(Command::RunSelfTest),
        Command::SET_TRANSMIT_POWER => {
            require_len(args, 4, "SetTransmitPower")?;
            Ok(Command::SetTransmitPower {
                dbm: read_f32(args, 0)?,
            })
        }
        id => Ok(Command::Raw {
            id,
            args: args.to_vec(),
        }),
    }
}

fn decode_command_result(p: &[u8]) -> Result<CommandResult, ProtocolError> {
    require_len(p, 4, "CommandResult")?;
    let status = CommandStatus::try_from(p[1]).map_err(|b| {
        ProtocolError::MalformedPayload(format!("unknown command status: 0x{b:02X}"))
    })?;
    let (message, _) = read_length_prefixed_string(p, 2)?;
    Ok(CommandResult {
        command_id: p[0],
        status,
        message,
    })
}

fn decode_threshold(p: &[u8]) -> Result<ThresholdAlert, ProtocolError> {
    require_len(p, THRESHOLD_SIZE, "ThresholdExceeded")?;
    let severity = Severity::try_from(p[9])
        .map_err(|b| ProtocolError::MalformedPayload(format!("unknown severity: 0x{b:02X}")))?;
    Ok(ThresholdAlert {
        metric: MetricKind::from_id(p[0]),
        value: read_f32(p, 1)?,
        threshold: read_f32(p, 5)?,
        severity,
    })
}

fn device_state(byte: u8) -> Result<DeviceState, ProtocolError> {
    DeviceState::try_from(byte)
        .map_err(|b| ProtocolError::MalformedPayload(format!("unknown device state: 0x{b:02X}")))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
