//! # stationlink-core
//!
//! Shared library for StationLink containing the device-link wire protocol:
//! the CRC-16 engine, the frame codec, the streaming frame parser, and the
//! typed telemetry payloads exchanged with a base-station device.
//!
//! This crate is used by both the gateway (the management side of the link)
//! and the device simulator. It has zero dependencies on sockets, serial
//! ports, or async runtimes, so everything in it can be tested in isolation.
//!
//! # Architecture overview
//!
//! - **`protocol`** – How bytes travel over the link. A [`Message`] is
//!   wrapped in a frame (`AA 55 | len | type | seq | payload | crc`) by the
//!   [`codec`](protocol::codec), and the [`FrameParser`] recovers messages
//!   from an arbitrary byte stream, resynchronising after line noise.
//!
//! - **`domain`** – The values the device reports: metrics, status,
//!   command results, alerts. These are what outer layers (cloud upload,
//!   dashboards) consume; they never see raw frames.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `stationlink_core::Message` instead of `stationlink_core::protocol::messages::Message`.
pub use domain::telemetry::{
    Alert, Command, CommandResult, CommandStatus, DeviceError, DeviceState, DeviceStatus, Metric,
    MetricKind, ParseMetricKindError, Severity, StateChange, ThresholdAlert,
};
pub use protocol::codec::{build_frame, decode_frame, verify_frame, ProtocolError};
pub use protocol::messages::{Message, MessageType};
pub use protocol::parser::{FrameParser, ParserState, ParserStats};
pub use protocol::payload::DeviceMessage;
pub use protocol::sequence::SequenceCounter;
