//! Message types carried on the device link.
//!
//! A [`Message`] is the decoded, in-memory form of one frame: a type code, a
//! one-byte sequence number used to pair requests with responses, and an
//! opaque payload.  Typed payload encodings live in
//! [`payload`](crate::protocol::payload).

use serde::{Deserialize, Serialize};

// ── Protocol constants ────────────────────────────────────────────────────────

/// The two fixed bytes that open every frame.
pub const FRAME_HEADER: [u8; 2] = [0xAA, 0x55];

/// Header (2) + length (2) + type (1) + sequence (1).
pub const FRAME_PREFIX_SIZE: usize = 6;

/// Size of the trailing CRC field.
pub const FRAME_CRC_SIZE: usize = 2;

/// Smallest possible frame: prefix and CRC with an empty payload.
pub const MIN_FRAME_SIZE: usize = FRAME_PREFIX_SIZE + FRAME_CRC_SIZE;

/// The length field is 16 bits wide.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

// ── Message type codes ────────────────────────────────────────────────────────

/// All message type codes understood by the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    // Keepalive (0x01–0x0F)
    Ping = 0x01,
    Pong = 0x02,
    // Request/response (0x10–0x2F)
    MetricsRequest = 0x10,
    MetricsResponse = 0x11,
    StatusRequest = 0x12,
    StatusResponse = 0x13,
    ExecuteCommand = 0x20,
    CommandResult = 0x21,
    // Unsolicited device events (0x30–0x3F)
    MetricsEvent = 0x30,
    ThresholdExceeded = 0x31,
    DeviceStateChange = 0x32,
    // Device-reported failure
    Error = 0x7F,
}

impl MessageType {
    /// Returns `true` for types the device pushes on its own initiative.
    ///
    /// These never complete a pending request, even if their sequence number
    /// happens to match one.
    pub fn is_event(self) -> bool {
        matches!(
            self,
            MessageType::MetricsEvent
                | MessageType::ThresholdExceeded
                | MessageType::DeviceStateChange
        )
    }

    /// The response type a well-behaved device answers this request with.
    pub fn expected_response(self) -> Option<MessageType> {
        match self {
            MessageType::Ping => Some(MessageType::Pong),
            MessageType::MetricsRequest => Some(MessageType::MetricsResponse),
            MessageType::StatusRequest => Some(MessageType::StatusResponse),
            MessageType::ExecuteCommand => Some(MessageType::CommandResult),
            _ => None,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0x01 => Ok(MessageType::Ping),
            0x02 => Ok(MessageType::Pong),
            0x10 => Ok(MessageType::MetricsRequest),
            0x11 => Ok(MessageType::MetricsResponse),
            0x12 => Ok(MessageType::StatusRequest),
            0x13 => Ok(MessageType::StatusResponse),
            0x20 => Ok(MessageType::ExecuteCommand),
            0x21 => Ok(MessageType::CommandResult),
            0x30 => Ok(MessageType::MetricsEvent),
            0x31 => Ok(MessageType::ThresholdExceeded),
            0x32 => Ok(MessageType::DeviceStateChange),
            0x7F => Ok(MessageType::Error),
            other => Err(other),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        value as u8
    }
}

// ── Message ───────────────────────────────────────────────────────────────────

/// One decoded frame.
///
/// Equality is structural.  `sequence` is a correlation token that wraps at
/// 256, not a global identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message {
    pub message_type: MessageType,
    pub sequence: u8,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(message_type: MessageType, sequence: u8, payload: Vec<u8>) -> Self {
        Self {
            message_type,
            sequence,
            payload,
        }
    }

    /// A message with an empty payload.
    pub fn empty(message_type: MessageType, sequence: u8) -> Self {
        Self::new(message_type, sequence, Vec::new())
    }

    /// Returns a copy of this message carrying `sequence` instead.
    pub fn with_sequence(mut self, sequence: u8) -> Self {
        self.sequence = sequence;
        self
    }

    /// Size of this message once framed.
    pub fn frame_len(&self) -> usize {
        MIN_FRAME_SIZE + self.payload.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TYPES: [MessageType; 12] = [
        MessageType::Ping,
        MessageType::Pong,
        MessageType::MetricsRequest,
        MessageType::MetricsResponse,
        MessageType::StatusRequest,
        MessageType::StatusResponse,
        MessageType::ExecuteCommand,
        MessageType::CommandResult,
        MessageType::MetricsEvent,
        MessageType::ThresholdExceeded,
        MessageType::DeviceStateChange,
        MessageType::Error,
    ];

    #[test]
    fn test_message_type_byte_conversion_is_bijective() {
        for ty in ALL_TYPES {
            assert_eq!(MessageType::try_from(u8::from(ty)), Ok(ty));
        }
    }

    #[test]
    fn test_unknown_type_byte_is_rejected() {
        assert_eq!(MessageType::try_from(0x00), Err(0x00));
        assert_eq!(MessageType::try_from(0xFE), Err(0xFE));
    }

    #[test]
    fn test_only_push_types_are_events() {
        let events: Vec<_> = ALL_TYPES.iter().copied().filter(|t| t.is_event()).collect();
        assert_eq!(
            events,
            vec![
                MessageType::MetricsEvent,
                MessageType::ThresholdExceeded,
                MessageType::DeviceStateChange
            ]
        );
    }

    #[test]
    fn test_expected_response_pairs() {
        assert_eq!(MessageType::Ping.expected_response(), Some(MessageType::Pong));
        assert_eq!(
            MessageType::ExecuteCommand.expected_response(),
            Some(MessageType::CommandResult)
        );
        assert_eq!(MessageType::MetricsEvent.expected_response(), None);
    }

    #[test]
    fn test_frame_len_includes_overhead() {
        let msg = Message::new(MessageType::MetricsRequest, 3, vec![0, 1, 2]);
        assert_eq!(msg.frame_len(), 11);
        assert_eq!(Message::empty(MessageType::Ping, 1).frame_len(), MIN_FRAME_SIZE);
    }
}
