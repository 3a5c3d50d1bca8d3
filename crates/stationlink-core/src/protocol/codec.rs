//! Frame codec: turns a [`Message`] into wire bytes and checks complete frames.
//!
//! Wire format:
//! ```text
//! [0xAA][0x55][len:2][type:1][seq:1][payload:len][crc:2]
//! ```
//! All multi-byte integers are big-endian.  The CRC covers every byte before
//! it, header included.
//!
//! For streams (TCP, serial) use [`FrameParser`](crate::protocol::parser::FrameParser)
//! instead of [`decode_frame`]: it tolerates partial reads and line noise.

use thiserror::Error;

use crate::protocol::crc::{crc16_fast, Crc16};
use crate::protocol::messages::{
    Message, MessageType, FRAME_CRC_SIZE, FRAME_HEADER, FRAME_PREFIX_SIZE, MAX_PAYLOAD_LEN,
    MIN_FRAME_SIZE,
};

/// Errors that can occur while encoding, checking, or decoding frames and payloads.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The payload does not fit in the 16-bit length field.
    #[error("payload of {len} bytes exceeds the {max}-byte frame limit")]
    PayloadTooLarge { len: usize, max: usize },

    /// The CRC trailer does not match the frame contents.
    #[error("CRC mismatch: frame carries 0x{received:04X}, computed 0x{computed:04X}")]
    CrcMismatch { received: u16, computed: u16 },

    /// The buffer does not start with the fixed `AA 55` header.
    #[error("invalid frame header: {0:02X?}")]
    InvalidHeader([u8; 2]),

    /// The byte slice is shorter than the frame it claims to hold.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The type byte is not a recognised value.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// The payload could not be parsed for its message type.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes `msg` as a complete frame.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] when the payload exceeds 65535 bytes.
///
/// # Examples
///
/// ```rust
/// use stationlink_core::{build_frame, Message, MessageType};
///
/// let frame = build_frame(&Message::empty(MessageType::Ping, 0x01)).unwrap();
/// assert_eq!(frame, [0xAA, 0x55, 0x00, 0x00, 0x01, 0x01, 0x7C, 0x4F]);
/// ```
pub fn build_frame(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(msg.frame_len());
    encode_into(msg, &mut buf)?;
    Ok(buf)
}

/// Appends the frame for `msg` to `buf`.
///
/// On error `buf` is left untouched, so several messages can be batched into
/// one write buffer.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] when the payload exceeds 65535 bytes.
pub fn encode_into(msg: &Message, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
    let len = u16::try_from(msg.payload.len()).map_err(|_| ProtocolError::PayloadTooLarge {
        len: msg.payload.len(),
        max: MAX_PAYLOAD_LEN,
    })?;

    let start = buf.len();
    buf.reserve(msg.frame_len());
    buf.extend_from_slice(&FRAME_HEADER);
    buf.extend_from_slice(&len.to_be_bytes());
    buf.push(msg.message_type.into());
    buf.push(msg.sequence);
    buf.extend_from_slice(&msg.payload);

    let crc = crc16_fast(&buf[start..]);
    buf.extend_from_slice(&crc.to_be_bytes());
    Ok(())
}

/// Checks that `frame` is exactly one well-formed frame with a valid CRC.
///
/// # Errors
///
/// Returns the first problem found: header, length, or CRC.
pub fn verify_frame(frame: &[u8]) -> Result<(), ProtocolError> {
    let total = checked_frame_len(frame)?;
    if frame.len() != total {
        return Err(ProtocolError::MalformedPayload(format!(
            "frame declares {total} bytes but buffer holds {}",
            frame.len()
        )));
    }
    check_crc(&frame[..total])
}

/// Decodes the frame at the start of `bytes`.
///
/// Returns the message and the number of bytes consumed so the caller can
/// advance past it.  Unlike [`FrameParser`](crate::protocol::parser::FrameParser),
/// this does not skip leading garbage.
///
/// # Errors
///
/// Returns [`ProtocolError`] for a bad header, truncated input, CRC mismatch,
/// or an unknown type code.
pub fn decode_frame(bytes: &[u8]) -> Result<(Message, usize), ProtocolError> {
    let total = checked_frame_len(bytes)?;
    check_crc(&bytes[..total])?;

    let type_byte = bytes[4];
    let message_type =
        MessageType::try_from(type_byte).map_err(ProtocolError::UnknownMessageType)?;
    let sequence = bytes[5];
    let payload = bytes[FRAME_PREFIX_SIZE..total - FRAME_CRC_SIZE].to_vec();

    Ok((Message::new(message_type, sequence, payload), total))
}

/// Validates the header and returns the full frame length declared by it.
fn checked_frame_len(bytes: &[u8]) -> Result<usize, ProtocolError> {
    if bytes.len() < MIN_FRAME_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: MIN_FRAME_SIZE,
            available: bytes.len(),
        });
    }
    if bytes[..2] != FRAME_HEADER {
        return Err(ProtocolError::InvalidHeader([bytes[0], bytes[1]]));
    }
    let payload_len = usize::from(read_u16(bytes, 2)?);
    let total = MIN_FRAME_SIZE + payload_len;
    if bytes.len() < total {
        return Err(ProtocolError::InsufficientData {
            needed: total,
            available: bytes.len(),
        });
    }
    Ok(total)
}

fn check_crc(frame: &[u8]) -> Result<(), ProtocolError> {
    let body_len = frame.len() - FRAME_CRC_SIZE;
    let received = read_u16(frame, body_len)?;
    let mut hasher = Crc16::new();
    hasher.update(&frame[..body_len]);
    let computed = hasher.finish();
    if received == computed {
        Ok(())
    } else {
        Err(ProtocolError::CrcMismatch { received, computed })
    }
}

// ── Primitive read/write helpers ──────────────────────────────────────────────

pub(crate) fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

pub(crate) fn read_u16(buf: &[u8], offset: usize) -> Result<u16, ProtocolError> {
    match buf.get(offset..offset + 2) {
        Some(b) => Ok(u16::from_be_bytes([b[0], b[1]])),
        None => Err(ProtocolError::InsufficientData {
            needed: offset + 2,
            available: buf.len(),
        }),
    }
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> Result<u32, ProtocolError> {
    match buf.get(offset..offset + 4) {
        Some(b) => Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]])),
        None => Err(ProtocolError::InsufficientData {
            needed: offset + 4,
            available: buf.len(),
        }),
    }
}

pub(crate) fn read_f32(buf: &[u8], offset: usize) -> Result<f32, ProtocolError> {
    read_u32(buf, offset).map(f32::from_bits)
}

pub(crate) fn write_f32(buf: &mut Vec<u8>, value: f32) {
    buf.extend_from_slice(&value.to_bits().to_be_bytes());
}

/// Writes a 2-byte length prefix followed by the UTF-8 string bytes.
///
/// Strings longer than 65 535 bytes are cut at the last character boundary
/// that fits, so the written bytes are always valid UTF-8.
pub(crate) fn write_length_prefixed_string(buf: &mut Vec<u8>, s: &str) {
    let mut len = s.len().min(usize::from(u16::MAX));
    while !s.is_char_boundary(len) {
        len -= 1;
    }
    buf.extend_from_slice(&(len as u16).to_be_bytes());
    buf.extend_from_slice(&s.as_bytes()[..len]);
}

/// Reads a 2-byte length prefix and then that many UTF-8 bytes.
/// Returns the string and the offset of the byte after the string.
pub(crate) fn read_length_prefixed_string(
    buf: &[u8],
    offset: usize,
) -> Result<(String, usize), ProtocolError> {
    let len = usize::from(read_u16(buf, offset).map_err(|_| {
        ProtocolError::MalformedPayload(format!("need 2 bytes for string length at offset {offset}"))
    })?);
    let start = offset + 2;
    let bytes = buf.get(start..start + len).ok_or_else(|| {
        ProtocolError::MalformedPayload(format!(
            "string of length {len} at offset {start} exceeds buffer"
        ))
    })?;
    let s = std::str::from_utf8(bytes)
        .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8: {e}")))?
        .to_string();
    Ok((s, start + len))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
