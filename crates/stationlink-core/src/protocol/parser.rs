//! Streaming frame parser with loss-of-sync recovery.
//!
//! TCP and serial links are byte streams: a single read may return half a
//! frame, three frames, or a burst of line noise followed by a frame.  The
//! [`FrameParser`] is a byte-at-a-time state machine that accepts whatever the
//! transport hands it and emits only complete, CRC-verified messages.
//!
//! # State machine
//!
//! ```text
//!            0xAA                0x55              4 bytes            len bytes
//!   Idle ──────────► ReadingHeader ──────► ReadingLength ─────► ReadingPayload ─────► ReadingCrc
//!    ▲  other: drop       │ 0xAA: stay         (len, type, seq)   (len == 0 skips)       │ 2 bytes
//!    │                    │ other: drop                                                  │
//!    └────────────────────┴──────────────── frame complete (good or bad CRC) ◄───────────┘
//! ```
//!
//! Scanning for `AA 55` is the resynchronisation mechanism: anything that is
//! not a header is discarded, and a false start (an `AA` not followed by `55`)
//! costs only the bytes already seen.  A frame whose CRC does not match is
//! dropped and counted; the parser goes straight back to scanning, so the next
//! valid frame is still found.
//!
//! # Two entry points, one behaviour
//!
//! [`FrameParser::push_byte`] and [`FrameParser::feed`] both drive the same
//! internal `step` function, so splitting a stream differently never changes
//! which messages come out.

use std::collections::VecDeque;

use tracing::debug;

use crate::protocol::crc::Crc16;
use crate::protocol::messages::{Message, MessageType, FRAME_HEADER, MAX_PAYLOAD_LEN};

/// Bytes read in [`ParserState::ReadingLength`]: length (2), type (1), sequence (1).
const LENGTH_FIELDS_SIZE: usize = 4;

/// Where the parser is within the current frame.
///
/// `remaining` counts the bytes still expected before the next transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Scanning for the first header byte.
    Idle,
    /// Seen `0xAA`, expecting `0x55`.
    ReadingHeader,
    /// Reading the length, type, and sequence fields.
    ReadingLength { remaining: usize },
    /// Accumulating payload bytes.
    ReadingPayload { remaining: usize },
    /// Reading the two CRC bytes.
    ReadingCrc { remaining: usize },
}

/// Running counters kept by a [`FrameParser`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserStats {
    /// Frames that passed the CRC check and carried a known type.
    pub frames_ok: u64,
    /// Frames dropped because their CRC did not match.
    pub crc_errors: u64,
    /// CRC failures since the last good frame.
    pub consecutive_crc_errors: u32,
    /// Bytes thrown away while hunting for a header.
    pub discarded_bytes: u64,
    /// Headers whose length field exceeded the configured limit.
    pub oversized_frames: u64,
    /// CRC-valid frames with a type code this build does not understand.
    pub unknown_types: u64,
}

/// Byte-oriented frame parser.
///
/// Owned by exactly one reader; it holds no locks and does no I/O.
///
/// # Examples
///
/// ```rust
/// use stationlink_core::{build_frame, FrameParser, Message, MessageType};
///
/// let ping = Message::empty(MessageType::Ping, 1);
/// let mut stream = vec![0x13, 0xAA, 0x37]; // line noise with a false start
/// stream.extend(build_frame(&ping).unwrap());
///
/// let mut parser = FrameParser::new();
/// assert_eq!(parser.feed(&stream), vec![ping]);
/// ```
#[derive(Debug)]
pub struct FrameParser {
    state: ParserState,
    /// Header, length, type, sequence, and payload of the frame in progress.
    buf: Vec<u8>,
    /// CRC over `buf`, kept current as bytes arrive.
    crc: Crc16,
    received_crc: u16,
    max_payload_len: usize,
    /// Messages completed by `push_byte` and not yet popped.
    ready: VecDeque<Message>,
    stats: ParserStats,
}

impl FrameParser {
    /// Creates a parser accepting payloads up to the full 16-bit length.
    pub fn new() -> Self {
        Self::with_max_payload(MAX_PAYLOAD_LEN)
    }

    /// Creates a parser that treats any length field above `max_payload_len`
    /// as a false header and resumes scanning.
    ///
    /// A tight limit keeps a corrupted length from stalling the parser while it
    /// waits for tens of kilobytes that will never form a valid frame.
    pub fn with_max_payload(max_payload_len: usize) -> Self {
        Self {
            state: ParserState::Idle,
            buf: Vec::with_capacity(256),
            crc: Crc16::new(),
            received_crc: 0,
            max_payload_len: max_payload_len.min(MAX_PAYLOAD_LEN),
            ready: VecDeque::new(),
            stats: ParserStats::default(),
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// Total CRC failures since construction.
    pub fn crc_errors(&self) -> u64 {
        self.stats.crc_errors
    }

    /// Number of bytes of the in-progress frame held in the accumulation buffer.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Feeds one byte.  Returns `true` when this byte completed a valid frame;
    /// the message is then available from [`pop_message`](Self::pop_message).
    pub fn push_byte(&mut self, byte: u8) -> bool {
        match self.step(byte) {
            Some(msg) => {
                self.ready.push_back(msg);
                true
            }
            None => false,
        }
    }

    /// Takes the oldest message completed by [`push_byte`](Self::push_byte).
    pub fn pop_message(&mut self) -> Option<Message> {
        self.ready.pop_front()
    }

    /// Feeds a chunk and returns every valid message completed by it, in order.
    ///
    /// Messages still queued from earlier `push_byte` calls come first.
    /// Corrupted frames are skipped, never reported as errors.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Message> {
        let mut out: Vec<Message> = self.ready.drain(..).collect();
        for &byte in data {
            if let Some(msg) = self.step(byte) {
                out.push(msg);
            }
        }
        out
    }

    /// Abandons any partially received frame and returns to `Idle`.
    ///
    /// Called after a transport reconnect so bytes from before the drop
    /// cannot be spliced onto bytes from the new connection.  Completed
    /// messages that have not been popped yet are kept.
    pub fn reset(&mut self) {
        self.state = ParserState::Idle;
        self.buf.clear();
        self.crc.reset();
        self.received_crc = 0;
    }

    /// Zeroes the consecutive CRC error run, keeping the cumulative counters.
    ///
    /// The session calls this after a reconnect so errors seen on the old
    /// connection do not count against the new one.
    pub fn clear_error_run(&mut self) {
        self.stats.consecutive_crc_errors = 0;
    }

    // ── State machine ─────────────────────────────────────────────────────────

    fn step(&mut self, byte: u8) -> Option<Message> {
        match self.state {
            ParserState::Idle => {
                if byte == FRAME_HEADER[0] {
                    self.begin_frame(byte);
                } else {
                    self.stats.discarded_bytes += 1;
                }
                None
            }
            ParserState::ReadingHeader => {
                if byte == FRAME_HEADER[1] {
                    self.accept(byte);
                    self.state = ParserState::ReadingLength {
                        remaining: LENGTH_FIELDS_SIZE,
                    };
                } else if byte == FRAME_HEADER[0] {
                    // The earlier 0xAA was noise; this one may be the real start.
                    self.stats.discarded_bytes += 1;
                    self.begin_frame(byte);
                } else {
                    self.stats.discarded_bytes += 2;
                    self.reset();
                }
                None
            }
            ParserState::ReadingLength { remaining } => {
                self.accept(byte);
                if remaining > 1 {
                    self.state = ParserState::ReadingLength {
                        remaining: remaining - 1,
                    };
                    return None;
                }
                let payload_len = usize::from(u16::from_be_bytes([self.buf[2], self.buf[3]]));
                if payload_len > self.max_payload_len {
                    debug!(
                        payload_len,
                        limit = self.max_payload_len,
                        "length field over limit, resynchronising"
                    );
                    self.stats.oversized_frames += 1;
                    self.stats.discarded_bytes += self.buf.len() as u64;
                    self.reset();
                } else if payload_len == 0 {
                    self.state = ParserState::ReadingCrc { remaining: 2 };
                } else {
                    self.buf.reserve(payload_len);
                    self.state = ParserState::ReadingPayload {
                        remaining: payload_len,
                    };
                }
                None
            }
            ParserState::ReadingPayload { remaining } => {
                self.accept(byte);
                self.state = if remaining > 1 {
                    ParserState::ReadingPayload {
                        remaining: remaining - 1,
                    }
                } else {
                    ParserState::ReadingCrc { remaining: 2 }
                };
                None
            }
            ParserState::ReadingCrc { remaining } => {
                self.received_crc = (self.received_crc << 8) | u16::from(byte);
                if remaining > 1 {
                    self.state = ParserState::ReadingCrc {
                        remaining: remaining - 1,
                    };
                    None
                } else {
                    let msg = self.finish_frame();
                    self.reset();
                    msg
                }
            }
        }
    }

    fn begin_frame(&mut self, first: u8) {
        self.buf.clear();
        self.crc.reset();
        self.received_crc = 0;
        self.accept(first);
        self.state = ParserState::ReadingHeader;
    }

    fn accept(&mut self, byte: u8) {
        self.buf.push(byte);
        self.crc.update_byte(byte);
    }

    fn finish_frame(&mut self) -> Option<Message> {
        let computed = self.crc.finish();
        if computed != self.received_crc {
            self.stats.crc_errors += 1;
            self.stats.consecutive_crc_errors += 1;
            debug!(
                received = self.received_crc,
                computed, "dropping frame with bad CRC"
            );
            return None;
        }
        self.stats.consecutive_crc_errors = 0;

        let type_byte = self.buf[4];
        let Ok(message_type) = MessageType::try_from(type_byte) else {
            self.stats.unknown_types += 1;
            debug!(type_byte, "dropping frame with unknown message type");
            return None;
        };

        self.stats.frames_ok += 1;
        Some(Message::new(
            message_type,
            self.buf[5],
            self.buf[6..].to_vec(),
        ))
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
