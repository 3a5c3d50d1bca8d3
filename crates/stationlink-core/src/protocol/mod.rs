//! Device-link wire protocol: CRC, framing, streaming parser, payloads.

pub mod codec;
pub mod crc;
pub mod messages;
pub mod parser;
pub mod payload;
pub mod sequence;

pub use codec::{build_frame, decode_frame, encode_into, verify_frame, ProtocolError};
pub use messages::{Message, MessageType};
pub use parser::{FrameParser, ParserState, ParserStats};
pub use payload::DeviceMessage;
pub use sequence::SequenceCounter;
