//! CRC-16 integrity check used by every frame on the device link.
//!
//! The variant is CRC-16/CCITT-FALSE (also catalogued as CRC-16/IBM-3740):
//!
//! | Parameter | Value    |
//! |-----------|----------|
//! | width     | 16       |
//! | poly      | `0x1021` |
//! | init      | `0xFFFF` |
//! | reflected | no       |
//! | xorout    | `0x0000` |
//! | check     | `0x29B1` (CRC of ASCII `"123456789"`) |
//!
//! # Two implementations
//!
//! [`crc16`] is the bit-by-bit reference: it shifts one bit at a time and is
//! easy to audit against the textbook definition.  [`crc16_fast`] and
//! [`crc16_update`] use a 256-entry lookup table, built at compile time from
//! the same polynomial, and process a whole byte per step.  Both must agree
//! bit-for-bit; the tests below compare them on every input they generate.
//!
//! # Streaming
//!
//! Because there is no final XOR, the running register *is* the CRC of the
//! bytes seen so far, so a frame can be checksummed in pieces:
//!
//! ```rust
//! use stationlink_core::protocol::crc::{crc16, crc16_update, CRC16_INITIAL};
//!
//! let whole = crc16(b"hello world");
//! let split = crc16_update(crc16_update(CRC16_INITIAL, b"hello "), b"world");
//! assert_eq!(whole, split);
//! ```

/// Register value before any byte has been processed.  Also the CRC of an
/// empty input.
pub const CRC16_INITIAL: u16 = 0xFFFF;

/// Generator polynomial (x^16 + x^12 + x^5 + 1), MSB-first form.
pub const CRC16_POLY: u16 = 0x1021;

/// Lookup table: `TABLE[i]` is the register after shifting byte `i` through
/// an all-zero register eight times.
static TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Computes the CRC-16 of `data` one bit at a time (reference implementation).
///
/// # Examples
///
/// ```rust
/// use stationlink_core::protocol::crc::crc16;
///
/// assert_eq!(crc16(b"123456789"), 0x29B1);
/// assert_eq!(crc16(&[]), 0xFFFF);
/// ```
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = CRC16_INITIAL;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Continues a CRC computation from `running` over `data`.
///
/// Start with [`CRC16_INITIAL`]; feeding the chunks of a buffer in order
/// yields the same value as [`crc16`] over the whole buffer.
pub fn crc16_update(running: u16, data: &[u8]) -> u16 {
    data.iter().fold(running, |crc, &byte| step(crc, byte))
}

/// Computes the CRC-16 of `data` using the lookup table.
pub fn crc16_fast(data: &[u8]) -> u16 {
    crc16_update(CRC16_INITIAL, data)
}

/// Returns `true` when the CRC of `data` equals `expected`.
pub fn verify(data: &[u8], expected: u16) -> bool {
    crc16_fast(data) == expected
}

#[inline]
fn step(crc: u16, byte: u8) -> u16 {
    let index = ((crc >> 8) ^ u16::from(byte)) & 0x00FF;
    (crc << 8) ^ TABLE[index as usize]
}

// ── Incremental hasher ────────────────────────────────────────────────────────

/// Incremental CRC-16 accumulator.
///
/// The frame parser keeps one of these alive while a frame is arriving so the
/// check is ready the moment the last payload byte lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16 {
    value: u16,
}

impl Crc16 {
    pub const fn new() -> Self {
        Self {
            value: CRC16_INITIAL,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.value = crc16_update(self.value, data);
    }

    pub fn update_byte(&mut self, byte: u8) {
        self.value = step(self.value, byte);
    }

    /// Current CRC of everything fed since construction or the last reset.
    pub fn finish(&self) -> u16 {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = CRC16_INITIAL;
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// A representative request frame body: header, length, type, seq, payload.
    const SAMPLE_FRAME_BODY: [u8; 12] = [
        0xAA, 0x55, 0x00, 0x06, 0x11, 0x2A, 0x01, 0x01, 0x42, 0x28, 0x00, 0x00,
    ];

    #[test]
    fn test_crc16_check_value() {
        assert_eq!(crc16(b"123456789"), 0x29B1);
        assert_eq!(crc16_fast(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_empty_input_returns_initial_value() {
        assert_eq!(crc16(&[]), CRC16_INITIAL);
        assert_eq!(crc16_fast(&[]), CRC16_INITIAL);
        assert_eq!(crc16_update(CRC16_INITIAL, &[]), CRC16_INITIAL);
    }

    #[test]
    fn test_table_entry_zero_and_one() {
        // Arrange / Act / Assert – first entries of the canonical CCITT table
        assert_eq!(TABLE[0], 0x0000);
        assert_eq!(TABLE[1], 0x1021);
        assert_eq!(TABLE[0xFF], 0x1EF0);
    }

    #[test]
    fn test_fast_matches_reference_for_every_single_byte() {
        for byte in 0..=u8::MAX {
            assert_eq!(crc16_fast(&[byte]), crc16(&[byte]), "mismatch for byte 0x{byte:02X}");
        }
    }

    #[test]
    fn test_fast_matches_reference_for_every_byte_pair() {
        for hi in 0..=u8::MAX {
            for lo in 0..=u8::MAX {
                let data = [hi, lo];
                assert_eq!(crc16_fast(&data), crc16(&data));
            }
        }
    }

    #[test]
    fn test_single_bit_flip_always_changes_crc() {
        // Arrange
        let original = crc16(&SAMPLE_FRAME_BODY);

        // Act / Assert – every one of the 96 bit positions
        for byte_index in 0..SAMPLE_FRAME_BODY.len() {
            for bit in 0..8 {
                let mut corrupted = SAMPLE_FRAME_BODY;
                corrupted[byte_index] ^= 1 << bit;
                assert_ne!(
                    crc16(&corrupted),
                    original,
                    "flipping bit {bit} of byte {byte_index} went undetected"
                );
            }
        }
    }

    #[test]
    fn test_single_bit_flip_detected_in_long_message() {
        let data: Vec<u8> = (0..=255u8).collect();
        let original = crc16_fast(&data);
        for byte_index in 0..data.len() {
            for bit in 0..8 {
                let mut corrupted = data.clone();
                corrupted[byte_index] ^= 1 << bit;
                assert_ne!(crc16_fast(&corrupted), original);
            }
        }
    }

    #[test]
    fn test_two_chunk_streaming_equals_one_shot() {
        // Arrange
        let (a, b) = SAMPLE_FRAME_BODY.split_at(5);

        // Act
        let streamed = crc16_update(crc16_update(CRC16_INITIAL, a), b);

        // Assert
        assert_eq!(streamed, crc16(&SAMPLE_FRAME_BODY));
    }

    #[test]
    fn test_hasher_byte_by_byte_matches_one_shot() {
        let mut hasher = Crc16::new();
        for &byte in &SAMPLE_FRAME_BODY {
            hasher.update_byte(byte);
        }
        assert_eq!(hasher.finish(), crc16(&SAMPLE_FRAME_BODY));

        hasher.reset();
        assert_eq!(hasher.finish(), CRC16_INITIAL);
    }

    #[test]
    fn test_verify_rejects_wrong_crc() {
        let crc = crc16(b"abc");
        assert!(verify(b"abc", crc));
        assert!(!verify(b"abc", crc ^ 0x0001));
    }

    #[test]
    fn test_matches_crc16_crate_ccitt_false() {
        for len in 0..64usize {
            let data: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(37) ^ 0x5A).collect();
            let expected = ::crc16::State::<::crc16::CCITT_FALSE>::calculate(&data);
            assert_eq!(crc16_fast(&data), expected, "length {len}");
        }
    }

    proptest! {
        #[test]
        fn prop_fast_equals_reference(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            prop_assert_eq!(crc16_fast(&data), crc16(&data));
        }

        #[test]
        fn prop_split_anywhere_equals_one_shot(
            data in proptest::collection::vec(any::<u8>(), 0..256),
            split in any::<prop::sample::Index>(),
        ) {
            let at = split.index(data.len() + 1);
            let (a, b) = data.split_at(at);
            prop_assert_eq!(crc16_update(crc16_update(CRC16_INITIAL, a), b), crc16(&data));
        }
    }
}
