//! Per-connection sequence numbering.
//!
//! Every request carries a one-byte sequence number that the device echoes
//! back in its response, which is how a reply is matched to the request that
//! caused it.  The number is a correlation token only: it wraps from 255 back
//! to 0, so at most 256 requests can be outstanding on one link at a time.
//!
//! The counter is a plain value.  The session keeps it behind the same lock as
//! the transport, so taking a number and writing its frame happen under one
//! guard.

/// A wrapping `u8` counter for message sequence numbers.
///
/// # Examples
///
/// ```rust
/// use stationlink_core::protocol::SequenceCounter;
///
/// let mut counter = SequenceCounter::starting_at(255);
/// assert_eq!(counter.next(), 255);
/// assert_eq!(counter.next(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SequenceCounter {
    next: u8,
}

impl SequenceCounter {
    /// Creates a counter whose first value is 0.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(first: u8) -> Self {
        Self { next: first }
    }

    /// Returns the next sequence number and advances the counter.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> u8 {
        let value = self.next;
        self.next = self.next.wrapping_add(1);
        value
    }

    /// Returns the value the next call to [`next`](Self::next) will yield.
    pub fn peek(&self) -> u8 {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_starts_at_zero_and_increments() {
        let mut counter = SequenceCounter::new();
        assert_eq!(counter.next(), 0);
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.peek(), 2);
    }

    #[test]
    fn test_counter_wraps_modulo_256() {
        // Arrange
        let mut counter = SequenceCounter::new();

        // Act – consume one full cycle
        let values: Vec<u8> = (0..257).map(|_| counter.next()).collect();

        // Assert
        assert_eq!(values[255], 255);
        assert_eq!(values[256], 0);
    }
}
