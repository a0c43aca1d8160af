//! 48-bit record sequence numbers.

/// Largest value a record sequence number can hold.
pub const MAX_SEQUENCE: u64 = 0xFFFF_FFFF_FFFF;

/// Wrapping 48-bit counter for record sequence numbers.
///
/// The counter holds the last value handed out. A fresh counter starts at 0, so the
/// first call to [`next`][SequenceNumber::next] returns 1.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SequenceNumber {
    current: u64,
}

impl SequenceNumber {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last value handed out.
    pub fn current(&self) -> u64 {
        self.current
    }

    /// Increment and return the new value, wrapping `0xFFFFFFFFFFFF` to `0`.
    pub fn next(&mut self) -> u64 {
        self.current = (self.current + 1) & MAX_SEQUENCE;
        self.current
    }

    /// Make the following [`next`][SequenceNumber::next] return exactly `value`.
    pub fn set_next(&mut self, value: u64) {
        self.current = value.wrapping_sub(1) & MAX_SEQUENCE;
    }

    /// Big endian 6-byte form, as written in record headers.
    pub fn to_bytes(value: u64) -> [u8; 6] {
        let b = value.to_be_bytes();
        [b[2], b[3], b[4], b[5], b[6], b[7]]
    }
}
