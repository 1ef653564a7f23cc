//! Reliable sequence numbers.
//!
//! Unlike the wraparound `u16` sequence numbers used by window-based
//! transports, the reliable/sized sequence numbers here are plain 32-bit
//! signed integers over the range `0..i32::MAX` (§6) — large enough that
//! wraparound is not a concern for a connection's lifetime, so ordering is
//! just `i32`'s natural `Ord`, no wrapping comparator required.

use bytes::{Buf, BufMut};

/// A reliable sequence number, always non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Seq(i32);

impl Seq {
    /// Wraps a raw value.
    ///
    /// # Panics
    ///
    /// Panics if `n` is negative; negative sequence numbers must be rejected
    /// at the decode boundary instead (see [`Seq::decode`]).
    #[must_use]
    pub const fn new(n: i32) -> Self {
        assert!(n >= 0, "sequence numbers must be non-negative");
        Self(n)
    }

    /// Gets the raw value.
    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }

    /// Index of this sequence number's slot in a receive window of size `w`.
    #[must_use]
    pub fn slot(self, w: usize) -> usize {
        (self.0 as usize) % w
    }

    /// The next sequence number after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// `self - rhs`, as a plain signed distance (no wraparound).
    #[must_use]
    pub const fn dist_to(self, rhs: Self) -> i32 {
        self.0 - rhs.0
    }

    /// Reads a little-endian 32-bit sequence number, rejecting negative
    /// values per §6.
    #[must_use]
    pub fn decode(mut src: impl Buf) -> Option<Self> {
        if src.remaining() < 4 {
            return None;
        }
        let raw = src.get_i32_le();
        (raw >= 0).then_some(Self(raw))
    }

    /// Writes this sequence number as little-endian.
    pub fn encode(self, mut dst: impl BufMut) {
        dst.put_i32_le(self.0);
    }
}

impl std::fmt::Display for Seq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        let mut buf = Vec::new();
        Seq::new(12345).encode(&mut buf);
        let decoded = Seq::decode(&buf[..]).unwrap();
        assert_eq!(Seq::new(12345), decoded);
    }

    #[test]
    fn negative_raw_value_is_rejected() {
        let mut buf = Vec::new();
        buf.put_i32_le(-1);
        assert!(Seq::decode(&buf[..]).is_none());
    }

    #[test]
    fn too_short_is_rejected() {
        assert!(Seq::decode(&[1u8, 2, 3][..]).is_none());
    }

    #[test]
    fn slot_wraps_by_window_size() {
        assert_eq!(0, Seq::new(64).slot(64));
        assert_eq!(3, Seq::new(67).slot(64));
    }

    #[test]
    fn dist_to_is_plain_subtraction() {
        assert_eq!(5, Seq::new(10).dist_to(Seq::new(5)));
        assert_eq!(-5, Seq::new(5).dist_to(Seq::new(10)));
    }
}
