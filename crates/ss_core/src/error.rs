//! Error types for each fallible domain in the transport engine.

use derive_more::{Display, Error};

/// A core packet could not be parsed off the wire.
#[derive(Debug, Display, Error)]
pub enum DecodeError {
    /// The datagram was shorter than the subtype's fixed header requires.
    #[display("packet too short: got {got} bytes, need at least {need}")]
    TooShort {
        /// Bytes actually present.
        got: usize,
        /// Bytes required.
        need: usize,
    },
    /// The second byte did not match any known core subtype.
    #[display("unknown core subtype 0x{_0:02X}")]
    UnknownSubtype(u8),
    /// A reliable or sized sequence number was negative.
    #[display("negative sequence number {_0}")]
    NegativeSeq(i32),
    /// A grouped-packet item length byte pointed past the end of the buffer.
    #[display("grouped item of length {len} overruns buffer (only {rem} bytes left)")]
    GroupedItemOverrun {
        /// Declared item length.
        len: usize,
        /// Bytes actually remaining in the container.
        rem: usize,
    },
}

/// A big-data (0x08/0x09) assembly failed.
#[derive(Debug, Display, Error)]
pub enum BigRecvError {
    /// Accepting this fragment would push the assembly past `MaxBigPacket`.
    #[display("big-data assembly of {would_be} bytes exceeds the {max} byte cap")]
    TooLarge {
        /// Size the assembly would reach if this fragment were accepted.
        would_be: usize,
        /// Configured cap.
        max: usize,
    },
}

/// A sized-data (0x0A) chunk was rejected.
#[derive(Debug, Display, Error)]
pub enum SizedRecvError {
    /// A chunk declared a different total length than the first chunk did.
    #[display("sized transfer total changed from {first} to {now}")]
    TotalMismatch {
        /// Total length declared by the first chunk.
        first: u32,
        /// Total length declared by this chunk.
        now: u32,
    },
    /// A chunk declared a different payload type than the first chunk did.
    #[display("sized transfer payload type changed from {first} to {now}")]
    TypeMismatch {
        /// Payload type declared by the first chunk.
        first: u8,
        /// Payload type declared by this chunk.
        now: u8,
    },
    /// `offset + len` exceeded the declared total.
    #[display("sized chunk at offset {offset} of len {len} overruns total {total}")]
    Overflow {
        /// Offset of this chunk.
        offset: u32,
        /// Length of this chunk's payload.
        len: u32,
        /// Declared total length of the transfer.
        total: u32,
    },
}

/// Returned by [`crate::limit::BandwidthLimiter::check`] when a send should
/// not proceed right now.
#[derive(Debug, Clone, Copy, Display, Error)]
#[display("not enough bandwidth budget for {_0} bytes")]
pub struct NotEnoughBudget(pub usize);
