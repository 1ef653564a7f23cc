//! Fixed-size headers for the subtypes that carry one (§4.1).
//!
//! Every function here operates on the payload *after* the 2-byte
//! `0x00 <subtype>` prefix has already been consumed by the dispatcher; see
//! [`core_prefix`] for building that prefix on the send side.

use bytes::{Buf, BufMut};

use crate::{constants::CORE_TYPE, seq::Seq, subtype::CoreSubtype};

/// Builds the 2-byte `0x00 <subtype>` prefix for a core packet.
#[must_use]
pub const fn core_prefix(subtype: CoreSubtype) -> [u8; 2] {
    [CORE_TYPE, subtype.to_byte()]
}

/// Header of a `0x03` reliable (or `0x04` ACK) packet: just the sequence
/// number, little-endian (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReliableHeader {
    /// Sequence number this packet carries or acknowledges.
    pub seq: Seq,
}

impl ReliableHeader {
    /// Decodes a reliable/ack header from the bytes following the 2-byte
    /// subtype prefix.
    #[must_use]
    pub fn decode(src: impl Buf) -> Option<Self> {
        Seq::decode(src).map(|seq| Self { seq })
    }

    /// Encodes this header, but not the 2-byte subtype prefix.
    pub fn encode(&self, dst: impl BufMut) {
        self.seq.encode(dst);
    }
}

/// Header of a `0x0A` sized-data chunk: a 4-byte little-endian total length
/// (§4.1, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizedHeader {
    /// Total length of the transfer this chunk belongs to.
    pub total: u32,
}

impl SizedHeader {
    /// Decodes a sized-data header from the bytes following the 2-byte
    /// subtype prefix.
    #[must_use]
    pub fn decode(mut src: impl Buf) -> Option<Self> {
        if src.remaining() < 4 {
            return None;
        }
        Some(Self {
            total: src.get_u32_le(),
        })
    }

    /// Encodes this header, but not the 2-byte subtype prefix.
    pub fn encode(&self, mut dst: impl BufMut) {
        dst.put_u32_le(self.total);
    }
}
