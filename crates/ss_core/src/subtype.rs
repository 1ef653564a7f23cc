//! The 20-slot core subtype table (§4.1, §4.3).

/// One of the core (`0x00`-family) packet subtypes.
///
/// Mirrors the dispatch table in §4.3: every variant here is a slot a
/// dispatcher must handle, even if handling it means "log and drop".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CoreSubtype {
    /// `0x01` connection init, delegated to registered init handlers.
    KeyInitiation,
    /// `0x02` completes an outbound client handshake.
    KeyResponse,
    /// `0x03` reliable: 4-byte seq header + payload.
    Reliable,
    /// `0x04` acknowledges a reliable seq-num.
    Ack,
    /// `0x05` client time-sync probe.
    SyncRequest,
    /// `0x06` answer to a sync request.
    SyncResponse,
    /// `0x07` connection close.
    Drop,
    /// `0x08` non-terminal big-data fragment.
    BigData,
    /// `0x09` terminal big-data fragment.
    BigDataEnd,
    /// `0x0A` fragment of a length-prefixed sized stream.
    SizedData,
    /// `0x0B` peer requests cancellation of an outbound sized transfer.
    CancelSized,
    /// `0x0C` acknowledges a sized-transfer cancellation.
    SizedCancelled,
    /// `0x0E` container of length-prefixed items.
    Grouped,
    /// `0x11` alternate connection init.
    ConnInitAlt,
    /// `0x13` dispatched via the net-handler table by its second byte.
    Special,
}

impl CoreSubtype {
    /// Maps a wire byte to a known subtype, or `None` if it's not one of the
    /// 20 reserved slots.
    #[must_use]
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::KeyInitiation),
            0x02 => Some(Self::KeyResponse),
            0x03 => Some(Self::Reliable),
            0x04 => Some(Self::Ack),
            0x05 => Some(Self::SyncRequest),
            0x06 => Some(Self::SyncResponse),
            0x07 => Some(Self::Drop),
            0x08 => Some(Self::BigData),
            0x09 => Some(Self::BigDataEnd),
            0x0A => Some(Self::SizedData),
            0x0B => Some(Self::CancelSized),
            0x0C => Some(Self::SizedCancelled),
            0x0E => Some(Self::Grouped),
            0x11 => Some(Self::ConnInitAlt),
            0x13 => Some(Self::Special),
            _ => None,
        }
    }

    /// Maps this subtype back to its wire byte.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::KeyInitiation => 0x01,
            Self::KeyResponse => 0x02,
            Self::Reliable => 0x03,
            Self::Ack => 0x04,
            Self::SyncRequest => 0x05,
            Self::SyncResponse => 0x06,
            Self::Drop => 0x07,
            Self::BigData => 0x08,
            Self::BigDataEnd => 0x09,
            Self::SizedData => 0x0A,
            Self::CancelSized => 0x0B,
            Self::SizedCancelled => 0x0C,
            Self::Grouped => 0x0E,
            Self::ConnInitAlt => 0x11,
            Self::Special => 0x13,
        }
    }

    /// Whether this subtype counts as a connection-init packet for the
    /// purposes of §4.2 steps 2–3.
    #[must_use]
    pub const fn is_init(self) -> bool {
        matches!(self, Self::KeyInitiation | Self::ConnInitAlt)
    }
}
