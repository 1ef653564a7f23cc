//! Outbound buffers and the flags that steer them (§3 "Outbound buffer",
//! §6 "Flags").

use std::time::Instant;

use ss_core::{CallbackChain, Priority};

/// Flags a caller attaches to an outbound send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendFlags {
    /// Send over the reliable machinery (ACK'd, retransmitted, in-order).
    pub reliable: bool,
    /// Allow the fast unreliable path even when other traffic is queued.
    pub urgent: bool,
    /// May be silently discarded under bandwidth pressure. Only meaningful
    /// alongside `urgent` or an unreliable priority — a `Droppable` buffer
    /// that's also `reliable` is never actually dropped (§4.4).
    pub droppable: bool,
    /// Which of the five priority levels this buffer sends at.
    pub priority: Priority,
}

impl SendFlags {
    /// Plain unreliable send at [`Priority::Unreliable`].
    #[must_use]
    pub const fn unreliable() -> Self {
        Self {
            reliable: false,
            urgent: false,
            droppable: false,
            priority: Priority::Unreliable,
        }
    }

    /// Reliable send at [`Priority::Reliable`].
    #[must_use]
    pub const fn reliable() -> Self {
        Self {
            reliable: true,
            urgent: false,
            droppable: false,
            priority: Priority::Reliable,
        }
    }

    /// Internally generated acknowledgement at [`Priority::Ack`]. Never
    /// retried: a lost ACK is recovered by the peer's own retransmit, not by
    /// this buffer surviving past its first send.
    #[must_use]
    pub const fn ack() -> Self {
        Self {
            reliable: false,
            urgent: false,
            droppable: false,
            priority: Priority::Ack,
        }
    }
}

/// One outbound datagram payload, sitting in a connection's `outlist` at
/// [`SendFlags::priority`] until it's sent (and, if reliable, until it's
/// ACKed).
#[derive(Debug)]
pub struct OutboundBuffer {
    /// Wire bytes, header included, ready to hand to the socket.
    pub bytes: Vec<u8>,
    /// Flags this buffer was enqueued with.
    pub flags: SendFlags,
    /// Number of times this buffer has been sent, including the first send.
    pub tries: u32,
    /// When this buffer was last (re)sent.
    pub last_retry: Option<Instant>,
    /// Callbacks to fire on ACK or on abandonment; empty for non-reliable
    /// buffers and for `send_to_one`-style fire-and-forget reliable sends.
    pub callbacks: CallbackChain,
}

impl OutboundBuffer {
    /// Creates a fresh, never-yet-sent buffer.
    #[must_use]
    pub fn new(bytes: Vec<u8>, flags: SendFlags) -> Self {
        Self {
            bytes,
            flags,
            tries: 0,
            last_retry: None,
            callbacks: CallbackChain::new(),
        }
    }
}
