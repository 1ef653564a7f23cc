//! Connection lifecycle states the core branches on (§3 "Lifecycles").
//!
//! The source alludes to application-level states layered on top of the
//! core's own progression without enumerating them; this collapses that to
//! exactly the states the core itself inspects. Anything an application
//! layer defines above `Connected` is opaque to the core (see
//! `DESIGN.md`'s resolution of this Open Question).

use std::time::Instant;

/// Where a connection sits in the core's own lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Handshake in progress; not yet accepted by an init handler.
    Connecting,
    /// Handshake complete; normal traffic flows.
    Connected,
    /// Logout requested (kick, explicit disconnect, or application-level
    /// request); still draining sized sends before the drop is sent.
    LeavingZone,
    /// Drop sent (or about to be); grace window before the slot is freed.
    TimeWait {
        /// When this connection entered `TimeWait`, used to measure the
        /// grace window before the slot is freed.
        entered_at: Instant,
    },
}

impl ConnState {
    /// Whether the receive path should drop datagrams silently for a
    /// connection in this state (§4.2 step 4).
    #[must_use]
    pub const fn is_past_terminal_threshold(self) -> bool {
        matches!(self, Self::LeavingZone | Self::TimeWait { .. })
    }

    /// Whether this state logs a malformed-state warning on an unexpected
    /// init packet, rather than dropping silently (§4.2 step 4).
    #[must_use]
    pub const fn warns_on_malformed_state(self) -> bool {
        matches!(self, Self::TimeWait { .. })
    }
}
