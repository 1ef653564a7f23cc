//! Connection statistics snapshot (§3, §6 "Stats ... query").

use std::time::Duration;

/// A read-only snapshot of one connection's counters and RTT estimate,
/// returned by the stats/last-packet query interface named in §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnStats {
    /// Packets sent on this connection.
    pub pkt_sent: u64,
    /// Packets received on this connection.
    pub pkt_recvd: u64,
    /// Bytes sent on this connection.
    pub bytes_sent: u64,
    /// Bytes received on this connection.
    pub bytes_recvd: u64,
    /// Packets dropped (bandwidth denial on a droppable buffer, oversized,
    /// malformed, etc).
    pub pkt_dropped: u64,
    /// Duplicate reliable payloads received.
    pub rel_dups: u64,
    /// Reliable retransmissions sent.
    pub retries: u64,
    /// Current smoothed RTT estimate.
    pub avg_rtt: Duration,
    /// Current RTT deviation estimate.
    pub rtt_dev: Duration,
}

/// Plain counters accumulated as a connection runs; [`ConnStats`] is a
/// point-in-time copy of this plus the current RTT estimate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Packets sent on this connection.
    pub pkt_sent: u64,
    /// Packets received on this connection.
    pub pkt_recvd: u64,
    /// Bytes sent on this connection.
    pub bytes_sent: u64,
    /// Bytes received on this connection.
    pub bytes_recvd: u64,
    /// Packets dropped.
    pub pkt_dropped: u64,
    /// Duplicate reliable payloads received.
    pub rel_dups: u64,
    /// Reliable retransmissions sent.
    pub retries: u64,
}
