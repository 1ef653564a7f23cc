//! Per-connection state (§3 "Connection (ConnData)", §5 "Shared-resource
//! policy").
//!
//! Fine-grained locks guard disjoint pieces of a connection's state so the
//! send worker, receive worker, and reliable workers can all touch one
//! connection concurrently without serialising on a single coarse lock (§5,
//! §9 "Per-connection mutable state + shared counters").

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use parking_lot::Mutex;
use ss_core::{
    big::BigRecv, limit::BandwidthLimiter, rtt::RttEstimator, seq::Seq, sized::SizedRecv,
    window::ReliableRecvWindow, Grouper,
};
use ss_io::{EncryptionHook, RemoteAddr, Socket};

use crate::{
    outbound::OutboundBuffer,
    sized_send::SizedSendDescriptor,
    stats::{ConnStats, Counters},
    state::ConnState,
};

/// A reliable payload that hasn't yet been assigned a sequence number or
/// moved into the outlist; see §4.4 "Promotion".
pub struct UnsentReliable {
    /// Payload bytes, not yet header-prefixed.
    pub bytes: Vec<u8>,
    /// Callback chain to attach once this is promoted into an outbound
    /// buffer (possibly grouped with others).
    pub callbacks: ss_core::CallbackChain,
}

/// Outbound-side state, guarded by the connection's `outgoing` lock.
pub struct Outgoing {
    /// Next reliable sequence number to assign on promotion.
    pub s2cn: Seq,
    /// Per-priority send queues, indexed by [`ss_core::Priority`] as
    /// `priority as usize`.
    pub outlist: [VecDeque<OutboundBuffer>; 5],
    /// Reliable payloads awaiting sequence assignment and grouping.
    pub unsent_rel_out: VecDeque<UnsentReliable>,
    /// This connection's bandwidth-priority policy.
    pub limiter: Box<dyn BandwidthLimiter>,
    /// Accumulates outbound items destined for a `0x00 0x0E` container.
    pub grouper: Grouper,
}

/// Reliable-receive-side state, guarded by the connection's `reliable` lock.
pub struct Reliable {
    /// `relbuf[seq mod W]`.
    pub window: ReliableRecvWindow,
}

/// Big-/sized-data receive state, guarded by the connection's `big` lock.
#[derive(Default)]
pub struct BigAndSized {
    /// In-flight 0x08/0x09 stream, if any.
    pub big_recv: Option<BigRecv>,
    /// In-flight 0x0A stream, if any.
    pub sized_recv: Option<SizedRecv>,
}

/// Outbound sized-transfer state, guarded by the connection's `sized-send`
/// lock.
#[derive(Default)]
pub struct SizedSendState {
    /// Queue of outbound sized transfers; the front one is the one actively
    /// being chunked (§4.5).
    pub sends: VecDeque<SizedSendDescriptor>,
    /// Count of sized chunks queued but not yet acknowledged, bounding
    /// outstanding bytes per §4.5 and the "Sized-data back-pressure"
    /// testable property.
    pub queued_count: usize,
}

/// One known remote endpoint's full connection state.
pub struct ConnData {
    /// Key in the endpoint table; stable for this connection's lifetime.
    pub remote_address: RemoteAddr,
    /// Socket used to reach this peer.
    pub socket: Arc<Socket>,
    /// Lifecycle state.
    pub state: Mutex<ConnState>,
    /// Timestamp of the last successfully received datagram.
    pub last_pkt_at: Mutex<Instant>,
    /// Plain counters (§3).
    pub counters: Mutex<Counters>,
    /// Smoothed RTT estimator, initialised to the 200ms/100ms default.
    pub rtt: Mutex<RttEstimator>,
    /// Set once this connection exceeds `MaxRetries` on some buffer.
    pub hit_max_retries: AtomicBool,
    /// Set once this connection's outlist exceeds `MaxOutlistSize`.
    pub hit_max_outlist: AtomicBool,
    /// Per-direction byte transform, if encryption was negotiated.
    pub encryption_hook: Option<Arc<dyn EncryptionHook>>,
    /// Outbound queues and promotion state.
    pub outgoing: Mutex<Outgoing>,
    /// Reliable receive window.
    pub reliable: Mutex<Reliable>,
    /// Big-/sized-data receive assemblers.
    pub big: Mutex<BigAndSized>,
    /// Outbound sized-transfer descriptors.
    pub sized_send: Mutex<SizedSendState>,
    /// Serialises reliable dispatch for this connection so at most one
    /// worker ever processes its in-order payloads at a time (§3 invariant,
    /// §4.6).
    pub reliable_processing: Mutex<()>,
}

impl ConnData {
    /// Creates a new connection in the `Connecting` state.
    pub fn new(
        remote_address: RemoteAddr,
        socket: Arc<Socket>,
        reliable_window: usize,
        limiter: Box<dyn BandwidthLimiter>,
        grouper_cap: usize,
        encryption_hook: Option<Arc<dyn EncryptionHook>>,
    ) -> Self {
        Self {
            remote_address,
            socket,
            state: Mutex::new(ConnState::Connecting),
            last_pkt_at: Mutex::new(Instant::now()),
            counters: Mutex::new(Counters::default()),
            rtt: Mutex::new(RttEstimator::new()),
            hit_max_retries: AtomicBool::new(false),
            hit_max_outlist: AtomicBool::new(false),
            encryption_hook,
            outgoing: Mutex::new(Outgoing {
                s2cn: Seq::new(0),
                outlist: std::array::from_fn(|_| VecDeque::new()),
                unsent_rel_out: VecDeque::new(),
                limiter,
                grouper: Grouper::new(grouper_cap),
            }),
            reliable: Mutex::new(Reliable {
                window: ReliableRecvWindow::new(reliable_window),
            }),
            big: Mutex::new(BigAndSized::default()),
            sized_send: Mutex::new(SizedSendState::default()),
            reliable_processing: Mutex::new(()),
        }
    }

    /// Whether either terminal fault flag is set (§4.4 "Kick conditions").
    #[must_use]
    pub fn hit_terminal_fault(&self) -> bool {
        self.hit_max_retries.load(Ordering::Relaxed) || self.hit_max_outlist.load(Ordering::Relaxed)
    }

    /// Sends `payload` to this connection's peer, bypassing the bandwidth
    /// limiter entirely (§4.4 "Raw send").
    ///
    /// Applies the encryption hook in place on a scratch buffer with 4
    /// bytes of trailing slack, then hands the result to the socket. Errors
    /// are logged and swallowed, matching §4.4's "datagram semantics"
    /// policy.
    pub fn raw_send(&self, payload: &[u8]) {
        let mut scratch = Vec::with_capacity(payload.len() + 4);
        scratch.extend_from_slice(payload);
        scratch.resize(payload.len() + 4, 0);

        let len = self
            .encryption_hook
            .as_ref()
            .map_or(payload.len(), |hook| hook.encrypt(&mut scratch, payload.len()));
        scratch.truncate(len);

        if let Err(e) = self.socket.send_to(&scratch, self.remote_address.to_socket_addr()) {
            log::warn!(target: "ss_net::conn", "send to {} failed: {e}", self.remote_address);
            return;
        }
        let mut counters = self.counters.lock();
        counters.pkt_sent += 1;
        counters.bytes_sent += len as u64;
    }

    /// Takes a consistent snapshot of this connection's counters and RTT
    /// estimate.
    #[must_use]
    pub fn stats(&self) -> ConnStats {
        let counters = *self.counters.lock();
        let rtt = *self.rtt.lock();
        ConnStats {
            pkt_sent: counters.pkt_sent,
            pkt_recvd: counters.pkt_recvd,
            bytes_sent: counters.bytes_sent,
            bytes_recvd: counters.bytes_recvd,
            pkt_dropped: counters.pkt_dropped,
            rel_dups: counters.rel_dups,
            retries: counters.retries,
            avg_rtt: rtt.avg_rtt(),
            rtt_dev: rtt.rtt_dev(),
        }
    }
}
