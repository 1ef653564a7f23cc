//! The send worker (§4.4 "Send Scheduling").

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::Sender;
use ss_core::{
    constants::{MAX_GROUPED_ITEM_LEN, MAX_GROUPED_PACKET_LEN, RELIABLE_HEADER_LEN},
    header::core_prefix,
    CallbackChain, CoreSubtype, Grouper, Priority, ReliableHeader,
};
use ss_io::RemoteAddr;

use crate::{
    conn::{ConnData, Outgoing},
    config::Config,
    outbound::{OutboundBuffer, SendFlags},
    state::ConnState,
    table::EndpointTable,
};

/// Application packet kind used for the unreliable kick notice (matches the
/// chat-message packet type the application layer already dispatches on).
const KICK_NOTICE_KIND: u8 = 0x07;

/// How long the send worker sleeps between iterations.
const TICK_INTERVAL: Duration = Duration::from_millis(10);

enum BufferOutcome {
    Kept,
    Removed,
}

/// Drives the single send worker loop described in §4.4: promotion,
/// priority-ordered retransmission, lagout detection, and `TimeWait`
/// teardown.
pub struct SendWorker {
    player_table: Arc<EndpointTable>,
    outbound_table: Arc<EndpointTable>,
    config: Arc<Config>,
    sized_send_signal: Sender<Arc<ConnData>>,
    on_disconnect: Option<Arc<dyn Fn(RemoteAddr) + Send + Sync>>,
    cancel: Arc<AtomicBool>,
}

impl SendWorker {
    /// Creates a new send worker over the given tables.
    #[must_use]
    pub fn new(
        player_table: Arc<EndpointTable>,
        outbound_table: Arc<EndpointTable>,
        config: Arc<Config>,
        sized_send_signal: Sender<Arc<ConnData>>,
        on_disconnect: Option<Arc<dyn Fn(RemoteAddr) + Send + Sync>>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            player_table,
            outbound_table,
            config,
            sized_send_signal,
            on_disconnect,
            cancel,
        }
    }

    /// Runs the worker loop until the cancellation flag is set.
    pub fn run(&self) {
        log::info!(target: "ss_net::send", "send worker starting");
        while !self.cancel.load(Ordering::Relaxed) {
            let now = Instant::now();
            for conn in self
                .player_table
                .snapshot()
                .into_iter()
                .chain(self.outbound_table.snapshot())
            {
                self.service_connection(&conn, now);
            }
            thread::sleep(TICK_INTERVAL);
        }
        log::info!(target: "ss_net::send", "send worker stopping");
    }

    fn service_connection(&self, conn: &Arc<ConnData>, now: Instant) {
        let state = *conn.state.lock();
        match state {
            ConnState::LeavingZone => self.begin_time_wait(conn, now),
            ConnState::TimeWait { .. } => self.drain_time_wait(conn),
            ConnState::Connecting | ConnState::Connected => {
                self.promote_unsent_reliable(conn);
                self.service_outlist(conn, now);
                self.check_for_kick(conn, now);
            }
        }
    }

    /// Moves as much of `unsent_rel_out` as the reliable window allows into
    /// the `Reliable` outlist, grouping where it fits. Exposed at
    /// `pub(crate)` so the sized-send worker can drain eagerly on a
    /// connection whose [`Config::sized_send_outgoing`] is set, instead of
    /// waiting for this worker's own next tick.
    pub(crate) fn promote_unsent_reliable(&self, conn: &Arc<ConnData>) {
        let mut outgoing = conn.outgoing.lock();
        loop {
            if outgoing.unsent_rel_out.is_empty() {
                break;
            }

            let head_seq = outgoing.outlist[Priority::Reliable as usize]
                .front()
                .and_then(|buf| ReliableHeader::decode(&buf.bytes[2..]).map(|h| h.seq))
                .unwrap_or(outgoing.s2cn);
            let can_buffer = outgoing.limiter.get_can_buffer_packets();
            #[expect(clippy::cast_sign_loss, reason = "in_flight is non-negative: s2cn only ever grows past outlist.head")]
            let in_flight = outgoing.s2cn.dist_to(head_seq).max(0) as usize;
            if in_flight >= can_buffer {
                break;
            }

            let grouping_cap = if self.config.limit_reliable_grouping_size {
                MAX_GROUPED_ITEM_LEN
            } else {
                MAX_GROUPED_PACKET_LEN - RELIABLE_HEADER_LEN
            };

            let front_len = outgoing
                .unsent_rel_out
                .front()
                .expect("checked not empty above")
                .bytes
                .len();

            let (packet, chain) = if front_len > MAX_GROUPED_ITEM_LEN {
                let item = outgoing.unsent_rel_out.pop_front().expect("just peeked");
                (item.bytes, item.callbacks)
            } else {
                let mut grouper = Grouper::new(grouping_cap);
                let mut chain = CallbackChain::new();
                while let Some(front) = outgoing.unsent_rel_out.front() {
                    if front.bytes.len() > MAX_GROUPED_ITEM_LEN || !grouper.try_append(&front.bytes) {
                        break;
                    }
                    let item = outgoing.unsent_rel_out.pop_front().expect("just peeked");
                    chain.append(item.callbacks);
                }
                let packet = grouper.flush().expect("the first item always fits an empty grouper");
                (packet, chain)
            };

            let seq = outgoing.s2cn;
            outgoing.s2cn = seq.next();
            let mut bytes = core_prefix(CoreSubtype::Reliable).to_vec();
            seq.encode(&mut bytes);
            bytes.extend_from_slice(&packet);
            let mut buf = OutboundBuffer::new(bytes, SendFlags::reliable());
            buf.callbacks = chain;
            outgoing.outlist[Priority::Reliable as usize].push_back(buf);
        }
    }

    /// Walks every priority's outlist highest-to-lowest, sending what the
    /// bandwidth limiter admits. See [`Self::promote_unsent_reliable`] for
    /// why this is `pub(crate)`.
    pub(crate) fn service_outlist(&self, conn: &Arc<ConnData>, now: Instant) {
        let mut outgoing = conn.outgoing.lock();
        'priorities: for &priority in &Priority::ALL_HIGH_TO_LOW {
            let idx = priority as usize;
            let mut i = 0;
            while i < outgoing.outlist[idx].len() {
                match self.service_buffer(conn, &mut outgoing, priority, i, now) {
                    BufferOutcome::Removed => {}
                    BufferOutcome::Kept => i += 1,
                }
                if conn.hit_max_retries.load(Ordering::Relaxed) {
                    break 'priorities;
                }
            }
        }
        if let Some(packet) = outgoing.grouper.flush() {
            conn.raw_send(&packet);
        }
        if outgoing.outlist.iter().map(std::collections::VecDeque::len).sum::<usize>() > self.config.max_outlist_size {
            conn.hit_max_outlist.store(true, Ordering::Relaxed);
        }
    }

    fn service_buffer(
        &self,
        conn: &Arc<ConnData>,
        outgoing: &mut Outgoing,
        priority: Priority,
        index: usize,
        now: Instant,
    ) -> BufferOutcome {
        let idx = priority as usize;
        {
            let buf = &outgoing.outlist[idx][index];
            if buf.tries > 0 {
                let timeout = conn.rtt.lock().timeout();
                let since = buf.last_retry.map_or(Duration::MAX, |t| now.saturating_duration_since(t));
                if since <= timeout * buf.tries {
                    return BufferOutcome::Kept;
                }
            }
            if buf.tries > self.config.max_retries {
                conn.hit_max_retries.store(true, Ordering::Relaxed);
                return BufferOutcome::Kept;
            }
        }

        let estimate = self.byte_estimate(outgoing.outlist[idx][index].bytes.len());
        if outgoing.limiter.check(estimate, priority).is_err() {
            if outgoing.outlist[idx][index].flags.droppable {
                conn.counters.lock().pkt_dropped += 1;
                outgoing.outlist[idx].remove(index);
                return BufferOutcome::Removed;
            }
            return BufferOutcome::Kept;
        }

        if outgoing.outlist[idx][index].tries >= 1 {
            conn.counters.lock().retries += 1;
            outgoing.limiter.adjust_for_retry();
        }
        {
            let buf = &mut outgoing.outlist[idx][index];
            buf.last_retry = Some(now);
            buf.tries += 1;
        }

        let bytes = outgoing.outlist[idx][index].bytes.clone();
        Self::enqueue_for_send(outgoing, conn, &bytes);

        if outgoing.outlist[idx][index].flags.reliable {
            BufferOutcome::Kept
        } else {
            outgoing.outlist[idx].remove(index);
            BufferOutcome::Removed
        }
    }

    fn enqueue_for_send(outgoing: &mut Outgoing, conn: &Arc<ConnData>, bytes: &[u8]) {
        if outgoing.grouper.try_append(bytes) {
            return;
        }
        if let Some(packet) = outgoing.grouper.flush() {
            conn.raw_send(&packet);
        }
        if !outgoing.grouper.try_append(bytes) {
            conn.raw_send(bytes);
        }
    }

    fn byte_estimate(&self, bytes_len: usize) -> usize {
        bytes_len + self.config.per_packet_overhead
    }

    fn check_for_kick(&self, conn: &Arc<ConnData>, now: Instant) {
        let idle = now.saturating_duration_since(*conn.last_pkt_at.lock());
        let reason = if idle > self.config.drop_timeout {
            Some("no data")
        } else if conn.hit_max_retries.load(Ordering::Relaxed) {
            Some("too many reliable retries")
        } else if conn.hit_max_outlist.load(Ordering::Relaxed) {
            Some("too many outgoing packets")
        } else {
            None
        };
        let Some(reason) = reason else { return };
        self.kick(conn, reason);
    }

    fn kick(&self, conn: &Arc<ConnData>, reason: &str) {
        let mut notice = vec![KICK_NOTICE_KIND];
        notice.extend_from_slice(reason.as_bytes());
        conn.raw_send(&notice);
        *conn.state.lock() = ConnState::LeavingZone;
        log::info!(target: "ss_net::send", "kicking {}: {reason}", conn.remote_address);
        if let Some(on_disconnect) = &self.on_disconnect {
            on_disconnect(conn.remote_address);
        }
    }

    fn begin_time_wait(&self, conn: &Arc<ConnData>, now: Instant) {
        for descriptor in &mut conn.sized_send.lock().sends {
            descriptor.cancelled_by_user = true;
        }
        let _ = self.sized_send_signal.try_send(Arc::clone(conn));
        *conn.state.lock() = ConnState::TimeWait { entered_at: now };
    }

    fn drain_time_wait(&self, conn: &Arc<ConnData>) {
        if !conn.sized_send.lock().sends.is_empty() {
            let _ = self.sized_send_signal.try_send(Arc::clone(conn));
            return;
        }

        conn.raw_send(&core_prefix(CoreSubtype::Drop));
        {
            let mut outgoing = conn.outgoing.lock();
            for queue in &mut outgoing.outlist {
                queue.clear();
            }
            outgoing.unsent_rel_out.clear();
        }
        self.player_table.remove(conn.remote_address);
        self.outbound_table.remove(conn.remote_address);
        log::info!(target: "ss_net::send", "freed connection {}", conn.remote_address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ss_core::TokenBucketLimiter;
    use ss_io::{RemoteAddr, Socket};
    use std::net::SocketAddr;

    fn fixture() -> (SendWorker, Arc<EndpointTable>, Arc<EndpointTable>) {
        let player_table = Arc::new(EndpointTable::new());
        let outbound_table = Arc::new(EndpointTable::new());
        let (sized_tx, _sized_rx) = crossbeam_channel::unbounded();
        let worker = SendWorker::new(
            Arc::clone(&player_table),
            Arc::clone(&outbound_table),
            Arc::new(Config::default()),
            sized_tx,
            None,
            Arc::new(AtomicBool::new(false)),
        );
        (worker, player_table, outbound_table)
    }

    fn make_conn(port: u16) -> Arc<ConnData> {
        let socket = Arc::new(Socket::bind("127.0.0.1:0").unwrap());
        let remote: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        Arc::new(ConnData::new(
            RemoteAddr::from(remote),
            socket,
            64,
            Box::new(TokenBucketLimiter::new(10_000, 520)),
            510,
            None,
        ))
    }

    #[test]
    fn promotion_coalesces_two_small_payloads_into_one_grouped_reliable_buffer() {
        let (worker, ..) = fixture();
        let conn = make_conn(1);
        {
            let mut outgoing = conn.outgoing.lock();
            outgoing.unsent_rel_out.push_back(crate::conn::UnsentReliable {
                bytes: vec![0x20, 1, 2],
                callbacks: CallbackChain::new(),
            });
            outgoing.unsent_rel_out.push_back(crate::conn::UnsentReliable {
                bytes: vec![0x20, 3, 4],
                callbacks: CallbackChain::new(),
            });
        }

        worker.promote_unsent_reliable(&conn);

        let outgoing = conn.outgoing.lock();
        assert_eq!(1, outgoing.outlist[Priority::Reliable as usize].len());
        let buf = &outgoing.outlist[Priority::Reliable as usize][0];
        assert_eq!(&[0x00, 0x0E][..], &buf.bytes[6..8]);
        assert_eq!(ss_core::Seq::new(1), outgoing.s2cn);
    }

    #[test]
    fn promotion_still_admits_first_item_with_a_tiny_limiter() {
        let (worker, ..) = fixture();
        let conn = make_conn(2);
        {
            let mut outgoing = conn.outgoing.lock();
            outgoing.limiter = Box::new(TokenBucketLimiter::new(1, 1));
            outgoing.unsent_rel_out.push_back(crate::conn::UnsentReliable {
                bytes: vec![0x20, 1],
                callbacks: CallbackChain::new(),
            });
        }
        worker.promote_unsent_reliable(&conn);
        // can_buffer_packets is clamped to at least 1 by TokenBucketLimiter,
        // so with an empty outlist (in_flight == 0) the single item still
        // promotes.
        assert_eq!(1, conn.outgoing.lock().outlist[Priority::Reliable as usize].len());
    }

    #[test]
    fn retransmit_is_skipped_before_timeout_elapses() {
        let (worker, ..) = fixture();
        let conn = make_conn(3);
        let mut buf = OutboundBuffer::new(vec![1, 2, 3], SendFlags::unreliable());
        buf.tries = 1;
        buf.last_retry = Some(Instant::now());
        conn.outgoing.lock().outlist[Priority::Unreliable as usize].push_back(buf);

        worker.service_outlist(&conn, Instant::now());

        assert_eq!(1, conn.outgoing.lock().outlist[Priority::Unreliable as usize].len());
        assert_eq!(1, conn.outgoing.lock().outlist[Priority::Unreliable as usize][0].tries);
    }

    #[test]
    fn retransmit_bound_exceeded_kicks_connection_within_one_cycle() {
        let (worker, player_table, _outbound_table) = fixture();
        let listener = Socket::bind("127.0.0.1:0").unwrap();
        let listener_addr = listener.local_addr().unwrap();
        let sender_socket = Arc::new(Socket::bind("127.0.0.1:0").unwrap());
        let conn = Arc::new(ConnData::new(
            RemoteAddr::from(listener_addr),
            sender_socket,
            64,
            Box::new(TokenBucketLimiter::new(10_000, 520)),
            510,
            None,
        ));
        player_table.insert(Arc::clone(&conn));

        let mut buf = OutboundBuffer::new(vec![1, 2, 3], SendFlags::reliable());
        buf.tries = worker.config.max_retries + 1;
        buf.last_retry = Some(Instant::now() - Duration::from_secs(3600));
        conn.outgoing.lock().outlist[Priority::Reliable as usize].push_back(buf);

        worker.service_outlist(&conn, Instant::now());
        assert!(conn.hit_max_retries.load(Ordering::Relaxed));

        worker.check_for_kick(&conn, Instant::now());
        assert_eq!(ConnState::LeavingZone, *conn.state.lock());
    }

    #[test]
    fn first_send_goes_out_and_unreliable_buffer_is_freed() {
        let (worker, ..) = fixture();
        let listener = Socket::bind("127.0.0.1:0").unwrap();
        let listener_addr = listener.local_addr().unwrap();
        let sender_socket = Arc::new(Socket::bind("127.0.0.1:0").unwrap());
        let conn = Arc::new(ConnData::new(
            RemoteAddr::from(listener_addr),
            sender_socket,
            64,
            Box::new(TokenBucketLimiter::new(10_000, 520)),
            510,
            None,
        ));
        conn.outgoing
            .lock()
            .outlist[Priority::Unreliable as usize]
            .push_back(OutboundBuffer::new(vec![9, 9, 9], SendFlags::unreliable()));

        worker.service_outlist(&conn, Instant::now());

        assert!(conn.outgoing.lock().outlist[Priority::Unreliable as usize].is_empty());
        let mut buf = [0u8; 16];
        let mut got = None;
        for _ in 0..1000 {
            if let Some((n, _)) = listener.recv_from(&mut buf).unwrap() {
                got = Some(n);
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(Some(3), got);
    }

    #[test]
    fn kick_sends_notice_and_moves_to_leaving_zone() {
        let (worker, player_table, _outbound_table) = fixture();
        let listener = Socket::bind("127.0.0.1:0").unwrap();
        let listener_addr = listener.local_addr().unwrap();
        let sender_socket = Arc::new(Socket::bind("127.0.0.1:0").unwrap());
        let conn = Arc::new(ConnData::new(
            RemoteAddr::from(listener_addr),
            sender_socket,
            64,
            Box::new(TokenBucketLimiter::new(10_000, 520)),
            510,
            None,
        ));
        *conn.last_pkt_at.lock() = Instant::now() - Duration::from_secs(3600);
        player_table.insert(Arc::clone(&conn));

        worker.check_for_kick(&conn, Instant::now());

        assert_eq!(ConnState::LeavingZone, *conn.state.lock());
    }

    #[test]
    fn time_wait_frees_connection_once_sized_sends_drain() {
        let (worker, player_table, _outbound_table) = fixture();
        let conn = make_conn(4);
        player_table.insert(Arc::clone(&conn));
        *conn.state.lock() = ConnState::TimeWait { entered_at: Instant::now() };

        worker.drain_time_wait(&conn);

        assert!(player_table.get(conn.remote_address).is_none());
    }
}
