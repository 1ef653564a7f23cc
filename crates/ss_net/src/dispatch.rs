//! The core packet dispatcher: the 20-subtype table of §4.3.
//!
//! Operates on a connection that already exists in the endpoint table;
//! connection-init subtypes (`KeyInitiation`, `ConnInitAlt`) and the
//! outbound-client handshake's `KeyResponse` are intercepted earlier, in the
//! receive worker and [`crate::outbound_client`] respectively, since they
//! either create a connection or complete a handshake rather than act on an
//! established one.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Sender;
use ss_core::{
    constants::CORE_TYPE, group::decode_items, header::core_prefix, window::Accept, CoreSubtype,
    Priority, ReliableHeader, Seq, SizedHeader,
};
use ss_io::RemoteAddr;

use crate::{
    conn::ConnData,
    handlers::Handlers,
    outbound::{OutboundBuffer, SendFlags},
};

/// Maximum nesting depth tolerated when unpacking a grouped container, so a
/// grouped item that's itself a `Grouped` frame is rejected rather than
/// recursed into forever (§4.3 "forbid pathological nesting").
const MAX_GROUP_DEPTH: u8 = 1;

/// Drives dispatch of core packets for already-established connections.
pub struct Dispatcher {
    handlers: Arc<Handlers>,
    max_big_packet: usize,
    server_epoch: Instant,
    reliable_signal: Sender<Arc<ConnData>>,
    sized_send_signal: Sender<Arc<ConnData>>,
    on_disconnect: Option<Arc<dyn Fn(RemoteAddr) + Send + Sync>>,
}

impl Dispatcher {
    /// Creates a dispatcher wired to the given handler registries and
    /// worker-wakeup channels.
    #[must_use]
    pub fn new(
        handlers: Arc<Handlers>,
        max_big_packet: usize,
        server_epoch: Instant,
        reliable_signal: Sender<Arc<ConnData>>,
        sized_send_signal: Sender<Arc<ConnData>>,
        on_disconnect: Option<Arc<dyn Fn(RemoteAddr) + Send + Sync>>,
    ) -> Self {
        Self {
            handlers,
            max_big_packet,
            server_epoch,
            reliable_signal,
            sized_send_signal,
            on_disconnect,
        }
    }

    /// Dispatches one core packet, `body` being everything after the 2-byte
    /// `0x00 <subtype>` prefix.
    pub fn dispatch(&self, conn: &Arc<ConnData>, subtype: CoreSubtype, body: &[u8]) {
        self.dispatch_at_depth(conn, subtype, body, 0);
    }

    fn dispatch_at_depth(&self, conn: &Arc<ConnData>, subtype: CoreSubtype, body: &[u8], depth: u8) {
        match subtype {
            CoreSubtype::Reliable => self.handle_reliable(conn, body),
            CoreSubtype::Ack => self.handle_ack(conn, body),
            CoreSubtype::SyncRequest => self.handle_sync_request(conn, body),
            CoreSubtype::SyncResponse => {
                log::trace!(target: "ss_net::dispatch", "ignoring unsolicited sync response from {}", conn.remote_address);
            }
            CoreSubtype::Drop => self.handle_drop(conn),
            CoreSubtype::BigData => self.handle_big(conn, body, false),
            CoreSubtype::BigDataEnd => self.handle_big(conn, body, true),
            CoreSubtype::SizedData => self.handle_sized_data(conn, body),
            CoreSubtype::CancelSized => self.handle_cancel_sized(conn),
            CoreSubtype::SizedCancelled => self.handle_sized_cancelled(conn),
            CoreSubtype::Grouped => self.handle_grouped(conn, body, depth),
            CoreSubtype::Special => self.handle_special(conn, body),
            CoreSubtype::KeyInitiation | CoreSubtype::ConnInitAlt | CoreSubtype::KeyResponse => {
                log::warn!(
                    target: "ss_net::dispatch",
                    "init/handshake subtype {subtype:?} reached the core dispatcher for an established connection from {}",
                    conn.remote_address
                );
            }
        }
    }

    /// Queues a 0x04 ACK at [`Priority::Ack`] rather than sending it
    /// straight to the socket, so it goes through the same bandwidth-limiter
    /// check and per-connection grouper as every other priority (§4.4) — the
    /// send worker drains `Ack` first on every tick, ahead of `Reliable`.
    fn send_ack(&self, conn: &Arc<ConnData>, seq: Seq) {
        let mut out = core_prefix(CoreSubtype::Ack).to_vec();
        seq.encode(&mut out);
        conn.outgoing
            .lock()
            .outlist[Priority::Ack as usize]
            .push_back(OutboundBuffer::new(out, SendFlags::ack()));
    }

    fn handle_reliable(&self, conn: &Arc<ConnData>, body: &[u8]) {
        let Some(header) = ReliableHeader::decode(body) else {
            log::debug!(target: "ss_net::dispatch", "malformed reliable header from {}", conn.remote_address);
            return;
        };
        let payload = &body[4..];

        let accept = {
            let mut reliable = conn.reliable.lock();
            reliable.window.offer(header.seq, payload.to_vec())
        };

        match accept {
            Accept::TooFarAhead => {
                log::debug!(target: "ss_net::dispatch", "reliable seq {} from {} too far ahead of window, dropping", header.seq, conn.remote_address);
            }
            Accept::Duplicate => {
                conn.counters.lock().rel_dups += 1;
                self.send_ack(conn, header.seq);
            }
            Accept::Stored { is_head } => {
                self.send_ack(conn, header.seq);
                if is_head {
                    let _ = self.reliable_signal.try_send(Arc::clone(conn));
                }
            }
        }
    }

    fn handle_ack(&self, conn: &Arc<ConnData>, body: &[u8]) {
        let Some(header) = ReliableHeader::decode(body) else {
            log::debug!(target: "ss_net::dispatch", "malformed ack header from {}", conn.remote_address);
            return;
        };

        let found = {
            let mut outgoing = conn.outgoing.lock();
            let queue = &mut outgoing.outlist[ss_core::Priority::Reliable as usize];
            let pos = queue.iter().position(|buf| {
                ReliableHeader::decode(&buf.bytes[2..]).is_some_and(|h| h.seq == header.seq)
            });
            pos.map(|i| queue.remove(i).expect("position came from this queue"))
        };

        let Some(buf) = found else {
            log::trace!(target: "ss_net::dispatch", "ack for unknown/already-acked seq {} from {}", header.seq, conn.remote_address);
            return;
        };

        if buf.tries == 1 {
            if let Some(last_retry) = buf.last_retry {
                conn.rtt.lock().update(last_retry, Instant::now());
            }
        }
        conn.outgoing.lock().limiter.adjust_for_ack();
        buf.callbacks.fire(true);
    }

    fn handle_sync_request(&self, conn: &Arc<ConnData>, body: &[u8]) {
        if body.len() < 4 {
            log::debug!(target: "ss_net::dispatch", "malformed sync request from {}", conn.remote_address);
            return;
        }
        let client_tick = &body[0..4];
        #[expect(clippy::cast_possible_truncation, reason = "wraps every ~497 days, matching the wire's 32-bit tick field")]
        let server_tick = (self.server_epoch.elapsed().as_millis() / 10) as u32;

        let mut out = core_prefix(CoreSubtype::SyncResponse).to_vec();
        out.extend_from_slice(client_tick);
        out.extend_from_slice(&server_tick.to_le_bytes());
        conn.raw_send(&out);
        log::trace!(target: "ss_net::dispatch", "lag sample: sync request from {}", conn.remote_address);
    }

    fn handle_drop(&self, conn: &Arc<ConnData>) {
        *conn.state.lock() = crate::state::ConnState::LeavingZone;
        if let Some(on_disconnect) = &self.on_disconnect {
            on_disconnect(conn.remote_address);
        }
    }

    /// Delivers one payload drained in order from a connection's reliable
    /// receive window (§4.6). Same destination as a payload reassembled from
    /// big-data: either an application packet or a nested core frame.
    pub fn deliver_reliable_payload(&self, conn: &Arc<ConnData>, payload: &[u8]) {
        self.deliver_application_payload(conn, payload);
    }

    fn deliver_application_payload(&self, conn: &Arc<ConnData>, payload: &[u8]) {
        let Some((&kind, rest)) = payload.split_first() else {
            log::debug!(target: "ss_net::dispatch", "empty reassembled payload from {}", conn.remote_address);
            return;
        };
        if kind == CORE_TYPE {
            let Some((&sub_byte, body)) = rest.split_first() else {
                return;
            };
            if let Some(subtype) = CoreSubtype::from_byte(sub_byte) {
                self.dispatch_at_depth(conn, subtype, body, MAX_GROUP_DEPTH);
            }
        } else {
            self.handlers.dispatch_packet(kind, conn.remote_address, rest);
        }
    }

    fn handle_big(&self, conn: &Arc<ConnData>, body: &[u8], terminal: bool) {
        let mut big = conn.big.lock();
        let assembler = big.big_recv.get_or_insert_with(Default::default);
        let result = if terminal {
            assembler.finish(body, self.max_big_packet)
        } else {
            assembler.append(body, self.max_big_packet).map(|()| Vec::new())
        };

        match result {
            Ok(whole) if terminal => {
                big.big_recv = None;
                drop(big);
                self.deliver_application_payload(conn, &whole);
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!(target: "ss_net::dispatch", "big-data assembly from {} rejected: {e}", conn.remote_address);
                big.big_recv = None;
            }
        }
    }

    fn handle_sized_data(&self, conn: &Arc<ConnData>, body: &[u8]) {
        let Some(header) = SizedHeader::decode(body) else {
            log::debug!(target: "ss_net::dispatch", "malformed sized-data header from {}", conn.remote_address);
            return;
        };
        if body.len() < 5 {
            log::debug!(target: "ss_net::dispatch", "sized-data chunk from {} missing payload type", conn.remote_address);
            return;
        }
        let payload_type = body[4];
        let chunk = &body[5..];

        let mut big = conn.big.lock();
        if big.sized_recv.is_none() {
            big.sized_recv = Some(ss_core::SizedRecv::start(payload_type, header.total));
        }
        let assembler = big.sized_recv.as_mut().expect("just ensured Some");

        #[expect(clippy::cast_possible_truncation, reason = "chunk sizes are bounded by CHUNK_SIZE")]
        match assembler.accept_chunk(header.total, payload_type, chunk.len() as u32) {
            Ok(offset) => {
                let complete = assembler.is_complete();
                if complete {
                    big.sized_recv = None;
                }
                drop(big);
                self.handlers.dispatch_sized(
                    payload_type,
                    conn.remote_address,
                    i64::from(offset),
                    i64::from(header.total),
                    chunk,
                );
            }
            Err(e) => {
                log::warn!(target: "ss_net::dispatch", "sized-data transfer from {} terminated: {e}", conn.remote_address);
                big.sized_recv = None;
                drop(big);
                self.handlers.dispatch_sized(payload_type, conn.remote_address, -1, -1, &[]);
            }
        }
    }

    fn handle_cancel_sized(&self, conn: &Arc<ConnData>) {
        let found = {
            let mut sized_send = conn.sized_send.lock();
            let target = sized_send.sends.iter_mut().find(|d| !d.is_cancelled());
            if let Some(d) = target {
                d.cancelled_by_peer = true;
                true
            } else {
                false
            }
        };
        if found {
            let _ = self.sized_send_signal.try_send(Arc::clone(conn));
        }
    }

    fn handle_sized_cancelled(&self, conn: &Arc<ConnData>) {
        let mut big = conn.big.lock();
        if let Some(assembler) = big.sized_recv.take() {
            drop(big);
            self.handlers.dispatch_sized(assembler.payload_type(), conn.remote_address, -1, -1, &[]);
        }
    }

    fn handle_grouped(&self, conn: &Arc<ConnData>, body: &[u8], depth: u8) {
        if depth >= MAX_GROUP_DEPTH {
            log::warn!(target: "ss_net::dispatch", "rejecting nested grouped packet from {}", conn.remote_address);
            return;
        }
        match decode_items(body) {
            Ok(items) => {
                for item in items {
                    let Some((&kind, rest)) = item.split_first() else {
                        continue;
                    };
                    if kind == CORE_TYPE {
                        let Some((&sub_byte, inner)) = rest.split_first() else {
                            continue;
                        };
                        if let Some(subtype) = CoreSubtype::from_byte(sub_byte) {
                            self.dispatch_at_depth(conn, subtype, inner, depth + 1);
                        } else {
                            log::debug!(target: "ss_net::dispatch", "unknown core subtype 0x{sub_byte:02X} inside grouped packet from {}", conn.remote_address);
                        }
                    } else {
                        self.handlers.dispatch_packet(kind, conn.remote_address, rest);
                    }
                }
            }
            Err(e) => {
                log::warn!(target: "ss_net::dispatch", "malformed grouped packet from {}: {e}", conn.remote_address);
            }
        }
    }

    fn handle_special(&self, conn: &Arc<ConnData>, body: &[u8]) {
        let Some((&kind, rest)) = body.split_first() else {
            log::debug!(target: "ss_net::dispatch", "empty special packet from {}", conn.remote_address);
            return;
        };
        self.handlers.dispatch_net(kind, conn.remote_address, rest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::{OutboundBuffer, SendFlags};
    use ss_core::TokenBucketLimiter;
    use ss_io::Socket;
    use std::net::SocketAddr;

    fn fixture() -> (Dispatcher, Arc<ConnData>) {
        let handlers = Arc::new(Handlers::new());
        let (reliable_tx, _reliable_rx) = crossbeam_channel::unbounded();
        let (sized_tx, _sized_rx) = crossbeam_channel::unbounded();
        let dispatcher = Dispatcher::new(handlers, 1 << 20, Instant::now(), reliable_tx, sized_tx, None);

        let socket = Arc::new(Socket::bind("127.0.0.1:0").unwrap());
        let remote: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let conn = Arc::new(ConnData::new(
            RemoteAddr::from(remote),
            socket,
            64,
            Box::new(TokenBucketLimiter::new(10_000, 520)),
            510,
            None,
        ));
        (dispatcher, conn)
    }

    #[test]
    fn reliable_in_order_signals_worker_and_acks() {
        let (dispatcher, conn) = fixture();
        let mut body = Vec::new();
        Seq::new(0).encode(&mut body);
        body.extend_from_slice(b"payload");
        dispatcher.dispatch(&conn, CoreSubtype::Reliable, &body);

        assert!(conn.reliable.lock().window.has_head());
    }

    #[test]
    fn duplicate_reliable_increments_rel_dups() {
        let (dispatcher, conn) = fixture();
        let mut body = Vec::new();
        Seq::new(0).encode(&mut body);
        body.extend_from_slice(b"payload");
        dispatcher.dispatch(&conn, CoreSubtype::Reliable, &body);
        dispatcher.dispatch(&conn, CoreSubtype::Reliable, &body);

        assert_eq!(1, conn.counters.lock().rel_dups);
    }

    #[test]
    fn duplicate_reliable_queues_one_ack_buffer_each_time_at_ack_priority() {
        let (dispatcher, conn) = fixture();
        let mut body = Vec::new();
        Seq::new(0).encode(&mut body);
        body.extend_from_slice(b"payload");
        dispatcher.dispatch(&conn, CoreSubtype::Reliable, &body);
        dispatcher.dispatch(&conn, CoreSubtype::Reliable, &body);

        let outgoing = conn.outgoing.lock();
        let acks = &outgoing.outlist[ss_core::Priority::Ack as usize];
        assert_eq!(2, acks.len());
        for ack in acks {
            assert!(!ack.flags.reliable);
            assert_eq!(&[0x00, 0x04], &ack.bytes[..2]);
            assert_eq!(Seq::new(0), Seq::decode(&ack.bytes[2..]).unwrap());
        }
    }

    #[test]
    fn ack_removes_matching_outlist_entry_and_fires_callback() {
        let (dispatcher, conn) = fixture();
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired2 = Arc::clone(&fired);

        let mut bytes = core_prefix(CoreSubtype::Reliable).to_vec();
        Seq::new(5).encode(&mut bytes);
        bytes.extend_from_slice(b"hi");
        let mut buf = OutboundBuffer::new(bytes, SendFlags::reliable());
        buf.tries = 1;
        buf.last_retry = Some(Instant::now());
        buf.callbacks.push(Box::new(move |success: bool| {
            fired2.store(success, std::sync::atomic::Ordering::SeqCst);
        }));
        conn.outgoing.lock().outlist[ss_core::Priority::Reliable as usize].push_back(buf);

        let mut ack_body = Vec::new();
        Seq::new(5).encode(&mut ack_body);
        dispatcher.dispatch(&conn, CoreSubtype::Ack, &ack_body);

        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
        assert!(conn.outgoing.lock().outlist[ss_core::Priority::Reliable as usize].is_empty());
    }

    #[test]
    fn grouped_packet_dispatches_each_item() {
        let (dispatcher, conn) = fixture();
        let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        conn_register_counting_handler(&dispatcher, 0x20, seen2);

        let mut grouper = ss_core::Grouper::new(512);
        grouper.try_append(&[0x20, 1, 2, 3]);
        grouper.try_append(&[0x20, 4, 5]);
        let packet = grouper.flush().unwrap();

        dispatcher.dispatch(&conn, CoreSubtype::Grouped, &packet[2..]);
        assert_eq!(2, seen.load(std::sync::atomic::Ordering::SeqCst));
    }

    fn conn_register_counting_handler(dispatcher: &Dispatcher, kind: u8, counter: Arc<std::sync::atomic::AtomicUsize>) {
        dispatcher.handlers.register_packet_handler(
            kind,
            Arc::new(move |_peer, _payload: &[u8]| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }),
        );
    }

    #[test]
    fn nested_grouped_packet_is_rejected() {
        let (dispatcher, conn) = fixture();
        let mut inner_group = ss_core::Grouper::new(512);
        inner_group.try_append(&[1, 2, 3]);
        inner_group.try_append(&[4, 5, 6]);
        let inner_packet = inner_group.flush().unwrap();

        let mut outer_group = ss_core::Grouper::new(512);
        outer_group.try_append(&inner_packet);
        outer_group.try_append(&[0x20, 9]);
        let outer_packet = outer_group.flush().unwrap();

        // Should not panic or infinitely recurse; the nested group is logged
        // and skipped.
        dispatcher.dispatch(&conn, CoreSubtype::Grouped, &outer_packet[2..]);
    }

    #[test]
    fn big_data_reassembles_and_delivers_as_application_packet() {
        let (dispatcher, conn) = fixture();
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen2 = Arc::clone(&seen);
        dispatcher.handlers.register_packet_handler(
            0x30,
            Arc::new(move |_peer, payload: &[u8]| {
                *seen2.lock().unwrap() = Some(payload.to_vec());
            }),
        );

        let mut whole = vec![0x30u8];
        whole.extend_from_slice(b"hello world");
        let (first, second) = whole.split_at(6);
        dispatcher.dispatch(&conn, CoreSubtype::BigData, first);
        dispatcher.dispatch(&conn, CoreSubtype::BigDataEnd, second);

        assert_eq!(Some(b"hello world".to_vec()), *seen.lock().unwrap());
    }
}
