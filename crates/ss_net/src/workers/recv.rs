//! The receive worker (§4.2).

use std::{
    sync::{atomic::{AtomicBool, Ordering}, Arc},
    time::{Duration, Instant},
};

use ss_core::constants::{CORE_TYPE, MAX_CONN_INIT_PACKET, MAX_PACKET, RECV_BUF_LEN};
use ss_core::CoreSubtype;
use ss_io::{wait_readable, RemoteAddr, Socket};

use crate::{
    dispatch::Dispatcher, handlers::Handlers, outbound_client, ping::PingResponder,
    state::ConnState, table::EndpointTable,
};

/// Drives the single receive worker loop described in §4.2.
///
/// Polls the game and ping sockets together with a 1-second upper bound,
/// demultiplexes each ready datagram, and either answers a ping directly or
/// looks the sender up in the player table and hands it to the core
/// dispatcher.
pub struct RecvWorker {
    game_socket: Arc<Socket>,
    ping_socket: Option<Arc<Socket>>,
    player_table: Arc<EndpointTable>,
    outbound_table: Arc<EndpointTable>,
    handlers: Arc<Handlers>,
    dispatcher: Arc<Dispatcher>,
    ping_responder: Option<Arc<PingResponder>>,
    cancel: Arc<AtomicBool>,
}

impl RecvWorker {
    /// Creates a new receive worker over the given sockets and tables.
    #[must_use]
    pub fn new(
        game_socket: Arc<Socket>,
        ping_socket: Option<Arc<Socket>>,
        player_table: Arc<EndpointTable>,
        outbound_table: Arc<EndpointTable>,
        handlers: Arc<Handlers>,
        dispatcher: Arc<Dispatcher>,
        ping_responder: Option<Arc<PingResponder>>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            game_socket,
            ping_socket,
            player_table,
            outbound_table,
            handlers,
            dispatcher,
            ping_responder,
            cancel,
        }
    }

    /// Runs the worker loop until the cancellation flag is set.
    ///
    /// Intended to be handed to `std::thread::spawn`.
    pub fn run(&self) {
        let mut buf = vec![0u8; RECV_BUF_LEN].into_boxed_slice();
        log::info!(target: "ss_net::recv", "receive worker starting");

        while !self.cancel.load(Ordering::Relaxed) {
            let sockets: Vec<&Socket> = std::iter::once(self.game_socket.as_ref())
                .chain(self.ping_socket.as_deref())
                .collect();
            let ready = wait_readable(&sockets, Duration::from_secs(1));

            for idx in ready {
                let socket = sockets[idx];
                loop {
                    match socket.recv_from(&mut buf) {
                        Ok(Some((n, addr))) => {
                            if idx == 0 {
                                self.handle_game_datagram(&mut buf[..n], addr);
                            } else {
                                self.handle_ping_datagram(&buf[..n], addr);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            log::warn!(target: "ss_net::recv", "recv_from failed: {e}");
                            break;
                        }
                    }
                }
            }
        }
        log::info!(target: "ss_net::recv", "receive worker stopping");
    }

    fn handle_ping_datagram(&self, datagram: &[u8], addr: std::net::SocketAddr) {
        let Some(responder) = &self.ping_responder else {
            return;
        };
        let now = Instant::now();
        let response = match datagram.len() {
            4 => responder.handle_simple(datagram, now),
            n if n >= 8 => responder.handle_extended(datagram, now),
            _ => {
                log::debug!(target: "ss_net::recv", "ignoring malformed ping datagram of {} bytes", datagram.len());
                return;
            }
        };
        let Some(ping_socket) = &self.ping_socket else {
            return;
        };
        if let Err(e) = ping_socket.send_to(&response, addr) {
            log::warn!(target: "ss_net::recv", "ping response to {addr} failed: {e}");
        }
    }

    fn handle_game_datagram(&self, datagram: &mut [u8], addr: std::net::SocketAddr) {
        let remote = RemoteAddr::from(addr);
        let is_init_wire = datagram.len() >= 2 && datagram[0] == CORE_TYPE && CoreSubtype::from_byte(datagram[1]).is_some_and(CoreSubtype::is_init);

        let limit = if is_init_wire { MAX_CONN_INIT_PACKET } else { MAX_PACKET };
        if datagram.len() > limit {
            log::debug!(target: "ss_net::recv", "dropping oversized datagram ({} bytes) from {addr}", datagram.len());
            return;
        }

        let Some(conn) = self
            .player_table
            .get(remote)
            .or_else(|| self.outbound_table.get(remote))
        else {
            if is_init_wire {
                if !self.handlers.try_connection_init(remote, datagram) {
                    log::debug!(target: "ss_net::recv", "no init handler accepted connection from {addr}");
                }
            } else {
                log::debug!(target: "ss_net::recv", "non-init packet from unknown peer {addr}, dropping");
            }
            return;
        };

        if is_init_wire {
            let state = *conn.state.lock();
            if state == ConnState::Connected {
                log::debug!(target: "ss_net::recv", "re-running init for {addr}, response was likely lost");
                let _ = self.handlers.try_connection_init(remote, datagram);
            } else {
                log::debug!(target: "ss_net::recv", "forcing logout for {addr} on unexpected init in state {state:?}");
                *conn.state.lock() = ConnState::LeavingZone;
            }
            return;
        }

        let state = *conn.state.lock();
        if state.is_past_terminal_threshold() {
            if state.warns_on_malformed_state() {
                log::warn!(target: "ss_net::recv", "datagram from {addr} while in {state:?}, dropping");
            } else {
                log::debug!(target: "ss_net::recv", "datagram from {addr} while in {state:?}, dropping silently");
            }
            return;
        }

        *conn.last_pkt_at.lock() = Instant::now();
        {
            let mut counters = conn.counters.lock();
            counters.pkt_recvd += 1;
            counters.bytes_recvd += datagram.len() as u64;
        }

        let len = if let Some(hook) = &conn.encryption_hook {
            hook.decrypt(datagram, datagram.len())
        } else {
            datagram.len()
        };
        if len == 0 {
            log::warn!(target: "ss_net::recv", "decrypt failure from {addr}, dropping");
            return;
        }
        let payload = &datagram[..len];

        let Some((&kind, rest)) = payload.split_first() else {
            return;
        };
        if kind != CORE_TYPE {
            self.handlers.dispatch_packet(kind, remote, rest);
            return;
        }
        let Some((&sub_byte, body)) = rest.split_first() else {
            log::debug!(target: "ss_net::recv", "truncated core packet from {addr}");
            return;
        };
        let Some(subtype) = CoreSubtype::from_byte(sub_byte) else {
            log::warn!(target: "ss_net::recv", "unknown core subtype 0x{sub_byte:02X} from {addr}, malicious");
            return;
        };

        if subtype == CoreSubtype::KeyResponse {
            let _ = outbound_client::complete_handshake(&conn, body);
            return;
        }
        self.dispatcher.dispatch(&conn, subtype, body);
    }
}
