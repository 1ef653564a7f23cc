//! Outbound-client handshake: `MakeClientConnection` (§4.7).

use std::sync::Arc;

use bytes::BufMut;
use rand::Rng;
use ss_core::{constants::CORE_TYPE, header::core_prefix, CoreSubtype};
use ss_io::{EncryptionHook, RemoteAddr, Socket};

use crate::{conn::ConnData, limit_factory::LimiterFactory, state::ConnState, table::EndpointTable};

/// Version byte appended after the random key in the connection-init body.
const HANDSHAKE_VERSION: u8 = 1;

/// Bit forced high on the random key, per §4.7.
const KEY_HIGH_BIT: u32 = 0x8000_0000;

/// Creates a connection state for an outbound client connection and sends
/// the connection-init packet that starts its handshake.
///
/// The handshake completes when the peer's `0x02` key response arrives;
/// that side is handled by the dispatcher recognising `KeyResponse` for a
/// connection still in [`ConnState::Connecting`] (wired by the caller, since
/// the dispatcher itself only acts on already-established connections — see
/// `ss_net::dispatch`'s module docs).
pub fn make_client_connection(
    table: &EndpointTable,
    socket: Arc<Socket>,
    remote: RemoteAddr,
    reliable_window: usize,
    limiter_factory: &dyn LimiterFactory,
    grouper_cap: usize,
    encryption_hook: Option<Arc<dyn EncryptionHook>>,
) -> Arc<ConnData> {
    let conn = Arc::new(ConnData::new(
        remote,
        Arc::clone(&socket),
        reliable_window,
        limiter_factory.make(),
        grouper_cap,
        encryption_hook,
    ));
    table.insert(Arc::clone(&conn));

    let key = rand::thread_rng().gen::<u32>() | KEY_HIGH_BIT;
    let mut body = core_prefix(CoreSubtype::KeyInitiation).to_vec();
    body.put_u32_le(key);
    body.put_u8(HANDSHAKE_VERSION);
    conn.raw_send(&body);

    log::info!(target: "ss_net::outbound_client", "handshake started to {remote}");
    conn
}

/// Completes an outbound-client handshake on receipt of a `0x02` key
/// response, signalling `Connected`.
///
/// Per the design notes' Open Question resolution, the length check on the
/// key-response body is `len == 6` exactly (§9).
#[must_use]
pub fn complete_handshake(conn: &Arc<ConnData>, body: &[u8]) -> bool {
    if body.len() != 6 {
        log::warn!(target: "ss_net::outbound_client", "key response from {} has unexpected length {}", conn.remote_address, body.len());
        return false;
    }
    let mut state = conn.state.lock();
    if *state != ConnState::Connecting {
        log::debug!(target: "ss_net::outbound_client", "key response from {} while not Connecting, ignoring", conn.remote_address);
        return false;
    }
    *state = ConnState::Connected;
    log::info!(target: "ss_net::outbound_client", "handshake completed to {}", conn.remote_address);
    true
}

/// Whether `b` marks the start of a core packet at all (used by callers that
/// need to distinguish the handshake's own core framing before a connection
/// is known).
#[must_use]
pub const fn looks_like_core_packet(b: u8) -> bool {
    b == CORE_TYPE
}
