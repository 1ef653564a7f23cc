//! Application-inbound handler registries (§6 "Application-inbound
//! interface").
//!
//! Modelled as `Box<dyn Fn(...) + Send + Sync>` tables behind `RwLock`s, in
//! the style of the teacher's observer/event registration, generalized from
//! an ECS observer chain to a plain callback table since this port has no
//! ECS to hang the handlers on.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use ss_io::RemoteAddr;

/// A plain application packet handler: `(peer, payload)`.
pub type PacketHandler = Arc<dyn Fn(RemoteAddr, &[u8]) + Send + Sync>;

/// A sized-stream handler: `(peer, offset, total, bytes)`.
///
/// Called once with `offset = -1, total = -1` and an empty `bytes` slice on
/// cancellation (§6).
pub type SizedPacketHandler = Arc<dyn Fn(RemoteAddr, i64, i64, &[u8]) + Send + Sync>;

/// A net-handler (second byte of a `0x00`-family packet): `(peer, payload)`.
pub type NetPacketHandler = Arc<dyn Fn(RemoteAddr, &[u8]) + Send + Sync>;

/// A connection-init handler: `(peer, payload) -> accepted`.
///
/// Handlers are tried in registration order; the first one that returns
/// `true` is considered to have accepted the connection and no further
/// handler is tried (§4.2 step 2, §9 glossary "Connection-init").
pub type ConnectionInitHandler = Arc<dyn Fn(RemoteAddr, &[u8]) -> bool + Send + Sync>;

/// All four application-inbound handler registries.
#[derive(Default)]
pub struct Handlers {
    packet: RwLock<HashMap<u8, Vec<PacketHandler>>>,
    sized: RwLock<HashMap<u8, SizedPacketHandler>>,
    net: RwLock<HashMap<u8, NetPacketHandler>>,
    init: RwLock<Vec<ConnectionInitHandler>>,
}

impl Handlers {
    /// Creates an empty set of registries.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for application packet type `kind`.
    pub fn register_packet_handler(&self, kind: u8, handler: PacketHandler) {
        self.packet.write().entry(kind).or_default().push(handler);
    }

    /// Removes the first handler registered for `kind` that's the same
    /// `Arc` as `handler` (identity, not closure-value, comparison).
    pub fn remove_packet_handler(&self, kind: u8, handler: &PacketHandler) {
        if let Some(handlers) = self.packet.write().get_mut(&kind) {
            handlers.retain(|h| !Arc::ptr_eq(h, handler));
        }
    }

    /// Dispatches an application packet to every handler registered for its
    /// type, swallowing and logging any handler that's missing (§7 "Handler
    /// exception" is the caller's job to catch around the call itself; this
    /// just does the lookup-and-invoke).
    pub fn dispatch_packet(&self, kind: u8, peer: RemoteAddr, payload: &[u8]) {
        let handlers = self.packet.read();
        if let Some(list) = handlers.get(&kind) {
            for handler in list {
                handler(peer, payload);
            }
        } else {
            log::debug!(target: "ss_net::handlers", "no packet handler registered for type 0x{kind:02X}");
        }
    }

    /// Registers the sized-stream handler for payload type `kind`, replacing
    /// any previous registration.
    pub fn register_sized_packet_handler(&self, kind: u8, handler: SizedPacketHandler) {
        self.sized.write().insert(kind, handler);
    }

    /// Invokes the sized-stream handler for `kind`, if one is registered.
    pub fn dispatch_sized(&self, kind: u8, peer: RemoteAddr, offset: i64, total: i64, bytes: &[u8]) {
        if let Some(handler) = self.sized.read().get(&kind) {
            handler(peer, offset, total, bytes);
        } else {
            log::debug!(target: "ss_net::handlers", "no sized packet handler registered for type 0x{kind:02X}");
        }
    }

    /// Registers the net-handler for second-byte value `kind`, replacing
    /// any previous registration.
    pub fn register_net_packet_handler(&self, kind: u8, handler: NetPacketHandler) {
        self.net.write().insert(kind, handler);
    }

    /// Invokes the net-handler for `kind`, if one is registered.
    pub fn dispatch_net(&self, kind: u8, peer: RemoteAddr, payload: &[u8]) {
        if let Some(handler) = self.net.read().get(&kind) {
            handler(peer, payload);
        } else {
            log::debug!(target: "ss_net::handlers", "no net handler registered for 0x13 subtype 0x{kind:02X}");
        }
    }

    /// Appends a connection-init handler to the end of the chain.
    pub fn register_connection_init_handler(&self, handler: ConnectionInitHandler) {
        self.init.write().push(handler);
    }

    /// Tries every registered init handler in order, returning `true` as
    /// soon as one accepts.
    #[must_use]
    pub fn try_connection_init(&self, peer: RemoteAddr, payload: &[u8]) -> bool {
        for handler in self.init.read().iter() {
            if handler(peer, payload) {
                return true;
            }
        }
        false
    }
}
