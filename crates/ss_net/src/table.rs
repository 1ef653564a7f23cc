//! Endpoint tables: remote address → connection (§2 "Endpoint table", §5
//! "Shared-resource policy").
//!
//! The source's lock-free player table is satisfied here by a sharded-free
//! `RwLock<HashMap<...>>`: many concurrent readers (the receive worker
//! looking up a connection per datagram, the send worker iterating all
//! connections) and a write lock taken only on connect/disconnect, which is
//! the "single-writer during init" contract §5 actually asks for. See
//! `DESIGN.md` for why this port doesn't reach for a `DashMap`-equivalent.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use ss_io::RemoteAddr;

use crate::conn::ConnData;

/// A table mapping remote endpoints to their connection state.
///
/// Used both for inbound player connections and for this module's own
/// outbound-client connections (§2); the two are kept in separate
/// `EndpointTable`s by the caller since init handling and teardown policy
/// differ between them.
#[derive(Default)]
pub struct EndpointTable {
    conns: RwLock<HashMap<RemoteAddr, Arc<ConnData>>>,
}

impl EndpointTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a connection by its remote address.
    #[must_use]
    pub fn get(&self, addr: RemoteAddr) -> Option<Arc<ConnData>> {
        self.conns.read().get(&addr).cloned()
    }

    /// Inserts a new connection, replacing any existing one at the same
    /// address. Returns the replaced connection, if any.
    pub fn insert(&self, conn: Arc<ConnData>) -> Option<Arc<ConnData>> {
        self.conns.write().insert(conn.remote_address, conn)
    }

    /// Removes a connection from the table.
    pub fn remove(&self, addr: RemoteAddr) -> Option<Arc<ConnData>> {
        self.conns.write().remove(&addr)
    }

    /// Snapshot of every connection currently in the table, for the send
    /// worker's per-iteration walk (§4.4).
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<ConnData>> {
        self.conns.read().values().cloned().collect()
    }

    /// Number of connections currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.conns.read().len()
    }

    /// Whether no connections are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conns.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ss_core::TokenBucketLimiter;
    use ss_io::Socket;
    use std::net::SocketAddr;

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
    fn insert_then_get_round_trips() {
        let table = EndpointTable::new();
        let conn = make_conn(1);
        let addr = conn.remote_address;
        table.insert(conn);
        assert!(table.get(addr).is_some());
        assert_eq!(1, table.len());
    }

    #[test]
    fn remove_drops_the_entry() {
        let table = EndpointTable::new();
        let conn = make_conn(2);
        let addr = conn.remote_address;
        table.insert(conn);
        assert!(table.remove(addr).is_some());
        assert!(table.get(addr).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn snapshot_sees_every_inserted_connection() {
        let table = EndpointTable::new();
        table.insert(make_conn(3));
        table.insert(make_conn(4));
        assert_eq!(2, table.snapshot().len());
    }
}
