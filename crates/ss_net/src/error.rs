//! Error types surfaced by the facade layer (§7).

use derive_more::{Display, Error};

/// [`crate::Transport::send_to_one`] and friends fail this way.
#[derive(Debug, Display, Error)]
pub enum SendError {
    /// No connection is known for the target endpoint.
    #[display("no connection for that target")]
    NoSuchConnection,
    /// The connection's outbound queue is already at capacity.
    #[display("outbound queue is full")]
    OutlistFull,
    /// A reliable-only call (`send_with_callback`, `send_sized`) was made
    /// without the `Reliable` flag set.
    #[display("this call requires the Reliable flag")]
    NotReliable,
}

/// [`crate::outbound_client::make_client_connection`] fails this way.
#[derive(Debug, Display, Error)]
pub enum HandshakeError {
    /// Binding or sending on the outbound-client socket failed.
    #[display("outbound-client socket error: {_0}")]
    Io(std::io::Error),
}
