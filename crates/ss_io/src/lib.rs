//! Raw datagram socket plumbing for the Subspace core transport.
//!
//! This crate knows nothing about reliability, sequencing, or framing — it
//! binds non-blocking UDP sockets, waits for readiness across several of
//! them at once, and applies a pluggable per-connection encryption hook on
//! the way in and out. Everything above this layer (`ss_core`, `ss_net`)
//! treats a [`Socket`] as an opaque place to read and write datagrams.

mod addr;
mod encrypt;
mod error;
mod socket;

pub use addr::RemoteAddr;
pub use encrypt::{EncryptionHook, Identity};
pub use error::BindError;
pub use socket::{wait_readable, Socket};
