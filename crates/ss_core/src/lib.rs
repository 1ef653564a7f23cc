//! The Subspace core transport engine: wire framing, reliability, RTT
//! estimation, fragment reassembly, outbound grouping, and bandwidth-priority
//! scheduling primitives.
//!
//! This crate has no notion of sockets, threads, or connection tables — it's
//! the pure, testable state machine that `ss_net` drives. See each module
//! for the piece of the wire protocol it owns.

pub mod big;
pub mod callback;
pub mod constants;
pub mod error;
pub mod group;
pub mod header;
pub mod limit;
pub mod priority;
pub mod rtt;
pub mod seq;
pub mod sized;
pub mod subtype;
pub mod window;

pub use big::BigRecv;
pub use callback::{CallbackChain, OnReliableResult};
pub use group::Grouper;
pub use header::{ReliableHeader, SizedHeader};
pub use limit::{BandwidthLimiter, TokenBucketLimiter};
pub use priority::Priority;
pub use rtt::RttEstimator;
pub use seq::Seq;
pub use sized::SizedRecv;
pub use subtype::CoreSubtype;
pub use window::{Accept, ReliableRecvWindow};
