//! Per-connection bandwidth limiter construction.
//!
//! [`ConnData`](crate::conn::ConnData) owns its own
//! [`ss_core::BandwidthLimiter`] instance; a [`LimiterFactory`] is how the
//! module host configures what policy new connections get without the
//! connection table or handshake code needing to know the concrete type.

use ss_core::{BandwidthLimiter, TokenBucketLimiter};

/// Produces a fresh limiter for a newly created connection.
pub trait LimiterFactory: Send + Sync {
    /// Builds a new, independent limiter instance.
    fn make(&self) -> Box<dyn BandwidthLimiter>;
}

/// Default factory: every connection gets its own [`TokenBucketLimiter`]
/// starting at the same configured rate.
pub struct TokenBucketFactory {
    initial_rate_bytes_per_sec: usize,
    typical_packet_bytes: usize,
}

impl TokenBucketFactory {
    /// Creates a factory that hands out token-bucket limiters starting at
    /// `initial_rate_bytes_per_sec`.
    #[must_use]
    pub const fn new(initial_rate_bytes_per_sec: usize, typical_packet_bytes: usize) -> Self {
        Self {
            initial_rate_bytes_per_sec,
            typical_packet_bytes,
        }
    }
}

impl LimiterFactory for TokenBucketFactory {
    fn make(&self) -> Box<dyn BandwidthLimiter> {
        Box::new(TokenBucketLimiter::new(self.initial_rate_bytes_per_sec, self.typical_packet_bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ss_core::Priority;

    #[test]
    fn factory_produces_independent_limiters() {
        let factory = TokenBucketFactory::new(1000, 500);
        let mut a = factory.make();
        let mut b = factory.make();
        assert!(a.check(1000, Priority::Unreliable).is_ok());
        // `b` still has its full budget since limiters are independent.
        assert!(b.check(1000, Priority::Unreliable).is_ok());
        assert!(a.check(1, Priority::Unreliable).is_err());
    }
}
