//! See [`RttEstimator`].

use std::time::Duration;

/// Smoothed round-trip time estimator for one connection.
///
/// Uses the same exponentially-weighted moving average as a classic TCP/QUIC
/// RTT estimator (`smoothed = (7*smoothed + rtt)/8`,
/// `var = (3*var + |smoothed-rtt|)/4`), with two additions §4.3 requires that
/// a QUIC-style estimator doesn't need: the update only applies on a clean
/// ACK of a buffer's *first* send (`tries == 1` — a retransmit's RTT sample
/// is unreliable, since we can no longer tell which send the ACK answers),
/// and a negative wall-clock delta (the local clock moved backwards between
/// send and ACK) is substituted with a 100 ms sample rather than trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RttEstimator {
    avg_rtt: Duration,
    rtt_dev: Duration,
}

/// Duration substituted for a sample whose raw `now - last_retry` came out
/// negative.
const NEGATIVE_CLOCK_SUBSTITUTE: Duration = Duration::from_millis(100);

/// Lower bound on the retransmit timeout computed by [`RttEstimator::timeout`].
const MIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Upper bound on the retransmit timeout computed by [`RttEstimator::timeout`].
const MAX_TIMEOUT: Duration = Duration::from_millis(2000);

impl RttEstimator {
    /// Creates a new estimator with the connection's initial 200 ms / 100 ms
    /// estimate (§3).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            avg_rtt: Duration::from_millis(200),
            rtt_dev: Duration::from_millis(100),
        }
    }

    /// Gets the current smoothed RTT estimate.
    #[must_use]
    pub const fn avg_rtt(&self) -> Duration {
        self.avg_rtt
    }

    /// Gets the current RTT deviation estimate.
    #[must_use]
    pub const fn rtt_dev(&self) -> Duration {
        self.rtt_dev
    }

    /// Computes the retransmit timeout for a buffer given its attempt count.
    ///
    /// `tries` is the number of times the buffer has already been sent
    /// (starting at 1 for the first send); the scheduler should wait until
    /// `now - last_retry > tries * timeout()` before retrying again.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        (self.avg_rtt + 4 * self.rtt_dev).clamp(MIN_TIMEOUT, MAX_TIMEOUT)
    }

    /// Folds an ACK's measured round-trip time into the estimate.
    ///
    /// Only call this for the first-send case (`tries == 1` at ACK time);
    /// retransmitted buffers should not call this at all.
    pub fn update(&mut self, sent_at: std::time::Instant, acked_at: std::time::Instant) {
        let rtt = acked_at
            .checked_duration_since(sent_at)
            .unwrap_or(NEGATIVE_CLOCK_SUBSTITUTE);
        self.update_sample(rtt);
    }

    /// Folds a raw RTT sample into the estimate directly, bypassing the
    /// `Instant` subtraction in [`RttEstimator::update`].
    ///
    /// Exposed for tests and for callers that already have a `Duration`
    /// (e.g. sync-response round trips).
    pub fn update_sample(&mut self, rtt: Duration) {
        let var_sample = self.avg_rtt.abs_diff(rtt);
        self.rtt_dev = (3 * self.rtt_dev + var_sample) / 4;
        self.avg_rtt = (7 * self.avg_rtt + rtt) / 8;
    }
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_estimate_matches_spec_defaults() {
        let rtt = RttEstimator::new();
        assert_eq!(Duration::from_millis(200), rtt.avg_rtt());
        assert_eq!(Duration::from_millis(100), rtt.rtt_dev());
    }

    #[test]
    fn single_clean_ack_matches_smoothing_formula() {
        let mut rtt = RttEstimator::new();
        let before = rtt.avg_rtt();
        rtt.update_sample(Duration::from_millis(50));

        let expected = (before * 7 + Duration::from_millis(50)) / 8;
        let diff = rtt.avg_rtt().abs_diff(expected);
        assert!(diff < Duration::from_millis(1), "diff = {diff:?}");
    }

    #[test]
    fn timeout_is_clamped_to_bounds() {
        let mut rtt = RttEstimator::new();
        assert!(rtt.timeout() >= MIN_TIMEOUT);
        assert!(rtt.timeout() <= MAX_TIMEOUT);

        for _ in 0..50 {
            rtt.update_sample(Duration::from_secs(10));
        }
        assert_eq!(MAX_TIMEOUT, rtt.timeout());
    }

    #[test]
    fn negative_clock_delta_substitutes_100ms() {
        let mut rtt = RttEstimator::new();
        let now = std::time::Instant::now();
        let earlier = now - Duration::from_millis(10);
        // acked_at before sent_at: checked_duration_since returns None.
        rtt.update(now, earlier);

        let mut expected = RttEstimator::new();
        expected.update_sample(NEGATIVE_CLOCK_SUBSTITUTE);
        assert_eq!(expected.avg_rtt(), rtt.avg_rtt());
        assert_eq!(expected.rtt_dev(), rtt.rtt_dev());
    }
}
