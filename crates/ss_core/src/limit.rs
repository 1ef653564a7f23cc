//! Bandwidth-priority scheduling policy (§4.4, glossary "Bandwidth limiter").

use std::time::{Duration, Instant};

use crate::{error::NotEnoughBudget, priority::Priority};

/// Opaque per-connection send-rate policy.
///
/// The send worker asks [`BandwidthLimiter::check`] before sending each
/// buffer, reports the outcome back through [`BandwidthLimiter::adjust_for_ack`]
/// / [`BandwidthLimiter::adjust_for_retry`], and ticks it forward once per
/// iteration with [`BandwidthLimiter::iter`]. The transport core only ever
/// holds this behind a trait object — a module host may substitute its own
/// congestion policy entirely.
pub trait BandwidthLimiter: Send {
    /// Checks whether `bytes` more may be sent right now at `priority`.
    ///
    /// Does not consume budget by itself in the `Err` case; a caller that
    /// gets `Ok` is expected to actually perform the send.
    ///
    /// # Errors
    ///
    /// Errors if there isn't enough budget remaining.
    fn check(&mut self, bytes: usize, priority: Priority) -> Result<(), NotEnoughBudget>;

    /// Called when a reliable buffer this limiter admitted was ACKed.
    fn adjust_for_ack(&mut self);

    /// Called when a reliable buffer this limiter admitted had to be
    /// retransmitted.
    fn adjust_for_retry(&mut self);

    /// Number of in-flight reliable packets this connection may buffer
    /// before the send worker should stop promoting more of
    /// `unsent_rel_out` (§4.4).
    fn get_can_buffer_packets(&self) -> usize;

    /// Advances the limiter's internal clock, refilling budget as
    /// appropriate. Called once per send-worker iteration.
    fn iter(&mut self, now: Instant);
}

/// Default [`BandwidthLimiter`]: a byte-budget token bucket that refills at
/// a constant rate, shrinks its rate additively on retransmit (congestion
/// signal) and grows it additively on a clean ACK.
///
/// Grounded in the token-bucket discipline of a classic rate limiter: bytes
/// are consumed from `rem` by [`BandwidthLimiter::check`], and [`iter`] adds
/// back `rate_bytes_per_sec * elapsed` each tick, capped at `rem_cap`.
///
/// [`iter`]: BandwidthLimiter::iter
#[derive(Debug, Clone)]
pub struct TokenBucketLimiter {
    rem_cap: usize,
    rem: usize,
    rate_bytes_per_sec: usize,
    last_tick: Option<Instant>,
    typical_packet_bytes: usize,
}

/// Amount `rate_bytes_per_sec` grows by on a clean ACK.
const GROW_STEP: usize = 64;

/// Divisor applied to `rate_bytes_per_sec` on a retransmit.
const SHRINK_DIVISOR: usize = 2;

/// Floor under which `rate_bytes_per_sec` will not shrink further.
const MIN_RATE: usize = 1_000;

impl TokenBucketLimiter {
    /// Creates a limiter starting at `initial_rate_bytes_per_sec`, with a
    /// burst budget equal to the rate (i.e. it can send a full second's
    /// worth of data up front before it has to wait for refills).
    #[must_use]
    pub fn new(initial_rate_bytes_per_sec: usize, typical_packet_bytes: usize) -> Self {
        Self {
            rem_cap: initial_rate_bytes_per_sec,
            rem: initial_rate_bytes_per_sec,
            rate_bytes_per_sec: initial_rate_bytes_per_sec,
            last_tick: None,
            typical_packet_bytes: typical_packet_bytes.max(1),
        }
    }

    /// Current configured send rate.
    #[must_use]
    pub const fn rate_bytes_per_sec(&self) -> usize {
        self.rate_bytes_per_sec
    }

    /// Bytes currently available to spend.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.rem
    }
}

impl BandwidthLimiter for TokenBucketLimiter {
    fn check(&mut self, bytes: usize, priority: Priority) -> Result<(), NotEnoughBudget> {
        // Ack and Reliable traffic is never throttled: losing an ack or
        // starving a retransmit only makes congestion worse.
        if matches!(priority, Priority::Ack | Priority::Reliable) {
            self.rem = self.rem.saturating_sub(bytes);
            return Ok(());
        }
        if self.rem >= bytes {
            self.rem -= bytes;
            Ok(())
        } else {
            Err(NotEnoughBudget(bytes))
        }
    }

    fn adjust_for_ack(&mut self) {
        self.rate_bytes_per_sec = self.rate_bytes_per_sec.saturating_add(GROW_STEP);
        self.rem_cap = self.rate_bytes_per_sec;
    }

    fn adjust_for_retry(&mut self) {
        self.rate_bytes_per_sec = (self.rate_bytes_per_sec / SHRINK_DIVISOR).max(MIN_RATE);
        self.rem_cap = self.rate_bytes_per_sec;
        self.rem = self.rem.min(self.rem_cap);
    }

    fn get_can_buffer_packets(&self) -> usize {
        (self.rem_cap / self.typical_packet_bytes).max(1)
    }

    fn iter(&mut self, now: Instant) {
        let elapsed = self
            .last_tick
            .map_or(Duration::ZERO, |last| now.saturating_duration_since(last));
        self.last_tick = Some(now);

        let refill = ((self.rate_bytes_per_sec as u128 * elapsed.as_millis()) / 1000) as usize;
        self.rem = self.rem_cap.min(self.rem.saturating_add(refill));
    }
}
