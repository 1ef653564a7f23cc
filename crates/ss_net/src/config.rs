//! Runtime configuration (§6 "Configuration").
//!
//! Parsing a config file into this struct is out of scope — the module host
//! builds a [`Config`] however it likes (file, env, hardcoded) and hands it
//! to [`crate::Transport::new`].

use std::time::Duration;

/// Tunables recognised by the transport engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Idle duration after which a connection is kicked (default 30s, i.e.
    /// `DropTimeout` of 3000 10ms ticks).
    pub drop_timeout: Duration,
    /// Per-connection outbound queue size that triggers `hit_max_outlist`.
    pub max_outlist_size: usize,
    /// Reliable retries before a connection is kicked.
    pub max_retries: u32,
    /// Number of reliable worker threads.
    pub reliable_threads: usize,
    /// If true, grouped-reliable payloads are limited to 255 bytes so the
    /// result can be re-grouped by a downstream hop.
    pub limit_reliable_grouping_size: bool,
    /// Per-connection queued sized-chunk cap before the sized-send worker
    /// stops servicing that connection for a cycle.
    pub sized_queue_threshold: usize,
    /// Batch size of sized chunks requested from a provider at once.
    pub sized_queue_packets: usize,
    /// If true, the sized-send worker drains the reliable outbound queue
    /// immediately after enqueuing new chunks instead of waiting for the
    /// send worker's next tick.
    pub sized_send_outgoing: bool,
    /// Accounted per-datagram overhead (UDP + IP headers) added to byte
    /// estimates given to the bandwidth limiter.
    pub per_packet_overhead: usize,
    /// Minimum period between population-count refreshes for ping replies.
    pub ping_data_refresh_time: Duration,
    /// Which population figure a simple (4-byte) ping reports.
    pub simple_ping_population_mode: SimplePingPopulationMode,
    /// Reliable receive window size `W` (§9 Open Question: exposed here,
    /// default 64, the high end of the spec's "typically 32..64").
    pub reliable_window: usize,
    /// Upper bound on the sum of a big-data reassembly.
    pub max_big_packet: usize,
}

/// Which figure [`Config::simple_ping_population_mode`] selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimplePingPopulationMode {
    /// Always report the total player count.
    Total,
    /// Always report the count of players actually in a game (not just
    /// connected).
    Playing,
    /// Alternate between total and playing every 3 seconds.
    AlternateEvery3Secs,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            drop_timeout: Duration::from_millis(10 * 3000),
            max_outlist_size: 500,
            max_retries: 15,
            reliable_threads: 1,
            limit_reliable_grouping_size: false,
            sized_queue_threshold: 5,
            sized_queue_packets: 25,
            sized_send_outgoing: false,
            per_packet_overhead: 28,
            ping_data_refresh_time: Duration::from_millis(10 * 200),
            simple_ping_population_mode: SimplePingPopulationMode::Total,
            reliable_window: 64,
            max_big_packet: 1 << 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = Config::default();
        assert_eq!(Duration::from_secs(30), config.drop_timeout);
        assert_eq!(500, config.max_outlist_size);
        assert_eq!(15, config.max_retries);
        assert_eq!(1, config.reliable_threads);
        assert_eq!(5, config.sized_queue_threshold);
        assert_eq!(25, config.sized_queue_packets);
        assert_eq!(28, config.per_packet_overhead);
        assert_eq!(Duration::from_secs(2), config.ping_data_refresh_time);
        assert_eq!(64, config.reliable_window);
    }
}
