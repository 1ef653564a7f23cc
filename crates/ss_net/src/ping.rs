//! Ping/population responder (§4.2 "ping socket", §6 "Ping responses").

use std::time::{Duration, Instant};

use bytes::{Buf, BufMut};
use parking_lot::Mutex;

use crate::config::SimplePingPopulationMode;

/// One arena's population figures, as reported in an extended ping's
/// `ArenaSummary` option.
#[derive(Debug, Clone)]
pub struct ArenaPopulation {
    /// Arena name, written null-terminated on the wire.
    pub name: String,
    /// Total connected players in this arena.
    pub total: u16,
    /// Players actually `Playing` (vs spectating) in this arena.
    pub playing: u16,
}

/// Supplies the population figures the ping responder caches and reports.
///
/// This is the application's own arena/player store; the transport only
/// ever calls through this trait, never owns the store itself (§1
/// non-goals).
pub trait PopulationSource: Send + Sync {
    /// Total connected players across the whole server.
    fn total(&self) -> u32;
    /// Players actually in a game across the whole server.
    fn playing(&self) -> u32;
    /// Per-arena breakdown, for an extended ping's `ArenaSummary` option.
    fn arenas(&self) -> Vec<ArenaPopulation>;
}

/// Bit indicating an extended ping response should include `GlobalSummary`.
pub const OPTION_GLOBAL_SUMMARY: u32 = 0x0000_0001;
/// Bit indicating an extended ping response should include `ArenaSummary`.
pub const OPTION_ARENA_SUMMARY: u32 = 0x0000_0002;

struct Cached {
    total: u32,
    playing: u32,
    arenas: Vec<ArenaPopulation>,
    refreshed_at: Option<Instant>,
}

/// Answers simple (4-byte) and extended (8-byte) info pings from a cached,
/// periodically-refreshed population snapshot.
pub struct PingResponder {
    source: Box<dyn PopulationSource>,
    refresh_period: Duration,
    simple_mode: SimplePingPopulationMode,
    cached: Mutex<Cached>,
}

impl PingResponder {
    /// Creates a responder pulling figures from `source`, refreshing the
    /// cache at most every `refresh_period`.
    #[must_use]
    pub fn new(
        source: Box<dyn PopulationSource>,
        refresh_period: Duration,
        simple_mode: SimplePingPopulationMode,
    ) -> Self {
        Self {
            source,
            refresh_period,
            simple_mode,
            cached: Mutex::new(Cached {
                total: 0,
                playing: 0,
                arenas: Vec::new(),
                refreshed_at: None,
            }),
        }
    }

    fn refresh_if_stale(&self, now: Instant) {
        let mut cached = self.cached.lock();
        let stale = cached
            .refreshed_at
            .is_none_or(|at| now.saturating_duration_since(at) >= self.refresh_period);
        if !stale {
            return;
        }
        cached.total = self.source.total();
        cached.playing = self.source.playing();
        cached.arenas = self.source.arenas();
        cached.refreshed_at = Some(now);
    }

    /// Answers a 4-byte simple ping, echoing the input and prepending a
    /// little-endian population count chosen by `simple_mode`.
    ///
    /// # Panics
    ///
    /// Panics if `request` is not exactly 4 bytes; callers must only route
    /// 4-byte datagrams here (§4.2).
    #[must_use]
    pub fn handle_simple(&self, request: &[u8], now: Instant) -> Vec<u8> {
        assert_eq!(4, request.len(), "simple ping request must be 4 bytes");
        self.refresh_if_stale(now);
        let cached = self.cached.lock();

        let count = match self.simple_mode {
            SimplePingPopulationMode::Total => cached.total,
            SimplePingPopulationMode::Playing => cached.playing,
            SimplePingPopulationMode::AlternateEvery3Secs => {
                let period = Duration::from_secs(3);
                let elapsed = cached.refreshed_at.map_or(Duration::ZERO, |at| now.saturating_duration_since(at));
                let slot = (elapsed.as_secs() / period.as_secs()) % 2;
                if slot == 0 {
                    cached.total
                } else {
                    cached.playing
                }
            }
        };

        let mut out = Vec::with_capacity(8);
        out.put_u32_le(count);
        out.extend_from_slice(request);
        out
    }

    /// Answers an 8-byte extended ping: bytes 0..4 are echoed verbatim,
    /// bytes 4..8 are an option bitmask the response rewrites to the set of
    /// options actually present, followed by each present option's payload
    /// (§6).
    ///
    /// # Panics
    ///
    /// Panics if `request` is shorter than 8 bytes.
    #[must_use]
    pub fn handle_extended(&self, request: &[u8], now: Instant) -> Vec<u8> {
        assert!(request.len() >= 8, "extended ping request must be at least 8 bytes");
        self.refresh_if_stale(now);
        let cached = self.cached.lock();

        let timestamp = &request[0..4];
        let requested = (&request[4..8]).get_u32_le();

        // We always have both summaries available; present whatever the
        // requester asked for.
        let present = requested & (OPTION_GLOBAL_SUMMARY | OPTION_ARENA_SUMMARY);

        let mut out = Vec::new();
        out.extend_from_slice(timestamp);
        out.put_u32_le(present);

        if present & OPTION_GLOBAL_SUMMARY != 0 {
            out.put_u32_le(cached.total);
            out.put_u32_le(cached.playing);
        }
        if present & OPTION_ARENA_SUMMARY != 0 {
            for arena in &cached.arenas {
                out.extend_from_slice(arena.name.as_bytes());
                out.put_u8(0);
                out.put_u16_le(arena.total);
                out.put_u16_le(arena.playing);
            }
            out.put_u8(0);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        total: u32,
        playing: u32,
        arenas: Vec<ArenaPopulation>,
    }

    impl PopulationSource for Fixed {
        fn total(&self) -> u32 {
            self.total
        }
        fn playing(&self) -> u32 {
            self.playing
        }
        fn arenas(&self) -> Vec<ArenaPopulation> {
            self.arenas.clone()
        }
    }

    #[test]
    fn simple_ping_total_mode_matches_scenario_5() {
        let responder = PingResponder::new(
            Box::new(Fixed { total: 42, playing: 7, arenas: vec![] }),
            Duration::from_secs(2),
            SimplePingPopulationMode::Total,
        );
        let response = responder.handle_simple(&[0xDE, 0xAD, 0xBE, 0xEF], Instant::now());
        assert_eq!(&[0x2A, 0x00, 0x00, 0x00, 0xDE, 0xAD, 0xBE, 0xEF], response.as_slice());
    }

    #[test]
    fn simple_ping_playing_mode_reports_playing_count() {
        let responder = PingResponder::new(
            Box::new(Fixed { total: 42, playing: 7, arenas: vec![] }),
            Duration::from_secs(2),
            SimplePingPopulationMode::Playing,
        );
        let response = responder.handle_simple(&[0, 0, 0, 0], Instant::now());
        assert_eq!(7u32, (&response[0..4]).get_u32_le());
    }

    #[test]
    fn extended_ping_reports_requested_options_only() {
        let responder = PingResponder::new(
            Box::new(Fixed {
                total: 10,
                playing: 3,
                arenas: vec![ArenaPopulation { name: "turf".into(), total: 5, playing: 2 }],
            }),
            Duration::from_secs(2),
            SimplePingPopulationMode::Total,
        );
        let mut request = vec![1, 2, 3, 4];
        request.put_u32_le(OPTION_GLOBAL_SUMMARY);
        let response = responder.handle_extended(&request, Instant::now());

        assert_eq!(&[1, 2, 3, 4], &response[0..4]);
        assert_eq!(OPTION_GLOBAL_SUMMARY, (&response[4..8]).get_u32_le());
        assert_eq!(10u32, (&response[8..12]).get_u32_le());
        assert_eq!(3u32, (&response[12..16]).get_u32_le());
        assert_eq!(16, response.len());
    }

    #[test]
    fn extended_ping_arena_summary_is_null_and_zero_terminated() {
        let responder = PingResponder::new(
            Box::new(Fixed {
                total: 10,
                playing: 3,
                arenas: vec![ArenaPopulation { name: "ab".into(), total: 5, playing: 2 }],
            }),
            Duration::from_secs(2),
            SimplePingPopulationMode::Total,
        );
        let mut request = vec![0, 0, 0, 0];
        request.put_u32_le(OPTION_ARENA_SUMMARY);
        let response = responder.handle_extended(&request, Instant::now());

        let tail = &response[8..];
        assert_eq!(b'a', tail[0]);
        assert_eq!(b'b', tail[1]);
        assert_eq!(0, tail[2]);
        assert_eq!(5u16, (&tail[3..5]).get_u16_le());
        assert_eq!(2u16, (&tail[5..7]).get_u16_le());
        assert_eq!(0, tail[7]);
        assert_eq!(8, tail.len());
    }
}
