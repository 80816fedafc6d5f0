//! Per-endpoint communication statistics.

use std::time::Duration;

use dashmap::DashMap;

use crate::ring::PeerId;

/// Statistics for one remote endpoint.
#[derive(Clone, Debug, Default)]
pub struct EndpointStat {
    /// Smoothed round-trip time, if any sample has been taken.
    pub rtt: Option<Duration>,
    /// Consecutive timeouts since the last successful exchange.
    pub strikes: u32,
    /// Total number of RTT samples.
    pub samples: u64,
}

/// Rolling RTT/timeout statistics per remote endpoint.
///
/// Shared across all keys of one peer. The repair procedure consults
/// [possibly_failed](StatManager::possibly_failed) to skip endpoints that are
/// suspected dead instead of waiting out another timeout on them.
#[derive(Debug)]
pub struct StatManager {
    table: DashMap<PeerId, EndpointStat>,
    failure_strikes: u32,
}

impl StatManager {
    /// Create a manager; an endpoint counts as possibly failed after
    /// `failure_strikes` consecutive timeouts.
    pub fn new(failure_strikes: u32) -> Self {
        Self {
            table: DashMap::new(),
            failure_strikes,
        }
    }

    /// Record a successful round trip. Clears the timeout strikes.
    pub fn record_rtt(&self, peer: PeerId, rtt: Duration) {
        let mut stat = self.table.entry(peer).or_default();
        stat.rtt = Some(match stat.rtt {
            // EWMA with 1/8 gain, the classic smoothed-RTT estimator.
            Some(old) => (old * 7 + rtt) / 8,
            None => rtt,
        });
        stat.strikes = 0;
        stat.samples += 1;
    }

    /// Record a timed-out exchange with the endpoint.
    pub fn record_timeout(&self, peer: PeerId) {
        let mut stat = self.table.entry(peer).or_default();
        stat.strikes = stat.strikes.saturating_add(1);
    }

    /// Whether the endpoint should be treated as possibly failed and skipped
    /// during repair.
    pub fn possibly_failed(&self, peer: PeerId) -> bool {
        self.table
            .get(&peer)
            .map(|s| s.strikes >= self.failure_strikes)
            .unwrap_or(false)
    }

    /// Current statistics of an endpoint, if any were recorded.
    pub fn snapshot(&self, peer: PeerId) -> Option<EndpointStat> {
        self.table.get(&peer).map(|s| s.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::UniqId;

    #[test]
    fn test_strikes_accumulate_and_clear() {
        let stats = StatManager::new(2);
        let peer = UniqId::from_u64(1);

        assert!(!stats.possibly_failed(peer));
        stats.record_timeout(peer);
        assert!(!stats.possibly_failed(peer));
        stats.record_timeout(peer);
        assert!(stats.possibly_failed(peer));

        stats.record_rtt(peer, Duration::from_millis(10));
        assert!(!stats.possibly_failed(peer));
        assert_eq!(stats.snapshot(peer).unwrap().samples, 1);
    }

    #[test]
    fn test_rtt_is_smoothed() {
        let stats = StatManager::new(2);
        let peer = UniqId::from_u64(1);

        stats.record_rtt(peer, Duration::from_millis(80));
        stats.record_rtt(peer, Duration::from_millis(160));
        let rtt = stats.snapshot(peer).unwrap().rtt.unwrap();
        assert_eq!(rtt, Duration::from_millis(90));
    }
}
