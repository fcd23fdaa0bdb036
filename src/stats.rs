use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::info;

use crate::model::Network;

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    ignored: AtomicU64,
    relayed: AtomicU64,
    rejected: AtomicU64,
}

/// Relay counters per network. `received`/`ignored` count by origin,
/// `relayed`/`rejected` by destination.
#[derive(Debug)]
pub struct RelayStats {
    started_at: Instant,
    discord: Counters,
    irc: Counters,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub ignored: u64,
    pub relayed: u64,
    pub rejected: u64,
    pub dropped: u64,
    pub rate_limit_overflows: u64,
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            discord: Counters::default(),
            irc: Counters::default(),
        }
    }

    fn counters(&self, network: Network) -> &Counters {
        match network {
            Network::Discord => &self.discord,
            Network::Irc => &self.irc,
        }
    }

    pub fn message_received(&self, origin: Network) {
        self.counters(origin).received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_ignored(&self, origin: Network) {
        self.counters(origin).ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_relayed(&self, destination: Network) {
        self.counters(destination).relayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_rejected(&self, destination: Network) {
        self.counters(destination).rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Queue drops and limiter overflows are counted where they happen and
    /// passed in here.
    pub fn snapshot(&self, network: Network, dropped: u64, rate_limit_overflows: u64) -> StatsSnapshot {
        let counters = self.counters(network);
        StatsSnapshot {
            received: counters.received.load(Ordering::Relaxed),
            ignored: counters.ignored.load(Ordering::Relaxed),
            relayed: counters.relayed.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            dropped,
            rate_limit_overflows,
        }
    }

    pub fn log_summary(&self, network: Network, snapshot: StatsSnapshot) {
        info!(
            %network,
            uptime_secs = self.started_at.elapsed().as_secs(),
            received = snapshot.received,
            ignored = snapshot.ignored,
            relayed = snapshot.relayed,
            rejected = snapshot.rejected,
            dropped = snapshot.dropped,
            rate_limit_overflows = snapshot.rate_limit_overflows,
            "relay statistics"
        );
    }
}
