use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-pool counters. Incremented on every outcome, never part of error propagation.
#[derive(Debug, Default)]
pub struct PoolStats {
    gets: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    dels: AtomicU64,
    errs: AtomicU64,
    queries: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub enum Stat {
    /// Cached read attempted.
    Get,
    Hit,
    Miss,
    /// Record stored in the cache.
    Put,
    /// Cache entry invalidated.
    Del,
    Err,
    Query,
}

/// Point-in-time copy of [`PoolStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub gets: u64,
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub dels: u64,
    pub errs: u64,
    pub queries: u64,
}

impl PoolStats {
    fn counter(&self, stat: Stat) -> &AtomicU64 {
        match stat {
            Stat::Get => &self.gets,
            Stat::Hit => &self.hits,
            Stat::Miss => &self.misses,
            Stat::Put => &self.puts,
            Stat::Del => &self.dels,
            Stat::Err => &self.errs,
            Stat::Query => &self.queries,
        }
    }

    pub fn incr(&self, stat: Stat) {
        self.counter(stat).fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |stat| self.counter(stat).load(Ordering::Relaxed);
        StatsSnapshot {
            gets: load(Stat::Get),
            hits: load(Stat::Hit),
            misses: load(Stat::Miss),
            puts: load(Stat::Put),
            dels: load(Stat::Del),
            errs: load(Stat::Err),
            queries: load(Stat::Query),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_independent() {
        let stats = PoolStats::default();
        stats.incr(Stat::Hit);
        stats.incr(Stat::Hit);
        stats.incr(Stat::Err);
        let snap = stats.snapshot();
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.errs, 1);
        assert_eq!(snap.misses, 0);
    }
}
