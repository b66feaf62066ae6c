//! Pool counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lock-free pool counters
#[derive(Debug, Default)]
pub struct PoolMetrics {
    /// Requests served from a live pooled session
    pub hits: AtomicU64,
    /// Requests that started a connect
    pub misses: AtomicU64,
    /// Requests that joined a connect already in flight
    pub joined: AtomicU64,
    /// Connects that produced a session
    pub connects: AtomicU64,
    /// Connects that failed
    pub connect_failures: AtomicU64,
    /// Sessions removed for capacity or disconnection
    pub evictions: AtomicU64,
    /// Sessions removed for being idle
    pub idle_evictions: AtomicU64,
    /// Session closes that reported an error
    pub close_failures: AtomicU64,
}

/// Point in time copy of [`PoolMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct PoolMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub joined: u64,
    pub connects: u64,
    pub connect_failures: u64,
    pub evictions: u64,
    pub idle_evictions: u64,
    pub close_failures: u64,
}

impl PoolMetrics {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Share of requests served without connecting, as a percentage
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let total = hits
            + self.misses.load(Ordering::Relaxed) as f64
            + self.joined.load(Ordering::Relaxed) as f64;
        if total == 0.0 {
            0.0
        } else {
            (hits / total) * 100.0
        }
    }

    /// Copy the current values
    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            idle_evictions: self.idle_evictions.load(Ordering::Relaxed),
            close_failures: self.close_failures.load(Ordering::Relaxed),
        }
    }
}
