//! Delivery statistics
//!
//! Process-lifetime counters. Each counter only ever increases; at quiescence
//! `events_enqueued == events_sent + events_dropped`.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters shared by the batcher and tracker
#[derive(Debug, Default)]
pub struct StatsRegistry {
    /// Events accepted by the batcher
    pub events_enqueued: AtomicU64,
    /// Events delivered (or stored locally)
    pub events_sent: AtomicU64,
    /// Events given up on after retries, a permanent failure or shutdown
    pub events_dropped: AtomicU64,
    /// Events refused by backpressure or after shutdown
    pub events_rejected: AtomicU64,
    /// Batches delivered
    pub batches_sent: AtomicU64,
    /// Batches given up on
    pub batches_failed: AtomicU64,
    /// Send retries performed
    pub retries: AtomicU64,
    /// Pricing lookups that found the model
    pub pricing_cache_hits: AtomicU64,
    /// Pricing lookups that fell back to default rates
    pub pricing_cache_misses: AtomicU64,
}

/// Point-in-time copy of [`StatsRegistry`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Events accepted by the batcher
    pub events_enqueued: u64,
    /// Events delivered (or stored locally)
    pub events_sent: u64,
    /// Events given up on
    pub events_dropped: u64,
    /// Events refused
    pub events_rejected: u64,
    /// Batches delivered
    pub batches_sent: u64,
    /// Batches given up on
    pub batches_failed: u64,
    /// Send retries performed
    pub retries: u64,
    /// Pricing hits
    pub pricing_cache_hits: u64,
    /// Pricing misses
    pub pricing_cache_misses: u64,
}

impl StatsSnapshot {
    /// Events accepted but neither sent nor dropped yet
    #[must_use]
    pub fn in_transit(&self) -> u64 {
        self.events_enqueued
            .saturating_sub(self.events_sent + self.events_dropped)
    }
}

impl StatsRegistry {
    /// Create zeroed counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pricing lookup outcome
    pub fn record_pricing(&self, hit: bool) {
        if hit {
            self.pricing_cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.pricing_cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a delivered batch
    pub fn record_sent(&self, events: usize) {
        self.events_sent.fetch_add(events as u64, Ordering::Relaxed);
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an abandoned batch
    pub fn record_failed(&self, events: usize) {
        self.events_dropped.fetch_add(events as u64, Ordering::Relaxed);
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Read every counter
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_enqueued: self.events_enqueued.load(Ordering::Relaxed),
            events_sent: self.events_sent.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            pricing_cache_hits: self.pricing_cache_hits.load(Ordering::Relaxed),
            pricing_cache_misses: self.pricing_cache_misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = StatsRegistry::new();
        stats.events_enqueued.fetch_add(5, Ordering::Relaxed);
        stats.record_sent(3);
        stats.record_failed(1);
        stats.record_pricing(true);
        stats.record_pricing(false);

        let snap = stats.snapshot();
        assert_eq!(snap.events_sent, 3);
        assert_eq!(snap.batches_sent, 1);
        assert_eq!(snap.events_dropped, 1);
        assert_eq!(snap.batches_failed, 1);
        assert_eq!(snap.pricing_cache_hits, 1);
        assert_eq!(snap.pricing_cache_misses, 1);
        assert_eq!(snap.in_transit(), 1);
    }
}
