//! Per-cache counters
//!
//! One [`CacheStats`] lives in every store and is shared (`Arc`) with the
//! registry and the Prometheus exporter. All counters are relaxed atomics.

use crate::cache::EvictionStats;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Live counters of one cache
#[derive(Debug)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    load_time_us: AtomicU64,
    coalesced_waits: AtomicU64,
    invalidations: AtomicU64,
    invalidated_entries: AtomicU64,
    compressions: AtomicU64,
    decompressions: AtomicU64,
    decompression_failures: AtomicU64,
    eviction_stats: Mutex<EvictionStats>,
    created_at: DateTime<Utc>,
}

/// Serializable point-in-time copy of [`CacheStats`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub loads: u64,
    pub load_failures: u64,
    pub avg_load_ms: f64,
    pub coalesced_waits: u64,
    pub invalidations: u64,
    pub invalidated_entries: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub compressions: u64,
    pub decompressions: u64,
    pub decompression_failures: u64,
    pub uptime_seconds: u64,
}

/// Named stats of one registered cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheReport {
    pub name: String,
    pub entries: usize,
    pub stats: StatsSnapshot,
}

impl CacheStats {
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            load_failures: AtomicU64::new(0),
            load_time_us: AtomicU64::new(0),
            coalesced_waits: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            invalidated_entries: AtomicU64::new(0),
            compressions: AtomicU64::new(0),
            decompressions: AtomicU64::new(0),
            decompression_failures: AtomicU64::new(0),
            eviction_stats: Mutex::new(EvictionStats::default()),
            created_at: Utc::now(),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A `Loader::create` call finished
    pub fn record_load(&self, elapsed: Duration, success: bool) {
        if success {
            self.loads.fetch_add(1, Ordering::Relaxed);
        } else {
            self.load_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.load_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// A caller waited on another caller's population
    pub fn record_coalesced_wait(&self) {
        self.coalesced_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self, entries: usize) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        self.invalidated_entries
            .fetch_add(entries as u64, Ordering::Relaxed);
    }

    pub fn record_eviction(&self, records: usize, by_ttl: bool) {
        self.eviction_stats.lock().record_eviction(records, by_ttl);
    }

    pub fn record_compression(&self) {
        self.compressions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decompression(&self, success: bool) {
        if success {
            self.decompressions.fetch_add(1, Ordering::Relaxed);
        } else {
            self.decompression_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Successful populations
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn load_failures(&self) -> u64 {
        self.load_failures.load(Ordering::Relaxed)
    }

    pub fn coalesced_waits(&self) -> u64 {
        self.coalesced_waits.load(Ordering::Relaxed)
    }

    /// Calculate hit rate
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Get eviction statistics
    pub fn eviction_stats(&self) -> EvictionStats {
        self.eviction_stats.lock().clone()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let loads = self.loads();
        let attempts = loads + self.load_failures();
        let load_time_us = self.load_time_us.load(Ordering::Relaxed);
        let evictions = self.eviction_stats();

        StatsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            hit_rate: self.hit_rate(),
            loads,
            load_failures: self.load_failures(),
            avg_load_ms: if attempts == 0 {
                0.0
            } else {
                load_time_us as f64 / attempts as f64 / 1000.0
            },
            coalesced_waits: self.coalesced_waits(),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            invalidated_entries: self.invalidated_entries.load(Ordering::Relaxed),
            evictions: evictions.evictions_by_policy,
            expirations: evictions.evictions_by_ttl,
            compressions: self.compressions.load(Ordering::Relaxed),
            decompressions: self.decompressions.load(Ordering::Relaxed),
            decompression_failures: self.decompression_failures.load(Ordering::Relaxed),
            uptime_seconds: Utc::now()
                .signed_duration_since(self.created_at)
                .num_seconds()
                .max(0) as u64,
        }
    }
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats::new();
        assert_eq!(stats.hit_rate(), 0.0);

        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        assert_eq!(stats.hit_rate(), 0.75);
    }

    #[test]
    fn test_snapshot() {
        let stats = CacheStats::new();
        stats.record_load(Duration::from_millis(4), true);
        stats.record_load(Duration::from_millis(2), false);
        stats.record_invalidation(3);
        stats.record_eviction(10, false);
        stats.record_eviction(5, true);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.loads, 1);
        assert_eq!(snapshot.load_failures, 1);
        assert!((snapshot.avg_load_ms - 3.0).abs() < 0.01);
        assert_eq!(snapshot.invalidations, 1);
        assert_eq!(snapshot.invalidated_entries, 3);
        assert_eq!(snapshot.evictions, 1);
        assert_eq!(snapshot.expirations, 1);
    }
}
