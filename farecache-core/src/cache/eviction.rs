//! Cache eviction policies

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Victim selection when a bounded cache is over capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least Recently Used
    Lru,
    /// Least Frequently Used
    Lfu,
    /// Soonest expiry first; entries also lapse after the configured TTL
    Ttl,
}

/// Bookkeeping kept next to every resident entry
#[derive(Debug)]
pub struct EntryMeta {
    /// When the entry was populated
    pub loaded_at: DateTime<Utc>,
    /// Expiry for TTL caches
    pub expires_at: Option<DateTime<Utc>>,
    last_access: AtomicU64,
    last_access_ms: AtomicU64,
    access_count: AtomicU64,
}

impl EntryMeta {
    /// Metadata for an entry populated now
    pub fn new(tick: u64, ttl_secs: Option<u64>) -> Self {
        let now = Utc::now();
        Self {
            loaded_at: now,
            expires_at: ttl_secs.map(|secs| now + chrono::Duration::seconds(secs as i64)),
            last_access: AtomicU64::new(tick),
            last_access_ms: AtomicU64::new(now.timestamp_millis().max(0) as u64),
            access_count: AtomicU64::new(0),
        }
    }

    /// Record a read; `tick` orders accesses across the whole store
    pub fn touch(&self, tick: u64) {
        self.last_access.store(tick, Ordering::Relaxed);
        self.last_access_ms
            .store(Utc::now().timestamp_millis().max(0) as u64, Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Milliseconds since the last read (or population)
    pub fn idle_ms(&self, now: DateTime<Utc>) -> u64 {
        (now.timestamp_millis().max(0) as u64)
            .saturating_sub(self.last_access_ms.load(Ordering::Relaxed))
    }

    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Point-in-time view used to rank eviction victims
    pub fn candidate<K>(&self, key: K) -> EvictionCandidate<K> {
        EvictionCandidate {
            key,
            last_access: self.last_access.load(Ordering::Relaxed),
            access_count: self.access_count(),
            expires_at: self.expires_at,
        }
    }
}

/// Snapshot of one entry's ranking data
#[derive(Debug, Clone)]
pub struct EvictionCandidate<K> {
    pub key: K,
    pub last_access: u64,
    pub access_count: u64,
    pub expires_at: Option<DateTime<Utc>>,
}

impl EvictionPolicy {
    /// Calculate eviction score for a candidate
    /// Lower score = higher priority for eviction
    pub fn calculate_score<K>(&self, candidate: &EvictionCandidate<K>, now: DateTime<Utc>) -> f64 {
        match self {
            EvictionPolicy::Lru => candidate.last_access as f64,
            EvictionPolicy::Lfu => candidate.access_count as f64,
            EvictionPolicy::Ttl => match candidate.expires_at {
                Some(expires_at) => expires_at.signed_duration_since(now).num_milliseconds() as f64,
                None => f64::MAX,
            },
        }
    }

    /// Select keys to evict from a set of candidates
    pub fn select_victims<K>(&self, candidates: Vec<EvictionCandidate<K>>, count: usize) -> Vec<K> {
        if count == 0 {
            return Vec::new();
        }

        let now = Utc::now();
        let mut scored: Vec<_> = candidates
            .into_iter()
            .map(|c| (self.calculate_score(&c, now), c.last_access, c.key))
            .collect();

        // Ties fall back to recency
        scored.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });

        scored.into_iter().take(count).map(|(_, _, key)| key).collect()
    }
}

/// Eviction statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvictionStats {
    /// Total number of evictions
    pub total_evictions: u64,
    /// Evictions to stay within capacity
    pub evictions_by_policy: u64,
    /// Evictions by TTL expiration
    pub evictions_by_ttl: u64,
    /// Total records evicted
    pub records_evicted: u64,
}

impl EvictionStats {
    /// Record an eviction
    pub fn record_eviction(&mut self, records: usize, by_ttl: bool) {
        self.total_evictions += 1;
        self.records_evicted += records as u64;

        if by_ttl {
            self.evictions_by_ttl += 1;
        } else {
            self.evictions_by_policy += 1;
        }
    }
}
