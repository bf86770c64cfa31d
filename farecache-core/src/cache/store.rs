//! Typed reference-data cache
//!
//! A [`CacheStore`] maps fully specified keys to shared immutable
//! collections. Misses are populated through the store's [`Loader`] with at
//! most one load per key in flight; concurrent callers for that key share
//! the leader's outcome, including its error. Resident entries are either
//! live or compressed, and the representation never changes what a caller
//! receives.

use crate::cache::eviction::EntryMeta;
use crate::cache::expiry::ExpiryQueue;
use crate::cache::inflight::{InflightLoad, InflightRole, InflightTable};
use crate::compress::{CompressedRecord, Compressor};
use crate::config::{CacheSettings, Capacity};
use crate::error::{CacheError, CacheResult};
use crate::key::{CacheKey, KeyPattern, ObjectKey};
use crate::loader::Loader;
use crate::monitoring::{CacheStats, SlowLoadLogger};
use crate::record::{CachedCollection, Record};
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// How a resident entry is held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Representation {
    Live,
    Compressed,
}

/// Outcome of one maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub compressed: usize,
}

enum Slot<R> {
    Live(CachedCollection<R>),
    Compressed(Arc<CompressedRecord>),
}

struct Entry<R> {
    slot: Slot<R>,
    meta: EntryMeta,
}

impl<R> Entry<R> {
    fn holds(&self, collection: &CachedCollection<R>) -> bool {
        matches!(&self.slot, Slot::Live(live) if CachedCollection::ptr_eq(live, collection))
    }

    fn holds_compressed(&self, record: &Arc<CompressedRecord>) -> bool {
        matches!(&self.slot, Slot::Compressed(held) if Arc::ptr_eq(held, record))
    }

    fn record_count(&self) -> usize {
        match &self.slot {
            Slot::Live(collection) => collection.len(),
            Slot::Compressed(record) => record.record_count(),
        }
    }
}

/// Cache of `K -> [R]` populated on demand
pub struct CacheStore<K: CacheKey, R: Record> {
    name: String,
    entries: DashMap<K, Entry<R>>,
    inflight: InflightTable<K, R>,
    loader: Arc<dyn Loader<K, R>>,
    settings: CacheSettings,
    compressor: Compressor,
    expiry: ExpiryQueue<K>,
    tick: AtomicU64,
    stats: Arc<CacheStats>,
    slow_loads: Option<Arc<SlowLoadLogger>>,
}

impl<K: CacheKey, R: Record> CacheStore<K, R> {
    pub fn new<L>(name: impl Into<String>, settings: CacheSettings, loader: L) -> Self
    where
        L: Loader<K, R> + 'static,
    {
        Self::with_loader(name, settings, Arc::new(loader))
    }

    /// Build around a loader shared with other stores
    pub fn with_loader(
        name: impl Into<String>,
        settings: CacheSettings,
        loader: Arc<dyn Loader<K, R>>,
    ) -> Self {
        Self {
            name: name.into(),
            entries: DashMap::new(),
            inflight: InflightTable::new(),
            loader,
            settings,
            compressor: Compressor::default(),
            expiry: ExpiryQueue::new(),
            tick: AtomicU64::new(0),
            stats: Arc::new(CacheStats::new()),
            slow_loads: None,
        }
    }

    /// Report loads slower than the logger's threshold
    pub fn with_slow_load_logger(mut self, logger: Arc<SlowLoadLogger>) -> Self {
        self.slow_loads = Some(logger);
        self
    }

    pub fn with_compressor(mut self, compressor: Compressor) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn stats(&self) -> &Arc<CacheStats> {
        &self.stats
    }

    /// Number of resident keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Representation of a resident key, `None` when absent
    pub fn representation(&self, key: &K) -> Option<Representation> {
        self.entries.get(key).map(|entry| match entry.slot {
            Slot::Live(_) => Representation::Live,
            Slot::Compressed(_) => Representation::Compressed,
        })
    }

    /// Loads currently running
    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }

    /// Collection for `key`, loading it on a miss.
    ///
    /// An empty collection means the backing store has no rows. A failed
    /// load is returned to every caller waiting on it and leaves the key
    /// absent, so the next call tries again.
    pub fn get(&self, key: &K) -> CacheResult<CachedCollection<R>> {
        if let Some(found) = self.lookup(key)? {
            self.stats.record_hit();
            return Ok(found);
        }

        self.stats.record_miss();
        debug!(cache = %self.name, key = ?key, "Cache miss");

        match self.inflight.claim(key) {
            InflightRole::Leader(slot) => self.lead(key, &slot),
            InflightRole::Waiter(slot) => {
                self.stats.record_coalesced_wait();
                slot.wait()
            }
        }
    }

    /// Insert a collection directly, replacing any resident one
    pub fn put(&self, key: K, collection: CachedCollection<R>) {
        self.insert_entry(key, Slot::Live(collection));
    }

    /// Pre-populate from [`Loader::load_all`]; returns the number of keys
    pub fn warm(&self) -> CacheResult<usize> {
        let started = Instant::now();
        let groups = self.loader.load_all().map_err(|e| {
            warn!(cache = %self.name, "Startup load failed: {}", e);
            CacheError::from(e)
        })?;

        let count = groups.len();
        for (key, records) in groups {
            self.put(key, CachedCollection::new(records));
        }

        info!(
            cache = %self.name,
            keys = count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cache warmed"
        );
        Ok(count)
    }

    /// Remove every resident entry matching an invalidation key
    pub fn invalidate(&self, key: &ObjectKey) -> CacheResult<usize> {
        let pattern = KeyPattern::<K>::resolve(key).map_err(|e| {
            error!(cache = %self.name, key = %key, "Cannot translate invalidation key: {}", e);
            e
        })?;

        let removed = self.invalidate_pattern(&pattern);
        if removed == 0 {
            // Usual right after startup, before anything was loaded
            warn!(cache = %self.name, key = %key, "Invalidate matched no resident entry");
        } else {
            info!(cache = %self.name, key = %key, removed, "Invalidated");
        }
        Ok(removed)
    }

    /// Remove every resident entry matching a resolved pattern.
    ///
    /// Loads in flight for matching keys still answer their callers but do
    /// not become resident.
    pub fn invalidate_pattern(&self, pattern: &KeyPattern<K>) -> usize {
        let stale = self.inflight.mark_stale(|k| pattern.matches(k));

        let removed: Vec<K> = match pattern {
            KeyPattern::Exact(key) => self.entries.remove(key).map(|(k, _)| k).into_iter().collect(),
            KeyPattern::Scan(_) => {
                let mut removed = Vec::new();
                self.entries.retain(|k, _| {
                    if pattern.matches(k) {
                        removed.push(k.clone());
                        false
                    } else {
                        true
                    }
                });
                removed
            }
        };

        self.stats.record_invalidation(removed.len());

        if self.settings.load_on_invalidate {
            for key in &removed {
                // Joining that load would hand back pre-invalidation rows
                if stale.contains(key) {
                    debug!(cache = %self.name, key = ?key, "Reload skipped, stale load still in flight");
                    continue;
                }
                if let Err(e) = self.get(key) {
                    warn!(cache = %self.name, key = ?key, "Reload after invalidation failed: {}", e);
                }
            }
        }

        removed.len()
    }

    /// Drop every entry; returns how many were resident
    pub fn clear(&self) -> usize {
        self.inflight.mark_stale(|_| true);
        let count = self.entries.len();
        self.entries.clear();
        self.expiry.clear();

        info!(cache = %self.name, entries = count, "Cache cleared");
        count
    }

    /// Drop entries whose TTL has passed
    pub fn expire_due(&self) -> usize {
        let now = Utc::now();
        let mut expired = 0;

        for key in self.expiry.drain_due(now) {
            // The deadline may belong to an entry since replaced
            if let Some((_, entry)) = self
                .entries
                .remove_if(&key, |_, entry| entry.meta.is_expired(now))
            {
                self.stats.record_eviction(entry.record_count(), true);
                expired += 1;
            }
        }

        if expired > 0 {
            debug!(cache = %self.name, expired, "Expired entries removed");
        }
        expired
    }

    /// Compress live entries that have been idle long enough.
    ///
    /// Only entries with at least `compression_threshold` records qualify;
    /// without a threshold nothing is compressed.
    pub fn compress_cold(&self) -> usize {
        let Some(threshold) = self.settings.compression_threshold else {
            return 0;
        };
        let min_idle_ms = self.settings.compress_after_idle_secs.saturating_mul(1000);
        let now = Utc::now();

        let cold: Vec<(K, CachedCollection<R>)> = self
            .entries
            .iter()
            .filter_map(|entry| match &entry.value().slot {
                Slot::Live(collection)
                    if collection.len() >= threshold
                        && entry.value().meta.idle_ms(now) >= min_idle_ms =>
                {
                    Some((entry.key().clone(), collection.clone()))
                }
                _ => None,
            })
            .collect();

        let mut compressed = 0;
        for (key, collection) in cold {
            let record = match self.compressor.compress(&collection) {
                Ok(record) => Arc::new(record),
                Err(e) => {
                    warn!(cache = %self.name, key = ?key, "Compression failed: {}", e);
                    continue;
                }
            };

            if let Some(mut entry) = self.entries.get_mut(&key) {
                if entry.holds(&collection) {
                    entry.slot = Slot::Compressed(record);
                    self.stats.record_compression();
                    compressed += 1;
                }
            }
        }

        if compressed > 0 {
            debug!(cache = %self.name, compressed, "Compressed idle entries");
        }
        compressed
    }

    /// Periodic housekeeping: TTL sweep, then idle compression
    pub fn maintain(&self) -> MaintenanceReport {
        MaintenanceReport {
            expired: self.expire_due(),
            compressed: self.compress_cold(),
        }
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Resident collection, restoring compressed entries
    fn lookup(&self, key: &K) -> CacheResult<Option<CachedCollection<R>>> {
        let compressed = {
            let Some(entry) = self.entries.get(key) else {
                return Ok(None);
            };

            let now = Utc::now();
            if entry.meta.is_expired(now) {
                drop(entry);
                if let Some((_, expired)) = self
                    .entries
                    .remove_if(key, |_, entry| entry.meta.is_expired(now))
                {
                    self.stats.record_eviction(expired.record_count(), true);
                }
                return Ok(None);
            }

            entry.meta.touch(self.next_tick());
            match &entry.slot {
                Slot::Live(collection) => return Ok(Some(collection.clone())),
                Slot::Compressed(record) => Arc::clone(record),
            }
        };

        self.restore(key, compressed).map(Some)
    }

    /// Decompress outside the map lock, then swap the entry back to live
    fn restore(&self, key: &K, record: Arc<CompressedRecord>) -> CacheResult<CachedCollection<R>> {
        match self.compressor.uncompress::<R>(&record) {
            Ok(collection) => {
                self.stats.record_decompression(true);
                if let Some(mut entry) = self.entries.get_mut(key) {
                    if entry.holds_compressed(&record) {
                        entry.slot = Slot::Live(collection.clone());
                    } else if let Slot::Live(current) = &entry.slot {
                        // Another reader restored it first
                        return Ok(current.clone());
                    }
                }
                Ok(collection)
            }
            Err(e) => {
                self.stats.record_decompression(false);
                self.entries
                    .remove_if(key, |_, entry| entry.holds_compressed(&record));
                warn!(cache = %self.name, key = ?key, "Dropped undecodable entry: {}", e);
                Err(e)
            }
        }
    }

    fn lead(&self, key: &K, slot: &Arc<InflightLoad<R>>) -> CacheResult<CachedCollection<R>> {
        // A previous leader may have finished between our lookup and claim
        if let Ok(Some(found)) = self.lookup(key) {
            self.inflight.release(key, slot, Ok(found.clone()));
            return Ok(found);
        }

        let loaded = match catch_unwind(AssertUnwindSafe(|| self.load(key))) {
            Ok(loaded) => loaded,
            Err(payload) => {
                error!(
                    cache = %self.name,
                    key = ?key,
                    "Loader panicked: {}",
                    panic_message(payload.as_ref())
                );
                self.inflight.release(
                    key,
                    slot,
                    Err(CacheError::LoaderPanicked(format!("{:?}", key))),
                );
                resume_unwind(payload)
            }
        };

        let outcome = loaded.map(|records| {
            let collection = CachedCollection::new(records);
            self.admit(key, &collection, slot);
            collection
        });
        self.inflight.release(key, slot, outcome.clone());
        outcome
    }

    fn load(&self, key: &K) -> CacheResult<Vec<R>> {
        let tracker = self
            .slow_loads
            .as_ref()
            .map(|logger| logger.start_load(&self.name, format!("{:?}", key)));
        let started = Instant::now();

        let result = self.loader.create(key);

        self.stats.record_load(started.elapsed(), result.is_ok());
        if let (Some(logger), Some(tracker)) = (&self.slow_loads, tracker) {
            logger.finish_load(tracker, result.as_ref().ok().map(|rows| rows.len()));
        }

        match result {
            Ok(records) => {
                debug!(
                    cache = %self.name,
                    key = ?key,
                    records = records.len(),
                    elapsed_us = started.elapsed().as_micros() as u64,
                    "Loaded"
                );
                Ok(records)
            }
            Err(e) => {
                warn!(cache = %self.name, key = ?key, "Load failed: {}", e);
                Err(e.into())
            }
        }
    }

    fn admit(&self, key: &K, collection: &CachedCollection<R>, slot: &InflightLoad<R>) {
        self.insert_entry(key.clone(), Slot::Live(collection.clone()));

        // Checked after the insert; an invalidation marks before it removes
        if slot.is_stale() {
            self.entries.remove_if(key, |_, entry| entry.holds(collection));
            debug!(cache = %self.name, key = ?key, "Load overlapped an invalidation, not kept");
        }
    }

    fn insert_entry(&self, key: K, slot: Slot<R>) {
        let meta = EntryMeta::new(self.next_tick(), self.settings.entry_ttl());
        if let Some(expires_at) = meta.expires_at {
            self.expiry.schedule(key.clone(), expires_at);
        }

        self.entries.insert(key.clone(), Entry { slot, meta });
        self.enforce_capacity(&key);
    }

    /// Evict down to capacity, never choosing `keep`
    fn enforce_capacity(&self, keep: &K) {
        let Capacity::Bounded(max) = self.settings.capacity() else {
            return;
        };
        let len = self.entries.len();
        if len <= max {
            return;
        }

        let candidates: Vec<_> = self
            .entries
            .iter()
            .filter(|entry| entry.key() != keep)
            .map(|entry| entry.value().meta.candidate(entry.key().clone()))
            .collect();

        let victims = self
            .settings
            .eviction_policy
            .select_victims(candidates, len - max);

        for victim in victims {
            if let Some((_, entry)) = self.entries.remove(&victim) {
                self.stats.record_eviction(entry.record_count(), false);
                debug!(cache = %self.name, key = ?victim, "Evicted");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl<K: CacheKey, R: Record> fmt::Debug for CacheStore<K, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("name", &self.name)
            .field("entries", &self.entries.len())
            .field("inflight", &self.inflight.len())
            .finish()
    }
}
