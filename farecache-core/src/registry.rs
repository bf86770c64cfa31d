//! Named cache registry
//!
//! A [`CacheRegistry`] is built once at startup and passed by reference to
//! everything that reads reference data. It owns every store, hands out
//! typed handles by name, and routes invalidation keys by table name to the
//! current store and its historical counterpart.

use crate::cache::{CacheStore, MaintenanceReport};
use crate::config::FrameworkConfig;
use crate::error::{CacheError, CacheResult};
use crate::historical::{HistoricalKey, HistoricalPartitioner};
use crate::key::{CacheKey, ObjectKey};
use crate::loader::Loader;
use crate::monitoring::{CacheReport, CacheStats, SlowLoadLogger};
use crate::record::Record;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;
use tracing::{info, warn};

/// Name suffix of a historical store (`TaxRules` -> `TaxRulesHistorical`)
pub const HISTORICAL_SUFFIX: &str = "Historical";

/// Name of the historical store paired with `cache`
pub fn historical_name(cache: &str) -> String {
    format!("{}{}", cache, HISTORICAL_SUFFIX)
}

/// Result of routing one invalidation key to every matching cache
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutedInvalidation {
    /// Entries removed by the targets that accepted the key
    pub removed: usize,
    /// First rejection, if any target refused the key
    pub error: Option<CacheError>,
}

/// Type-erased operations the registry runs across all caches
pub trait ManagedCache: Send + Sync {
    fn name(&self) -> &str;

    fn invalidate(&self, key: &ObjectKey) -> CacheResult<usize>;

    fn clear(&self) -> usize;

    fn warm(&self) -> CacheResult<usize>;

    fn len(&self) -> usize;

    fn stats(&self) -> Arc<CacheStats>;

    fn maintain(&self) -> MaintenanceReport;
}

impl<K: CacheKey, R: Record> ManagedCache for CacheStore<K, R> {
    fn name(&self) -> &str {
        CacheStore::name(self)
    }

    fn invalidate(&self, key: &ObjectKey) -> CacheResult<usize> {
        CacheStore::invalidate(self, key)
    }

    fn clear(&self) -> usize {
        CacheStore::clear(self)
    }

    fn warm(&self) -> CacheResult<usize> {
        CacheStore::warm(self)
    }

    fn len(&self) -> usize {
        CacheStore::len(self)
    }

    fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(CacheStore::stats(self))
    }

    fn maintain(&self) -> MaintenanceReport {
        CacheStore::maintain(self)
    }
}

impl<K: CacheKey, R: Record> ManagedCache for HistoricalPartitioner<K, R> {
    fn name(&self) -> &str {
        HistoricalPartitioner::name(self)
    }

    fn invalidate(&self, key: &ObjectKey) -> CacheResult<usize> {
        HistoricalPartitioner::invalidate(self, key)
    }

    fn clear(&self) -> usize {
        self.store().clear()
    }

    fn warm(&self) -> CacheResult<usize> {
        self.store().warm()
    }

    fn len(&self) -> usize {
        self.store().len()
    }

    fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(self.store().stats())
    }

    fn maintain(&self) -> MaintenanceReport {
        self.store().maintain()
    }
}

struct Registered {
    managed: Arc<dyn ManagedCache>,
    typed: Arc<dyn Any + Send + Sync>,
}

/// All caches of one process
pub struct CacheRegistry {
    caches: DashMap<String, Registered>,
    config: FrameworkConfig,
    slow_loads: Option<Arc<SlowLoadLogger>>,
}

impl CacheRegistry {
    pub fn new(config: FrameworkConfig) -> Self {
        Self {
            caches: DashMap::new(),
            config,
            slow_loads: None,
        }
    }

    /// Attach a slow load logger to stores built by this registry
    pub fn with_slow_load_logger(mut self, logger: Arc<SlowLoadLogger>) -> Self {
        self.slow_loads = Some(logger);
        self
    }

    pub fn config(&self) -> &FrameworkConfig {
        &self.config
    }

    /// Whether past ticket dates may use historical stores
    pub fn historical_enabled(&self) -> bool {
        self.config.historical.enabled
    }

    /// Build a store from the configured settings for `name` and register it
    pub fn create_store<K, R, L>(&self, name: &str, loader: L) -> CacheResult<Arc<CacheStore<K, R>>>
    where
        K: CacheKey,
        R: Record,
        L: Loader<K, R> + 'static,
    {
        let mut store = CacheStore::new(name, self.config.settings_for(name).clone(), loader);
        if let Some(logger) = &self.slow_loads {
            store = store.with_slow_load_logger(Arc::clone(logger));
        }
        self.register_store(store)
    }

    /// Build the historical store paired with `cache` and register it
    pub fn create_historical<K, R, L>(
        &self,
        cache: &str,
        loader: L,
    ) -> CacheResult<Arc<HistoricalPartitioner<K, R>>>
    where
        K: CacheKey,
        R: Record,
        L: Loader<HistoricalKey<K>, R> + 'static,
    {
        let name = historical_name(cache);
        let mut store = CacheStore::new(name.as_str(), self.config.settings_for(&name).clone(), loader);
        if let Some(logger) = &self.slow_loads {
            store = store.with_slow_load_logger(Arc::clone(logger));
        }
        self.register_historical(HistoricalPartitioner::from_store(store))
    }

    pub fn register_store<K: CacheKey, R: Record>(
        &self,
        store: CacheStore<K, R>,
    ) -> CacheResult<Arc<CacheStore<K, R>>> {
        let store = Arc::new(store);
        self.insert(
            store.name().to_string(),
            Arc::clone(&store) as Arc<dyn ManagedCache>,
            Arc::clone(&store) as Arc<dyn Any + Send + Sync>,
        )?;
        Ok(store)
    }

    pub fn register_historical<K: CacheKey, R: Record>(
        &self,
        partitioner: HistoricalPartitioner<K, R>,
    ) -> CacheResult<Arc<HistoricalPartitioner<K, R>>> {
        let partitioner = Arc::new(partitioner);
        self.insert(
            partitioner.name().to_string(),
            Arc::clone(&partitioner) as Arc<dyn ManagedCache>,
            Arc::clone(&partitioner) as Arc<dyn Any + Send + Sync>,
        )?;
        Ok(partitioner)
    }

    fn insert(
        &self,
        name: String,
        managed: Arc<dyn ManagedCache>,
        typed: Arc<dyn Any + Send + Sync>,
    ) -> CacheResult<()> {
        match self.caches.entry(name) {
            Entry::Occupied(occupied) => Err(CacheError::AlreadyRegistered(occupied.key().clone())),
            Entry::Vacant(vacant) => {
                info!(cache = %vacant.key(), "Cache registered");
                vacant.insert(Registered { managed, typed });
                Ok(())
            }
        }
    }

    fn typed(&self, name: &str) -> CacheResult<Arc<dyn Any + Send + Sync>> {
        self.caches
            .get(name)
            .map(|registered| Arc::clone(&registered.typed))
            .ok_or_else(|| CacheError::UnknownCache(name.to_string()))
    }

    /// Typed handle to a registered store
    pub fn store<K: CacheKey, R: Record>(&self, name: &str) -> CacheResult<Arc<CacheStore<K, R>>> {
        self.typed(name)?
            .downcast::<CacheStore<K, R>>()
            .map_err(|_| CacheError::TypeMismatch(name.to_string()))
    }

    /// Typed handle to the historical store paired with `cache`
    pub fn historical<K: CacheKey, R: Record>(
        &self,
        cache: &str,
    ) -> CacheResult<Arc<HistoricalPartitioner<K, R>>> {
        let name = historical_name(cache);
        self.typed(&name)?
            .downcast::<HistoricalPartitioner<K, R>>()
            .map_err(|_| CacheError::TypeMismatch(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    pub fn has_historical(&self, cache: &str) -> bool {
        self.contains(&historical_name(cache))
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn managed(&self) -> Vec<Arc<dyn ManagedCache>> {
        self.caches
            .iter()
            .map(|e| Arc::clone(&e.value().managed))
            .collect()
    }

    /// Route an invalidation key to the store named by its table and to
    /// that store's historical counterpart.
    ///
    /// Every target is attempted; the first error is returned.
    pub fn invalidate(&self, key: &ObjectKey) -> CacheResult<usize> {
        let routed = self.route_invalidation(key);
        match routed.error {
            Some(e) => Err(e),
            None => Ok(routed.removed),
        }
    }

    /// Like [`CacheRegistry::invalidate`], but keeps the removals of the
    /// targets that accepted the key when another target rejected it
    pub fn route_invalidation(&self, key: &ObjectKey) -> RoutedInvalidation {
        let targets: Vec<Arc<dyn ManagedCache>> = [key.table().to_string(), historical_name(key.table())]
            .iter()
            .filter_map(|name| self.caches.get(name).map(|r| Arc::clone(&r.managed)))
            .collect();

        if targets.is_empty() {
            warn!(key = %key, "Invalidation for unregistered cache");
            return RoutedInvalidation {
                removed: 0,
                error: Some(CacheError::UnknownCache(key.table().to_string())),
            };
        }

        let mut routed = RoutedInvalidation::default();
        for cache in targets {
            match cache.invalidate(key) {
                Ok(n) => routed.removed += n,
                Err(e) => {
                    routed.error.get_or_insert(e);
                }
            }
        }
        routed
    }

    /// Clear every cache; returns total entries dropped
    pub fn clear_all(&self) -> usize {
        self.managed().iter().map(|cache| cache.clear()).sum()
    }

    /// Run startup loads of every cache; returns total keys loaded
    pub fn warm_all(&self) -> CacheResult<usize> {
        let mut total = 0;
        for cache in self.managed() {
            total += cache.warm()?;
        }
        Ok(total)
    }

    /// TTL sweep and idle compression across all caches
    pub fn maintain(&self) -> MaintenanceReport {
        self.managed()
            .iter()
            .map(|cache| cache.maintain())
            .fold(MaintenanceReport::default(), |acc, r| MaintenanceReport {
                expired: acc.expired + r.expired,
                compressed: acc.compressed + r.compressed,
            })
    }

    /// Per-cache statistics, sorted by name
    pub fn stats(&self) -> Vec<CacheReport> {
        let mut reports: Vec<CacheReport> = self
            .managed()
            .iter()
            .map(|cache| CacheReport {
                name: cache.name().to_string(),
                entries: cache.len(),
                stats: cache.stats().snapshot(),
            })
            .collect();
        reports.sort_by(|a, b| a.name.cmp(&b.name));
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheSettings;
    use crate::delete_list::DeleteList;
    use crate::error::BackingStoreError;
    use chrono::NaiveDate;

    crate::cache_key! {
        struct CurrencyKey {
            code: String => "CUR",
        }
    }

    crate::cache_key! {
        struct NationKey {
            nation: String => "NATION",
        }
    }

    fn currency_loader(key: &CurrencyKey) -> Result<Vec<u32>, BackingStoreError> {
        Ok(vec![key.code.len() as u32])
    }

    #[test]
    fn test_typed_lookup() {
        let registry = CacheRegistry::new(FrameworkConfig::default());
        registry
            .create_store::<CurrencyKey, u32, _>("Currency", currency_loader)
            .unwrap();

        let store = registry.store::<CurrencyKey, u32>("Currency").unwrap();
        assert_eq!(store.get(&CurrencyKey { code: "USD".into() }).unwrap().len(), 1);

        assert!(matches!(
            registry.store::<CurrencyKey, String>("Currency"),
            Err(CacheError::TypeMismatch(_))
        ));
        assert!(matches!(
            registry.store::<CurrencyKey, u32>("Nations"),
            Err(CacheError::UnknownCache(_))
        ));
    }

    #[test]
    fn test_duplicate_registration() {
        let registry = CacheRegistry::new(FrameworkConfig::default());
        registry
            .create_store::<CurrencyKey, u32, _>("Currency", currency_loader)
            .unwrap();
        let again = registry.create_store::<CurrencyKey, u32, _>("Currency", currency_loader);
        assert!(matches!(again, Err(CacheError::AlreadyRegistered(_))));
    }

    #[test]
    fn test_settings_come_from_config() {
        let mut config = FrameworkConfig::default();
        config.caches.insert(
            "Currency".to_string(),
            CacheSettings {
                max_entries: Some(1),
                ..Default::default()
            },
        );
        let registry = CacheRegistry::new(config);
        let store = registry
            .create_store::<CurrencyKey, u32, _>("Currency", currency_loader)
            .unwrap();

        store.get(&CurrencyKey { code: "USD".into() }).unwrap();
        store.get(&CurrencyKey { code: "EUR".into() }).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_invalidate_routes_to_current_and_historical() {
        let registry = CacheRegistry::new(FrameworkConfig::default());
        let current = registry
            .create_store::<NationKey, u32, _>(
                "TaxRules",
                |_: &NationKey| -> Result<Vec<u32>, BackingStoreError> { Ok(vec![1]) },
            )
            .unwrap();
        let historical = registry
            .create_historical::<NationKey, u32, _>(
                "TaxRules",
                |_: &HistoricalKey<NationKey>| -> Result<Vec<u32>, BackingStoreError> { Ok(vec![2]) },
            )
            .unwrap();

        let us = NationKey {
            nation: "US".to_string(),
        };
        let dl = DeleteList::new();
        current.get(&us).unwrap();
        historical
            .get(&dl, NaiveDate::from_ymd_opt(2023, 5, 1).unwrap(), &us)
            .unwrap();

        let removed = registry
            .invalidate(&ObjectKey::parse("TaxRules:NATION=US").unwrap())
            .unwrap();
        assert_eq!(removed, 2);
        assert!(current.is_empty());
        assert!(historical.store().is_empty());

        assert!(matches!(
            registry.invalidate(&ObjectKey::parse("Fares:NATION=US").unwrap()),
            Err(CacheError::UnknownCache(_))
        ));
    }

    #[test]
    fn test_stats_and_clear_all() {
        let registry = CacheRegistry::new(FrameworkConfig::default());
        let store = registry
            .create_store::<CurrencyKey, u32, _>("Currency", currency_loader)
            .unwrap();
        store.get(&CurrencyKey { code: "USD".into() }).unwrap();
        store.get(&CurrencyKey { code: "USD".into() }).unwrap();

        let reports = registry.stats();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].name, "Currency");
        assert_eq!(reports[0].entries, 1);
        assert_eq!(reports[0].stats.hits, 1);

        assert_eq!(registry.clear_all(), 1);
        assert_eq!(registry.names(), vec!["Currency".to_string()]);
    }
}
