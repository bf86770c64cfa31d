//! Per-transaction data access
//!
//! A [`RequestContext`] is what a pricing transaction holds while it reads
//! reference data: the registry, its own [`DeleteList`] and the ticketing
//! date that decides between current and historical stores. Every
//! collection it returns stays valid until the context is dropped.

use crate::delete_list::DeleteList;
use crate::error::CacheResult;
use crate::filter::{apply_filter, IsNotEffective, Predicate};
use crate::key::CacheKey;
use crate::record::{CachedCollection, Effective, Record};
use crate::registry::CacheRegistry;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, info_span, Span};
use uuid::Uuid;

pub struct RequestContext<'a> {
    registry: &'a CacheRegistry,
    delete_list: DeleteList,
    ticket_date: NaiveDate,
    today: NaiveDate,
    historical: bool,
}

impl<'a> RequestContext<'a> {
    /// Historical access applies when it is enabled and the ticket was
    /// issued before `today`
    pub fn new(registry: &'a CacheRegistry, ticket_date: NaiveDate, today: NaiveDate) -> Self {
        let historical = registry.historical_enabled() && ticket_date < today;
        let delete_list = DeleteList::new();
        debug!(trx = %delete_list.id(), %ticket_date, historical, "Request context opened");

        Self {
            registry,
            delete_list,
            ticket_date,
            today,
            historical,
        }
    }

    pub fn id(&self) -> Uuid {
        self.delete_list.id()
    }

    pub fn ticket_date(&self) -> NaiveDate {
        self.ticket_date
    }

    pub fn is_historical(&self) -> bool {
        self.historical
    }

    pub fn delete_list(&self) -> &DeleteList {
        &self.delete_list
    }

    pub fn registry(&self) -> &'a CacheRegistry {
        self.registry
    }

    /// Re-date the transaction (reissue, exchange) and recompute the
    /// historical decision
    pub fn set_ticket_date(&mut self, ticket_date: NaiveDate) {
        self.ticket_date = ticket_date;
        self.historical = self.registry.historical_enabled() && ticket_date < self.today;
    }

    /// Span carrying the transaction id
    pub fn span(&self) -> Span {
        info_span!("trx", id = %self.id(), ticket_date = %self.ticket_date)
    }

    /// Current-store collection for `key`, pinned for this transaction
    pub fn fetch<K: CacheKey, R: Record>(
        &self,
        cache: &str,
        key: &K,
    ) -> CacheResult<CachedCollection<R>> {
        let collection = self.registry.store::<K, R>(cache)?.get(key)?;
        self.delete_list.copy(&collection);
        Ok(collection)
    }

    /// [`fetch`](Self::fetch) narrowed by `predicate`
    pub fn fetch_filtered<K, R, P>(
        &self,
        cache: &str,
        key: &K,
        predicate: P,
    ) -> CacheResult<CachedCollection<R>>
    where
        K: CacheKey,
        R: Record,
        P: Predicate<R>,
    {
        let collection = self.fetch::<K, R>(cache, key)?;
        Ok(apply_filter(&self.delete_list, &collection, predicate))
    }

    /// Historical bucket superset for `key` at this transaction's ticket date
    pub fn fetch_historical<K: CacheKey, R: Record>(
        &self,
        cache: &str,
        key: &K,
    ) -> CacheResult<CachedCollection<R>> {
        self.registry
            .historical::<K, R>(cache)?
            .get(&self.delete_list, self.ticket_date, key)
    }

    /// Records of `cache` in force for travel on `date`.
    ///
    /// Historical transactions read the historical store when one is
    /// registered for `cache`, and fall back to the current store otherwise.
    pub fn fetch_effective<K, R>(
        &self,
        cache: &str,
        key: &K,
        date: NaiveDate,
    ) -> CacheResult<CachedCollection<R>>
    where
        K: CacheKey,
        R: Record + Effective,
    {
        let collection = if self.historical && self.registry.has_historical(cache) {
            self.fetch_historical::<K, R>(cache, key)?
        } else {
            self.fetch::<K, R>(cache, key)?
        };

        Ok(apply_filter(
            &self.delete_list,
            &collection,
            IsNotEffective::new(date, self.ticket_date),
        ))
    }

    /// Allocate a transaction-owned value
    pub fn create<T: Send + Sync + 'static>(&self, value: T) -> Arc<T> {
        self.delete_list.create(value)
    }

    /// Take over everything `other` holds, leaving it empty
    pub fn import(&self, other: &RequestContext<'_>) {
        self.delete_list.import(&other.delete_list);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrameworkConfig;
    use crate::error::{BackingStoreError, CacheError};
    use crate::historical::HistoricalKey;
    use crate::record::Inhibit;
    use serde::{Deserialize, Serialize};

    crate::cache_key! {
        struct NationKey {
            nation: String => "NATION",
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TaxRow {
        seq: u32,
        create: NaiveDate,
        eff: NaiveDate,
        disc: NaiveDate,
        expire: NaiveDate,
    }

    impl Effective for TaxRow {
        fn create_date(&self) -> NaiveDate {
            self.create
        }
        fn effective_date(&self) -> NaiveDate {
            self.eff
        }
        fn discontinue_date(&self) -> NaiveDate {
            self.disc
        }
        fn expire_date(&self) -> NaiveDate {
            self.expire
        }
        fn inhibit(&self) -> Inhibit {
            Inhibit::Available
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(seq: u32, eff: NaiveDate, disc: NaiveDate) -> TaxRow {
        TaxRow {
            seq,
            create: date(2010, 1, 1),
            eff,
            disc,
            expire: date(2099, 12, 31),
        }
    }

    fn current_rows() -> Vec<TaxRow> {
        vec![
            row(1, date(2024, 1, 1), date(2024, 6, 30)),
            row(2, date(2024, 7, 1), date(2099, 12, 31)),
        ]
    }

    fn registry(historical: bool) -> CacheRegistry {
        let mut config = FrameworkConfig::default();
        config.historical.enabled = historical;
        let registry = CacheRegistry::new(config);
        registry
            .create_store::<NationKey, TaxRow, _>(
                "TaxNation",
                |_: &NationKey| -> Result<Vec<TaxRow>, BackingStoreError> { Ok(current_rows()) },
            )
            .unwrap();
        registry
    }

    fn with_historical(registry: &CacheRegistry) {
        registry
            .create_historical::<NationKey, TaxRow, _>(
                "TaxNation",
                |_: &HistoricalKey<NationKey>| -> Result<Vec<TaxRow>, BackingStoreError> {
                    Ok(vec![row(9, date(2019, 1, 1), date(2019, 12, 31))])
                },
            )
            .unwrap();
    }

    fn us() -> NationKey {
        NationKey {
            nation: "US".to_string(),
        }
    }

    #[test]
    fn test_fetch_pins_collection() {
        let registry = registry(false);
        let ctx = RequestContext::new(&registry, date(2024, 8, 1), date(2024, 8, 1));

        let rows = ctx.fetch::<NationKey, TaxRow>("TaxNation", &us()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(ctx.delete_list().pinned_len(), 1);

        registry.clear_all();
        assert_eq!(rows[0].seq, 1);
    }

    #[test]
    fn test_fetch_effective_filters_by_travel_date() {
        let registry = registry(false);
        let ctx = RequestContext::new(&registry, date(2024, 8, 1), date(2024, 8, 1));

        let rows = ctx
            .fetch_effective::<NationKey, TaxRow>("TaxNation", &us(), date(2024, 3, 15))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].seq, 1);
        assert_eq!(ctx.delete_list().adopted_len(), 1);
    }

    #[test]
    fn test_historical_decision() {
        let registry = registry(true);
        with_historical(&registry);

        let today = date(2024, 8, 1);
        let mut ctx = RequestContext::new(&registry, today, today);
        assert!(!ctx.is_historical());

        ctx.set_ticket_date(date(2019, 5, 1));
        assert!(ctx.is_historical());
        let rows = ctx
            .fetch_effective::<NationKey, TaxRow>("TaxNation", &us(), date(2019, 5, 10))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].seq, 9);

        let disabled = registry_without_history_flag();
        let ctx = RequestContext::new(&disabled, date(2019, 5, 1), today);
        assert!(!ctx.is_historical());
    }

    fn registry_without_history_flag() -> CacheRegistry {
        let registry = registry(false);
        with_historical(&registry);
        registry
    }

    #[test]
    fn test_historical_falls_back_to_current_store() {
        let registry = registry(true);
        let ctx = RequestContext::new(&registry, date(2024, 2, 1), date(2024, 8, 1));
        assert!(ctx.is_historical());

        let rows = ctx
            .fetch_effective::<NationKey, TaxRow>("TaxNation", &us(), date(2024, 2, 10))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].seq, 1);

        assert!(matches!(
            ctx.fetch_historical::<NationKey, TaxRow>("TaxNation", &us()),
            Err(CacheError::UnknownCache(_))
        ));
    }

    #[test]
    fn test_import_moves_ownership() {
        let registry = registry(false);
        let today = date(2024, 8, 1);
        let parent = RequestContext::new(&registry, today, today);
        let child = RequestContext::new(&registry, today, today);

        let scratch = child.create(vec![1u32, 2, 3]);
        child.fetch::<NationKey, TaxRow>("TaxNation", &us()).unwrap();

        parent.import(&child);
        assert!(child.delete_list().is_empty());
        assert_eq!(parent.delete_list().pinned_len(), 1);
        assert_eq!(parent.delete_list().adopted_len(), 1);

        drop(child);
        assert_eq!(*scratch, vec![1, 2, 3]);
    }

    #[test]
    fn test_wrong_types_are_rejected() {
        let registry = registry(false);
        let today = date(2024, 8, 1);
        let ctx = RequestContext::new(&registry, today, today);

        assert!(matches!(
            ctx.fetch::<NationKey, String>("TaxNation", &us()),
            Err(CacheError::TypeMismatch(_))
        ));
    }
}
