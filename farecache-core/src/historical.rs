//! Date-bucketed caches for past ticket dates
//!
//! Requests ticketed in the past need the rows that were visible back then.
//! Instead of one entry per exact ticket date, a [`HistoricalPartitioner`]
//! rounds the date to a bucket and caches everything valid at any point in
//! that bucket, so nearby dates share one entry. Results are a superset:
//! callers still filter by their real ticket and travel dates.

use crate::cache::CacheStore;
use crate::config::CacheSettings;
use crate::delete_list::DeleteList;
use crate::error::{CacheError, CacheResult};
use crate::key::{CacheKey, ObjectKey};
use crate::loader::Loader;
use crate::record::{CachedCollection, Record};
use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Field label of a bucket's first day
pub const START_DATE_FIELD: &str = "STARTDATE";
/// Field label of the day after a bucket's last day
pub const END_DATE_FIELD: &str = "ENDDATE";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Width of one historical bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketGranularity {
    Day,
    /// Monday to Sunday
    Week,
    /// 1st to 15th, 16th to month end
    HalfMonth,
    #[default]
    Month,
    Quarter,
    Year,
    /// A single bucket spanning every date
    NoDates,
}

/// Half-open date range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateBucket {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateBucket {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }
}

impl fmt::Display for DateBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }
}

fn first_of_month(date: NaiveDate) -> Option<NaiveDate> {
    date.with_day(1)
}

impl BucketGranularity {
    /// Bucket containing `date`
    pub fn bucket_for(&self, date: NaiveDate) -> CacheResult<DateBucket> {
        let bucket = match self {
            BucketGranularity::Day => date
                .succ_opt()
                .map(|end| DateBucket { start: date, end }),
            BucketGranularity::Week => {
                let offset = date.weekday().num_days_from_monday() as u64;
                date.checked_sub_days(Days::new(offset)).and_then(|start| {
                    start
                        .checked_add_days(Days::new(7))
                        .map(|end| DateBucket { start, end })
                })
            }
            BucketGranularity::HalfMonth => first_of_month(date).and_then(|first| {
                let mid = first.checked_add_days(Days::new(15))?;
                if date < mid {
                    Some(DateBucket {
                        start: first,
                        end: mid,
                    })
                } else {
                    first
                        .checked_add_months(Months::new(1))
                        .map(|end| DateBucket { start: mid, end })
                }
            }),
            BucketGranularity::Month => first_of_month(date).and_then(|start| {
                start
                    .checked_add_months(Months::new(1))
                    .map(|end| DateBucket { start, end })
            }),
            BucketGranularity::Quarter => {
                let month = (date.month0() / 3) * 3 + 1;
                NaiveDate::from_ymd_opt(date.year(), month, 1).and_then(|start| {
                    start
                        .checked_add_months(Months::new(3))
                        .map(|end| DateBucket { start, end })
                })
            }
            BucketGranularity::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1).and_then(|start| {
                start
                    .checked_add_months(Months::new(12))
                    .map(|end| DateBucket { start, end })
            }),
            BucketGranularity::NoDates => Some(DateBucket {
                start: NaiveDate::MIN,
                end: NaiveDate::MAX,
            }),
        };

        bucket.ok_or(CacheError::DateOutOfRange(date))
    }
}

/// Key of a historical store: a fragment of the base key plus bucket bounds
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoricalKey<K> {
    pub fragment: K,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl<K> HistoricalKey<K> {
    pub fn new(fragment: K, bucket: DateBucket) -> Self {
        Self {
            fragment,
            start: bucket.start,
            end: bucket.end,
        }
    }

    pub fn bucket(&self) -> DateBucket {
        DateBucket {
            start: self.start,
            end: self.end,
        }
    }
}

impl<K: CacheKey> CacheKey for HistoricalKey<K> {
    fn field_names() -> Vec<&'static str> {
        let mut names = K::field_names();
        names.push(START_DATE_FIELD);
        names.push(END_DATE_FIELD);
        names
    }

    fn field(&self, name: &str) -> Option<String> {
        match name {
            START_DATE_FIELD => Some(self.start.format(DATE_FORMAT).to_string()),
            END_DATE_FIELD => Some(self.end.format(DATE_FORMAT).to_string()),
            _ => self.fragment.field(name),
        }
    }

    fn from_fields(key: &ObjectKey) -> Option<Self> {
        let parse = |name: &str| NaiveDate::parse_from_str(key.value(name)?, DATE_FORMAT).ok();
        Some(Self {
            fragment: K::from_fields(key)?,
            start: parse(START_DATE_FIELD)?,
            end: parse(END_DATE_FIELD)?,
        })
    }

    fn normalize_field(name: &str, value: &str) -> Option<String> {
        match name {
            START_DATE_FIELD | END_DATE_FIELD => NaiveDate::parse_from_str(value, DATE_FORMAT)
                .ok()
                .map(|d| d.format(DATE_FORMAT).to_string()),
            _ => K::normalize_field(name, value),
        }
    }
}

/// Store of bucketed entries for past ticket dates
pub struct HistoricalPartitioner<K: CacheKey, R: Record> {
    store: CacheStore<HistoricalKey<K>, R>,
    granularity: BucketGranularity,
}

impl<K: CacheKey, R: Record> HistoricalPartitioner<K, R> {
    /// The loader receives keys carrying the bucket bounds and must query
    /// rows valid anywhere inside `[start, end)` only.
    pub fn new<L>(name: impl Into<String>, settings: CacheSettings, loader: L) -> Self
    where
        L: Loader<HistoricalKey<K>, R> + 'static,
    {
        let granularity = settings.bucket_granularity;
        Self {
            store: CacheStore::new(name, settings, loader),
            granularity,
        }
    }

    /// Wrap an existing store, bucketing by its configured granularity
    pub fn from_store(store: CacheStore<HistoricalKey<K>, R>) -> Self {
        let granularity = store.settings().bucket_granularity;
        Self { store, granularity }
    }

    pub fn store(&self) -> &CacheStore<HistoricalKey<K>, R> {
        &self.store
    }

    pub fn name(&self) -> &str {
        self.store.name()
    }

    pub fn granularity(&self) -> BucketGranularity {
        self.granularity
    }

    pub fn bucket_for(&self, ticket_date: NaiveDate) -> CacheResult<DateBucket> {
        self.granularity.bucket_for(ticket_date)
    }

    pub fn key_for(&self, ticket_date: NaiveDate, fragment: &K) -> CacheResult<HistoricalKey<K>> {
        Ok(HistoricalKey::new(fragment.clone(), self.bucket_for(ticket_date)?))
    }

    /// Bucket superset for `fragment` at `ticket_date`, pinned in `delete_list`
    pub fn get(
        &self,
        delete_list: &DeleteList,
        ticket_date: NaiveDate,
        fragment: &K,
    ) -> CacheResult<CachedCollection<R>> {
        let key = self.key_for(ticket_date, fragment)?;
        let collection = self.store.get(&key)?;
        delete_list.copy(&collection);
        Ok(collection)
    }

    /// Invalidate every bucket of the fragments matching `key`.
    ///
    /// Bucket fields absent from `key` are treated as wildcards.
    pub fn invalidate(&self, key: &ObjectKey) -> CacheResult<usize> {
        let mut key = key.clone();
        for field in [START_DATE_FIELD, END_DATE_FIELD] {
            if key.get(field).is_none() {
                key = key.with_any(field);
            }
        }
        self.store.invalidate(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackingStoreError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    crate::cache_key! {
        struct NationKey {
            nation: String => "NATION",
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn bucket(start: NaiveDate, end: NaiveDate) -> DateBucket {
        DateBucket { start, end }
    }

    #[test]
    fn test_bucket_bounds() {
        let d = date(2024, 2, 21); // Wednesday

        assert_eq!(
            BucketGranularity::Day.bucket_for(d).unwrap(),
            bucket(d, date(2024, 2, 22))
        );
        assert_eq!(
            BucketGranularity::Week.bucket_for(d).unwrap(),
            bucket(date(2024, 2, 19), date(2024, 2, 26))
        );
        assert_eq!(
            BucketGranularity::HalfMonth.bucket_for(d).unwrap(),
            bucket(date(2024, 2, 16), date(2024, 3, 1))
        );
        assert_eq!(
            BucketGranularity::HalfMonth.bucket_for(date(2024, 2, 15)).unwrap(),
            bucket(date(2024, 2, 1), date(2024, 2, 16))
        );
        assert_eq!(
            BucketGranularity::Month.bucket_for(d).unwrap(),
            bucket(date(2024, 2, 1), date(2024, 3, 1))
        );
        assert_eq!(
            BucketGranularity::Quarter.bucket_for(date(2024, 12, 31)).unwrap(),
            bucket(date(2024, 10, 1), date(2025, 1, 1))
        );
        assert_eq!(
            BucketGranularity::Year.bucket_for(d).unwrap(),
            bucket(date(2024, 1, 1), date(2025, 1, 1))
        );
        assert!(BucketGranularity::NoDates.bucket_for(d).unwrap().contains(d));
    }

    #[test]
    fn test_bucket_contains_its_date() {
        let granularities = [
            BucketGranularity::Day,
            BucketGranularity::Week,
            BucketGranularity::HalfMonth,
            BucketGranularity::Month,
            BucketGranularity::Quarter,
            BucketGranularity::Year,
        ];
        let mut d = date(2023, 12, 25);
        while d < date(2024, 3, 10) {
            for g in granularities {
                assert!(g.bucket_for(d).unwrap().contains(d), "{:?} {}", g, d);
            }
            d = d.succ_opt().unwrap();
        }
    }

    #[test]
    fn test_date_out_of_range() {
        assert_eq!(
            BucketGranularity::Day.bucket_for(NaiveDate::MAX),
            Err(CacheError::DateOutOfRange(NaiveDate::MAX))
        );
    }

    #[test]
    fn test_historical_key_fields() {
        let key = HistoricalKey::new(
            NationKey {
                nation: "US".to_string(),
            },
            bucket(date(2024, 1, 1), date(2024, 2, 1)),
        );

        assert_eq!(
            HistoricalKey::<NationKey>::field_names(),
            vec!["NATION", "STARTDATE", "ENDDATE"]
        );
        assert_eq!(key.field("STARTDATE").as_deref(), Some("2024-01-01"));

        let object = ObjectKey::new("TaxRulesHistorical")
            .with("NATION", "US")
            .with("STARTDATE", "2024-01-01")
            .with("ENDDATE", "2024-02-01");
        assert_eq!(HistoricalKey::<NationKey>::from_fields(&object), Some(key));
    }

    #[test]
    fn test_wildcard_date_values_checked() {
        use crate::key::KeyPattern;

        let key = HistoricalKey::new(
            NationKey {
                nation: "US".to_string(),
            },
            bucket(date(2024, 1, 1), date(2024, 2, 1)),
        );

        let scan = ObjectKey::new("TaxRulesHistorical")
            .with_any("NATION")
            .with("STARTDATE", "2024-01-01")
            .with_any("ENDDATE");
        let pattern = KeyPattern::<HistoricalKey<NationKey>>::resolve(&scan).unwrap();
        assert!(pattern.matches(&key));

        let bad = ObjectKey::new("TaxRulesHistorical")
            .with_any("NATION")
            .with("STARTDATE", "2024-13-01")
            .with_any("ENDDATE");
        assert!(matches!(
            KeyPattern::<HistoricalKey<NationKey>>::resolve(&bad),
            Err(CacheError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_same_bucket_shares_entry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let partitioner: HistoricalPartitioner<NationKey, String> = HistoricalPartitioner::new(
            "TaxRulesHistorical",
            CacheSettings::default(),
            move |key: &HistoricalKey<NationKey>| -> Result<Vec<String>, BackingStoreError> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(vec![format!("{}@{}", key.fragment.nation, key.bucket())])
            },
        );
        let us = NationKey {
            nation: "US".to_string(),
        };
        let dl = DeleteList::new();

        let a = partitioner.get(&dl, date(2024, 3, 3), &us).unwrap();
        let b = partitioner.get(&dl, date(2024, 3, 28), &us).unwrap();
        let c = partitioner.get(&dl, date(2024, 4, 2), &us).unwrap();

        assert!(CachedCollection::ptr_eq(&a, &b));
        assert!(!CachedCollection::ptr_eq(&a, &c));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(dl.pinned_len(), 3);
    }

    #[test]
    fn test_invalidate_all_buckets_of_fragment() {
        let partitioner: HistoricalPartitioner<NationKey, u32> = HistoricalPartitioner::new(
            "TaxRulesHistorical",
            CacheSettings::default(),
            |_: &HistoricalKey<NationKey>| -> Result<Vec<u32>, BackingStoreError> { Ok(vec![1]) },
        );
        let dl = DeleteList::new();
        let us = NationKey {
            nation: "US".to_string(),
        };
        let ca = NationKey {
            nation: "CA".to_string(),
        };
        partitioner.get(&dl, date(2024, 1, 5), &us).unwrap();
        partitioner.get(&dl, date(2024, 2, 5), &us).unwrap();
        partitioner.get(&dl, date(2024, 2, 5), &ca).unwrap();

        let removed = partitioner
            .invalidate(&ObjectKey::new("TaxRules").with("NATION", "US"))
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(partitioner.store().len(), 1);
    }
}
