//! Shared fixtures for the integration tests

#![allow(dead_code)]

use chrono::NaiveDate;
use farecache_core::{BackingStoreError, Effective, Inhibit, Loader};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

farecache_core::cache_key! {
    pub struct FareRuleKey {
        pub vendor: String => "VENDOR",
        pub carrier: String => "CARRIER",
    }
}

pub fn key(vendor: &str, carrier: &str) -> FareRuleKey {
    FareRuleKey {
        vendor: vendor.to_string(),
        carrier: carrier.to_string(),
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareRule {
    pub vendor: String,
    pub carrier: String,
    pub seq: u32,
    pub create: NaiveDate,
    pub effective: NaiveDate,
    pub discontinue: NaiveDate,
    pub expire: NaiveDate,
    pub inhibit: Inhibit,
}

impl FareRule {
    /// Row valid for all of 2020-2030
    pub fn open(key: &FareRuleKey, seq: u32) -> Self {
        Self {
            vendor: key.vendor.clone(),
            carrier: key.carrier.clone(),
            seq,
            create: date(2020, 1, 1),
            effective: date(2020, 1, 1),
            discontinue: date(2030, 12, 31),
            expire: date(2030, 12, 31),
            inhibit: Inhibit::Available,
        }
    }
}

impl Effective for FareRule {
    fn create_date(&self) -> NaiveDate {
        self.create
    }

    fn effective_date(&self) -> NaiveDate {
        self.effective
    }

    fn discontinue_date(&self) -> NaiveDate {
        self.discontinue
    }

    fn expire_date(&self) -> NaiveDate {
        self.expire
    }

    fn inhibit(&self) -> Inhibit {
        self.inhibit
    }

    fn vendor(&self) -> Option<&str> {
        Some(&self.vendor)
    }
}

// =========================================================================
// Loaders
// =========================================================================

/// Loader that counts calls, can be slowed down and can be made to fail
#[derive(Default)]
pub struct CountingLoader {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub delay: Option<Duration>,
    pub rows_per_key: u32,
}

impl CountingLoader {
    pub fn new(rows_per_key: u32) -> Arc<Self> {
        Arc::new(Self {
            rows_per_key,
            ..Default::default()
        })
    }

    pub fn slow(rows_per_key: u32, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            rows_per_key,
            delay: Some(delay),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

/// Lets a test keep a handle on the loader it gave to a store
pub struct Shared(pub Arc<CountingLoader>);

impl Loader<FareRuleKey, FareRule> for Shared {
    fn create(&self, key: &FareRuleKey) -> Result<Vec<FareRule>, BackingStoreError> {
        let loader = &self.0;
        loader.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = loader.delay {
            std::thread::sleep(delay);
        }
        if loader.fail.load(Ordering::SeqCst) {
            return Err(BackingStoreError::Unavailable("fare database down".to_string()));
        }
        Ok((0..loader.rows_per_key)
            .map(|seq| FareRule::open(key, seq))
            .collect())
    }
}
