//! JSON fixture backing store
//!
//! Stands in for the fare database: rows are read once from a JSON array
//! and served to the current and historical loaders.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use farecache_core::{BackingStoreError, Effective, HistoricalKey, Inhibit, Loader};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

pub const FARE_RULE_CACHE: &str = "FareRule";

farecache_core::cache_key! {
    pub struct FareRuleKey {
        pub vendor: String => "VENDOR",
        pub carrier: String => "CARRIER",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareRule {
    pub vendor: String,
    pub carrier: String,
    pub rule: String,
    pub create_date: NaiveDate,
    pub effective_date: NaiveDate,
    pub discontinue_date: NaiveDate,
    pub expire_date: NaiveDate,
    #[serde(default)]
    pub inhibit: Inhibit,
}

impl FareRule {
    fn key(&self) -> FareRuleKey {
        FareRuleKey {
            vendor: self.vendor.clone(),
            carrier: self.carrier.clone(),
        }
    }
}

impl Effective for FareRule {
    fn create_date(&self) -> NaiveDate {
        self.create_date
    }

    fn effective_date(&self) -> NaiveDate {
        self.effective_date
    }

    fn discontinue_date(&self) -> NaiveDate {
        self.discontinue_date
    }

    fn expire_date(&self) -> NaiveDate {
        self.expire_date
    }

    fn inhibit(&self) -> Inhibit {
        self.inhibit
    }

    fn vendor(&self) -> Option<&str> {
        Some(&self.vendor)
    }
}

/// Fixture rows grouped by key
#[derive(Debug, Default)]
pub struct FixtureStore {
    rows: BTreeMap<FareRuleKey, Vec<FareRule>>,
}

impl FixtureStore {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixtures: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to parse fixtures: {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let rows: Vec<FareRule> = serde_json::from_str(json)?;
        Ok(Self::from_rows(rows))
    }

    pub fn from_rows(rows: Vec<FareRule>) -> Self {
        let mut grouped: BTreeMap<FareRuleKey, Vec<FareRule>> = BTreeMap::new();
        for row in rows {
            grouped.entry(row.key()).or_default().push(row);
        }
        Self { rows: grouped }
    }

    pub fn keys(&self) -> Vec<FareRuleKey> {
        self.rows.keys().cloned().collect()
    }

    pub fn row_count(&self) -> usize {
        self.rows.values().map(Vec::len).sum()
    }

    fn rows_for(&self, key: &FareRuleKey) -> Vec<FareRule> {
        self.rows.get(key).cloned().unwrap_or_default()
    }
}

/// Loader over the current view of the fixtures
pub struct CurrentLoader(pub Arc<FixtureStore>);

impl Loader<FareRuleKey, FareRule> for CurrentLoader {
    fn create(&self, key: &FareRuleKey) -> Result<Vec<FareRule>, BackingStoreError> {
        Ok(self.0.rows_for(key))
    }

    fn load_all(&self) -> Result<Vec<(FareRuleKey, Vec<FareRule>)>, BackingStoreError> {
        Ok(self
            .0
            .rows
            .iter()
            .map(|(key, rows)| (key.clone(), rows.clone()))
            .collect())
    }
}

/// Loader answering bucket queries: rows ticketable on some day of the bucket
pub struct HistoricalLoader(pub Arc<FixtureStore>);

impl Loader<HistoricalKey<FareRuleKey>, FareRule> for HistoricalLoader {
    fn create(&self, key: &HistoricalKey<FareRuleKey>) -> Result<Vec<FareRule>, BackingStoreError> {
        Ok(self
            .0
            .rows_for(&key.fragment)
            .into_iter()
            .filter(|row| row.create_date < key.end && row.expire_date >= key.start)
            .collect())
    }
}
