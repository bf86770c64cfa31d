//! Farecache Core - Reference-data caching for fare pricing
//!
//! This crate provides the building blocks shared by pricing services:
//! - Typed cache stores with singleflight population
//! - Per-transaction delete lists and filtered views
//! - Historical (ticket-date bucketed) stores
//! - Block compression of cold entries
//! - A registry, invalidation feed and metrics over all of them

pub mod cache;
pub mod compress;
pub mod config;
pub mod context;
pub mod delete_list;
pub mod error;
pub mod filter;
pub mod historical;
pub mod invalidation;
pub mod key;
pub mod loader;
pub mod monitoring;
pub mod record;
pub mod registry;

pub use cache::{CacheStore, EvictionPolicy, MaintenanceReport, Representation};
pub use compress::{CompressedRecord, Compressor};
pub use config::{Capacity, CacheSettings, FrameworkConfig, HistoricalSettings};
pub use context::RequestContext;
pub use delete_list::DeleteList;
pub use error::{BackingStoreError, CacheError, CacheResult};
pub use filter::{
    apply_filter, IsInhibited, IsNotCurrent, IsNotEffective, Or, Predicate, VendorMismatch,
};
pub use historical::{BucketGranularity, DateBucket, HistoricalKey, HistoricalPartitioner};
pub use invalidation::{FeedReport, FeedSender, InvalidationFeed};
pub use key::{CacheKey, FieldMatch, KeyPattern, ObjectKey};
pub use loader::Loader;
pub use monitoring::{
    init_logging, CacheReport, CacheStats, LoggingConfig, PrometheusExporter, SlowLoadLogger,
    StatsSnapshot,
};
pub use record::{CachedCollection, Effective, Inhibit, Record, WeakCollection};
pub use registry::{CacheRegistry, ManagedCache, RoutedInvalidation};
