//! Concurrency tests for cache stores
//!
//! - Singleflight population, success and failure
//! - Pinned collections outliving concurrent invalidation
//! - Invalidation overlapping an in-flight population

mod common;

use common::{key, CountingLoader, FareRule, FareRuleKey, Shared};
use crossbeam::channel;
use farecache_core::{
    BackingStoreError, CacheError, CacheSettings, CacheStore, CachedCollection, DeleteList,
    ObjectKey,
};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const THREADS: usize = 16;

fn store_with(loader: &Arc<CountingLoader>) -> Arc<CacheStore<FareRuleKey, FareRule>> {
    Arc::new(CacheStore::new(
        "FareRule",
        CacheSettings::default(),
        Shared(Arc::clone(loader)),
    ))
}

/// Run `get(key)` on `THREADS` threads released together
fn concurrent_gets(
    store: &Arc<CacheStore<FareRuleKey, FareRule>>,
    key: &FareRuleKey,
) -> Vec<Result<CachedCollection<FareRule>, CacheError>> {
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let store = Arc::clone(store);
            let barrier = Arc::clone(&barrier);
            let key = key.clone();
            thread::spawn(move || {
                barrier.wait();
                store.get(&key)
            })
        })
        .collect();

    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

// =========================================================================
// Singleflight
// =========================================================================

#[test]
fn test_concurrent_misses_share_one_load() {
    let loader = CountingLoader::slow(4, Duration::from_millis(150));
    let store = store_with(&loader);
    let k = key("ATP", "AA");

    let results = concurrent_gets(&store, &k);

    assert_eq!(loader.calls(), 1);
    let first = results[0].as_ref().unwrap();
    assert_eq!(first.len(), 4);
    for result in &results {
        assert!(CachedCollection::ptr_eq(first, result.as_ref().unwrap()));
    }

    let snapshot = store.stats().snapshot();
    assert_eq!(snapshot.loads, 1);
    assert_eq!(snapshot.hits + snapshot.misses, THREADS as u64);
    assert_eq!(store.inflight_count(), 0);
}

#[test]
fn test_concurrent_misses_share_one_failure() {
    let loader = CountingLoader::slow(4, Duration::from_millis(150));
    loader.set_failing(true);
    let store = store_with(&loader);
    let k = key("ATP", "BA");

    let results = concurrent_gets(&store, &k);

    assert_eq!(loader.calls(), 1);
    let expected = CacheError::BackingStore(BackingStoreError::Unavailable(
        "fare database down".to_string(),
    ));
    for result in &results {
        assert_eq!(result.as_ref().unwrap_err(), &expected);
    }
    assert!(!store.contains(&k));

    // The failure was not cached
    loader.set_failing(false);
    assert_eq!(store.get(&k).unwrap().len(), 4);
    assert_eq!(loader.calls(), 2);
}

#[test]
fn test_distinct_keys_load_independently() {
    let loader = CountingLoader::new(2);
    let store = store_with(&loader);

    let handles: Vec<_> = ["AA", "BA", "LH", "AF"]
        .into_iter()
        .map(|carrier| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.get(&key("ATP", carrier)).unwrap().len())
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 2);
    }
    assert_eq!(loader.calls(), 4);
    assert_eq!(store.len(), 4);
}

// =========================================================================
// DeleteList outlive guarantee
// =========================================================================

#[test]
fn test_pinned_collection_survives_invalidation() {
    let loader = CountingLoader::new(5);
    let store = store_with(&loader);
    let k = key("ATP", "AA");

    let delete_list = DeleteList::new();
    let rows = store.get(&k).unwrap();
    delete_list.copy(&rows);
    let weak = rows.downgrade();
    drop(rows);

    let invalidator = {
        let store = Arc::clone(&store);
        let k = k.clone();
        thread::spawn(move || {
            let pattern = ObjectKey::new("FareRule")
                .with("VENDOR", "ATP")
                .with_any("CARRIER");
            for _ in 0..200 {
                store.invalidate(&pattern).unwrap();
                store.get(&k).unwrap();
            }
        })
    };

    for _ in 0..200 {
        let pinned = weak.upgrade().expect("pinned collection released early");
        assert_eq!(pinned.len(), 5);
        assert!(pinned.iter().enumerate().all(|(i, r)| r.seq == i as u32));
    }
    invalidator.join().unwrap();

    store.clear();
    assert!(!weak.is_released());

    drop(delete_list);
    assert!(weak.is_released());
}

// =========================================================================
// Invalidation racing a population
// =========================================================================

#[test]
fn test_population_overlapping_invalidation_is_not_kept() {
    let (started_tx, started_rx) = channel::bounded::<()>(1);
    let (proceed_tx, proceed_rx) = channel::bounded::<()>(1);

    let store: Arc<CacheStore<FareRuleKey, FareRule>> = Arc::new(CacheStore::new(
        "FareRule",
        CacheSettings::default(),
        move |k: &FareRuleKey| -> Result<Vec<FareRule>, BackingStoreError> {
            let _ = started_tx.send(());
            let _ = proceed_rx.recv();
            Ok(vec![FareRule::open(k, 0)])
        },
    ));
    let k = key("ATP", "AA");

    let reader = {
        let store = Arc::clone(&store);
        let k = k.clone();
        thread::spawn(move || store.get(&k))
    };

    started_rx.recv().unwrap();
    let removed = store
        .invalidate(&ObjectKey::new("FareRule").with("VENDOR", "ATP").with("CARRIER", "AA"))
        .unwrap();
    assert_eq!(removed, 0);
    proceed_tx.send(()).unwrap();

    // The caller still gets its rows, but they are not resident
    let rows = reader.join().unwrap().unwrap();
    assert_eq!(rows.len(), 1);
    assert!(!store.contains(&k));
}
