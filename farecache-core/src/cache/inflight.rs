//! Per-key population slots
//!
//! The first caller to miss on a key becomes its leader and runs the load;
//! later callers for the same key park on the slot's condvar and receive a
//! clone of the leader's outcome. Different keys never share a slot.

use crate::error::CacheResult;
use crate::record::CachedCollection;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) struct InflightLoad<R> {
    state: Mutex<InflightState<R>>,
    cv: Condvar,
    stale: AtomicBool,
}

struct InflightState<R> {
    outcome: Option<CacheResult<CachedCollection<R>>>,
    waiters: usize,
}

pub(crate) enum InflightRole<R> {
    Leader(Arc<InflightLoad<R>>),
    Waiter(Arc<InflightLoad<R>>),
}

impl<R> InflightLoad<R> {
    fn new_loading() -> Self {
        Self {
            state: Mutex::new(InflightState {
                outcome: None,
                waiters: 0,
            }),
            cv: Condvar::new(),
            stale: AtomicBool::new(false),
        }
    }

    /// Block until the leader publishes, then share its outcome
    pub(crate) fn wait(&self) -> CacheResult<CachedCollection<R>> {
        let mut state = self.state.lock();
        state.waiters += 1;
        loop {
            if let Some(outcome) = &state.outcome {
                let outcome = outcome.clone();
                state.waiters -= 1;
                return outcome;
            }
            self.cv.wait(&mut state);
        }
    }

    /// An invalidation overlapped this load; its result must not stay resident
    pub(crate) fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    fn mark_stale(&self) {
        self.stale.store(true, Ordering::SeqCst);
    }

    fn publish(&self, outcome: CacheResult<CachedCollection<R>>) {
        {
            let mut state = self.state.lock();
            state.outcome = Some(outcome);
        }
        self.cv.notify_all();
    }

    #[cfg(test)]
    fn waiters(&self) -> usize {
        self.state.lock().waiters
    }
}

/// In-flight loads of one store
pub(crate) struct InflightTable<K, R> {
    slots: Mutex<HashMap<K, Arc<InflightLoad<R>>>>,
}

impl<K: Eq + Hash + Clone, R> InflightTable<K, R> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Join the load for `key`, or start one
    pub(crate) fn claim(&self, key: &K) -> InflightRole<R> {
        let mut slots = self.slots.lock();
        if let Some(existing) = slots.get(key) {
            return InflightRole::Waiter(Arc::clone(existing));
        }

        let slot = Arc::new(InflightLoad::new_loading());
        slots.insert(key.clone(), Arc::clone(&slot));
        InflightRole::Leader(slot)
    }

    /// Publish the leader's outcome and retire the slot
    pub(crate) fn release(
        &self,
        key: &K,
        slot: &Arc<InflightLoad<R>>,
        outcome: CacheResult<CachedCollection<R>>,
    ) {
        slot.publish(outcome);

        let mut slots = self.slots.lock();
        if slots.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(key);
        }
    }

    /// Flag every in-flight load whose key matches; returns the flagged keys
    pub(crate) fn mark_stale<F>(&self, matches: F) -> Vec<K>
    where
        F: Fn(&K) -> bool,
    {
        let slots = self.slots.lock();
        let mut marked = Vec::new();
        for (key, slot) in slots.iter() {
            if matches(key) {
                slot.mark_stale();
                marked.push(key.clone());
            }
        }
        marked
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }
}
