//! Expiry deadlines of resident entries

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

struct Deadline<K> {
    at: DateTime<Utc>,
    key: K,
}

// Ordered by deadline only; keys need not be comparable
impl<K> PartialEq for Deadline<K> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at
    }
}

impl<K> Eq for Deadline<K> {}

impl<K> PartialOrd for Deadline<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Deadline<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at.cmp(&other.at)
    }
}

/// Earliest-first queue of entry deadlines.
///
/// Deadlines are never withdrawn. A key that was invalidated or replaced
/// leaves its old deadline queued, so the caller must re-check the entry
/// it finds before evicting it.
pub(crate) struct ExpiryQueue<K> {
    heap: Mutex<BinaryHeap<Reverse<Deadline<K>>>>,
}

impl<K> ExpiryQueue<K> {
    pub(crate) fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
        }
    }

    pub(crate) fn schedule(&self, key: K, at: DateTime<Utc>) {
        self.heap.lock().push(Reverse(Deadline { at, key }));
    }

    /// Dequeue every key due at `now`, earliest first
    pub(crate) fn drain_due(&self, now: DateTime<Utc>) -> Vec<K> {
        let mut heap = self.heap.lock();
        let mut due = Vec::new();
        while heap.peek().is_some_and(|Reverse(d)| d.at <= now) {
            if let Some(Reverse(deadline)) = heap.pop() {
                due.push(deadline.key);
            }
        }
        due
    }

    pub(crate) fn clear(&self) {
        self.heap.lock().clear();
    }
}
