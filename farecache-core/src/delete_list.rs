//! Per-transaction ownership tracking
//!
//! A [`DeleteList`] is owned by one pricing transaction. It does two jobs:
//!
//! - `copy` pins a collection handed out by a store, so the transaction can
//!   keep using it even after the store evicts or replaces that key.
//! - `adopt` takes transaction-private allocations (filtered views, scratch
//!   objects) and releases them exactly once when the list drains.
//!
//! Draining happens on `clear()` or when the list is dropped, which covers
//! normal return, early return and panic unwind alike.

use crate::record::CachedCollection;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

type Held = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
struct Entries {
    pinned: Vec<Held>,
    adopted: Vec<Held>,
    adopted_addrs: HashSet<usize>,
}

impl Entries {
    fn is_empty(&self) -> bool {
        self.pinned.is_empty() && self.adopted.is_empty()
    }
}

/// Transaction-scoped set of pinned and adopted objects
pub struct DeleteList {
    id: Uuid,
    entries: Mutex<Entries>,
}

impl DeleteList {
    /// Create an empty delete list with a fresh transaction id
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            entries: Mutex::new(Entries::default()),
        }
    }

    /// Transaction id, used in log output
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Pin a store-owned collection until this list drains.
    ///
    /// Does not take ownership; the store may drop its own handle at any time.
    pub fn copy<R: Send + Sync + 'static>(&self, collection: &CachedCollection<R>) {
        let held: Held = Arc::clone(collection.shared()) as Held;
        self.entries.lock().pinned.push(held);
    }

    /// Take ownership of a transaction-private object.
    ///
    /// # Panics
    /// Adopting the same allocation twice is a contract violation.
    pub fn adopt<T: Send + Sync + 'static>(&self, object: Arc<T>) -> Arc<T> {
        let addr = Arc::as_ptr(&object) as *const () as usize;
        let held: Held = Arc::clone(&object) as Held;

        let mut entries = self.entries.lock();
        assert!(
            entries.adopted_addrs.insert(addr),
            "object adopted twice by delete list {}",
            self.id
        );
        entries.adopted.push(held);
        object
    }

    /// Adopt a derived collection, returning it for use
    pub fn adopt_collection<R: Send + Sync + 'static>(
        &self,
        collection: CachedCollection<R>,
    ) -> CachedCollection<R> {
        self.adopt(Arc::clone(collection.shared()));
        collection
    }

    /// Allocate a value owned by this transaction
    pub fn create<T: Send + Sync + 'static>(&self, value: T) -> Arc<T> {
        self.adopt(Arc::new(value))
    }

    /// Move every entry of `other` into this list, leaving `other` empty
    pub fn import(&self, other: &DeleteList) {
        assert!(
            !std::ptr::eq(self, other),
            "delete list {} imported into itself",
            self.id
        );

        let moved = std::mem::take(&mut *other.entries.lock());
        let mut entries = self.entries.lock();
        for addr in moved.adopted_addrs {
            assert!(
                entries.adopted_addrs.insert(addr),
                "object adopted by both delete lists {} and {}",
                self.id,
                other.id
            );
        }
        entries.pinned.extend(moved.pinned);
        entries.adopted.extend(moved.adopted);
    }

    /// Release everything now; the list stays usable afterwards.
    ///
    /// Returns `(pinned, adopted)` counts released.
    pub fn clear(&self) -> (usize, usize) {
        let drained = std::mem::take(&mut *self.entries.lock());
        let counts = (drained.pinned.len(), drained.adopted.len());
        // Dropped outside the lock
        drop(drained);

        if counts != (0, 0) {
            debug!(
                trx = %self.id,
                pinned = counts.0,
                adopted = counts.1,
                "Delete list drained"
            );
        }
        counts
    }

    /// Number of pinned store collections
    pub fn pinned_len(&self) -> usize {
        self.entries.lock().pinned.len()
    }

    /// Number of adopted objects
    pub fn adopted_len(&self) -> usize {
        self.entries.lock().adopted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for DeleteList {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DeleteList {
    fn drop(&mut self) {
        let drained = std::mem::take(self.entries.get_mut());
        if !drained.is_empty() {
            debug!(
                trx = %self.id,
                pinned = drained.pinned.len(),
                adopted = drained.adopted.len(),
                "Delete list released at end of scope"
            );
        }
    }
}

impl fmt::Debug for DeleteList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("DeleteList")
            .field("id", &self.id)
            .field("pinned", &entries.pinned.len())
            .field("adopted", &entries.adopted.len())
            .finish()
    }
}
