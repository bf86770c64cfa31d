//! Record payloads and shared cached collections

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};

/// Opaque business payload held by a cache.
///
/// Serde bounds exist for the compressed representation; the cache never
/// looks at record fields itself.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Record for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Ordered, immutable sequence of records shared by every reader of a key.
///
/// Cloning is a reference-count bump. Two collections are the *same
/// reference* when [`CachedCollection::ptr_eq`] holds.
pub struct CachedCollection<R> {
    records: Arc<Vec<Arc<R>>>,
}

impl<R> CachedCollection<R> {
    /// Wrap freshly loaded records
    pub fn new(records: Vec<R>) -> Self {
        Self::from_shared(records.into_iter().map(Arc::new).collect())
    }

    /// Build a collection over records already shared with another collection
    pub fn from_shared(records: Vec<Arc<R>>) -> Self {
        Self {
            records: Arc::new(records),
        }
    }

    /// Collection with no rows
    pub fn empty() -> Self {
        Self::from_shared(Vec::new())
    }

    /// Whether both handles point at the same allocation
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.records, &b.records)
    }

    /// Number of live handles to this collection
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.records)
    }

    /// Non-owning handle, used to observe when a collection is released
    pub fn downgrade(&self) -> WeakCollection<R> {
        WeakCollection {
            records: Arc::downgrade(&self.records),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Vec<Arc<R>>> {
        &self.records
    }

    pub(crate) fn from_arc(records: Arc<Vec<Arc<R>>>) -> Self {
        Self { records }
    }
}

impl<R> Clone for CachedCollection<R> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
        }
    }
}

impl<R> Deref for CachedCollection<R> {
    type Target = [Arc<R>];

    fn deref(&self) -> &Self::Target {
        self.records.as_slice()
    }
}

impl<'a, R> IntoIterator for &'a CachedCollection<R> {
    type Item = &'a Arc<R>;
    type IntoIter = std::slice::Iter<'a, Arc<R>>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Value equality, record by record
impl<R: PartialEq> PartialEq for CachedCollection<R> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|(a, b)| a.as_ref() == b.as_ref())
    }
}

impl<R: fmt::Debug> fmt::Debug for CachedCollection<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter().map(|r| r.as_ref())).finish()
    }
}

/// Weak handle to a [`CachedCollection`]
pub struct WeakCollection<R> {
    records: Weak<Vec<Arc<R>>>,
}

impl<R> WeakCollection<R> {
    /// Upgrade if some owner still holds the collection
    pub fn upgrade(&self) -> Option<CachedCollection<R>> {
        self.records.upgrade().map(CachedCollection::from_arc)
    }

    /// Whether every owner has released the collection
    pub fn is_released(&self) -> bool {
        self.records.strong_count() == 0
    }
}

/// Inhibit flag carried by reference records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Inhibit {
    /// Usable for pricing and display
    #[default]
    Available,
    /// Shown in fare display, never priced
    DisplayOnly,
    /// Not usable at all
    Inhibited,
}

/// Validity dates and flags of a dated reference record
pub trait Effective {
    /// Date the row was entered into the reference store
    fn create_date(&self) -> NaiveDate;

    /// First travel date the row applies to
    fn effective_date(&self) -> NaiveDate;

    /// Last travel date the row applies to
    fn discontinue_date(&self) -> NaiveDate;

    /// Last ticketing date the row is visible for
    fn expire_date(&self) -> NaiveDate;

    fn inhibit(&self) -> Inhibit {
        Inhibit::Available
    }

    /// Vendor the row was filed by, when the table is vendor-specific
    fn vendor(&self) -> Option<&str> {
        None
    }
}
