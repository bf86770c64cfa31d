//! Backing-store boundary

use crate::error::BackingStoreError;

/// Populates cache entries from the backing store.
///
/// `create` is the only path from a cache miss to the database query layer.
/// For historical caches the key carries the bucket bounds and the loader
/// must restrict its query to them.
pub trait Loader<K, R>: Send + Sync {
    /// Load every row for one key; an empty vector means no rows
    fn create(&self, key: &K) -> Result<Vec<R>, BackingStoreError>;

    /// Rows to insert at startup, grouped by key
    fn load_all(&self) -> Result<Vec<(K, Vec<R>)>, BackingStoreError> {
        Ok(Vec::new())
    }
}

impl<K, R, F> Loader<K, R> for F
where
    F: Fn(&K) -> Result<Vec<R>, BackingStoreError> + Send + Sync,
{
    fn create(&self, key: &K) -> Result<Vec<R>, BackingStoreError> {
        self(key)
    }
}
