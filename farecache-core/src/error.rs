//! Error types for the caching framework

use chrono::NaiveDate;

/// Failure reported by a [`Loader`](crate::loader::Loader) while querying the backing store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackingStoreError {
    #[error("Backing store unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Query timed out after {0} ms")]
    Timeout(u64),
}

/// Errors surfaced by cache stores, the registry and the compressor.
///
/// `Clone` so that one population outcome can be handed to every caller
/// coalesced on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("Backing store error: {0}")]
    BackingStore(#[from] BackingStoreError),

    #[error("Population of {0} panicked in the loader")]
    LoaderPanicked(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Invalid invalidation pattern: {0}")]
    InvalidPattern(String),

    #[error("Unknown cache: {0}")]
    UnknownCache(String),

    #[error("Cache already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Cache {0} does not hold the requested key and record types")]
    TypeMismatch(String),

    #[error("Date out of supported range: {0}")]
    DateOutOfRange(NaiveDate),

    #[error("Invalidation feed is closed")]
    FeedClosed,
}

/// Result alias used across the cache API
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backing_store_error_converts() {
        let err: CacheError = BackingStoreError::Timeout(250).into();
        assert_eq!(
            err,
            CacheError::BackingStore(BackingStoreError::Timeout(250))
        );
        assert_eq!(
            err.to_string(),
            "Backing store error: Query timed out after 250 ms"
        );
    }
}
