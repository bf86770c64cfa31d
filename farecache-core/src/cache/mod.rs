//! Cache stores
//!
//! [`CacheStore`] is the typed, singleflight-populated store every cache in
//! the framework is built on. Eviction and TTL bookkeeping live beside it.

pub mod eviction;
mod expiry;
mod inflight;
pub mod store;

pub use eviction::*;
pub use store::*;
