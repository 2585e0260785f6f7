//! TTL cache for read-mostly data (weather lookups, computed recommendations).
//!
//! This module provides:
//! - A generic JSON cache with per-entry time-to-live
//! - Lazy eviction on read plus a sweep for entries nobody asks for again
//! - Coarse key derivation so nearby or similar lookups share an entry

mod keys;
mod store;
mod types;

pub use keys::{CacheKey, UserSignature, WeatherSignature};
pub use store::{default_ttl, CacheStore, CacheTtls, CACHE_NAMESPACE};
pub use types::{CacheStatus, CachedEntry};
