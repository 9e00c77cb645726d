//! Cache Module
//!
//! Provides a concurrent in-memory cache with TTL expiration, LRU-like
//! eviction and single-flight loading.

mod flight;
mod lru;
mod stats;
mod store;


// Re-export public types
pub use flight::SingleFlight;
pub use lru::AccessTracker;
pub use stats::CacheStats;
pub(crate) use stats::StatsRecorder;
pub use store::Cache;
