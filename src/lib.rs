//! ttl_lru - A bounded in-process cache for read-heavy workloads
//!
//! Provides LRU-like eviction, per-entry TTL expiration and single-flight
//! loading so that concurrent misses on one key trigger a single load.
//!
//! ```no_run
//! use std::time::Duration;
//! use ttl_lru::{Cache, CacheError};
//!
//! # async fn demo() -> Result<(), CacheError> {
//! let cache: Cache<u64, String> = Cache::new(1024, Duration::from_secs(30));
//!
//! let name = cache
//!     .load_or_store(42, || async { Ok("answer".to_string()) })
//!     .await?;
//! assert_eq!(cache.load(&42).await, Some(name));
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod keyset;
pub mod tasks;

pub use cache::{Cache, CacheStats};
pub use cancel::CancelRegistry;
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use keyset::CountingKeySet;
