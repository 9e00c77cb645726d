//! Configuration Module
//!
//! Handles cache sizing and expiration settings, optionally loaded from
//! environment variables.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Smallest capacity a cache will run with; lower values are raised to it.
pub const MIN_CAPACITY: usize = 3;

/// Cache configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries the cache can hold
    pub capacity: usize,
    /// Lifetime of an entry after its first write, `Duration::ZERO` = never expire
    pub ttl: Duration,
}

impl CacheConfig {
    // == Constructor ==
    /// Creates a config with the given capacity and TTL.
    ///
    /// Capacity is clamped to [`MIN_CAPACITY`].
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(MIN_CAPACITY),
            ttl,
        }
    }

    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_CAPACITY` - Maximum cache entries (default: 1000)
    /// - `CACHE_TTL_MS` - Entry lifetime in milliseconds, 0 disables expiry (default: 0)
    ///
    /// Unset variables fall back to the defaults; values that do not parse
    /// are reported as [`CacheError::InvalidConfig`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let capacity = match lookup("CACHE_CAPACITY") {
            Some(value) => parse_var("CACHE_CAPACITY", value)?,
            None => defaults.capacity,
        };
        let ttl = match lookup("CACHE_TTL_MS") {
            Some(value) => Duration::from_millis(parse_var("CACHE_TTL_MS", value)?),
            None => defaults.ttl,
        };

        Ok(Self::new(capacity, ttl))
    }

    /// Returns true when entries are subject to expiry timers.
    pub fn expires(&self) -> bool {
        !self.ttl.is_zero()
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CacheError::InvalidConfig { var, value })
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            ttl: Duration::ZERO,
        }
    }
}
