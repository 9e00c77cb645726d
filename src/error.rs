//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache crate.
///
/// The cache itself never fails on `store`, `load`, `delete` or `clear`.
/// Loader errors passed through `load_or_store` are generic; `CacheError::Load`
/// is provided as a ready-made cloneable error for loaders that have nothing
/// more specific to report.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A loader failed to produce a value
    #[error("Load failed: {0}")]
    Load(String),

    /// An environment variable held a value that could not be parsed
    #[error("Invalid configuration: {var}={value:?}")]
    InvalidConfig { var: &'static str, value: String },
}

// == Result Type Alias ==
/// Convenience Result type for the cache crate.
pub type Result<T> = std::result::Result<T, CacheError>;
