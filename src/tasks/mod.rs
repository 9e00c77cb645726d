//! Background Tasks Module
//!
//! Contains the tasks the cache runs beside its callers.
//!
//! # Tasks
//! - Expiry timers: remove an entry once its TTL has elapsed
//! - Recency updates: detached writes into the access tracker (spawned from
//!   the cache itself)

mod expiry;

pub use expiry::{Arm, ExpiryScheduler};
