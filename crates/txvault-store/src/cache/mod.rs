//! Cache tiers.
//!
//! The routing cache is split into two tiers:
//!
//! - [`SharedCache`]: a key-value store shared by every worker process
//!   ([`RedisCache`] in production, [`MemoryCache`] in tests).
//! - [`LocalTier`]: per-process maps consulted before any network round-trip.
//!
//! Values in the shared tier are JSON-encoded domain records.

mod local;
mod memory;
mod redis;

pub use self::local::LocalTier;
pub use self::memory::MemoryCache;
pub use self::redis::RedisCache;

use async_trait::async_trait;

use crate::error::Result;

/// A string key-value store shared across worker processes.
#[async_trait]
pub trait SharedCache: Send + Sync {
    /// Get a single value.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache is unreachable.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Get several values in one round-trip, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache is unreachable.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    /// Store a value without expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache is unreachable.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete keys. Missing keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache is unreachable.
    async fn delete(&self, keys: &[String]) -> Result<()>;

    /// List every key starting with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache is unreachable.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}
