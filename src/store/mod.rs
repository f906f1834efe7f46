//! Counter store abstraction.
//!
//! The engine only needs a handful of Redis-shaped primitives. Atomicity of
//! `increment` is provided by the backing service, never by the client.

mod memory;
mod redis;

use async_trait::async_trait;

use crate::error::Result;

pub use self::memory::MemoryCounterStore;
pub use self::redis::{RedisConfig, RedisCounterStore};

/// `ttl` reply for a key that does not exist
pub const TTL_MISSING: i64 = -2;
/// `ttl` reply for a key that exists without an expiry
pub const TTL_PERSISTENT: i64 = -1;

/// Shared key-value service holding one integer counter per key
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current value, `None` when the key is absent or expired
    async fn get(&self, key: &str) -> Result<Option<i64>>;

    /// Store `value`, clearing any expiry
    async fn set(&self, key: &str, value: i64) -> Result<()>;

    /// Atomically add one; a missing key counts from zero and has no expiry
    async fn increment(&self, key: &str) -> Result<i64>;

    /// Expire `key` after `seconds`; `false` when the key does not exist
    async fn expire(&self, key: &str, seconds: u64) -> Result<bool>;

    /// Remaining lifetime in seconds, or [`TTL_PERSISTENT`] / [`TTL_MISSING`]
    async fn ttl(&self, key: &str) -> Result<i64>;

    /// Start a new window: `set` followed by `expire`
    async fn reset(&self, key: &str, value: i64, seconds: u64) -> Result<()> {
        self.set(key, value).await?;
        self.expire(key, seconds).await?;
        Ok(())
    }

    /// Health check for the store
    async fn health_check(&self) -> Result<()>;
}
