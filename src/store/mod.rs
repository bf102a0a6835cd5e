//! Idempotency store: a key-value boundary with atomic set-if-absent and TTLs.
//!
//! The pipeline never reads-then-writes a key from the caller side; the only
//! way to move a filename from absent to claimed is [`IdempotencyStore::set_if_absent`],
//! which the backing store executes atomically. That single primitive is what
//! makes "at most one claim per filename per TTL window" hold across workers
//! and across processes.
//!
//! Every method reports transport failures as [`StoreError`] instead of
//! panicking; the policy for turning a failure into a decision lives one layer
//! up in [`crate::tracker::StateTracker`].

pub mod redis_store;

#[cfg(test)]
pub(crate) mod memory;

use crate::error::StoreError;
use async_trait::async_trait;
use std::time::Duration;

pub use self::redis_store::RedisStore;

/// Key-value operations the pipeline needs from a shared store.
///
/// Implementations must be safe to share across tasks (`Arc<dyn IdempotencyStore>`).
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Write `value` under `key` with expiry `ttl` only if `key` is absent.
    ///
    /// Returns `Ok(true)` to exactly one of any number of concurrent callers.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, StoreError>;

    /// Unconditionally write `value` under `key` with expiry `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Remove `key`; `Ok(true)` when something was deleted.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Release the underlying connections. Later calls fail with
    /// [`StoreError::Closed`].
    async fn close(&self);
}
