use async_trait::async_trait;
use std::time::Duration;

/// Capability contract for a cache backed by an external store.
///
/// The core defines only this interface; concrete backends (Redis, a
/// database, a sidecar) are plug-ins supplied by the embedding application.
/// Implementations are expected to be safe to call from multiple tasks.
#[async_trait]
pub trait DistributedCache<K, V>: Send + Sync {
    /// Looks up `key` in the external store.
    async fn get(&self, key: &K) -> crate::Result<Option<V>>;

    /// Stores a value, with an optional TTL enforced by the backend.
    async fn put(&self, key: K, value: V, ttl: Option<Duration>) -> crate::Result<()>;

    /// Removes every entry owned by this cache.
    async fn invalidate_all(&self) -> crate::Result<()>;
}
