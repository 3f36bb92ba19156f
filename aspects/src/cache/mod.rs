//! Keyed cache functionality.
//!
//! The heart of the module is [`Cache`], a thread-safe key→value store with
//! optional TTL, pluggable eviction ([`EvictionPolicy`]), statistics
//! ([`CacheStats`]), per-key [`CacheEvent`] emission and serde snapshots.
//! Specialised variants compose on top of it:
//!
//! - [`LoadingCache`] populates misses through a synchronous loader.
//! - [`AsyncCache`] exposes suspendable operations and a single-flight
//!   [`compute_if_absent`](AsyncCache::compute_if_absent).
//! - [`MultiLevelCache`] probes an ordered level stack and promotes hits.
//! - [`GroupCache`] tags entries with groups for bulk invalidation.
//! - [`MemoryAwareCache`] bounds the total approximate payload size.
//!
//! ```
//! use aspects::cache::Cache;
//!
//! let cache: Cache<String, u32> = Cache::lru(2);
//!
//! cache.put("a".to_owned(), 1);
//! cache.put("b".to_owned(), 2);
//! cache.put("c".to_owned(), 3); // evicts "a", the least recently used
//!
//! assert_eq!(cache.get(&"a".to_owned()), None);
//! assert_eq!(cache.get(&"c".to_owned()), Some(3));
//! ```

mod async_cache;
mod base;
#[cfg(feature = "events")]
mod bridge;
mod distributed;
mod entry;
mod group;
mod loading;
mod memory;
mod multi_level;

pub use async_cache::AsyncCache;
pub use base::{Cache, CacheSnapshot};
pub use entry::SnapshotEntry;
#[cfg(feature = "events")]
pub use bridge::bridge_to_bus;
pub use distributed::DistributedCache;
pub use group::GroupCache;
pub use loading::LoadingCache;
pub use memory::{MemorySized, MemoryAwareCache, PER_ENTRY_OVERHEAD_BYTES};
pub use multi_level::MultiLevelCache;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Errors produced by cache write paths. Read paths never fail.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A loader invoked on behalf of a `get` failed; nothing was stored.
    #[error("cache loader failed: {0}")]
    Loader(#[source] crate::Error),

    /// A value is larger than the cache's total memory budget.
    #[error("entry of {size} bytes exceeds the cache memory budget of {budget} bytes")]
    SizeOverflow {
        /// Approximate size of the rejected entry.
        size: u64,
        /// Configured budget.
        budget: u64,
    },

    /// A snapshot could not be restored; cache contents are unchanged.
    #[error("malformed cache snapshot: {0}")]
    MalformedSnapshot(#[source] serde_json::Error),
}

/// Rule deciding which entry to remove when a bounded cache overflows.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Evict the least recently used entry.
    #[default]
    Lru,
    /// Evict the least frequently used entry (fewest hits), breaking ties
    /// toward the least recently used.
    Lfu,
    /// Evict the oldest entry by insertion.
    Fifo,
}

/// Construction-time cache settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries; `None` means unbounded.
    pub max_size: Option<usize>,

    /// TTL applied to entries stored without an explicit TTL.
    pub default_ttl: Option<Duration>,

    /// Eviction rule applied when a bound is exceeded.
    pub eviction_policy: EvictionPolicy,

    /// Maximum total approximate payload size in bytes; `None` means
    /// unbounded. Enforced for entries stored with a size estimate (see
    /// [`MemoryAwareCache`]).
    pub max_memory_bytes: Option<u64>,
}

/// A cache lifecycle event delivered to the configured listener.
///
/// Events are emitted after the cache's critical section is released, so
/// listeners may freely call back into the cache.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CacheEvent<K> {
    /// A `get` found a live entry.
    Hit(K),
    /// A `get` found nothing usable.
    Miss(K),
    /// A `put` stored or replaced an entry.
    Put(K),
    /// An entry was removed by eviction or invalidation.
    Evict(K),
    /// An entry was removed because its TTL had elapsed.
    Expire(K),
}

/// Listener receiving [`CacheEvent`]s.
pub type CacheListener<K> = Arc<dyn Fn(&CacheEvent<K>) + Send + Sync>;

/// Point-in-time snapshot of cache effectiveness counters.
///
/// `evictions` counts every entry removed by capacity pressure or explicit
/// invalidation; `expirations` counts TTL removals.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// `get` calls that returned a value.
    pub hits: u64,
    /// `get` calls that returned nothing.
    pub misses: u64,
    /// `put` calls.
    pub puts: u64,
    /// Entries removed by eviction or invalidation.
    pub evictions: u64,
    /// Entries removed by TTL expiry.
    pub expirations: u64,
}

impl CacheStats {
    /// `hits / (hits + misses)`, or zero before the first `get`.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;

        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
