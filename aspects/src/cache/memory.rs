use super::base::PutSpec;
use super::{Cache, CacheConfig, CacheError, EvictionPolicy};
use std::hash::Hash;
use std::time::Duration;

/// Fixed per-entry cost charged for values without a meaningful byte size.
pub const PER_ENTRY_OVERHEAD_BYTES: u64 = 64;

/// Approximate in-memory size of a cached value.
///
/// Strings and byte buffers report their length; everything else charges
/// the fixed [`PER_ENTRY_OVERHEAD_BYTES`].
pub trait MemorySized {
    /// Approximate payload size in bytes.
    fn approx_size_bytes(&self) -> u64;
}

impl MemorySized for String {
    fn approx_size_bytes(&self) -> u64 {
        self.len() as u64
    }
}

impl MemorySized for Vec<u8> {
    fn approx_size_bytes(&self) -> u64 {
        self.len() as u64
    }
}

macro_rules! fixed_overhead_impls {
    ($($ty:ty),* $(,)?) => {
        $(
            impl MemorySized for $ty {
                fn approx_size_bytes(&self) -> u64 {
                    PER_ENTRY_OVERHEAD_BYTES
                }
            }
        )*
    };
}

fixed_overhead_impls!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, f32, f64, bool);

/// A cache bounded by the total approximate size of its values.
///
/// Every `put` charges the value's [`MemorySized`] estimate plus entry
/// bookkeeping; when the running total exceeds the budget, entries are
/// evicted per the configured policy until it fits again. A single value
/// larger than the whole budget is rejected with
/// [`CacheError::SizeOverflow`].
pub struct MemoryAwareCache<K, V> {
    cache: Cache<K, V>,
}

impl<K, V> MemoryAwareCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + MemorySized,
{
    /// Creates a cache bounded by `max_memory_bytes`.
    pub fn new(max_memory_bytes: u64, eviction_policy: EvictionPolicy) -> Self {
        Self {
            cache: Cache::new(CacheConfig {
                max_memory_bytes: Some(max_memory_bytes),
                eviction_policy,
                ..CacheConfig::default()
            }),
        }
    }

    /// Stores a value, evicting until the byte budget is respected.
    pub fn put(&self, key: K, value: V) -> Result<(), CacheError> {
        self.put_with_ttl(key, value, None)
    }

    /// Stores a value with an explicit TTL.
    pub fn put_with_ttl(&self, key: K, value: V, ttl: Option<Duration>) -> Result<(), CacheError> {
        let size_bytes = Some(value.approx_size_bytes() + PER_ENTRY_OVERHEAD_BYTES);

        self.cache.put_spec(
            key,
            value,
            PutSpec {
                ttl,
                size_bytes,
                ..PutSpec::default()
            },
        )
    }

    /// Looks up `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.cache.get(key)
    }

    /// Total approximate bytes currently stored.
    pub fn total_bytes(&self) -> u64 {
        self.cache.total_bytes()
    }

    /// Builds the view over an existing cache configured with a byte budget.
    pub fn over(cache: Cache<K, V>) -> Self {
        Self { cache }
    }

    /// The wrapped cache, for the rest of the cache API.
    pub fn cache(&self) -> &Cache<K, V> {
        &self.cache
    }
}
