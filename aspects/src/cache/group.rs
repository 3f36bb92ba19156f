use super::base::PutSpec;
use super::{Cache, CacheError};
use std::collections::BTreeSet;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

/// A cache whose entries can be tagged with invalidation groups.
///
/// Groups are free-form strings recorded at `put` time;
/// [`invalidate_group`](GroupCache::invalidate_group) removes every member
/// in one call, emitting an `Evict` event per removed key. Group membership
/// survives save/load of the underlying cache.
pub struct GroupCache<K, V> {
    cache: Arc<Cache<K, V>>,
}

impl<K, V> GroupCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Wraps a cache with group bookkeeping.
    pub fn new(cache: Arc<Cache<K, V>>) -> Self {
        Self { cache }
    }

    /// Stores a value tagged with the given groups.
    pub fn put_in_groups(&self, key: K, value: V, groups: &[&str]) {
        let _ = self.put_in_groups_with_ttl(key, value, groups, None);
    }

    /// Stores a value tagged with the given groups and an explicit TTL.
    pub fn put_in_groups_with_ttl(
        &self,
        key: K,
        value: V,
        groups: &[&str],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let groups: BTreeSet<String> = groups.iter().map(|g| (*g).to_owned()).collect();

        self.cache.put_spec(
            key,
            value,
            PutSpec {
                ttl,
                groups,
                ..PutSpec::default()
            },
        )
    }

    /// Looks up `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.cache.get(key)
    }

    /// Removes every entry tagged with `group`; returns the removal count.
    pub fn invalidate_group(&self, group: &str) -> usize {
        self.cache.invalidate_group(group)
    }

    /// Keys currently tagged with `group`.
    pub fn keys_in_group(&self, group: &str) -> Vec<K> {
        self.cache.keys_in_group(group)
    }

    /// The wrapped cache, for the rest of the cache API.
    pub fn cache(&self) -> &Cache<K, V> {
        &self.cache
    }
}
