use super::Cache;
use std::hash::Hash;
use std::sync::Arc;

/// An ordered stack of caches probed front to back.
///
/// A `get` returns the first hit and promotes the value into every earlier
/// level that missed, so hot entries migrate toward the front. A `put`
/// writes through to all levels; each level applies its own TTL and
/// eviction settings.
pub struct MultiLevelCache<K, V> {
    levels: Vec<Arc<Cache<K, V>>>,
}

impl<K, V> MultiLevelCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Builds a stack from fastest (`levels[0]`) to slowest.
    pub fn new(levels: Vec<Arc<Cache<K, V>>>) -> Self {
        Self { levels }
    }

    /// The configured levels, front first.
    pub fn levels(&self) -> &[Arc<Cache<K, V>>] {
        &self.levels
    }

    /// Probes the levels in order; on a hit, promotes the value into every
    /// earlier level.
    pub fn get(&self, key: &K) -> Option<V> {
        for (depth, level) in self.levels.iter().enumerate() {
            if let Some(value) = level.get(key) {
                for earlier in &self.levels[..depth] {
                    earlier.put(key.clone(), value.clone());
                }

                return Some(value);
            }
        }

        None
    }

    /// Writes a value through to every level.
    pub fn put(&self, key: K, value: V) {
        for level in &self.levels {
            level.put(key.clone(), value.clone());
        }
    }

    /// Removes `key` from every level; returns whether any level held it.
    pub fn invalidate(&self, key: &K) -> bool {
        let mut removed = false;

        for level in &self.levels {
            removed |= level.invalidate(key);
        }

        removed
    }

    /// Clears every level.
    pub fn invalidate_all(&self) {
        for level in &self.levels {
            level.invalidate_all();
        }
    }
}
