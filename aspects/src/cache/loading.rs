use super::{Cache, CacheError};
use std::hash::Hash;
use std::sync::Arc;

type Loader<K, V> = Arc<dyn Fn(&K) -> crate::Result<V> + Send + Sync>;

/// A cache that populates misses through a synchronous loader.
///
/// On a miss the loader runs inline, its result is stored with the cache's
/// default TTL and returned. A failing loader propagates
/// [`CacheError::Loader`] and stores nothing.
pub struct LoadingCache<K, V> {
    cache: Arc<Cache<K, V>>,
    loader: Loader<K, V>,
}

impl<K, V> LoadingCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Wraps a cache with a loader.
    pub fn new(
        cache: Arc<Cache<K, V>>,
        loader: impl Fn(&K) -> crate::Result<V> + Send + Sync + 'static,
    ) -> Self {
        Self {
            cache,
            loader: Arc::new(loader),
        }
    }

    /// Returns the cached value for `key`, loading it on a miss.
    pub fn get(&self, key: &K) -> Result<V, CacheError> {
        if let Some(value) = self.cache.get(key) {
            return Ok(value);
        }

        let value = (self.loader)(key).map_err(CacheError::Loader)?;

        self.cache.put(key.clone(), value.clone());

        Ok(value)
    }

    /// The wrapped cache, for direct access to invalidation and statistics.
    pub fn cache(&self) -> &Cache<K, V> {
        &self.cache
    }
}
