use super::{Cache, CacheError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Error representation shared between concurrent callers of one load.
type SharedResult<V> = Result<V, Arc<String>>;

/// A cache with suspendable operations and single-flight loading.
///
/// [`compute_if_absent`](AsyncCache::compute_if_absent) guarantees at most
/// one concurrent load per key: callers that find a load already in flight
/// await its outcome instead of starting their own. The loaded value is
/// stored before any caller observes it. A load is not cancellable by
/// secondary callers; they wait for the primary to finish.
pub struct AsyncCache<K, V> {
    cache: Arc<Cache<K, V>>,
    in_flight: Mutex<HashMap<K, Arc<OnceCell<SharedResult<V>>>>>,
}

impl<K, V> AsyncCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Wraps a cache for async use.
    pub fn new(cache: Arc<Cache<K, V>>) -> Self {
        Self {
            cache,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Looks up `key`.
    pub async fn get(&self, key: &K) -> Option<V> {
        self.cache.get(key)
    }

    /// Stores a value, applying the cache's default TTL if configured.
    pub async fn put(&self, key: K, value: V) {
        self.cache.put(key, value);
    }

    /// Stores a value with an explicit TTL.
    pub async fn put_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.cache.put_with_ttl(key, value, ttl);
    }

    /// Removes `key` if present.
    pub async fn invalidate(&self, key: &K) -> bool {
        self.cache.invalidate(key)
    }

    /// Returns the value for `key`, running `load` on a miss.
    ///
    /// Concurrent callers for the same missing key share one load. Loader
    /// errors are propagated to every waiting caller (flattened to their
    /// message so they can be shared) and nothing is stored.
    pub async fn compute_if_absent<F>(&self, key: K, load: F) -> Result<V, CacheError>
    where
        F: Future<Output = crate::Result<V>>,
    {
        if let Some(value) = self.cache.get(&key) {
            return Ok(value);
        }

        let cell = {
            let mut in_flight = self.in_flight.lock();

            Arc::clone(
                in_flight
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let result = cell
            .get_or_init(|| async {
                // Re-check under the in-flight guard: a racing load may have
                // populated the cache between our miss and the cell creation.
                if let Some(value) = self.cache.get(&key) {
                    return Ok(value);
                }

                match load.await {
                    Ok(value) => {
                        self.cache.put(key.clone(), value.clone());
                        Ok(value)
                    }
                    Err(error) => Err(Arc::new(error.to_string())),
                }
            })
            .await
            .clone();

        self.in_flight.lock().remove(&key);

        result.map_err(|message| CacheError::Loader(message.to_string().into()))
    }

    /// The wrapped cache, for synchronous access.
    pub fn cache(&self) -> &Cache<K, V> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_calls_share_one_load() {
        let cache = Arc::new(Cache::unbounded());
        let async_cache = Arc::new(AsyncCache::new(cache));
        let loads = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();

        for _ in 0..16 {
            let async_cache = Arc::clone(&async_cache);
            let loads = Arc::clone(&loads);

            tasks.push(tokio::spawn(async move {
                async_cache
                    .compute_if_absent("k".to_owned(), async {
                        loads.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, crate::Error>(42)
                    })
                    .await
                    .unwrap()
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap(), 42);
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(async_cache.get(&"k".to_owned()).await, Some(42));
    }

    #[tokio::test]
    async fn value_is_stored_before_callers_observe_it() {
        let cache = Arc::new(Cache::unbounded());
        let async_cache = AsyncCache::new(Arc::clone(&cache));

        let value = async_cache
            .compute_if_absent("k".to_owned(), async { Ok::<_, crate::Error>(7) })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(cache.get(&"k".to_owned()), Some(7));
    }

    #[tokio::test]
    async fn load_errors_store_nothing_and_allow_retry() {
        let cache: Arc<Cache<String, i32>> = Arc::new(Cache::unbounded());
        let async_cache = AsyncCache::new(Arc::clone(&cache));

        let failed = async_cache
            .compute_if_absent("k".to_owned(), async { Err("backend down".into()) })
            .await;

        assert!(matches!(failed, Err(CacheError::Loader(_))));
        assert!(cache.is_empty());

        let retried = async_cache
            .compute_if_absent("k".to_owned(), async { Ok::<_, crate::Error>(1) })
            .await
            .unwrap();

        assert_eq!(retried, 1);
    }

    #[tokio::test]
    async fn present_keys_skip_the_loader() {
        let cache: Arc<Cache<String, i32>> = Arc::new(Cache::unbounded());

        cache.put("k".to_owned(), 1);

        let async_cache = AsyncCache::new(cache);
        let loader_ran = Arc::new(AtomicUsize::new(0));
        let value = {
            let loader_ran = Arc::clone(&loader_ran);

            async_cache
                .compute_if_absent("k".to_owned(), async move {
                    loader_ran.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, crate::Error>(99)
                })
                .await
                .unwrap()
        };

        assert_eq!(value, 1);
        assert_eq!(loader_ran.load(Ordering::SeqCst), 0);
    }
}
