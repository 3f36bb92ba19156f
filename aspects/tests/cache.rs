use aspects::cache::{
    bridge_to_bus, AsyncCache, Cache, CacheEvent, GroupCache, LoadingCache, MemoryAwareCache,
    MultiLevelCache,
};
use aspects::events::EventBus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[test]
fn lru_eviction_scenario() {
    let cache: Cache<String, i32> = Cache::lru(3);

    cache.put("a".into(), 1);
    cache.put("b".into(), 2);
    cache.put("c".into(), 3);
    cache.get(&"a".into());
    cache.put("d".into(), 4);

    assert_eq!(cache.get(&"a".into()), Some(1));
    assert_eq!(cache.get(&"b".into()), None);
    assert_eq!(cache.get(&"c".into()), Some(3));
    assert_eq!(cache.get(&"d".into()), Some(4));
}

#[test]
fn ttl_expiry_scenario() {
    let cache: Cache<String, String> = Cache::unbounded();

    cache.put_with_ttl("k".into(), "v".into(), Duration::from_millis(100));

    assert_eq!(cache.get(&"k".into()), Some("v".into()));

    std::thread::sleep(Duration::from_millis(150));

    assert_eq!(cache.get(&"k".into()), None);
    assert!(cache.stats().expirations >= 1);
}

#[test]
fn size_stays_bounded_under_any_op_sequence() {
    let cache: Cache<String, usize> = Cache::lfu(5);

    for i in 0..50 {
        cache.put(format!("k{i}"), i);

        if i % 3 == 0 {
            cache.get(&format!("k{}", i / 2));
        }

        if i % 7 == 0 {
            cache.invalidate(&format!("k{}", i / 3));
        }

        assert!(cache.len() <= 5);
    }
}

#[test]
fn hits_plus_misses_equals_completed_gets() {
    let cache: Cache<String, i32> = Cache::lru(4);

    cache.put("a".into(), 1);

    for i in 0..20 {
        cache.get(&format!("k{}", i % 6));
    }

    cache.get(&"a".into());

    let stats = cache.stats();

    assert_eq!(stats.hits + stats.misses, 21);
}

#[test]
fn save_load_preserves_unexpired_entries() {
    let cache: Cache<String, String> = Cache::lru(16);

    cache.put("plain".into(), "value".into());
    cache.put_with_ttl("ttl".into(), "timed".into(), Duration::from_secs(3600));
    cache.get(&"plain".into());

    let restored: Cache<String, String> = Cache::lru(16);

    restored.load(cache.save());

    for key in cache.keys() {
        assert_eq!(restored.get(&key), cache.get(&key));
    }
}

#[test]
fn loading_cache_equals_loader_until_invalidation() {
    let loads = Arc::new(AtomicUsize::new(0));
    let loading = {
        let loads = Arc::clone(&loads);

        LoadingCache::new(Arc::new(Cache::unbounded()), move |key: &String| {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(key.to_uppercase())
        })
    };

    for _ in 0..5 {
        assert_eq!(loading.get(&"abc".to_owned()).unwrap(), "ABC");
    }

    assert_eq!(loads.load(Ordering::SeqCst), 1);

    loading.cache().invalidate(&"abc".to_owned());

    assert_eq!(loading.get(&"abc".to_owned()).unwrap(), "ABC");
    assert_eq!(loads.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn async_cache_loads_exactly_once_across_racers() {
    let async_cache = Arc::new(AsyncCache::new(Arc::new(Cache::unbounded())));
    let loads = Arc::new(AtomicUsize::new(0));
    let mut tasks = Vec::new();

    for _ in 0..8 {
        let async_cache = Arc::clone(&async_cache);
        let loads = Arc::clone(&loads);

        tasks.push(tokio::spawn(async move {
            async_cache
                .compute_if_absent("key".to_owned(), async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok::<_, aspects::Error>("loaded".to_owned())
                })
                .await
                .unwrap()
        }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap(), "loaded");
    }

    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[test]
fn multi_level_promotion() {
    let l1: Arc<Cache<String, i32>> = Arc::new(Cache::lru(4));
    let l2: Arc<Cache<String, i32>> = Arc::new(Cache::lru(32));
    let stack = MultiLevelCache::new(vec![Arc::clone(&l1), Arc::clone(&l2)]);

    l2.put("deep".into(), 9);

    assert_eq!(stack.get(&"deep".into()), Some(9));
    // The hit was promoted into the first level.
    assert_eq!(l1.get(&"deep".into()), Some(9));

    stack.put("both".into(), 1);

    assert_eq!(l1.get(&"both".into()), Some(1));
    assert_eq!(l2.get(&"both".into()), Some(1));
}

#[test]
fn group_invalidation_emits_per_key_evictions() {
    let cache = GroupCache::new(Arc::new(Cache::<String, i32>::unbounded()));
    let evicted: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    {
        let evicted = Arc::clone(&evicted);

        cache.cache().set_listener(move |event| {
            if let CacheEvent::Evict(key) = event {
                evicted.lock().unwrap().push(key.clone());
            }
        });
    }

    cache.put_in_groups("u1".into(), 1, &["users"]);
    cache.put_in_groups("u2".into(), 2, &["users", "admins"]);
    cache.put_in_groups("s1".into(), 3, &["sessions"]);

    assert_eq!(cache.invalidate_group("users"), 2);
    assert_eq!(cache.get(&"s1".into()), Some(3));

    let mut keys = evicted.lock().unwrap().clone();

    keys.sort();
    assert_eq!(keys, vec!["u1", "u2"]);
}

#[test]
fn memory_aware_cache_respects_its_budget() {
    let cache: MemoryAwareCache<String, Vec<u8>> =
        MemoryAwareCache::new(1024, aspects::cache::EvictionPolicy::Lru);

    for i in 0..10 {
        cache.put(format!("k{i}"), vec![0u8; 200]).unwrap();
        assert!(cache.total_bytes() <= 1024);
    }

    // An entry bigger than the whole budget is rejected outright.
    assert!(cache.put("huge".into(), vec![0u8; 4096]).is_err());
}

#[test]
fn cache_events_flow_onto_the_bus() {
    let cache: Cache<String, i32> = Cache::lru(8);
    let bus = EventBus::new();
    let types: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    {
        let types = Arc::clone(&types);

        bus.subscribe("app_cache.*", move |event| {
            types.lock().unwrap().push(event.event_type.clone());
            Ok(())
        })
        .unwrap();
    }

    bridge_to_bus(&cache, &bus, "app_cache");

    cache.put("k".into(), 1);
    cache.get(&"k".into());

    assert_eq!(
        *types.lock().unwrap(),
        vec!["app_cache.put", "app_cache.hit"]
    );
}
