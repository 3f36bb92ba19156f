use super::{Cache, CacheEvent};
use crate::events::{Event, EventBus};
use serde_json::json;
use std::fmt::Display;
use std::hash::Hash;

/// Forwards a cache's lifecycle events onto an event bus.
///
/// Published types are `<prefix>.hit`, `<prefix>.miss`, `<prefix>.put`,
/// `<prefix>.evict` and `<prefix>.expire`, each carrying the key in its
/// payload. This is the composition seam between the cache engine and the
/// event substrate; both stay fully usable on their own.
pub fn bridge_to_bus<K, V>(cache: &Cache<K, V>, bus: &EventBus, prefix: &str)
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    V: Clone,
{
    let bus = bus.clone();
    let prefix = prefix.to_owned();

    cache.set_listener(move |event| {
        let (kind, key) = match event {
            CacheEvent::Hit(key) => ("hit", key),
            CacheEvent::Miss(key) => ("miss", key),
            CacheEvent::Put(key) => ("put", key),
            CacheEvent::Evict(key) => ("evict", key),
            CacheEvent::Expire(key) => ("expire", key),
        };

        bus.publish(&Event::new(
            format!("{prefix}.{kind}"),
            json!({ "key": key.to_string() }),
        ));
    });
}
