use super::entry::{Entry, SnapshotEntry};
use super::{CacheConfig, CacheError, CacheEvent, CacheListener, CacheStats, EvictionPolicy};
use crate::util::glob_match;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use slog::{o, Discard, Logger};
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::time::Duration;

struct CacheState<K, V> {
    entries: HashMap<K, Entry<V>>,
    next_seq: u64,
    total_bytes: u64,
    stats: CacheStats,
}

impl<K, V> CacheState<K, V> {
    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;

        self.next_seq += 1;
        seq
    }
}

/// Value-level description of one `put`, shared by the cache variants.
#[derive(Default)]
pub(super) struct PutSpec {
    pub(super) ttl: Option<Duration>,
    pub(super) groups: BTreeSet<String>,
    pub(super) size_bytes: Option<u64>,
}

/// A thread-safe key→value store with TTL, eviction and statistics.
///
/// All state sits behind one critical region; lifecycle events and listener
/// callbacks are dispatched only after that region is released, so listeners
/// may call back into the cache without deadlocking. Expiry is lazy: an
/// entry past its deadline is removed by the `get` that finds it, and a
/// [`sweep_expired`](Cache::sweep_expired) helper is available for callers
/// that want proactive cleanup.
pub struct Cache<K, V> {
    state: Mutex<CacheState<K, V>>,
    config: CacheConfig,
    listener: RwLock<Option<CacheListener<K>>>,
    log: RwLock<Logger>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a cache from explicit settings.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                next_seq: 0,
                total_bytes: 0,
                stats: CacheStats::default(),
            }),
            config,
            listener: RwLock::new(None),
            log: RwLock::new(Logger::root(Discard, o!())),
        }
    }

    /// An unbounded cache with no default TTL.
    pub fn unbounded() -> Self {
        Self::new(CacheConfig::default())
    }

    /// A least-recently-used cache holding at most `max_size` entries.
    pub fn lru(max_size: usize) -> Self {
        Self::new(CacheConfig {
            max_size: Some(max_size),
            eviction_policy: EvictionPolicy::Lru,
            ..CacheConfig::default()
        })
    }

    /// A least-frequently-used cache holding at most `max_size` entries.
    pub fn lfu(max_size: usize) -> Self {
        Self::new(CacheConfig {
            max_size: Some(max_size),
            eviction_policy: EvictionPolicy::Lfu,
            ..CacheConfig::default()
        })
    }

    /// A first-in-first-out cache holding at most `max_size` entries.
    pub fn fifo(max_size: usize) -> Self {
        Self::new(CacheConfig {
            max_size: Some(max_size),
            eviction_policy: EvictionPolicy::Fifo,
            ..CacheConfig::default()
        })
    }

    /// The settings this cache was built with.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Replaces the logger used for eviction/expiry diagnostics.
    pub fn set_logger(&self, logger: Logger) {
        *self.log.write() = logger;
    }

    /// Installs the lifecycle event listener, replacing any previous one.
    pub fn set_listener(&self, listener: impl Fn(&CacheEvent<K>) + Send + Sync + 'static) {
        *self.listener.write() = Some(std::sync::Arc::new(listener));
    }

    /// Stores a value under `key`, applying the default TTL if configured.
    pub fn put(&self, key: K, value: V) {
        // Without a size estimate the byte budget cannot reject the entry.
        let _ = self.put_spec(key, value, PutSpec::default());
    }

    /// Stores a value with an explicit TTL, overriding the default.
    pub fn put_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let _ = self.put_spec(
            key,
            value,
            PutSpec {
                ttl: Some(ttl),
                ..PutSpec::default()
            },
        );
    }

    pub(super) fn put_spec(&self, key: K, value: V, spec: PutSpec) -> Result<(), CacheError> {
        self.put_spec_at(key, value, spec, Utc::now())
    }

    fn put_spec_at(
        &self,
        key: K,
        value: V,
        spec: PutSpec,
        now: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        if let (Some(size), Some(budget)) = (spec.size_bytes, self.config.max_memory_bytes) {
            if size > budget {
                return Err(CacheError::SizeOverflow { size, budget });
            }
        }

        let mut events = Vec::new();

        {
            let mut state = self.state.lock();
            let ttl = spec.ttl.or(self.config.default_ttl);
            let inserted_seq = state.bump_seq();

            if let Some(previous) = state.entries.remove(&key) {
                state.total_bytes -= previous.size_bytes.unwrap_or(0);
            }

            state.total_bytes += spec.size_bytes.unwrap_or(0);
            state.entries.insert(
                key.clone(),
                Entry {
                    value,
                    inserted_at: now,
                    last_accessed_at: now,
                    // A TTL too large to represent simply never expires.
                    expires_at: ttl.and_then(|ttl| {
                        chrono::Duration::from_std(ttl)
                            .ok()
                            .and_then(|d| now.checked_add_signed(d))
                    }),
                    hit_count: 0,
                    inserted_seq,
                    touched_seq: inserted_seq,
                    size_bytes: spec.size_bytes,
                    groups: spec.groups,
                },
            );
            state.stats.puts += 1;

            self.evict_over_bounds(&mut state, &mut events, Some(&key));
            events.insert(0, CacheEvent::Put(key));
        }

        self.emit(&events);

        Ok(())
    }

    /// Looks up `key`, updating recency/frequency metadata on a hit.
    ///
    /// An entry whose TTL has elapsed is removed and reported as a miss; a
    /// `get` never returns an expired value.
    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Utc::now())
    }

    fn get_at(&self, key: &K, now: DateTime<Utc>) -> Option<V> {
        enum Lookup {
            Absent,
            Expired,
            Live,
        }

        let mut events = Vec::new();
        let result = {
            let mut state = self.state.lock();
            let lookup = match state.entries.get(key) {
                None => Lookup::Absent,
                Some(entry) if entry.is_expired(now) => Lookup::Expired,
                Some(_) => Lookup::Live,
            };

            match lookup {
                Lookup::Absent => {
                    state.stats.misses += 1;
                    events.push(CacheEvent::Miss(key.clone()));
                    None
                }
                Lookup::Expired => {
                    let removed = state.entries.remove(key).expect("entry just observed");

                    state.total_bytes -= removed.size_bytes.unwrap_or(0);
                    state.stats.expirations += 1;
                    state.stats.misses += 1;
                    events.push(CacheEvent::Expire(key.clone()));
                    events.push(CacheEvent::Miss(key.clone()));
                    None
                }
                Lookup::Live => {
                    let seq = state.bump_seq();
                    let value = {
                        let entry = state.entries.get_mut(key).expect("entry just observed");

                        entry.hit_count += 1;
                        entry.last_accessed_at = now;
                        entry.touched_seq = seq;
                        entry.value.clone()
                    };

                    state.stats.hits += 1;
                    events.push(CacheEvent::Hit(key.clone()));
                    Some(value)
                }
            }
        };

        self.emit(&events);

        result
    }

    /// Whether a live (non-expired) entry exists for `key`.
    ///
    /// Unlike [`get`](Cache::get) this neither counts toward statistics nor
    /// touches recency metadata.
    pub fn contains(&self, key: &K) -> bool {
        let now = Utc::now();
        let state = self.state.lock();

        state
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Removes `key` if present; returns whether an entry was removed.
    pub fn invalidate(&self, key: &K) -> bool {
        let mut events = Vec::new();
        let removed = {
            let mut state = self.state.lock();

            match state.entries.remove(key) {
                Some(entry) => {
                    state.total_bytes -= entry.size_bytes.unwrap_or(0);
                    state.stats.evictions += 1;
                    events.push(CacheEvent::Evict(key.clone()));
                    true
                }
                None => false,
            }
        };

        self.emit(&events);

        removed
    }

    /// Removes every entry, emitting one `Evict` event per removed key.
    pub fn invalidate_all(&self) {
        let mut events = Vec::new();

        {
            let mut state = self.state.lock();
            let keys: Vec<K> = state.entries.keys().cloned().collect();

            for key in keys {
                state.entries.remove(&key);
                state.stats.evictions += 1;
                events.push(CacheEvent::Evict(key));
            }

            state.total_bytes = 0;
        }

        self.emit(&events);
    }

    /// Removes every entry whose key matches `glob` (`*` matches any run of
    /// characters). Returns the number of removed entries.
    pub fn invalidate_pattern(&self, glob: &str) -> usize
    where
        K: AsRef<str>,
    {
        let mut events = Vec::new();
        let removed = {
            let mut state = self.state.lock();
            let matching: Vec<K> = state
                .entries
                .keys()
                .filter(|key| glob_match(glob, key.as_ref()))
                .cloned()
                .collect();

            for key in &matching {
                if let Some(entry) = state.entries.remove(key) {
                    state.total_bytes -= entry.size_bytes.unwrap_or(0);
                    state.stats.evictions += 1;
                    events.push(CacheEvent::Evict(key.clone()));
                }
            }

            matching.len()
        };

        self.emit(&events);

        removed
    }

    /// Removes every entry tagged with group `group`, emitting one `Evict`
    /// per removed key. Returns the number of removed entries.
    pub fn invalidate_group(&self, group: &str) -> usize {
        let mut events = Vec::new();
        let removed = {
            let mut state = self.state.lock();
            let matching: Vec<K> = state
                .entries
                .iter()
                .filter(|(_, entry)| entry.groups.contains(group))
                .map(|(key, _)| key.clone())
                .collect();

            for key in &matching {
                if let Some(entry) = state.entries.remove(key) {
                    state.total_bytes -= entry.size_bytes.unwrap_or(0);
                    state.stats.evictions += 1;
                    events.push(CacheEvent::Evict(key.clone()));
                }
            }

            matching.len()
        };

        self.emit(&events);

        removed
    }

    /// Keys of live entries tagged with `group`.
    pub fn keys_in_group(&self, group: &str) -> Vec<K> {
        let now = Utc::now();
        let state = self.state.lock();

        state
            .entries
            .iter()
            .filter(|(_, entry)| entry.groups.contains(group) && !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Proactively removes expired entries, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut events = Vec::new();
        let removed = {
            let mut state = self.state.lock();
            let expired: Vec<K> = state
                .entries
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();

            for key in &expired {
                if let Some(entry) = state.entries.remove(key) {
                    state.total_bytes -= entry.size_bytes.unwrap_or(0);
                    state.stats.expirations += 1;
                    events.push(CacheEvent::Expire(key.clone()));
                }
            }

            expired.len()
        };

        self.emit(&events);

        removed
    }

    /// Number of stored entries, possibly including entries awaiting lazy
    /// expiry.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// All stored keys, in no particular order.
    pub fn keys(&self) -> Vec<K> {
        self.state.lock().entries.keys().cloned().collect()
    }

    /// Total approximate payload bytes currently tracked.
    pub fn total_bytes(&self) -> u64 {
        self.state.lock().total_bytes
    }

    /// Atomic snapshot of the statistics counters.
    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }

    /// Captures the full entry map with its timestamps.
    pub fn save(&self) -> CacheSnapshot<K, V> {
        let state = self.state.lock();
        let mut entries: Vec<SnapshotEntry<K, V>> = state
            .entries
            .iter()
            .map(|(key, entry)| SnapshotEntry::from_entry(key.clone(), entry))
            .collect();

        // Persist in insertion order so a load rebuilds the same FIFO order.
        entries.sort_by_key(|e| e.inserted_at);

        CacheSnapshot { entries }
    }

    /// Replaces the cache contents with a snapshot's entries.
    ///
    /// Timestamps, hit counts, TTL deadlines and groups are restored;
    /// eviction ordering is rebuilt from the persisted timestamps.
    /// Statistics counters are left untouched.
    pub fn load(&self, snapshot: CacheSnapshot<K, V>) {
        let mut state = self.state.lock();

        state.entries.clear();
        state.total_bytes = 0;

        // Rebuild both orderings from wall-clock history.
        let mut by_insertion: Vec<usize> = (0..snapshot.entries.len()).collect();

        by_insertion.sort_by_key(|&i| snapshot.entries[i].inserted_at);

        let mut inserted_seqs = vec![0u64; snapshot.entries.len()];

        for (seq, &i) in by_insertion.iter().enumerate() {
            inserted_seqs[i] = seq as u64;
        }

        let mut by_access: Vec<usize> = (0..snapshot.entries.len()).collect();

        by_access.sort_by_key(|&i| snapshot.entries[i].last_accessed_at);

        let mut touched_seqs = vec![0u64; snapshot.entries.len()];

        for (seq, &i) in by_access.iter().enumerate() {
            touched_seqs[i] = seq as u64;
        }

        state.next_seq = snapshot.entries.len() as u64;

        for (i, entry) in snapshot.entries.into_iter().enumerate() {
            state.total_bytes += entry.size_bytes.unwrap_or(0);
            state.entries.insert(
                entry.key,
                Entry {
                    value: entry.value,
                    inserted_at: entry.inserted_at,
                    last_accessed_at: entry.last_accessed_at,
                    expires_at: entry.expires_at,
                    hit_count: entry.hit_count,
                    inserted_seq: inserted_seqs[i],
                    touched_seq: touched_seqs[i],
                    size_bytes: entry.size_bytes,
                    groups: entry.groups,
                },
            );
        }
    }

    /// Evicts entries until both the count and byte bounds hold again.
    ///
    /// The entry just stored by the triggering `put` is spared while other
    /// candidates remain; under LFU its zero hit count would otherwise make
    /// every insertion into a full cache evict itself.
    fn evict_over_bounds(
        &self,
        state: &mut CacheState<K, V>,
        events: &mut Vec<CacheEvent<K>>,
        just_inserted: Option<&K>,
    ) {
        let over_count =
            |state: &CacheState<K, V>| self.config.max_size.is_some_and(|max| state.entries.len() > max);
        let over_bytes = |state: &CacheState<K, V>| {
            self.config
                .max_memory_bytes
                .is_some_and(|max| state.total_bytes > max)
        };

        while over_count(state) || over_bytes(state) {
            let victim = self
                .pick_victim(state, just_inserted)
                .or_else(|| self.pick_victim(state, None));
            let Some(victim) = victim else { break };

            if let Some(entry) = state.entries.remove(&victim) {
                state.total_bytes -= entry.size_bytes.unwrap_or(0);
                state.stats.evictions += 1;
                slog::debug!(self.log.read(), "evicted cache entry";
                    "policy" => ?self.config.eviction_policy);
                events.push(CacheEvent::Evict(victim));
            }
        }
    }

    fn pick_victim(&self, state: &CacheState<K, V>, exclude: Option<&K>) -> Option<K> {
        let entries = state
            .entries
            .iter()
            .filter(|(key, _)| Some(*key) != exclude);

        match self.config.eviction_policy {
            EvictionPolicy::Lru => entries
                .min_by_key(|(_, e)| e.touched_seq)
                .map(|(k, _)| k.clone()),
            EvictionPolicy::Lfu => entries
                .min_by_key(|(_, e)| (e.hit_count, e.touched_seq))
                .map(|(k, _)| k.clone()),
            EvictionPolicy::Fifo => entries
                .min_by_key(|(_, e)| e.inserted_seq)
                .map(|(k, _)| k.clone()),
        }
    }

    fn emit(&self, events: &[CacheEvent<K>]) {
        if events.is_empty() {
            return;
        }

        let listener = self.listener.read().clone();

        if let Some(listener) = listener {
            for event in events {
                listener(event);
            }
        }
    }
}

/// Serializable capture of a cache's full contents.
///
/// The layout is opaque to callers; the only contract is that
/// `cache.load(cache.save())` preserves every live entry with its key,
/// value, timestamps, hit count, TTL remainder and groups.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheSnapshot<K, V> {
    /// Persisted entries, oldest insertion first.
    pub entries: Vec<SnapshotEntry<K, V>>,
}

impl<K, V> CacheSnapshot<K, V>
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    /// Renders the snapshot as an opaque JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("snapshot serialization is infallible")
    }

    /// Restores a snapshot from its JSON form.
    pub fn from_json(value: serde_json::Value) -> Result<Self, CacheError> {
        serde_json::from_value(value).map_err(CacheError::MalformedSnapshot)
    }
}
