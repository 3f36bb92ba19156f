use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One stored value with its bookkeeping.
///
/// Wall-clock timestamps travel through snapshots; the monotonic sequence
/// numbers give eviction a total order that millisecond timestamps cannot
/// (rapid same-millisecond operations would otherwise tie).
#[derive(Clone, Debug)]
pub(super) struct Entry<V> {
    pub(super) value: V,
    pub(super) inserted_at: DateTime<Utc>,
    pub(super) last_accessed_at: DateTime<Utc>,
    pub(super) expires_at: Option<DateTime<Utc>>,
    pub(super) hit_count: u64,
    pub(super) inserted_seq: u64,
    pub(super) touched_seq: u64,
    pub(super) size_bytes: Option<u64>,
    pub(super) groups: BTreeSet<String>,
}

impl<V> Entry<V> {
    pub(super) fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// Serialized form of one entry inside a [`CacheSnapshot`].
///
/// [`CacheSnapshot`]: super::CacheSnapshot
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotEntry<K, V> {
    /// The entry key.
    pub key: K,
    /// The stored value.
    pub value: V,
    /// Insertion wall-clock time.
    pub inserted_at: DateTime<Utc>,
    /// Last access wall-clock time.
    pub last_accessed_at: DateTime<Utc>,
    /// Absolute expiry deadline, if the entry carries a TTL. Keeping the
    /// deadline absolute preserves the TTL remainder across save/load.
    pub expires_at: Option<DateTime<Utc>>,
    /// Number of hits served.
    pub hit_count: u64,
    /// Approximate payload size, when tracked.
    pub size_bytes: Option<u64>,
    /// Invalidation groups the entry belongs to.
    #[serde(default)]
    pub groups: BTreeSet<String>,
}

impl<K, V> SnapshotEntry<K, V> {
    pub(super) fn from_entry(key: K, entry: &Entry<V>) -> Self
    where
        V: Clone,
    {
        Self {
            key,
            value: entry.value.clone(),
            inserted_at: entry.inserted_at,
            last_accessed_at: entry.last_accessed_at,
            expires_at: entry.expires_at,
            hit_count: entry.hit_count,
            size_bytes: entry.size_bytes,
            groups: entry.groups.clone(),
        }
    }
}
