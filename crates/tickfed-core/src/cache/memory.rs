use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::{ReconciledRecord, UtcDateTime};

const SHARDING_THRESHOLD: usize = 1024;
const SHARD_COUNT: usize = 16;

/// One cached record with its freshness window.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub record: ReconciledRecord,
    pub written_at: UtcDateTime,
    pub expires_at: UtcDateTime,
    pub stale_until: UtcDateTime,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(
        key: String,
        record: ReconciledRecord,
        written_at: UtcDateTime,
        ttl: Duration,
        grace: Duration,
    ) -> Self {
        let expires_at = written_at.saturating_add(ttl);
        Self {
            key,
            record,
            written_at,
            expires_at,
            stale_until: expires_at.saturating_add(grace),
            ttl,
        }
    }

    pub fn is_fresh(&self, now: UtcDateTime) -> bool {
        now < self.expires_at
    }

    pub fn is_servable_stale(&self, now: UtcDateTime) -> bool {
        now < self.stale_until
    }

    pub fn remaining(&self, now: UtcDateTime) -> Duration {
        self.expires_at.duration_since(now)
    }
}

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    seq: u64,
}

#[derive(Debug, Default)]
struct Shard {
    map: HashMap<String, Slot>,
}

impl Shard {
    /// Drops the oldest half by insertion order. Returns the number removed.
    fn evict_oldest_half(&mut self) -> usize {
        let mut order = self
            .map
            .iter()
            .map(|(key, slot)| (slot.seq, key.clone()))
            .collect::<Vec<_>>();
        order.sort_unstable_by_key(|(seq, _)| *seq);
        let victims = order.len() / 2;
        for (_, key) in order.into_iter().take(victims) {
            self.map.remove(&key);
        }
        victims
    }
}

/// Bounded in-process tier.
///
/// A single shard below 1024 entries of capacity, sixteen above. Each shard
/// has its own lock and its own slice of the capacity.
#[derive(Debug)]
pub struct MemoryTier {
    shards: Vec<Mutex<Shard>>,
    shard_capacity: usize,
    next_seq: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let shard_count = if capacity < SHARDING_THRESHOLD {
            1
        } else {
            SHARD_COUNT
        };
        Self {
            shards: (0..shard_count).map(|_| Mutex::new(Shard::default())).collect(),
            shard_capacity: capacity.div_ceil(shard_count).max(1),
            next_seq: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard(&self, key: &str) -> MutexGuard<'_, Shard> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        self.shards[index]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the entry while it is still inside its grace window; entries
    /// past it are removed on the spot.
    pub fn get(&self, key: &str, now: UtcDateTime) -> Option<CacheEntry> {
        let mut shard = self.shard(key);
        let servable = shard
            .map
            .get(key)
            .map(|slot| slot.entry.is_servable_stale(now))?;
        if servable {
            shard.map.get(key).map(|slot| slot.entry.clone())
        } else {
            shard.map.remove(key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn insert(&self, entry: CacheEntry) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut shard = self.shard(&entry.key);
        shard.map.insert(entry.key.clone(), Slot { entry, seq });
        if shard.map.len() > self.shard_capacity {
            let evicted = shard.evict_oldest_half();
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.shard(key).map.remove(key).is_some()
    }

    /// Removes every entry past its grace window.
    pub fn sweep(&self, now: UtcDateTime) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let before = shard.map.len();
            shard.map.retain(|_, slot| slot.entry.is_servable_stale(now));
            removed += before - shard.map.len();
        }
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .map
                    .len()
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}
