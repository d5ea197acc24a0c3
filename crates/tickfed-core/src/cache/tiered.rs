use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::distributed::DistributedTier;
use super::memory::{CacheEntry, MemoryTier};
use crate::{ReconciledRecord, UtcDateTime};

/// Cache construction parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TieredCacheConfig {
    pub memory_capacity: usize,
    pub backfill_ttl: Duration,
    pub grace_period: Duration,
}

impl Default for TieredCacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: 10_000,
            backfill_ttl: Duration::from_secs(60),
            grace_period: Duration::from_secs(300),
        }
    }
}

/// Wire format of the distributed tier.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    record: ReconciledRecord,
    written_at: UtcDateTime,
    expires_at: UtcDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOrigin {
    Memory,
    Distributed,
}

/// A record served from one of the tiers.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub record: ReconciledRecord,
    pub origin: CacheOrigin,
    pub written_at: UtcDateTime,
    pub expires_at: UtcDateTime,
}

/// Freshness metadata, read without touching statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryMeta {
    pub written_at: UtcDateTime,
    pub expires_at: UtcDateTime,
    pub ttl: Duration,
}

impl EntryMeta {
    pub fn remaining(&self, now: UtcDateTime) -> Duration {
        self.expires_at.duration_since(now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierSizes {
    pub memory: usize,
    pub distributed: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub memory_hits: u64,
    pub distributed_hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub stale_served: u64,
    pub evictions: u64,
    pub distributed_errors: u64,
    pub tier_sizes: TierSizes,
}

#[derive(Debug, Default)]
struct Counters {
    memory_hits: AtomicU64,
    distributed_hits: AtomicU64,
    misses: AtomicU64,
    stale_served: AtomicU64,
    distributed_errors: AtomicU64,
}

/// Read-through, write-through composition of the in-process and the
/// distributed tier.
pub struct TieredCache {
    memory: MemoryTier,
    distributed: Arc<dyn DistributedTier>,
    config: TieredCacheConfig,
    counters: Counters,
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("memory", &self.memory)
            .field("distributed", &self.distributed.name())
            .field("config", &self.config)
            .finish()
    }
}

impl TieredCache {
    pub fn new(config: TieredCacheConfig, distributed: Arc<dyn DistributedTier>) -> Self {
        Self {
            memory: MemoryTier::new(config.memory_capacity),
            distributed,
            config,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &TieredCacheConfig {
        &self.config
    }

    /// Fresh lookup: memory first, then the distributed tier. A distributed
    /// hit is copied back into memory for at most `backfill_ttl`.
    #[instrument(skip(self), level = "debug")]
    pub async fn get(&self, key: &str) -> Option<CacheHit> {
        let now = UtcDateTime::now();

        if let Some(entry) = self.memory.get(key, now) {
            if entry.is_fresh(now) {
                self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
                return Some(CacheHit {
                    record: entry.record,
                    origin: CacheOrigin::Memory,
                    written_at: entry.written_at,
                    expires_at: entry.expires_at,
                });
            }
        }

        if let Some(stored) = self.read_distributed(key).await {
            if now < stored.expires_at {
                let remaining = stored.expires_at.duration_since(now);
                let backfill = self.config.backfill_ttl.min(remaining);
                self.memory.insert(CacheEntry::new(
                    key.to_owned(),
                    stored.record.clone(),
                    stored.written_at,
                    now.duration_since(stored.written_at) + backfill,
                    self.config.grace_period,
                ));
                self.counters.distributed_hits.fetch_add(1, Ordering::Relaxed);
                return Some(CacheHit {
                    record: stored.record,
                    origin: CacheOrigin::Distributed,
                    written_at: stored.written_at,
                    expires_at: stored.expires_at,
                });
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Last known record within the grace window, fresh or not. Used only for
    /// the all-sources-failed fallback; a returned entry counts as a stale serve.
    pub async fn get_stale(&self, key: &str) -> Option<CacheHit> {
        let now = UtcDateTime::now();
        let hit = match self.memory.get(key, now) {
            Some(entry) => Some(CacheHit {
                record: entry.record,
                origin: CacheOrigin::Memory,
                written_at: entry.written_at,
                expires_at: entry.expires_at,
            }),
            None => self.read_distributed(key).await.and_then(|stored| {
                let stale_until = stored.expires_at.saturating_add(self.config.grace_period);
                (now < stale_until).then_some(CacheHit {
                    record: stored.record,
                    origin: CacheOrigin::Distributed,
                    written_at: stored.written_at,
                    expires_at: stored.expires_at,
                })
            }),
        };
        if hit.is_some() {
            self.counters.stale_served.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// Freshness metadata for the warmer. Does not count as a hit or miss.
    pub async fn peek(&self, key: &str) -> Option<EntryMeta> {
        let now = UtcDateTime::now();
        if let Some(entry) = self.memory.get(key, now) {
            return Some(EntryMeta {
                written_at: entry.written_at,
                expires_at: entry.expires_at,
                ttl: entry.ttl,
            });
        }
        self.read_distributed(key).await.map(|stored| EntryMeta {
            written_at: stored.written_at,
            expires_at: stored.expires_at,
            ttl: stored.expires_at.duration_since(stored.written_at),
        })
    }

    /// Writes both tiers. Distributed failures are logged and swallowed.
    #[instrument(skip(self, record), level = "debug")]
    pub async fn set(
        &self,
        key: &str,
        record: &ReconciledRecord,
        ttl_memory: Duration,
        ttl_distributed: Duration,
    ) {
        let written_at = UtcDateTime::now();
        self.memory.insert(CacheEntry::new(
            key.to_owned(),
            record.clone(),
            written_at,
            ttl_memory,
            self.config.grace_period,
        ));

        let stored = StoredEntry {
            record: record.clone(),
            written_at,
            expires_at: written_at.saturating_add(ttl_distributed),
        };
        let bytes = match serde_json::to_vec(&stored) {
            Ok(bytes) => bytes,
            Err(error) => {
                self.counters.distributed_errors.fetch_add(1, Ordering::Relaxed);
                warn!(key, error = %error, "failed to encode cache entry");
                return;
            }
        };
        let tier_ttl = ttl_distributed + self.config.grace_period;
        if let Err(error) = self.distributed.set(key, bytes, tier_ttl).await {
            self.counters.distributed_errors.fetch_add(1, Ordering::Relaxed);
            warn!(
                key,
                tier = self.distributed.name(),
                error = %error,
                "distributed cache write failed"
            );
        }
    }

    pub async fn invalidate(&self, key: &str) {
        self.memory.remove(key);
        if let Err(error) = self.distributed.delete(key).await {
            self.counters.distributed_errors.fetch_add(1, Ordering::Relaxed);
            warn!(key, error = %error, "distributed cache delete failed");
        }
    }

    async fn read_distributed(&self, key: &str) -> Option<StoredEntry> {
        let bytes = match self.distributed.get(key).await {
            Ok(bytes) => bytes?,
            Err(error) => {
                self.counters.distributed_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    key,
                    tier = self.distributed.name(),
                    error = %error,
                    "distributed cache read failed"
                );
                return None;
            }
        };
        match serde_json::from_slice::<StoredEntry>(&bytes) {
            Ok(stored) => Some(stored),
            Err(error) => {
                self.counters.distributed_errors.fetch_add(1, Ordering::Relaxed);
                warn!(key, error = %error, "undecodable distributed cache entry");
                None
            }
        }
    }

    /// Removes in-process entries past their grace window.
    pub fn sweep(&self) -> usize {
        self.memory.sweep(UtcDateTime::now())
    }

    /// Runs [`sweep`](Self::sweep) every `interval` until `shutdown` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "cache sweeper started");
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = cache.sweep();
                        if removed > 0 {
                            debug!(removed, "swept expired cache entries");
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
            info!("cache sweeper stopped");
        })
    }

    pub fn stats(&self) -> CacheStats {
        let memory_hits = self.counters.memory_hits.load(Ordering::Relaxed);
        let distributed_hits = self.counters.distributed_hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let hits = memory_hits + distributed_hits;
        let lookups = hits + misses;
        CacheStats {
            hits,
            memory_hits,
            distributed_hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            stale_served: self.counters.stale_served.load(Ordering::Relaxed),
            evictions: self.memory.evictions(),
            distributed_errors: self.counters.distributed_errors.load(Ordering::Relaxed),
            tier_sizes: TierSizes {
                memory: self.memory.len(),
                distributed: self.distributed.len_hint(),
            },
        }
    }
}
