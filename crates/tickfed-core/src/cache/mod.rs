//! Two-tier cache for reconciled records.
//!
//! | Tier | Type | Notes |
//! |------|------|-------|
//! | In-process | [`MemoryTier`] | Sharded, bounded, oldest-half eviction |
//! | Distributed | [`DistributedTier`] | Byte boundary; [`RedisTier`] or [`InMemoryDistributedTier`] |
//!
//! [`TieredCache`] composes both: read-through on the way in, write-through on
//! the way out, per-class TTLs and a grace window for stale fallback.

mod distributed;
mod memory;
mod tiered;

pub use distributed::{DistributedTier, InMemoryDistributedTier, RedisTier, TierError, TierFuture};
pub use memory::{CacheEntry, MemoryTier};
pub use tiered::{
    CacheHit, CacheOrigin, CacheStats, EntryMeta, TierSizes, TieredCache, TieredCacheConfig,
};

use crate::{DataClass, EntityKey, FieldSet};

/// Builds the cache key `{prefix}{class}:{ENTITY}:{field,field}`.
pub fn cache_key(prefix: &str, data_class: &DataClass, entity: &EntityKey, fields: &FieldSet) -> String {
    format!("{prefix}{data_class}:{entity}:{fields}")
}
