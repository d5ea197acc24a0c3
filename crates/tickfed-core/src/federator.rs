//! Request orchestration: cache, fan-out, reconcile, store.
//!
//! ```text
//! get_data ─▶ TieredCache::get ──hit──▶ DataResponse (memory | distributed)
//!                 │ miss
//!                 ▼
//!            refresh ─▶ JoinSet fan-out (Semaphore, deadline) ─▶ Reconciler
//!                 │                                               │
//!                 │ no usable answer                              ▼
//!                 ▼                                      TieredCache::set ─▶ DataResponse (upstream)
//!        TieredCache::get_stale ──▶ DataResponse (stale) | NoDataAvailable
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::cache::{cache_key, CacheOrigin, CacheStats, TieredCache};
use crate::data_source::SourceErrorKind;
use crate::managed_source::{ManagedSource, ProviderHealth};
use crate::reconcile::{Reconciler, SourceWeight};
use crate::{
    DataClass, EntityKey, FederationError, FieldSet, ProviderResult, ReconciledRecord, SourceId,
};

/// Where a returned record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    Memory,
    Distributed,
    Upstream,
    Stale,
}

impl From<CacheOrigin> for RecordOrigin {
    fn from(value: CacheOrigin) -> Self {
        match value {
            CacheOrigin::Memory => Self::Memory,
            CacheOrigin::Distributed => Self::Distributed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataResponse {
    pub record: ReconciledRecord,
    pub origin: RecordOrigin,
    pub stale: bool,
}

/// TTLs, eligible sources and reconciliation rules for one data class.
#[derive(Debug, Clone, PartialEq)]
pub struct DataClassPolicy {
    pub name: DataClass,
    pub sources: Vec<SourceId>,
    pub ttl_memory: Duration,
    pub ttl_distributed: Duration,
    pub default_fields: FieldSet,
    pub reconciler: Reconciler,
    /// Entities the warmer keeps current for this class.
    pub hot_keys: Vec<EntityKey>,
}

impl DataClassPolicy {
    pub fn new(name: DataClass, sources: Vec<SourceId>, default_fields: FieldSet) -> Self {
        Self {
            name,
            sources,
            ttl_memory: Duration::from_secs(60),
            ttl_distributed: Duration::from_secs(300),
            default_fields,
            reconciler: Reconciler::default(),
            hot_keys: Vec::new(),
        }
    }

    pub fn with_ttls(mut self, memory: Duration, distributed: Duration) -> Self {
        self.ttl_memory = memory;
        self.ttl_distributed = distributed;
        self
    }

    pub fn with_reconciler(mut self, reconciler: Reconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn with_hot_keys(mut self, hot_keys: Vec<EntityKey>) -> Self {
        self.hot_keys = hot_keys;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatorSettings {
    pub max_fan_out: usize,
    pub fetch_deadline: Duration,
    pub key_prefix: String,
}

impl Default for FederatorSettings {
    fn default() -> Self {
        Self {
            max_fan_out: 8,
            fetch_deadline: Duration::from_secs(10),
            key_prefix: String::from("tickfed:"),
        }
    }
}

pub struct FederatorBuilder {
    cache: Arc<TieredCache>,
    settings: FederatorSettings,
    sources: Vec<ManagedSource>,
    classes: Vec<DataClassPolicy>,
}

impl FederatorBuilder {
    pub fn new(cache: Arc<TieredCache>) -> Self {
        Self {
            cache,
            settings: FederatorSettings::default(),
            sources: Vec::new(),
            classes: Vec::new(),
        }
    }

    pub fn settings(mut self, settings: FederatorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn source(mut self, source: ManagedSource) -> Self {
        self.sources.push(source);
        self
    }

    pub fn data_class(mut self, policy: DataClassPolicy) -> Self {
        self.classes.push(policy);
        self
    }

    /// Fails when a class names a source that was never registered.
    pub fn build(self) -> Result<Federator, FederationError> {
        let sources = self
            .sources
            .into_iter()
            .map(|source| (source.id().clone(), Arc::new(source)))
            .collect::<BTreeMap<_, _>>();

        let mut classes = BTreeMap::new();
        for policy in self.classes {
            if let Some(unknown) = policy.sources.iter().find(|id| !sources.contains_key(*id)) {
                return Err(FederationError::UnknownSource(unknown.clone()));
            }
            classes.insert(policy.name.clone(), policy);
        }

        let mut settings = self.settings;
        settings.max_fan_out = settings.max_fan_out.max(1);

        Ok(Federator {
            sources,
            classes,
            cache: self.cache,
            settings,
        })
    }
}

/// Fans requests out to managed sources and keeps the tiered cache current.
pub struct Federator {
    sources: BTreeMap<SourceId, Arc<ManagedSource>>,
    classes: BTreeMap<DataClass, DataClassPolicy>,
    cache: Arc<TieredCache>,
    settings: FederatorSettings,
}

impl std::fmt::Debug for Federator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Federator")
            .field("sources", &self.sources.keys().collect::<Vec<_>>())
            .field("classes", &self.classes.keys().collect::<Vec<_>>())
            .field("settings", &self.settings)
            .finish()
    }
}

impl Federator {
    pub fn builder(cache: Arc<TieredCache>) -> FederatorBuilder {
        FederatorBuilder::new(cache)
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn settings(&self) -> &FederatorSettings {
        &self.settings
    }

    pub fn policy(&self, data_class: &DataClass) -> Result<&DataClassPolicy, FederationError> {
        self.classes
            .get(data_class)
            .ok_or_else(|| FederationError::UnknownDataClass(data_class.clone()))
    }

    pub fn policies(&self) -> impl Iterator<Item = &DataClassPolicy> {
        self.classes.values()
    }

    pub fn key_for(&self, data_class: &DataClass, entity: &EntityKey, fields: &FieldSet) -> String {
        cache_key(&self.settings.key_prefix, data_class, entity, fields)
    }

    /// Reconciled data for `entity`, served from cache when fresh.
    ///
    /// # Errors
    ///
    /// `Validation` for malformed input, `UnknownDataClass`, or
    /// `NoDataAvailable` when no source answered and nothing is within grace.
    #[instrument(skip(self, fields), fields(entity = %entity, data_class = %data_class))]
    pub async fn get_data<S: AsRef<str>>(
        &self,
        entity: &str,
        fields: &[S],
        data_class: &str,
    ) -> Result<DataResponse, FederationError> {
        let entity = EntityKey::parse(entity)?;
        let data_class = DataClass::parse(data_class)?;
        let fields = FieldSet::parse(fields)?;
        self.get(&entity, &fields, &data_class).await
    }

    /// Typed variant of [`get_data`](Self::get_data).
    pub async fn get(
        &self,
        entity: &EntityKey,
        fields: &FieldSet,
        data_class: &DataClass,
    ) -> Result<DataResponse, FederationError> {
        let policy = self.policy(data_class)?;
        let key = self.key_for(data_class, entity, fields);

        if let Some(hit) = self.cache.get(&key).await {
            debug!(key = %key, origin = ?hit.origin, "cache hit");
            return Ok(DataResponse {
                record: hit.record,
                origin: hit.origin.into(),
                stale: false,
            });
        }

        match self.fetch_and_store(policy, entity, fields, &key).await {
            Ok(record) => Ok(DataResponse {
                record,
                origin: RecordOrigin::Upstream,
                stale: false,
            }),
            Err(reason) => match self.cache.get_stale(&key).await {
                Some(hit) => {
                    warn!(key = %key, reason = %reason, "serving stale record");
                    Ok(DataResponse {
                        record: hit.record,
                        origin: RecordOrigin::Stale,
                        stale: true,
                    })
                }
                None => Err(FederationError::NoDataAvailable {
                    entity: entity.clone(),
                    data_class: data_class.clone(),
                    reason,
                }),
            },
        }
    }

    /// Refresh path used by the warmer: skips the cache read, keeps the write.
    pub async fn refresh(
        &self,
        entity: &EntityKey,
        fields: &FieldSet,
        data_class: &DataClass,
    ) -> Result<ReconciledRecord, FederationError> {
        let policy = self.policy(data_class)?;
        let key = self.key_for(data_class, entity, fields);
        self.fetch_and_store(policy, entity, fields, &key)
            .await
            .map_err(|reason| FederationError::NoDataAvailable {
                entity: entity.clone(),
                data_class: data_class.clone(),
                reason,
            })
    }

    async fn fetch_and_store(
        &self,
        policy: &DataClassPolicy,
        entity: &EntityKey,
        fields: &FieldSet,
        key: &str,
    ) -> Result<ReconciledRecord, String> {
        let results = self.fan_out(policy, entity, fields).await;
        if results.is_empty() {
            return Err(String::from("no eligible sources"));
        }

        let succeeded = results.iter().filter(|result| result.success).count();
        if succeeded == 0 {
            return Err(format!("all {} source(s) failed", results.len()));
        }

        let weights = results
            .iter()
            .filter_map(|result| {
                self.sources.get(&result.source_id).map(|source| {
                    (
                        result.source_id.clone(),
                        SourceWeight {
                            priority: source.priority(),
                            reliability: source.reliability_weight(),
                        },
                    )
                })
            })
            .collect::<BTreeMap<_, _>>();

        let record = policy
            .reconciler
            .reconcile(entity, &policy.name, fields, &results, &weights)
            .ok_or_else(|| {
                format!("{succeeded} source(s) answered without any requested field")
            })?;

        self.cache
            .set(key, &record, policy.ttl_memory, policy.ttl_distributed)
            .await;
        info!(
            key = %key,
            sources = record.sources_used.len(),
            failed = results.len() - succeeded,
            conflicts = record.conflicts.len(),
            "stored reconciled record"
        );
        Ok(record)
    }

    /// Spawns every eligible source before awaiting any. Results arriving
    /// after the deadline are dropped; their tasks keep running detached.
    async fn fan_out(
        &self,
        policy: &DataClassPolicy,
        entity: &EntityKey,
        fields: &FieldSet,
    ) -> Vec<ProviderResult> {
        let eligible = policy
            .sources
            .iter()
            .filter_map(|id| self.sources.get(id))
            .filter(|source| source.is_eligible())
            .cloned()
            .collect::<Vec<_>>();
        if eligible.is_empty() {
            return Vec::new();
        }

        let started = Instant::now();
        let deadline = started + self.settings.fetch_deadline;
        let permits = Arc::new(Semaphore::new(self.settings.max_fan_out));
        let mut pending = eligible
            .iter()
            .map(|source| source.id().clone())
            .collect::<BTreeSet<_>>();

        let mut tasks = JoinSet::new();
        for source in eligible {
            let permits = Arc::clone(&permits);
            let entity = entity.clone();
            let fields = fields.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                source.fetch(&entity, &fields).await
            });
        }

        let mut results = Vec::with_capacity(pending.len());
        let mut missing_kind = SourceErrorKind::Internal;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(result))) => {
                    pending.remove(&result.source_id);
                    results.push(result);
                }
                Ok(Some(Err(error))) => {
                    warn!(error = %error, "source task ended abnormally");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        stragglers = pending.len(),
                        deadline_ms = self.settings.fetch_deadline.as_millis() as u64,
                        "fetch deadline reached"
                    );
                    tasks.detach_all();
                    missing_kind = SourceErrorKind::UpstreamTimeout;
                    break;
                }
            }
        }

        let elapsed = started.elapsed();
        results.extend(
            pending
                .into_iter()
                .map(|id| ProviderResult::failed(id, missing_kind, elapsed)),
        );
        results
    }

    pub fn provider_health(&self) -> Vec<ProviderHealth> {
        self.sources.values().map(|source| source.health()).collect()
    }

    pub fn reset_circuit(&self, source_id: &str) -> Result<(), FederationError> {
        let id = SourceId::parse(source_id)?;
        let source = self
            .sources
            .get(&id)
            .ok_or(FederationError::UnknownSource(id))?;
        source.breaker().reset();
        Ok(())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
