//! Composition root.
//!
//! [`FederationService`] wires config, adapters, the tiered cache, the
//! federator and the background tasks (cache sweeper, warmer) together and
//! exposes the caller-facing surface.
//!
//! ```no_run
//! # async fn demo() -> Result<(), tickfed_core::FederationError> {
//! use tickfed_core::config::FederationConfig;
//! use tickfed_core::service::FederationService;
//!
//! let config = FederationConfig::from_path("tickfed.toml")?;
//! let service = FederationService::builder(config).build().await?;
//! let response = service.get_data("AAPL", &["price"], "price").await?;
//! println!("{:?}", response.record.value("price"));
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::build_source;
use crate::cache::{
    CacheStats, DistributedTier, InMemoryDistributedTier, RedisTier, TieredCache,
};
use crate::config::FederationConfig;
use crate::data_source::DataSource;
use crate::federator::{DataClassPolicy, DataResponse, Federator, FederatorSettings};
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::managed_source::{ManagedSource, ProviderHealth};
use crate::warmer::{CacheWarmer, WarmReport};
use crate::{ConfigError, EntityKey, FederationError, SourceId};

pub struct FederationServiceBuilder {
    config: FederationConfig,
    http: Option<Arc<dyn HttpClient>>,
    tier: Option<Arc<dyn DistributedTier>>,
    injected: BTreeMap<SourceId, Arc<dyn DataSource>>,
    background: bool,
}

impl FederationServiceBuilder {
    pub fn new(config: FederationConfig) -> Self {
        Self {
            config,
            http: None,
            tier: None,
            injected: BTreeMap::new(),
            background: true,
        }
    }

    /// HTTP client shared by `http_json` adapters. Defaults to reqwest.
    pub fn http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    /// Distributed tier to use instead of the one implied by `cache.redis_url`.
    pub fn distributed_tier(mut self, tier: Arc<dyn DistributedTier>) -> Self {
        self.tier = Some(tier);
        self
    }

    /// Replaces the configured adapter of the source with the same id.
    /// Priority, timeout and quota still come from config.
    pub fn source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.injected.insert(source.id(), source);
        self
    }

    /// Whether to start the sweeper and warmer. Defaults to `true`.
    pub fn background_tasks(mut self, enabled: bool) -> Self {
        self.background = enabled;
        self
    }

    /// Builds the service. Must run inside a tokio runtime when background
    /// tasks are enabled.
    ///
    /// # Errors
    ///
    /// Invalid configuration, an injected source without a config entry, or
    /// an unreachable Redis when `cache.redis_url` is set.
    pub async fn build(self) -> Result<FederationService, FederationError> {
        let config = self.config;
        config.validate()?;

        if let Some(unknown) = self
            .injected
            .keys()
            .find(|id| !config.sources.iter().any(|source| &source.id == *id))
        {
            return Err(ConfigError::Invalid(format!(
                "injected source '{unknown}' has no [[sources]] entry"
            ))
            .into());
        }

        let tier: Arc<dyn DistributedTier> = match (self.tier, &config.cache.redis_url) {
            (Some(tier), _) => tier,
            (None, Some(url)) => Arc::new(RedisTier::connect(url).await.map_err(|e| {
                ConfigError::Invalid(format!("cache.redis_url: {e}"))
            })?),
            (None, None) => Arc::new(InMemoryDistributedTier::new()),
        };
        let global = &config.federation;
        let cache = Arc::new(TieredCache::new(
            config.cache.tiered_config(global.grace_period()),
            tier,
        ));

        let http = self
            .http
            .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new()));
        let mut injected = self.injected;
        let mut builder = Federator::builder(Arc::clone(&cache)).settings(FederatorSettings {
            max_fan_out: global.max_fan_out,
            fetch_deadline: global.fetch_deadline(),
            key_prefix: config.cache.key_prefix.clone(),
        });

        for source_config in &config.sources {
            let source = match injected.remove(&source_config.id) {
                Some(source) => source,
                None => build_source(source_config, &http)?,
            };
            builder = builder.source(ManagedSource::new(
                source,
                source_config.settings(),
                global.breaker_config(),
                global.retry_policy(),
                global.reliability_window,
            ));
        }

        for class in &config.data_classes {
            builder = builder.data_class(
                DataClassPolicy::new(
                    class.name.clone(),
                    class.sources.clone(),
                    class.default_field_set()?,
                )
                .with_ttls(class.ttl_memory(), class.ttl_distributed())
                .with_reconciler(class.reconciler())
                .with_hot_keys(class.hot_entities()?),
            );
        }

        let federator = Arc::new(builder.build()?);
        let warmer = Arc::new(CacheWarmer::new(
            Arc::clone(&federator),
            config.warmer.clone(),
        ));

        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();
        if self.background {
            tasks.push(cache.spawn_sweeper(config.cache.sweep_interval(), shutdown.clone()));
            if config.warmer.enabled && warmer.target_count() > 0 {
                tasks.push(warmer.spawn(shutdown.clone()));
            }
        }

        info!(
            sources = config.sources.len(),
            data_classes = config.data_classes.len(),
            hot_keys = warmer.target_count(),
            background = self.background,
            "federation service ready"
        );

        Ok(FederationService {
            federator,
            warmer,
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }
}

/// Federator plus its background tasks.
pub struct FederationService {
    federator: Arc<Federator>,
    warmer: Arc<CacheWarmer>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for FederationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationService")
            .field("federator", &self.federator)
            .field("warmer", &self.warmer)
            .finish()
    }
}

impl FederationService {
    pub fn builder(config: FederationConfig) -> FederationServiceBuilder {
        FederationServiceBuilder::new(config)
    }

    pub fn federator(&self) -> &Arc<Federator> {
        &self.federator
    }

    pub async fn get_data<S: AsRef<str>>(
        &self,
        entity: &str,
        fields: &[S],
        data_class: &str,
    ) -> Result<DataResponse, FederationError> {
        self.federator.get_data(entity, fields, data_class).await
    }

    pub fn provider_health(&self) -> Vec<ProviderHealth> {
        self.federator.provider_health()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.federator.cache_stats()
    }

    pub fn reset_circuit(&self, source_id: &str) -> Result<(), FederationError> {
        self.federator.reset_circuit(source_id)?;
        info!(source = source_id, "circuit reset by operator");
        Ok(())
    }

    pub async fn warm_keys(&self, entities: &[EntityKey]) -> WarmReport {
        self.warmer.warm_keys(entities).await
    }

    /// Scheduled warm pass, run on demand.
    pub async fn warm_hot_keys(&self) -> WarmReport {
        self.warmer.run_once().await
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancels the sweeper and warmer and waits for them to stop.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks = std::mem::take(
            &mut *self
                .tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for task in tasks {
            if let Err(error) = task.await {
                warn!(error = %error, "background task ended abnormally");
            }
        }
        info!("federation service stopped");
    }
}
