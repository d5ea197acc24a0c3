//! TOML configuration consumed by the composition root.
//!
//! ```toml
//! [federation]
//! max_fan_out = 8
//! fetch_deadline_ms = 10000
//!
//! [cache]
//! memory_capacity = 10000
//! redis_url = "redis://localhost:6379/0"
//!
//! [[sources]]
//! id = "primary"
//! priority = 3
//! timeout_ms = 2000
//! adapter = { kind = "http_json", url_template = "https://api.example.com/q/{entity}", fields = { price = "/last" } }
//!
//! [[data_classes]]
//! name = "price"
//! sources = ["primary"]
//! default_fields = ["price"]
//! hot_keys = ["AAPL", "MSFT"]
//! ```
//!
//! Environment overrides: `TICKFED_REDIS_URL`, `TICKFED_FETCH_DEADLINE_MS`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::adapters::FieldPointer;
use crate::cache::TieredCacheConfig;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::http_client::HttpAuth;
use crate::logging::LogConfig;
use crate::managed_source::SourceSettings;
use crate::reconcile::{FieldPolicy, Reconciler};
use crate::retry::{Backoff, RetryPolicy};
use crate::{ConfigError, DataClass, EntityKey, FieldMap, FieldSet, Priority, SourceId};

pub const ENV_REDIS_URL: &str = "TICKFED_REDIS_URL";
pub const ENV_FETCH_DEADLINE_MS: &str = "TICKFED_FETCH_DEADLINE_MS";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FederationConfig {
    #[serde(default)]
    pub federation: GlobalSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub warmer: WarmerSettings,
    #[serde(default)]
    pub logging: LogConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub data_classes: Vec<DataClassConfig>,
}

/// Fan-out, breaker, retry and grace settings shared by every source.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GlobalSettings {
    pub max_fan_out: usize,
    pub fetch_deadline_ms: u64,
    pub failure_threshold: u32,
    pub recovery_timeout_ms: u64,
    pub success_threshold: u32,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    pub jitter: bool,
    pub grace_period_secs: u64,
    pub reliability_window: usize,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            max_fan_out: 8,
            fetch_deadline_ms: 10_000,
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
            success_threshold: 3,
            max_retries: 3,
            base_delay_ms: 200,
            backoff_factor: 2.0,
            max_delay_ms: 5_000,
            jitter: true,
            grace_period_secs: 300,
            reliability_window: 100,
        }
    }
}

impl GlobalSettings {
    pub fn fetch_deadline(&self) -> Duration {
        Duration::from_millis(self.fetch_deadline_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_millis(self.recovery_timeout_ms),
            success_threshold: self.success_threshold,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(self.base_delay_ms),
                factor: self.backoff_factor,
                max: Duration::from_millis(self.max_delay_ms),
                jitter: self.jitter,
            },
            ..RetryPolicy::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    pub memory_capacity: usize,
    pub backfill_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub key_prefix: String,
    pub redis_url: Option<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            memory_capacity: 10_000,
            backfill_ttl_secs: 60,
            sweep_interval_secs: 60,
            key_prefix: String::from("tickfed:"),
            redis_url: None,
        }
    }
}

impl CacheSettings {
    pub fn tiered_config(&self, grace_period: Duration) -> TieredCacheConfig {
        TieredCacheConfig {
            memory_capacity: self.memory_capacity,
            backfill_ttl: Duration::from_secs(self.backfill_ttl_secs),
            grace_period,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WarmerSettings {
    pub enabled: bool,
    pub interval_secs: u64,
    pub run_on_startup: bool,
    pub batch_size: usize,
    pub inter_batch_delay_ms: u64,
    pub cooldown_secs: u64,
    pub refresh_ahead_ratio: f64,
}

impl Default for WarmerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 1_800,
            run_on_startup: false,
            batch_size: 10,
            inter_batch_delay_ms: 1_000,
            cooldown_secs: 1_800,
            refresh_ahead_ratio: 0.2,
        }
    }
}

impl WarmerSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub id: SourceId,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub quota_per_minute: Option<u32>,
    pub adapter: AdapterConfig,
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn settings(&self) -> SourceSettings {
        SourceSettings {
            priority: self.priority,
            timeout: self.timeout(),
            enabled: self.enabled,
            quota_per_minute: self.quota_per_minute,
        }
    }
}

/// Adapter selection, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterConfig {
    Static {
        #[serde(default)]
        defaults: FieldMap,
        #[serde(default)]
        entities: BTreeMap<EntityKey, FieldMap>,
        #[serde(default)]
        latency_ms: u64,
    },
    HttpJson {
        url_template: String,
        fields: BTreeMap<String, FieldPointer>,
        #[serde(default)]
        auth: HttpAuth,
    },
}

fn default_ttl_memory_secs() -> u64 {
    60
}

fn default_ttl_distributed_secs() -> u64 {
    300
}

fn default_conflict_threshold_pct() -> f64 {
    10.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataClassConfig {
    pub name: DataClass,
    pub sources: Vec<SourceId>,
    #[serde(default = "default_ttl_memory_secs")]
    pub ttl_memory_secs: u64,
    #[serde(default = "default_ttl_distributed_secs")]
    pub ttl_distributed_secs: u64,
    #[serde(default = "default_conflict_threshold_pct")]
    pub conflict_threshold_pct: f64,
    pub default_fields: Vec<String>,
    #[serde(default)]
    pub field_policies: BTreeMap<String, FieldPolicy>,
    #[serde(default)]
    pub hot_keys: Vec<String>,
}

impl DataClassConfig {
    pub fn ttl_memory(&self) -> Duration {
        Duration::from_secs(self.ttl_memory_secs)
    }

    pub fn ttl_distributed(&self) -> Duration {
        Duration::from_secs(self.ttl_distributed_secs)
    }

    pub fn default_field_set(&self) -> Result<FieldSet, ConfigError> {
        Ok(FieldSet::parse(&self.default_fields)?)
    }

    pub fn hot_entities(&self) -> Result<Vec<EntityKey>, ConfigError> {
        let mut seen = BTreeSet::new();
        let mut entities = Vec::new();
        for raw in &self.hot_keys {
            let entity = EntityKey::parse(raw)?;
            if seen.insert(entity.clone()) {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    pub fn reconciler(&self) -> Reconciler {
        self.field_policies
            .iter()
            .fold(Reconciler::new(self.conflict_threshold_pct), |rules, (field, policy)| {
                rules.with_policy(field.to_ascii_lowercase(), *policy)
            })
    }
}

impl FederationConfig {
    /// Parses and validates without consulting the environment.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a file, applies environment overrides, then validates.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Self = toml::from_str(&raw)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `TICKFED_*` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_REDIS_URL).filter(|url| !url.trim().is_empty()) {
            self.cache.redis_url = Some(url);
        }
        if let Some(raw) = lookup(ENV_FETCH_DEADLINE_MS) {
            self.federation.fetch_deadline_ms = raw.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{ENV_FETCH_DEADLINE_MS} must be an integer, got '{raw}'"))
            })?;
        }
        Ok(())
    }

    pub fn data_class(&self, name: &DataClass) -> Option<&DataClassConfig> {
        self.data_classes.iter().find(|class| &class.name == name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let global = &self.federation;
        ensure(global.max_fan_out >= 1, "federation.max_fan_out must be at least 1")?;
        ensure(global.fetch_deadline_ms > 0, "federation.fetch_deadline_ms must be positive")?;
        ensure(global.failure_threshold >= 1, "federation.failure_threshold must be at least 1")?;
        ensure(global.success_threshold >= 1, "federation.success_threshold must be at least 1")?;
        ensure(
            global.backoff_factor.is_finite() && global.backoff_factor >= 1.0,
            "federation.backoff_factor must be >= 1.0",
        )?;
        ensure(
            global.max_delay_ms >= global.base_delay_ms,
            "federation.max_delay_ms must be >= base_delay_ms",
        )?;
        ensure(global.reliability_window >= 1, "federation.reliability_window must be at least 1")?;

        ensure(self.cache.memory_capacity >= 1, "cache.memory_capacity must be at least 1")?;
        ensure(self.cache.sweep_interval_secs >= 1, "cache.sweep_interval_secs must be at least 1")?;

        let warmer = &self.warmer;
        ensure(warmer.batch_size >= 1, "warmer.batch_size must be at least 1")?;
        ensure(warmer.interval_secs >= 1, "warmer.interval_secs must be at least 1")?;
        ensure(
            (0.0..=1.0).contains(&warmer.refresh_ahead_ratio),
            "warmer.refresh_ahead_ratio must be within [0, 1]",
        )?;

        let mut source_ids = BTreeSet::new();
        for source in &self.sources {
            if !source_ids.insert(source.id.clone()) {
                return Err(ConfigError::Invalid(format!("duplicate source id '{}'", source.id)));
            }
            ensure(
                source.timeout_ms > 0,
                &format!("source '{}' timeout_ms must be positive", source.id),
            )?;
            if source.quota_per_minute == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "source '{}' quota_per_minute must be positive",
                    source.id
                )));
            }
        }

        let mut class_names = BTreeSet::new();
        for class in &self.data_classes {
            if !class_names.insert(class.name.clone()) {
                return Err(ConfigError::Invalid(format!("duplicate data class '{}'", class.name)));
            }
            if let Some(unknown) = class.sources.iter().find(|id| !source_ids.contains(*id)) {
                return Err(ConfigError::Invalid(format!(
                    "data class '{}' references unknown source '{unknown}'",
                    class.name
                )));
            }
            ensure(
                class.conflict_threshold_pct.is_finite() && class.conflict_threshold_pct >= 0.0,
                &format!("data class '{}' conflict_threshold_pct must be >= 0", class.name),
            )?;
            class.default_field_set()?;
            class.hot_entities()?;
            for field in class.field_policies.keys() {
                crate::normalize_field_name(field)?;
            }
        }

        Ok(())
    }
}

fn ensure(condition: bool, message: &str) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::Invalid(message.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::FieldValue;

    const SAMPLE: &str = r#"
[federation]
max_fan_out = 4
jitter = false

[cache]
key_prefix = "test:"

[warmer]
run_on_startup = true

[logging]
format = "compact"

[[sources]]
id = "Fixture"
priority = 2
adapter = { kind = "static", defaults = { price = 10, day_range = { low = 9.5, high = 10.5 } } }

[[sources]]
id = "remote"
timeout_ms = 1500
quota_per_minute = 30
adapter = { kind = "http_json", url_template = "https://api.test/{entity}", fields = { price = "/last", day_range = { low = "/lo", high = "/hi" } }, auth = { kind = "bearer", token = "t" } }

[[data_classes]]
name = "price"
sources = ["fixture", "remote"]
default_fields = ["price", "day_range"]
field_policies = { analyst_count = "max" }
hot_keys = ["aapl", "AAPL", "msft"]
"#;

    #[test]
    fn parses_sample_with_defaults() {
        let config = FederationConfig::from_toml_str(SAMPLE).expect("valid config");

        assert_eq!(config.federation.max_fan_out, 4);
        assert_eq!(config.federation.fetch_deadline_ms, 10_000);
        assert_eq!(config.cache.key_prefix, "test:");
        assert!(config.warmer.run_on_startup);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].id.as_str(), "fixture");
        assert_eq!(config.sources[0].priority.get(), 2);
        assert_eq!(config.sources[1].priority, Priority::MIN);
        assert_eq!(config.sources[1].timeout(), Duration::from_millis(1500));

        match &config.sources[0].adapter {
            AdapterConfig::Static { defaults, .. } => {
                assert_eq!(defaults.get("price"), Some(&FieldValue::Number(10.0)));
                assert_eq!(
                    defaults.get("day_range"),
                    Some(&FieldValue::Range { low: 9.5, high: 10.5 })
                );
            }
            other => panic!("unexpected adapter {other:?}"),
        }

        let class = &config.data_classes[0];
        assert_eq!(class.ttl_memory(), Duration::from_secs(60));
        assert_eq!(class.hot_entities().expect("entities").len(), 2);
        assert_eq!(class.reconciler().policy("analyst_count"), FieldPolicy::Max);
    }

    #[test]
    fn unknown_source_reference_is_rejected() {
        let input = r#"
[[data_classes]]
name = "price"
sources = ["ghost"]
default_fields = ["price"]
"#;
        let error = FederationConfig::from_toml_str(input).expect_err("invalid");
        assert!(error.to_string().contains("ghost"));
    }

    #[test]
    fn invalid_entity_in_hot_keys_is_rejected() {
        let input = r#"
[[sources]]
id = "a"
adapter = { kind = "static" }

[[data_classes]]
name = "price"
sources = ["a"]
default_fields = ["price"]
hot_keys = ["not a ticker"]
"#;
        assert!(matches!(
            FederationConfig::from_toml_str(input),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn priority_out_of_range_fails_to_parse() {
        let input = r#"
[[sources]]
id = "a"
priority = 9
adapter = { kind = "static" }
"#;
        assert!(matches!(
            FederationConfig::from_toml_str(input),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = FederationConfig::default();
        config
            .apply_overrides(|key| match key {
                ENV_REDIS_URL => Some(String::from("redis://cache:6379/1")),
                ENV_FETCH_DEADLINE_MS => Some(String::from("2500")),
                _ => None,
            })
            .expect("valid overrides");

        assert_eq!(config.cache.redis_url.as_deref(), Some("redis://cache:6379/1"));
        assert_eq!(config.federation.fetch_deadline(), Duration::from_millis(2500));

        let bad = config.apply_overrides(|key| (key == ENV_FETCH_DEADLINE_MS).then(|| String::from("soon")));
        assert!(matches!(bad, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn from_path_reads_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(SAMPLE.as_bytes()).expect("write sample");

        let config = FederationConfig::from_path(file.path()).expect("loads");
        assert_eq!(config.data_classes.len(), 1);

        let missing = FederationConfig::from_path(file.path().with_extension("absent"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn retry_policy_follows_global_settings() {
        let policy = GlobalSettings {
            max_retries: 1,
            jitter: false,
            ..GlobalSettings::default()
        }
        .retry_policy();

        assert_eq!(policy.max_retries, 1);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(400));
    }
}
