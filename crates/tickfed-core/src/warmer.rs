//! Background refresh of hot keys.
//!
//! Each data class contributes `hot_keys × default_fields` targets. A
//! scheduled run walks them in batches and refreshes a key only when its
//! entry is missing or close to expiry and no caller has written it within
//! the cool-down.
//! The manual trigger [`CacheWarmer::warm_keys`] skips both checks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::WarmerSettings;
use crate::federator::Federator;
use crate::{DataClass, EntityKey, FieldSet, UtcDateTime};

/// Outcome counts of one warm run. `attempted = refreshed + skipped + failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    pub attempted: usize,
    pub refreshed: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct WarmTarget {
    data_class: DataClass,
    entity: EntityKey,
    fields: FieldSet,
    key: String,
}

pub struct CacheWarmer {
    federator: Arc<Federator>,
    settings: WarmerSettings,
    targets: Vec<WarmTarget>,
    last_warmed: Mutex<HashMap<String, UtcDateTime>>,
}

impl std::fmt::Debug for CacheWarmer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWarmer")
            .field("settings", &self.settings)
            .field("targets", &self.targets.len())
            .finish()
    }
}

impl CacheWarmer {
    pub fn new(federator: Arc<Federator>, settings: WarmerSettings) -> Self {
        let targets = federator
            .policies()
            .flat_map(|policy| {
                policy.hot_keys.iter().map(|entity| WarmTarget {
                    key: federator.key_for(&policy.name, entity, &policy.default_fields),
                    data_class: policy.name.clone(),
                    entity: entity.clone(),
                    fields: policy.default_fields.clone(),
                })
            })
            .collect();

        Self {
            federator,
            settings,
            targets,
            last_warmed: Mutex::new(HashMap::new()),
        }
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// One scheduled pass over every hot key.
    #[instrument(skip(self), fields(targets = self.targets.len()))]
    pub async fn run_once(&self) -> WarmReport {
        let mut report = WarmReport::default();
        let mut due = Vec::new();
        let now = UtcDateTime::now();

        for target in &self.targets {
            if self.is_due(target, now).await {
                due.push(target.clone());
            } else {
                report.attempted += 1;
                report.skipped += 1;
            }
        }

        let refreshed = self
            .refresh_batches(due, self.settings.inter_batch_delay())
            .await;
        merge(&mut report, refreshed);
        info!(
            attempted = report.attempted,
            refreshed = report.refreshed,
            skipped = report.skipped,
            failed = report.failed,
            "cache warm run finished"
        );
        report
    }

    /// Refreshes `entities` for every data class, ignoring freshness and
    /// cool-down.
    #[instrument(skip(self, entities), fields(entities = entities.len()))]
    pub async fn warm_keys(&self, entities: &[EntityKey]) -> WarmReport {
        let targets = self
            .federator
            .policies()
            .flat_map(|policy| {
                entities.iter().map(|entity| WarmTarget {
                    key: self
                        .federator
                        .key_for(&policy.name, entity, &policy.default_fields),
                    data_class: policy.name.clone(),
                    entity: entity.clone(),
                    fields: policy.default_fields.clone(),
                })
            })
            .collect::<Vec<_>>();

        let report = self.refresh_batches(targets, Duration::ZERO).await;
        info!(
            refreshed = report.refreshed,
            failed = report.failed,
            "manual cache warm finished"
        );
        report
    }

    async fn is_due(&self, target: &WarmTarget, now: UtcDateTime) -> bool {
        let meta = self.federator.cache().peek(&target.key).await;

        // The warmer's own writes never start a cool-down; only writes that
        // landed after its last warm of this key (organic traffic) do.
        let warmed_at = self
            .last_warmed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&target.key)
            .copied();
        let organic_write = meta
            .as_ref()
            .map(|meta| meta.written_at)
            .filter(|written| warmed_at.map_or(true, |warmed| *written > warmed));
        if let Some(written) = organic_write {
            if now.duration_since(written) < self.settings.cooldown() {
                debug!(key = %target.key, "warm skipped: recently written by a caller");
                return false;
            }
        }

        match meta {
            None => true,
            Some(meta) => {
                let threshold = meta.ttl.mul_f64(self.settings.refresh_ahead_ratio);
                meta.remaining(now) < threshold
            }
        }
    }

    async fn refresh_batches(&self, targets: Vec<WarmTarget>, delay: Duration) -> WarmReport {
        let mut report = WarmReport::default();
        let batch_size = self.settings.batch_size.max(1);
        let batches = targets.chunks(batch_size).count();

        for (index, batch) in targets.chunks(batch_size).enumerate() {
            let mut tasks = JoinSet::new();
            for target in batch.iter().cloned() {
                let federator = Arc::clone(&self.federator);
                tasks.spawn(async move {
                    let outcome = federator
                        .refresh(&target.entity, &target.fields, &target.data_class)
                        .await;
                    (target, outcome)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                report.attempted += 1;
                match joined {
                    Ok((target, Ok(_))) => {
                        report.refreshed += 1;
                        self.last_warmed
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .insert(target.key, UtcDateTime::now());
                    }
                    Ok((target, Err(error))) => {
                        report.failed += 1;
                        warn!(key = %target.key, error = %error, "warm failed");
                    }
                    Err(error) => {
                        report.failed += 1;
                        warn!(error = %error, "warm task ended abnormally");
                    }
                }
            }

            if index + 1 < batches && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        report
    }

    /// Runs [`run_once`](Self::run_once) every `interval_secs` until
    /// `shutdown` fires, plus once immediately when `run_on_startup` is set.
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let warmer = Arc::clone(self);
        tokio::spawn(async move {
            info!(
                interval_secs = warmer.settings.interval_secs,
                targets = warmer.targets.len(),
                "cache warmer started"
            );
            if warmer.settings.run_on_startup {
                tokio::select! {
                    _ = warmer.run_once() => {}
                    _ = shutdown.cancelled() => {
                        info!("cache warmer stopped");
                        return;
                    }
                }
            }

            let mut ticker = tokio::time::interval(warmer.settings.interval());
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        warmer.run_once().await;
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
            info!("cache warmer stopped");
        })
    }
}

fn merge(total: &mut WarmReport, part: WarmReport) {
    total.attempted += part.attempted;
    total.refreshed += part.refreshed;
    total.skipped += part.skipped;
    total.failed += part.failed;
}
