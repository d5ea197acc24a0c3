use std::time::Duration;

use serde_json::{json, Value};
use tickfed_core::FederationService;
use tracing::{info, warn};

use crate::cli::DaemonArgs;
use crate::error::CliError;

/// Blocks until ctrl-c, logging cache counters and source health
/// periodically. Prints the final status on shutdown.
pub async fn run(args: &DaemonArgs, service: &FederationService) -> Result<Value, CliError> {
    let mut ticker = tokio::time::interval(Duration::from_secs(args.stats_interval_secs.max(1)));
    ticker.tick().await;
    info!("daemon running; press ctrl-c to stop");

    loop {
        tokio::select! {
            _ = ticker.tick() => log_status(service),
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("shutdown signal received");
                break;
            }
        }
    }

    let mut report = status(service);
    report["stopped"] = json!(true);
    Ok(report)
}

fn log_status(service: &FederationService) {
    let stats = service.cache_stats();
    info!(
        hits = stats.hits,
        misses = stats.misses,
        hit_rate = stats.hit_rate,
        stale_served = stats.stale_served,
        memory_entries = stats.tier_sizes.memory,
        "cache stats"
    );
    for health in service.provider_health() {
        if health.state == tickfed_core::CircuitState::Closed {
            info!(
                source = %health.source_id,
                total_calls = health.total_calls,
                reliability = health.reliability_weight,
                "source healthy"
            );
        } else {
            warn!(
                source = %health.source_id,
                state = ?health.state,
                consecutive_failures = health.consecutive_failures,
                "source degraded"
            );
        }
    }
}

/// Live cache counters and per-source health of the running service.
fn status(service: &FederationService) -> Value {
    json!({
        "cache_stats": service.cache_stats(),
        "providers": service.provider_health(),
    })
}
