mod daemon;
mod get;
mod warm;

use std::time::Instant;

use serde_json::Value;
use tickfed_core::{FederationConfig, FederationService};
use tracing::info;

use crate::cli::{Cli, Command};
use crate::error::CliError;
use crate::metadata::{Envelope, Metadata, RequestId};

pub async fn run(cli: &Cli, config: FederationConfig) -> Result<Envelope<Value>, CliError> {
    let request_id = RequestId::new_v4();
    let command = cli.command.name();
    info!(request_id = %request_id, command, "running command");

    // One-shot commands leave the warmer and sweeper off.
    let background = matches!(cli.command, Command::Daemon(_));
    let service = FederationService::builder(config)
        .background_tasks(background)
        .build()
        .await?;

    let started = Instant::now();
    let result = match &cli.command {
        Command::Get(args) => get::run(args, &service).await,
        Command::Warm(args) => warm::run(args, &service).await,
        Command::Daemon(args) => daemon::run(args, &service).await,
    };
    let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    service.shutdown().await;

    Ok(Envelope {
        meta: Metadata::new(request_id, command, latency_ms),
        data: result?,
    })
}
