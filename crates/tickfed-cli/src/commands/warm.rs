use serde_json::Value;
use tickfed_core::{EntityKey, FederationService};

use crate::cli::WarmArgs;
use crate::error::CliError;

pub async fn run(args: &WarmArgs, service: &FederationService) -> Result<Value, CliError> {
    let report = if args.entities.is_empty() {
        service.warm_hot_keys().await
    } else {
        let entities = args
            .entities
            .iter()
            .map(|raw| EntityKey::parse(raw))
            .collect::<Result<Vec<_>, _>>()?;
        service.warm_keys(&entities).await
    };
    Ok(serde_json::to_value(report)?)
}
