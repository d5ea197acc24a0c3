use serde_json::Value;
use tickfed_core::{DataClass, FederationService};

use crate::cli::GetArgs;
use crate::error::CliError;

pub async fn run(args: &GetArgs, service: &FederationService) -> Result<Value, CliError> {
    let fields = if args.fields.is_empty() {
        let data_class = DataClass::parse(&args.data_class)?;
        service
            .federator()
            .policy(&data_class)?
            .default_fields
            .iter()
            .map(str::to_owned)
            .collect()
    } else {
        args.fields.clone()
    };

    let response = service
        .get_data(&args.entity, &fields, &args.data_class)
        .await?;
    Ok(serde_json::to_value(response)?)
}
