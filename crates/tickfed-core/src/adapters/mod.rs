//! Built-in [`DataSource`] adapters and their construction from config.
//!
//! | Adapter | Config `kind` | Use |
//! |---------|---------------|-----|
//! | [`StaticSource`] | `static` | Fixed tables for demos, fixtures and offline runs |
//! | [`HttpJsonSource`] | `http_json` | Any JSON HTTP endpoint addressed by URL template |

mod http_json;
mod static_source;

use std::sync::Arc;
use std::time::Duration;

pub use http_json::{FieldPointer, HttpJsonSource};
pub use static_source::StaticSource;

use crate::config::{AdapterConfig, SourceConfig};
use crate::data_source::DataSource;
use crate::http_client::HttpClient;
use crate::{normalize_field_name, ConfigError, FieldMap};

/// Builds the adapter described by `config`. HTTP adapters share `http`.
pub fn build_source(
    config: &SourceConfig,
    http: &Arc<dyn HttpClient>,
) -> Result<Arc<dyn DataSource>, ConfigError> {
    let source: Arc<dyn DataSource> = match &config.adapter {
        AdapterConfig::Static {
            defaults,
            entities,
            latency_ms,
        } => {
            let mut source = StaticSource::new(config.id.clone(), normalize_keys(defaults)?)
                .with_latency(Duration::from_millis(*latency_ms));
            for (entity, fields) in entities {
                source = source.with_entity(entity.clone(), normalize_keys(fields)?);
            }
            Arc::new(source)
        }
        AdapterConfig::HttpJson {
            url_template,
            fields,
            auth,
        } => {
            if !url_template.contains("{entity}") {
                return Err(ConfigError::Invalid(format!(
                    "source '{}' url_template must contain {{entity}}",
                    config.id
                )));
            }
            let mut pointers = std::collections::BTreeMap::new();
            for (field, pointer) in fields {
                pointers.insert(normalize_field_name(field)?, pointer.clone());
            }
            Arc::new(
                HttpJsonSource::new(config.id.clone(), url_template.clone(), pointers, Arc::clone(http))
                    .with_auth(auth.clone())
                    .with_timeout(config.timeout()),
            )
        }
    };
    Ok(source)
}

fn normalize_keys(fields: &FieldMap) -> Result<FieldMap, ConfigError> {
    let mut normalized = FieldMap::new();
    for (name, value) in fields {
        if !value.is_finite() {
            return Err(ConfigError::Invalid(format!("field '{name}' must be finite")));
        }
        normalized.insert(normalize_field_name(name)?, *value);
    }
    Ok(normalized)
}
