use std::collections::BTreeMap;
use std::time::Duration;

use crate::data_source::{DataSource, FetchRequest, SourceError, SourceFuture};
use crate::{EntityKey, FieldMap, SourceId};

/// Deterministic adapter answering from fixed tables.
///
/// Entity-specific fields override the defaults field by field. An entity
/// with neither is rejected as `InvalidRequest`.
#[derive(Debug, Clone)]
pub struct StaticSource {
    id: SourceId,
    defaults: FieldMap,
    entities: BTreeMap<EntityKey, FieldMap>,
    latency: Duration,
}

impl StaticSource {
    pub fn new(id: SourceId, defaults: FieldMap) -> Self {
        Self {
            id,
            defaults,
            entities: BTreeMap::new(),
            latency: Duration::ZERO,
        }
    }

    pub fn with_entity(mut self, entity: EntityKey, fields: FieldMap) -> Self {
        self.entities.insert(entity, fields);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn lookup(&self, request: &FetchRequest) -> Result<FieldMap, SourceError> {
        let specific = self.entities.get(&request.entity);
        if specific.is_none() && self.defaults.is_empty() {
            return Err(SourceError::invalid_request(format!(
                "entity '{}' is not served by '{}'",
                request.entity, self.id
            )));
        }

        Ok(request
            .fields
            .iter()
            .filter_map(|field| {
                specific
                    .and_then(|fields| fields.get(field))
                    .or_else(|| self.defaults.get(field))
                    .map(|value| (field.to_owned(), *value))
            })
            .collect())
    }
}

impl DataSource for StaticSource {
    fn id(&self) -> SourceId {
        self.id.clone()
    }

    fn fetch<'a>(&'a self, request: FetchRequest) -> SourceFuture<'a> {
        Box::pin(async move {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.lookup(&request)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::SourceErrorKind;
    use crate::{FieldSet, FieldValue};

    fn fields(pairs: &[(&str, f64)]) -> FieldMap {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_owned(), FieldValue::Number(*value)))
            .collect()
    }

    fn request(entity: &str, wanted: &[&str]) -> FetchRequest {
        FetchRequest::new(
            EntityKey::parse(entity).expect("entity"),
            FieldSet::parse(wanted.iter().copied()).expect("fields"),
        )
    }

    #[tokio::test]
    async fn entity_overrides_defaults_and_unrequested_fields_are_dropped() {
        let source = StaticSource::new(
            SourceId::parse("fixture").expect("id"),
            fields(&[("price", 1.0), ("volume", 10.0), ("pe", 20.0)]),
        )
        .with_entity(EntityKey::parse("AAPL").expect("entity"), fields(&[("price", 190.0)]));

        let answer = source
            .fetch(request("aapl", &["price", "volume"]))
            .await
            .expect("static answer");

        assert_eq!(answer, fields(&[("price", 190.0), ("volume", 10.0)]));
    }

    #[tokio::test]
    async fn unknown_entity_without_defaults_is_invalid() {
        let source = StaticSource::new(SourceId::parse("fixture").expect("id"), FieldMap::new());

        let error = source
            .fetch(request("TSLA", &["price"]))
            .await
            .expect_err("no data");

        assert_eq!(error.kind(), SourceErrorKind::InvalidRequest);
    }
}
