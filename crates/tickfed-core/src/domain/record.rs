use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::data_source::SourceErrorKind;
use crate::{DataClass, EntityKey, FieldMap, FieldValue, SourceId, UtcDateTime};

/// Outcome of one managed source call within a single federation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResult {
    pub source_id: SourceId,
    pub success: bool,
    pub fields: FieldMap,
    pub fetched_at: UtcDateTime,
    pub latency: Duration,
    pub error: Option<SourceErrorKind>,
}

impl ProviderResult {
    pub fn succeeded(source_id: SourceId, fields: FieldMap, latency: Duration) -> Self {
        Self {
            source_id,
            success: true,
            fields,
            fetched_at: UtcDateTime::now(),
            latency,
            error: None,
        }
    }

    pub fn failed(source_id: SourceId, error: SourceErrorKind, latency: Duration) -> Self {
        Self {
            source_id,
            success: false,
            fields: FieldMap::new(),
            fetched_at: UtcDateTime::now(),
            latency,
            error: Some(error),
        }
    }
}

/// Audit entry for a field whose raw readings spread beyond the conflict threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub field: String,
    pub values_by_source: BTreeMap<SourceId, FieldValue>,
    pub spread_pct: f64,
}

/// Reconciled view of one entity for one data class.
///
/// This is the unit stored in both cache tiers and returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledRecord {
    pub entity_key: EntityKey,
    pub data_class: DataClass,
    pub fields: FieldMap,
    pub per_field_confidence: BTreeMap<String, f64>,
    pub conflicts: Vec<FieldConflict>,
    pub sources_used: Vec<SourceId>,
    pub computed_at: UtcDateTime,
}

impl ReconciledRecord {
    pub fn value(&self, field: &str) -> Option<FieldValue> {
        self.fields.get(field).copied()
    }

    pub fn confidence(&self, field: &str) -> Option<f64> {
        self.per_field_confidence.get(field).copied()
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    pub fn conflict_for(&self, field: &str) -> Option<&FieldConflict> {
        self.conflicts.iter().find(|conflict| conflict.field == field)
    }
}
