//! Reconciliation of disagreeing provider answers.
//!
//! The reconciler is a pure function of its inputs: a set of
//! [`ProviderResult`]s, the weight of each source at the time of the pass and
//! the per-class rules (conflict threshold, per-field policy). It never
//! touches the network, the cache or any breaker.
//!
//! # Per-field algorithm (`weighted_mean`)
//!
//! 1. Collect `(value, weight = priority × reliability)` from every successful
//!    result carrying the field; drop values whose kind differs from the
//!    highest-weight contributor's (they still count toward the raw spread).
//! 2. With three or more contributors, reject values lying more than two
//!    standard deviations from the mean of the *other* contributors.
//! 3. Weighted mean of the survivors (plain mean when all weights are zero).
//! 4. Confidence `max(0, 1 − CV)` over the survivors, raised to the best
//!    survivor's reliability when the field is not in conflict.
//!
//! A raw spread above the class threshold records a [`FieldConflict`] listing
//! every raw value; a value is still produced. `sources_used` names only the
//! sources whose readings survived into a produced value.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    DataClass, EntityKey, FieldConflict, FieldKind, FieldMap, FieldSet, FieldValue, Priority,
    ProviderResult, ReconciledRecord, SourceId, UtcDateTime,
};

const EPSILON: f64 = 1e-9;
const OUTLIER_SIGMA: f64 = 2.0;

/// How one field's readings collapse into a single value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPolicy {
    #[default]
    WeightedMean,
    Max,
    Min,
}

/// Weighting inputs for one source, captured when a pass reconciles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceWeight {
    pub priority: Priority,
    pub reliability: f64,
}

impl SourceWeight {
    pub fn weight(&self) -> f64 {
        self.priority.as_weight() * self.reliability.clamp(0.0, 1.0)
    }
}

impl Default for SourceWeight {
    fn default() -> Self {
        Self {
            priority: Priority::MIN,
            reliability: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Contribution<'a> {
    source: &'a SourceId,
    value: FieldValue,
    weight: f64,
    reliability: f64,
}

#[derive(Debug, Clone, Copy)]
struct Reading {
    value: f64,
    weight: f64,
    reliability: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct Collapsed {
    value: f64,
    confidence: f64,
    /// Indices into the readings that fed `value`.
    survivors: Vec<usize>,
}

/// Reconciliation rules for one data class.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciler {
    conflict_threshold_pct: f64,
    policies: BTreeMap<String, FieldPolicy>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(10.0)
    }
}

impl Reconciler {
    pub fn new(conflict_threshold_pct: f64) -> Self {
        Self {
            conflict_threshold_pct,
            policies: BTreeMap::new(),
        }
    }

    pub fn with_policy(mut self, field: impl Into<String>, policy: FieldPolicy) -> Self {
        self.policies.insert(field.into(), policy);
        self
    }

    pub fn conflict_threshold_pct(&self) -> f64 {
        self.conflict_threshold_pct
    }

    pub fn policy(&self, field: &str) -> FieldPolicy {
        self.policies.get(field).copied().unwrap_or_default()
    }

    /// Collapses provider results into one record.
    ///
    /// Returns `None` when no successful result carries any requested field.
    pub fn reconcile(
        &self,
        entity: &EntityKey,
        data_class: &DataClass,
        fields: &FieldSet,
        results: &[ProviderResult],
        weights: &BTreeMap<SourceId, SourceWeight>,
    ) -> Option<ReconciledRecord> {
        let mut out_fields = FieldMap::new();
        let mut confidence = BTreeMap::new();
        let mut conflicts = Vec::new();
        let mut sources_used = BTreeSet::new();

        for field in fields.iter() {
            let raw = collect(field, results, weights);
            if raw.is_empty() {
                continue;
            }

            let spread_pct = spread_pct(raw.iter().map(|c| c.value.scalar()));
            let in_conflict = raw.len() >= 2 && spread_pct > self.conflict_threshold_pct;
            if in_conflict {
                let values_by_source = raw
                    .iter()
                    .map(|c| (c.source.clone(), c.value))
                    .collect::<BTreeMap<_, _>>();
                warn!(
                    entity = %entity,
                    data_class = %data_class,
                    field,
                    spread_pct,
                    sources = values_by_source.len(),
                    "providers disagree beyond threshold"
                );
                conflicts.push(FieldConflict {
                    field: field.to_owned(),
                    values_by_source,
                    spread_pct,
                });
            }

            let contributors = dominant_kind(raw);
            let (value, field_confidence, used) = match self.policy(field) {
                FieldPolicy::Max => pick_extreme(&contributors, |a, b| a > b),
                FieldPolicy::Min => pick_extreme(&contributors, |a, b| a < b),
                FieldPolicy::WeightedMean => blend(&contributors, in_conflict),
            };

            sources_used.extend(used.into_iter().map(|index| contributors[index].source.clone()));
            out_fields.insert(field.to_owned(), value);
            confidence.insert(field.to_owned(), field_confidence.clamp(0.0, 1.0));
        }

        if out_fields.is_empty() {
            return None;
        }

        Some(ReconciledRecord {
            entity_key: entity.clone(),
            data_class: data_class.clone(),
            fields: out_fields,
            per_field_confidence: confidence,
            conflicts,
            sources_used: sources_used.into_iter().collect(),
            computed_at: UtcDateTime::now(),
        })
    }
}

fn collect<'a>(
    field: &str,
    results: &'a [ProviderResult],
    weights: &BTreeMap<SourceId, SourceWeight>,
) -> Vec<Contribution<'a>> {
    let mut contributors = results
        .iter()
        .filter(|result| result.success)
        .filter_map(|result| {
            let value = *result.fields.get(field)?;
            if !value.is_finite() {
                return None;
            }
            let weight = weights.get(&result.source_id).copied().unwrap_or_default();
            Some(Contribution {
                source: &result.source_id,
                value,
                weight: weight.weight(),
                reliability: weight.reliability.clamp(0.0, 1.0),
            })
        })
        .collect::<Vec<_>>();
    contributors.sort_by(|a, b| a.source.cmp(b.source));
    contributors
}

/// Keeps the contributions whose kind matches the highest-weight one.
fn dominant_kind(contributors: Vec<Contribution<'_>>) -> Vec<Contribution<'_>> {
    let dominant = contributors
        .iter()
        .fold(None::<&Contribution<'_>>, |best, c| match best {
            Some(b) if b.weight >= c.weight => Some(b),
            _ => Some(c),
        })
        .map(|c| c.value.kind());

    match dominant {
        Some(kind) => contributors
            .into_iter()
            .filter(|c| c.value.kind() == kind)
            .collect(),
        None => contributors,
    }
}

/// Value, confidence and the indices of the contributions behind the value.
type Resolved = (FieldValue, f64, Vec<usize>);

fn pick_extreme(contributors: &[Contribution<'_>], better: fn(f64, f64) -> bool) -> Resolved {
    let mut best = 0;
    for (index, candidate) in contributors.iter().enumerate().skip(1) {
        if better(candidate.value.scalar(), contributors[best].value.scalar()) {
            best = index;
        }
    }
    let supplier = &contributors[best];
    (supplier.value, supplier.reliability, vec![best])
}

fn blend(contributors: &[Contribution<'_>], in_conflict: bool) -> Resolved {
    if let [only] = contributors {
        return (only.value, only.reliability, vec![0]);
    }

    match contributors[0].value.kind() {
        FieldKind::Number => {
            let collapsed = collapse(&readings(contributors, FieldValue::scalar), in_conflict);
            (
                FieldValue::Number(collapsed.value),
                collapsed.confidence,
                collapsed.survivors,
            )
        }
        FieldKind::Range => {
            let low = collapse(&readings(contributors, range_low), in_conflict);
            let high = collapse(&readings(contributors, range_high), in_conflict);
            let (low_value, high_value) = if low.value <= high.value {
                (low.value, high.value)
            } else {
                (high.value, low.value)
            };
            let survivors = low
                .survivors
                .iter()
                .chain(&high.survivors)
                .copied()
                .collect::<BTreeSet<_>>();
            (
                FieldValue::Range {
                    low: low_value,
                    high: high_value,
                },
                low.confidence.min(high.confidence),
                survivors.into_iter().collect(),
            )
        }
    }
}

fn range_low(value: &FieldValue) -> f64 {
    match *value {
        FieldValue::Range { low, .. } => low,
        FieldValue::Number(number) => number,
    }
}

fn range_high(value: &FieldValue) -> f64 {
    match *value {
        FieldValue::Range { high, .. } => high,
        FieldValue::Number(number) => number,
    }
}

fn readings(contributors: &[Contribution<'_>], project: fn(&FieldValue) -> f64) -> Vec<Reading> {
    contributors
        .iter()
        .map(|c| Reading {
            value: project(&c.value),
            weight: c.weight,
            reliability: c.reliability,
        })
        .collect()
}

fn collapse(readings: &[Reading], in_conflict: bool) -> Collapsed {
    let kept = reject_outliers(readings);
    let survivors = kept.iter().map(|&index| readings[index]).collect::<Vec<_>>();

    let total_weight: f64 = survivors.iter().map(|r| r.weight).sum();
    let value = if total_weight > EPSILON {
        survivors.iter().map(|r| r.value * r.weight).sum::<f64>() / total_weight
    } else {
        mean(survivors.iter().map(|r| r.value))
    };

    let values = survivors.iter().map(|r| r.value).collect::<Vec<_>>();
    let dispersion = (1.0 - coefficient_of_variation(&values)).max(0.0);
    let confidence = if in_conflict {
        dispersion
    } else {
        let best = survivors
            .iter()
            .map(|r| r.reliability)
            .fold(0.0_f64, f64::max);
        dispersion.max(best)
    };

    Collapsed {
        value,
        confidence,
        survivors: kept,
    }
}

/// Leave-one-out rejection for three or more readings, returning survivor
/// indices. Falls back to the full set when fewer than two would survive.
fn reject_outliers(readings: &[Reading]) -> Vec<usize> {
    let everything = (0..readings.len()).collect::<Vec<_>>();
    if readings.len() < 3 {
        return everything;
    }

    let survivors = readings
        .iter()
        .enumerate()
        .filter(|(index, reading)| {
            let others = readings
                .iter()
                .enumerate()
                .filter(|(other, _)| other != index)
                .map(|(_, r)| r.value)
                .collect::<Vec<_>>();
            !is_outlier(reading.value, &others)
        })
        .map(|(index, _)| index)
        .collect::<Vec<_>>();

    if survivors.len() < 2 {
        everything
    } else {
        survivors
    }
}

fn is_outlier(value: f64, others: &[f64]) -> bool {
    let center = mean(others.iter().copied());
    let deviation = (value - center).abs();
    let sigma = std_dev(others, center);
    if sigma <= EPSILON {
        deviation > EPSILON * center.abs().max(1.0)
    } else {
        deviation > OUTLIER_SIGMA * sigma
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn std_dev(values: &[f64], center: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - center).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn coefficient_of_variation(values: &[f64]) -> f64 {
    let center = mean(values.iter().copied());
    let sigma = std_dev(values, center);
    if center.abs() <= EPSILON {
        if sigma <= EPSILON {
            0.0
        } else {
            1.0
        }
    } else {
        sigma / center.abs()
    }
}

/// `(max − min) / |min| × 100`, measured against `|max|` when `min` is zero.
pub fn spread_pct(values: impl IntoIterator<Item = f64>) -> f64 {
    let (min, max) = values
        .into_iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if !min.is_finite() || !max.is_finite() {
        return 0.0;
    }
    let base = if min.abs() > EPSILON {
        min.abs()
    } else if max.abs() > EPSILON {
        max.abs()
    } else {
        return 0.0;
    };
    (max - min) / base * 100.0
}
