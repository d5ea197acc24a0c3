use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_FIELD_LEN: usize = 64;
const MAX_CLASS_LEN: usize = 32;

/// Field values keyed by field name, ordered for deterministic serialization.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A single field reading: a numeric scalar or a small low/high range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Range { low: f64, high: f64 },
}

impl FieldValue {
    pub fn number(field: &str, value: f64) -> Result<Self, ValidationError> {
        validate_finite(field, value)?;
        Ok(Self::Number(value))
    }

    pub fn range(field: &str, low: f64, high: f64) -> Result<Self, ValidationError> {
        validate_finite(field, low)?;
        validate_finite(field, high)?;
        if low > high {
            return Err(ValidationError::InvalidRange {
                field: field.to_owned(),
            });
        }
        Ok(Self::Range { low, high })
    }

    pub const fn kind(&self) -> FieldKind {
        match self {
            Self::Number(_) => FieldKind::Number,
            Self::Range { .. } => FieldKind::Range,
        }
    }

    /// Scalar used for spread and conflict reporting; the midpoint for ranges.
    pub fn scalar(&self) -> f64 {
        match *self {
            Self::Number(value) => value,
            Self::Range { low, high } => (low + high) / 2.0,
        }
    }

    pub fn is_finite(&self) -> bool {
        match *self {
            Self::Number(value) => value.is_finite(),
            Self::Range { low, high } => low.is_finite() && high.is_finite(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Number,
    Range,
}

fn validate_finite(field: &str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NonFiniteValue {
            field: field.to_owned(),
        })
    }
}

/// Sorted, de-duplicated set of requested field names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct FieldSet(BTreeSet<String>);

impl FieldSet {
    pub fn parse<I, S>(fields: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for raw in fields {
            set.insert(normalize_field_name(raw.as_ref())?);
        }
        if set.is_empty() {
            return Err(ValidationError::EmptyFieldSet);
        }
        Ok(Self(set))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for FieldSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let joined = self.0.iter().map(String::as_str).collect::<Vec<_>>().join(",");
        f.write_str(&joined)
    }
}

impl TryFrom<Vec<String>> for FieldSet {
    type Error = ValidationError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<FieldSet> for Vec<String> {
    fn from(value: FieldSet) -> Self {
        value.0.into_iter().collect()
    }
}

/// Normalizes a field name to lowercase and validates its characters.
pub fn normalize_field_name(raw: &str) -> Result<String, ValidationError> {
    let normalized = raw.trim().to_ascii_lowercase();
    let valid = !normalized.is_empty()
        && normalized.len() <= MAX_FIELD_LEN
        && normalized
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '.');
    if valid {
        Ok(normalized)
    } else {
        Err(ValidationError::InvalidFieldName {
            value: raw.to_owned(),
        })
    }
}

/// Data-type class sharing a TTL policy and a set of eligible sources.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DataClass(String);

impl DataClass {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized = input.trim().to_ascii_lowercase();
        let valid = !normalized.is_empty()
            && normalized.len() <= MAX_CLASS_LEN
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
        if valid {
            Ok(Self(normalized))
        } else {
            Err(ValidationError::InvalidDataClass {
                value: input.to_owned(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DataClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for DataClass {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DataClass> for String {
    fn from(value: DataClass) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_set_is_sorted_and_deduplicated() {
        let set = FieldSet::parse(["price", "Volume", "price"]).expect("valid set");
        assert_eq!(set.len(), 2);
        assert_eq!(set.to_string(), "price,volume");
    }

    #[test]
    fn empty_field_set_is_rejected() {
        let err = FieldSet::parse(Vec::<String>::new()).expect_err("must fail");
        assert_eq!(err, ValidationError::EmptyFieldSet);
    }

    #[test]
    fn range_requires_ordered_bounds() {
        assert!(FieldValue::range("day_range", 10.0, 12.0).is_ok());
        let err = FieldValue::range("day_range", 12.0, 10.0).expect_err("must fail");
        assert!(matches!(err, ValidationError::InvalidRange { .. }));
    }

    #[test]
    fn field_values_serialize_untagged() {
        let number = serde_json::to_string(&FieldValue::Number(1.5)).expect("serialize");
        assert_eq!(number, "1.5");

        let range: FieldValue =
            serde_json::from_str(r#"{"low":1.0,"high":2.0}"#).expect("deserialize");
        assert_eq!(range, FieldValue::Range { low: 1.0, high: 2.0 });
        assert_eq!(range.scalar(), 1.5);
    }

    #[test]
    fn data_class_is_lowercased() {
        assert_eq!(DataClass::parse(" Price ").expect("valid").as_str(), "price");
        assert!(DataClass::parse("price class").is_err());
    }
}
