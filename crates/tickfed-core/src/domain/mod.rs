//! # Domain Models
//!
//! Identifiers and records that flow through the federation layer.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`EntityKey`] | Normalized subject identifier (ticker, index, pair) |
//! | [`DataClass`] | Volatility class sharing TTLs and eligible sources |
//! | [`FieldSet`] | Sorted set of requested field names |
//! | [`FieldValue`] | Scalar or low/high range reading |
//! | [`ProviderResult`] | One source's answer for one federation pass |
//! | [`ReconciledRecord`] | Reconciled answer cached and returned to callers |
//! | [`UtcDateTime`] | UTC timestamp |

mod entity;
mod field;
mod record;
mod timestamp;

pub use entity::EntityKey;
pub use field::{normalize_field_name, DataClass, FieldKind, FieldMap, FieldSet, FieldValue};
pub use record::{FieldConflict, ProviderResult, ReconciledRecord};
pub use timestamp::UtcDateTime;
