use thiserror::Error;

use crate::{DataClass, EntityKey, SourceId};

/// Validation errors for identifiers, requests and configuration values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("entity key cannot be empty")]
    EmptyEntityKey,
    #[error("entity key length {len} exceeds max {max}")]
    EntityKeyTooLong { len: usize, max: usize },
    #[error("entity key contains invalid character '{ch}' at index {index}")]
    EntityKeyInvalidChar { ch: char, index: usize },

    #[error("source id '{value}' must be 1-32 characters of [a-z0-9_-]")]
    InvalidSourceId { value: String },
    #[error("data class '{value}' must be 1-32 characters of [a-z0-9_-]")]
    InvalidDataClass { value: String },
    #[error("field name '{value}' must be 1-64 characters of [a-z0-9_.]")]
    InvalidFieldName { value: String },
    #[error("field set must contain at least one field")]
    EmptyFieldSet,

    #[error("priority {value} is outside the allowed range 1-4")]
    PriorityOutOfRange { value: u8 },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: String },
    #[error("range for field '{field}' has low > high")]
    InvalidRange { field: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },
}

/// Caller-facing error for federation requests and administrative calls.
///
/// Per-source failures never show up here; they are absorbed into
/// failed provider results and surface only through provider health.
#[derive(Debug, Error)]
pub enum FederationError {
    #[error("no data available for '{entity}' ({data_class}): {reason}")]
    NoDataAvailable {
        entity: EntityKey,
        data_class: DataClass,
        reason: String,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown data class '{0}'")]
    UnknownDataClass(DataClass),

    #[error("unknown source '{0}'")]
    UnknownSource(SourceId),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl FederationError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NoDataAvailable { .. } => "federation.no_data_available",
            Self::InvalidRequest(_) | Self::Validation(_) => "federation.invalid_request",
            Self::UnknownDataClass(_) => "federation.unknown_data_class",
            Self::UnknownSource(_) => "federation.unknown_source",
            Self::Config(_) => "federation.config",
        }
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Top-level error type for serialization concerns shared by cache tiers.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
