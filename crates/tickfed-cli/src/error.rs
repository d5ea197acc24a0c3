use thiserror::Error;

use tickfed_core::logging::LoggingError;
use tickfed_core::{ConfigError, FederationError, ValidationError};

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Federation(#[from] FederationError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Config(_) => 2,
            Self::Federation(FederationError::NoDataAvailable { .. }) => 3,
            Self::Federation(_) => 2,
            Self::Logging(_) => 1,
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
        }
    }
}
