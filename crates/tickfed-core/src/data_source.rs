//! Data source trait and per-source error types.
//!
//! This module defines the adapter contract (`DataSource`) that every
//! upstream provider implements, the request it receives and the structured
//! error it returns. Adapters stay deliberately thin: they translate one
//! upstream call into a [`FieldMap`] and classify failures. Priority,
//! timeouts, retries, circuit breaking and reliability tracking are layered
//! on top by [`ManagedSource`](crate::ManagedSource).
//!
//! # Error kinds
//!
//! | Kind | Retried | Meaning |
//! |------|---------|---------|
//! | `UpstreamTimeout` | yes | The attempt exceeded the source timeout |
//! | `UpstreamError` | yes | 5xx, connection reset, malformed upstream payload |
//! | `RateLimited` | yes | Upstream 429 or local quota exhausted |
//! | `InvalidRequest` | no | Upstream rejected the request (unknown entity, 4xx) |
//! | `CircuitOpen` | no | Breaker is open; the call never left the process |
//! | `RetryExhausted` | no | Terminal wrapper around the last retryable error |
//! | `Internal` | no | Adapter bug or unexpected state |

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::{EntityKey, FieldMap, FieldSet, SourceId};

/// Boxed future returned by [`DataSource::fetch`].
pub type SourceFuture<'a> = Pin<Box<dyn Future<Output = Result<FieldMap, SourceError>> + Send + 'a>>;

/// Request payload handed to an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub entity: EntityKey,
    pub fields: FieldSet,
}

impl FetchRequest {
    pub fn new(entity: EntityKey, fields: FieldSet) -> Self {
        Self { entity, fields }
    }
}

/// Adapter-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorKind {
    UpstreamTimeout,
    UpstreamError,
    RateLimited,
    InvalidRequest,
    CircuitOpen,
    RetryExhausted,
    Internal,
}

impl SourceErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UpstreamTimeout => "upstream_timeout",
            Self::UpstreamError => "upstream_error",
            Self::RateLimited => "rate_limited",
            Self::InvalidRequest => "invalid_request",
            Self::CircuitOpen => "circuit_open",
            Self::RetryExhausted => "retry_exhausted",
            Self::Internal => "internal",
        }
    }
}

impl Display for SourceErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured source error used by retry, breaker and fan-out bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
    attempts: Option<u32>,
    last: Option<Box<SourceError>>,
    local: bool,
}

impl SourceError {
    fn new(kind: SourceErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
            attempts: None,
            last: None,
            local: false,
        }
    }

    pub fn upstream_timeout(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::UpstreamTimeout, message, true)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::UpstreamError, message, true)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::RateLimited, message, true)
    }

    /// Our own per-source quota refused the call before it left the process.
    pub fn quota_exhausted(message: impl Into<String>) -> Self {
        Self {
            local: true,
            ..Self::new(SourceErrorKind::RateLimited, message, true)
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::InvalidRequest, message, false)
    }

    pub fn circuit_open(source: &SourceId) -> Self {
        Self::new(
            SourceErrorKind::CircuitOpen,
            format!("circuit for source '{source}' is open"),
            false,
        )
    }

    pub fn retry_exhausted(attempts: u32, last: SourceError) -> Self {
        Self {
            kind: SourceErrorKind::RetryExhausted,
            message: format!("gave up after {attempts} attempt(s): {}", last.message),
            retryable: false,
            attempts: Some(attempts),
            local: last.is_local(),
            last: Some(Box::new(last)),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Internal, message, false)
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    /// Whether the failure was produced locally and says nothing about the
    /// upstream's health. Breakers and reliability windows ignore these.
    pub const fn is_local(&self) -> bool {
        self.local
    }

    /// Number of attempts made before giving up (set on `RetryExhausted` only).
    pub const fn attempts(&self) -> Option<u32> {
        self.attempts
    }

    /// The last underlying error wrapped by `RetryExhausted`.
    pub fn last_error(&self) -> Option<&SourceError> {
        self.last.as_deref()
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::UpstreamTimeout => "source.upstream_timeout",
            SourceErrorKind::UpstreamError => "source.upstream_error",
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::InvalidRequest => "source.invalid_request",
            SourceErrorKind::CircuitOpen => "source.circuit_open",
            SourceErrorKind::RetryExhausted => "source.retry_exhausted",
            SourceErrorKind::Internal => "source.internal",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.last
            .as_deref()
            .map(|last| last as &(dyn std::error::Error + 'static))
    }
}

/// Source adapter contract.
///
/// One implementation per upstream provider. The federator only ever sees
/// `Arc<dyn DataSource>`; concrete adapter types never leak past the
/// composition root.
///
/// # Example Implementation
///
/// ```rust,ignore
/// use tickfed_core::{DataSource, FetchRequest, FieldMap, FieldValue, SourceFuture, SourceId};
///
/// struct MyAdapter {
///     id: SourceId,
/// }
///
/// impl DataSource for MyAdapter {
///     fn id(&self) -> SourceId {
///         self.id.clone()
///     }
///
///     fn fetch<'a>(&'a self, request: FetchRequest) -> SourceFuture<'a> {
///         Box::pin(async move {
///             let mut fields = FieldMap::new();
///             fields.insert(String::from("price"), FieldValue::Number(101.0));
///             Ok(fields)
///         })
///     }
/// }
/// ```
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared across fan-out tasks.
pub trait DataSource: Send + Sync {
    /// Returns the unique provider identifier.
    fn id(&self) -> SourceId;

    /// Fetches the requested fields for one entity.
    ///
    /// Fields the provider does not carry are simply omitted from the map.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] classified per the table in the module docs.
    fn fetch<'a>(&'a self, request: FetchRequest) -> SourceFuture<'a>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_exhausted_wraps_last_error() {
        let last = SourceError::upstream("502 from upstream");
        let error = SourceError::retry_exhausted(4, last.clone());

        assert_eq!(error.kind(), SourceErrorKind::RetryExhausted);
        assert!(!error.retryable());
        assert_eq!(error.attempts(), Some(4));
        assert_eq!(error.last_error(), Some(&last));
        assert!(error.message().contains("502 from upstream"));
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            SourceError::upstream_timeout("slow").code(),
            "source.upstream_timeout"
        );
        let id = SourceId::parse("yahoo").expect("valid id");
        let open = SourceError::circuit_open(&id);
        assert_eq!(open.code(), "source.circuit_open");
        assert!(!open.retryable());
    }
}
