//! # Tickfed Core
//!
//! Resilient data federation over several upstream market data providers,
//! with reconciliation of disagreeing answers and a two-tier cache.
//!
//! ## Overview
//!
//! - **Managed sources**: every provider sits behind a circuit breaker, a
//!   retry policy, an optional per-minute quota and a reliability window
//! - **Federation**: concurrent fan-out bounded by a deadline, fan-in into a
//!   reconciled record with per-field confidence and conflict audit
//! - **Tiered cache**: sharded in-process tier over a distributed tier
//!   (Redis), per-class TTLs and a grace window for stale fallback
//! - **Warming**: background refresh of configured hot keys
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Built-in `static` and `http_json` sources |
//! | [`cache`] | In-process, distributed and tiered caches |
//! | [`circuit_breaker`] | Per-source breaker state machine |
//! | [`config`] | TOML configuration and environment overrides |
//! | [`data_source`] | Adapter trait, request and error types |
//! | [`domain`] | Entity keys, fields, provider results, reconciled records |
//! | [`error`] | Validation, config and federation errors |
//! | [`federator`] | Cache lookup, fan-out, reconciliation, write-through |
//! | [`http_client`] | HTTP client abstraction |
//! | [`logging`] | `tracing-subscriber` setup |
//! | [`managed_source`] | Source wrapper with breaker, retry, quota, reliability |
//! | [`reconcile`] | Outlier rejection, weighted fan-in, conflict detection |
//! | [`reliability`] | Rolling success-rate window |
//! | [`retry`] | Retry policy and backoff |
//! | [`service`] | Composition root with background tasks |
//! | [`source`] | Source identifiers and priorities |
//! | [`throttling`] | Per-source quotas |
//! | [`warmer`] | Hot-key cache warming |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │ CLI / library caller │
//! └──────────┬───────────┘
//!            ▼
//! ┌──────────────────────┐     ┌──────────────────────┐
//! │ FederationService    │────▶│ CacheWarmer, sweeper │
//! └──────────┬───────────┘     └──────────┬───────────┘
//!            ▼                            │
//! ┌──────────────────────┐                │
//! │ Federator            │◀───────────────┘
//! └───┬──────────────┬───┘
//!     │              ▼
//!     │   ┌──────────────────────┐     ┌──────────────────────┐
//!     │   │ TieredCache          │────▶│ Memory │ Redis       │
//!     │   └──────────────────────┘     └──────────────────────┘
//!     ▼
//! ┌──────────────────────┐     ┌──────────────────────┐
//! │ ManagedSource × N    │────▶│ Breaker, retry, quota│
//! └──────────┬───────────┘     └──────────────────────┘
//!            ▼
//! ┌──────────────────────┐     ┌──────────────────────┐
//! │ DataSource adapters  │────▶│ HttpClient           │
//! └──────────┬───────────┘     └──────────────────────┘
//!            ▼
//! ┌──────────────────────┐
//! │ Reconciler           │
//! └──────────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Per-source failures never reach the caller; they become failed
//! [`ProviderResult`]s and show up in [`ProviderHealth`]. Callers see
//! [`FederationError`]:
//!
//! ```rust
//! use tickfed_core::FederationError;
//!
//! fn exit_status(error: &FederationError) -> i32 {
//!     match error {
//!         FederationError::NoDataAvailable { .. } => 3,
//!         FederationError::Validation(_) | FederationError::InvalidRequest(_) => 2,
//!         _ => 1,
//!     }
//! }
//! ```

pub mod adapters;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod data_source;
pub mod domain;
pub mod error;
pub mod federator;
pub mod http_client;
pub mod logging;
pub mod managed_source;
pub mod reconcile;
pub mod reliability;
pub mod retry;
pub mod service;
pub mod source;
pub mod throttling;
pub mod warmer;

// Adapters
pub use adapters::{FieldPointer, HttpJsonSource, StaticSource};

// Caching
pub use cache::{
    CacheStats, DistributedTier, InMemoryDistributedTier, RedisTier, TierError, TieredCache,
    TieredCacheConfig,
};

// Circuit breaker
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

// Configuration
pub use config::FederationConfig;

// Data source trait and types
pub use data_source::{DataSource, FetchRequest, SourceError, SourceErrorKind, SourceFuture};

// Domain models
pub use domain::{
    normalize_field_name, DataClass, EntityKey, FieldConflict, FieldKind, FieldMap, FieldSet,
    FieldValue, ProviderResult, ReconciledRecord, UtcDateTime,
};

// Error types
pub use error::{ConfigError, CoreError, FederationError, ValidationError};

// Federation
pub use federator::{
    DataClassPolicy, DataResponse, Federator, FederatorBuilder, FederatorSettings, RecordOrigin,
};

// HTTP client types
pub use http_client::{
    CannedHttpClient, HttpAuth, HttpClient, HttpError, HttpRequest, HttpResponse,
    ReqwestHttpClient,
};

// Logging
pub use logging::{init_logging, LogConfig, LogFormat};

// Managed sources
pub use managed_source::{ManagedSource, ProviderHealth, SourceSettings};

// Reconciliation
pub use reconcile::{FieldPolicy, Reconciler, SourceWeight};

// Retry logic
pub use retry::{Backoff, RetryPolicy};

// Service
pub use service::{FederationService, FederationServiceBuilder};

// Source identifiers
pub use source::{Priority, SourceId};

// Warming
pub use warmer::{CacheWarmer, WarmReport};
