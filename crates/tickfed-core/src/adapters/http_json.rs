//! Generic JSON-over-HTTP adapter.
//!
//! The URL template carries an `{entity}` placeholder; each field is located
//! in the response body by JSON pointer (RFC 6901). Numbers encoded as
//! strings are accepted.
//!
//! | Outcome | Error kind |
//! |---------|------------|
//! | transport timeout | `UpstreamTimeout` |
//! | connection failure, 408, 5xx, unparseable body | `UpstreamError` |
//! | 429 | `RateLimited` |
//! | any other non-2xx | `InvalidRequest` |

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::data_source::{DataSource, FetchRequest, SourceError, SourceFuture};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest, HttpResponse};
use crate::{EntityKey, FieldMap, FieldValue, SourceId};

/// Where a field lives in the response document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum FieldPointer {
    Scalar(String),
    Range { low: String, high: String },
}

pub struct HttpJsonSource {
    id: SourceId,
    url_template: String,
    pointers: BTreeMap<String, FieldPointer>,
    auth: HttpAuth,
    timeout: Duration,
    client: Arc<dyn HttpClient>,
}

impl std::fmt::Debug for HttpJsonSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpJsonSource")
            .field("id", &self.id)
            .field("url_template", &self.url_template)
            .field("fields", &self.pointers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HttpJsonSource {
    pub fn new(
        id: SourceId,
        url_template: impl Into<String>,
        pointers: BTreeMap<String, FieldPointer>,
        client: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            id,
            url_template: url_template.into(),
            pointers,
            auth: HttpAuth::None,
            timeout: Duration::from_secs(5),
            client,
        }
    }

    pub fn with_auth(mut self, auth: HttpAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url_for(&self, entity: &EntityKey) -> String {
        self.url_template
            .replace("{entity}", &urlencoding::encode(entity.as_str()))
    }

    fn classify(&self, response: &HttpResponse) -> Result<(), SourceError> {
        match response.status {
            200..=299 => Ok(()),
            429 => Err(SourceError::rate_limited(format!(
                "'{}' answered 429",
                self.id
            ))),
            408 | 500..=599 => Err(SourceError::upstream(format!(
                "'{}' answered {}",
                self.id, response.status
            ))),
            status => Err(SourceError::invalid_request(format!(
                "'{}' rejected the request with {status}",
                self.id
            ))),
        }
    }

    fn extract(&self, request: &FetchRequest, body: &str) -> Result<FieldMap, SourceError> {
        let document: Value = serde_json::from_str(body).map_err(|e| {
            SourceError::upstream(format!("'{}' returned malformed JSON: {e}", self.id))
        })?;

        let mut fields = FieldMap::new();
        for field in request.fields.iter() {
            let Some(pointer) = self.pointers.get(field) else {
                continue;
            };
            let value = match pointer {
                FieldPointer::Scalar(path) => number_at(&document, path).map(FieldValue::Number),
                FieldPointer::Range { low, high } => {
                    match (number_at(&document, low), number_at(&document, high)) {
                        (Some(low), Some(high)) => FieldValue::range(field, low, high).ok(),
                        _ => None,
                    }
                }
            };
            if let Some(value) = value.filter(FieldValue::is_finite) {
                fields.insert(field.to_owned(), value);
            }
        }
        Ok(fields)
    }
}

fn number_at(document: &Value, pointer: &str) -> Option<f64> {
    match document.pointer(pointer)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

impl DataSource for HttpJsonSource {
    fn id(&self) -> SourceId {
        self.id.clone()
    }

    fn fetch<'a>(&'a self, request: FetchRequest) -> SourceFuture<'a> {
        Box::pin(async move {
            let http_request = HttpRequest::get(self.url_for(&request.entity))
                .with_header("accept", "application/json")
                .with_auth(&self.auth)
                .with_timeout(self.timeout);

            let response = self.client.execute(http_request).await.map_err(|e| {
                if e.timed_out() {
                    SourceError::upstream_timeout(format!("'{}': {}", self.id, e.message()))
                } else {
                    SourceError::upstream(format!("'{}': {}", self.id, e.message()))
                }
            })?;

            self.classify(&response)?;
            self.extract(&request, &response.body)
        })
    }
}
