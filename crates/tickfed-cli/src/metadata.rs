use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request identifier (UUID v4) for correlating output with logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Field order is fixed to keep serialization deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub request_id: RequestId,
    pub command: String,
    pub latency_ms: u64,
}

impl Metadata {
    pub fn new(request_id: RequestId, command: &str, latency_ms: u64) -> Self {
        Self {
            request_id,
            command: command.to_owned(),
            latency_ms,
        }
    }
}

/// Stdout document of every command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope<T> {
    pub meta: Metadata,
    pub data: T,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_is_uuid_v4() {
        let request_id = RequestId::new_v4();
        assert_eq!(request_id.0.get_version_num(), 4);
    }

    #[test]
    fn envelope_serializes_meta_before_data() {
        let envelope = Envelope {
            meta: Metadata::new(
                RequestId(Uuid::parse_str("123e4567-e89b-42d3-a456-426614174000").expect("uuid")),
                "warm",
                42,
            ),
            data: serde_json::json!([]),
        };

        let rendered = serde_json::to_string(&envelope).expect("serializes");

        assert_eq!(
            rendered,
            r#"{"meta":{"request_id":"123e4567-e89b-42d3-a456-426614174000","command":"warm","latency_ms":42},"data":[]}"#
        );
    }
}
