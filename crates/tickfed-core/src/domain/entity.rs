use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_ENTITY_LEN: usize = 32;

/// Normalized entity key (for example a ticker symbol).
///
/// Keys are trimmed and upper-cased once at the edge; everything
/// downstream treats the value as opaque.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityKey(String);

impl EntityKey {
    /// Parse and normalize an entity key to uppercase.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyEntityKey);
        }

        let normalized = trimmed.to_ascii_uppercase();
        let len = normalized.chars().count();
        if len > MAX_ENTITY_LEN {
            return Err(ValidationError::EntityKeyTooLong {
                len,
                max: MAX_ENTITY_LEN,
            });
        }

        for (index, ch) in normalized.chars().enumerate() {
            let valid = ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_' | ':' | '^');
            if !valid {
                return Err(ValidationError::EntityKeyInvalidChar { ch, index });
            }
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for EntityKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for EntityKey {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<EntityKey> for String {
    fn from(value: EntityKey) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes_entity() {
        let parsed = EntityKey::parse(" aapl ").expect("entity should parse");
        assert_eq!(parsed.as_str(), "AAPL");
    }

    #[test]
    fn accepts_index_and_exchange_prefixes() {
        assert_eq!(EntityKey::parse("^gspc").expect("index").as_str(), "^GSPC");
        assert_eq!(EntityKey::parse("krx:005930").expect("prefixed").as_str(), "KRX:005930");
    }

    #[test]
    fn rejects_empty_and_invalid_chars() {
        assert_eq!(EntityKey::parse("   "), Err(ValidationError::EmptyEntityKey));
        let err = EntityKey::parse("AAPL$").expect_err("must fail");
        assert!(matches!(err, ValidationError::EntityKeyInvalidChar { ch: '$', index: 4 }));
    }

    #[test]
    fn rejects_overlong_keys() {
        let err = EntityKey::parse(&"A".repeat(40)).expect_err("must fail");
        assert!(matches!(err, ValidationError::EntityKeyTooLong { len: 40, .. }));
    }
}
