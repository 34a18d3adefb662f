use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;

/// Accepted shape for every client-supplied identifier.
static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.:\-]{1,64}$").expect("static id pattern"));

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// What an identifier names, used in validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Identity,
    Community,
    Room,
    Channel,
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Identity => "identity id",
            Self::Community => "community id",
            Self::Room => "room id",
            Self::Channel => "channel id",
        };
        f.write_str(name)
    }
}

/// Reject identifiers that are empty, too long, or contain characters
/// outside `[A-Za-z0-9_.:-]`.
pub fn validate_id(kind: IdKind, value: &str) -> Result<(), ProtocolError> {
    if ID_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(ProtocolError::InvalidId {
            kind,
            value: value.to_string(),
        })
    }
}

/// One physical transport connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(new_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_id_is_valid_uuid() {
        let id = new_id();
        let parsed = uuid::Uuid::parse_str(&id);
        assert!(parsed.is_ok());
        assert_eq!(parsed.unwrap().get_version_num(), 4);
    }

    #[test]
    fn accepts_typical_ids() {
        for id in ["R1", "general", "guild:42", "user_7", "a.b-c", &new_id()] {
            assert!(validate_id(IdKind::Room, id).is_ok(), "{id} should be valid");
        }
    }

    #[test]
    fn rejects_empty_and_oversized_ids() {
        assert!(validate_id(IdKind::Community, "").is_err());
        let long = "x".repeat(65);
        assert!(validate_id(IdKind::Community, &long).is_err());
        let max = "x".repeat(64);
        assert!(validate_id(IdKind::Community, &max).is_ok());
    }

    #[test]
    fn rejects_whitespace_and_markup() {
        for id in ["has space", "tab\t", "<script>", "slash/path", "émoji"] {
            let err = validate_id(IdKind::Channel, id).unwrap_err();
            assert!(matches!(
                err,
                ProtocolError::InvalidId {
                    kind: IdKind::Channel,
                    ..
                }
            ));
        }
    }

    #[test]
    fn session_id_display_matches_inner() {
        let sid = SessionId::new();
        assert_eq!(sid.to_string(), sid.as_str());
    }

    #[test]
    fn session_ids_are_distinct() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert_eq!(a.clone(), a);
    }

    #[test]
    fn session_id_serializes_as_plain_string() {
        let sid = SessionId::new();
        let json = serde_json::to_string(&sid).unwrap();
        assert_eq!(json, format!("\"{}\"", sid.as_str()));
    }
}
