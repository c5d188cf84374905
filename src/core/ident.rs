//! Replicant identity: `(namespace, name)` is the primary key.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidIdent {
    #[error("invalid namespace {raw:?}: {reason}")]
    Namespace { raw: String, reason: String },
    #[error("invalid replicant name {raw:?}: {reason}")]
    Name { raw: String, reason: String },
}

/// Grouping key partitioning replicants, typically a bundle name.
///
/// Namespaces name a directory under the persistence root, so path
/// separators and dot-names are rejected at construction.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NamespaceId(String);

impl NamespaceId {
    const MAX_LEN: usize = 128;

    pub fn parse(s: impl Into<String>) -> Result<Self, InvalidIdent> {
        let raw = s.into();
        if raw.is_empty() {
            return Err(InvalidIdent::Namespace {
                raw,
                reason: "empty".into(),
            });
        }
        if raw.len() > Self::MAX_LEN {
            return Err(InvalidIdent::Namespace {
                raw,
                reason: format!("length must be <= {}", Self::MAX_LEN),
            });
        }
        if raw == "." || raw == ".." {
            return Err(InvalidIdent::Namespace {
                raw,
                reason: "reserved name".into(),
            });
        }
        if raw.bytes().any(|b| b == b'/' || b == b'\\' || b == 0) {
            return Err(InvalidIdent::Namespace {
                raw,
                reason: "contains path separator".into(),
            });
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Broadcast room for this namespace.
    pub fn room(&self) -> String {
        format!("replicant:{}", self.0)
    }
}

impl fmt::Debug for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NamespaceId({:?})", self.0)
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for NamespaceId {
    type Error = InvalidIdent;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        NamespaceId::parse(s)
    }
}

impl From<NamespaceId> for String {
    fn from(id: NamespaceId) -> String {
        id.0
    }
}

/// Replicant name, unique within a namespace.
///
/// Names key the `<name>.rep` snapshot file, hence the same separator
/// restrictions as namespaces.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReplicantName(String);

impl ReplicantName {
    const MAX_LEN: usize = 255;

    pub fn parse(s: impl Into<String>) -> Result<Self, InvalidIdent> {
        let raw = s.into();
        if raw.is_empty() {
            return Err(InvalidIdent::Name {
                raw,
                reason: "empty".into(),
            });
        }
        if raw.len() > Self::MAX_LEN {
            return Err(InvalidIdent::Name {
                raw,
                reason: format!("length must be <= {}", Self::MAX_LEN),
            });
        }
        if raw == "." || raw == ".." {
            return Err(InvalidIdent::Name {
                raw,
                reason: "reserved name".into(),
            });
        }
        if raw.bytes().any(|b| b == b'/' || b == b'\\' || b == 0) {
            return Err(InvalidIdent::Name {
                raw,
                reason: "contains path separator".into(),
            });
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ReplicantName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReplicantName({:?})", self.0)
    }
}

impl fmt::Display for ReplicantName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ReplicantName {
    type Error = InvalidIdent;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        ReplicantName::parse(s)
    }
}

impl From<ReplicantName> for String {
    fn from(name: ReplicantName) -> String {
        name.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_rejects_empty_and_separators() {
        assert!(NamespaceId::parse("").is_err());
        assert!(NamespaceId::parse("a/b").is_err());
        assert!(NamespaceId::parse("..").is_err());
        assert!(NamespaceId::parse("overlay-graphics").is_ok());
    }

    #[test]
    fn name_rejects_empty_and_separators() {
        assert!(ReplicantName::parse("").is_err());
        assert!(ReplicantName::parse("a\\b").is_err());
        assert!(ReplicantName::parse("scoreboard").is_ok());
    }

    #[test]
    fn namespace_room_is_prefixed() {
        let ns = NamespaceId::parse("overlay").unwrap();
        assert_eq!(ns.room(), "replicant:overlay");
    }

    #[test]
    fn serde_round_trip_validates() {
        let ns: NamespaceId = serde_json::from_str("\"bundle\"").unwrap();
        assert_eq!(ns.as_str(), "bundle");
        assert!(serde_json::from_str::<NamespaceId>("\"a/b\"").is_err());
    }
}
