//! Identifiers for stored configuration records.

use serde::{Deserialize, Serialize};

/// Hierarchical identifier of an app or pod definition, e.g. `/prod/api/web`.
///
/// Equality and hashing are by value; the store never interprets the path
/// structure beyond treating it as an opaque key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathId(pub String);

impl PathId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments, skipping the leading separator.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }
}

impl std::fmt::Display for PathId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PathId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Absolute timestamp version of a stored record, in milliseconds.
///
/// Versions carry a total order; retention decisions always walk them
/// oldest-first.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Version(pub u64);

impl Version {
    pub fn millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(millis: u64) -> Self {
        Self(millis)
    }
}
