//! Session identity and endpoint addressing.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a string cannot be used as a project identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidProjectId {
    #[error("Project id is empty")]
    Empty,
    #[error("Project id contains invalid character {0:?}")]
    InvalidChar(char),
}

/// Opaque key identifying a remote execution context.
///
/// Used as the registry cache key and as the last path segment of the
/// session endpoint, so it must be non-empty and free of URL delimiters
/// (`/`, `?`, `#`, `%`), whitespace and control characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectId(String);

impl ProjectId {
    /// Create a project id, validating that it forms a single path segment.
    ///
    /// # Errors
    /// Returns error if the id is empty or contains a disallowed character.
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidProjectId> {
        let id = id.into();
        if id.is_empty() {
            return Err(InvalidProjectId::Empty);
        }
        if let Some(c) = id.chars().find(|c| {
            matches!(c, '/' | '?' | '#' | '%') || c.is_whitespace() || c.is_control()
        }) {
            return Err(InvalidProjectId::InvalidChar(c));
        }
        Ok(Self(id))
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ProjectId {
    type Error = InvalidProjectId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProjectId> for String {
    fn from(id: ProjectId) -> Self {
        id.0
    }
}

/// Resolved WebSocket endpoint for one project session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint(String);

impl Endpoint {
    /// Build `ws://<host>:<port>/<project_id>`.
    #[must_use]
    pub fn for_project(host: &str, port: u16, project_id: &ProjectId) -> Self {
        Self(format!("ws://{host}:{port}/{project_id}"))
    }

    /// Wrap an already-resolved URL.
    ///
    /// Returns `None` unless the URL uses the `ws://` or `wss://` scheme.
    #[must_use]
    pub fn parse(url: impl Into<String>) -> Option<Self> {
        let url = url.into();
        let rest = url
            .strip_prefix("ws://")
            .or_else(|| url.strip_prefix("wss://"))?;
        if rest.is_empty() {
            return None;
        }
        Some(Self(url))
    }

    /// The endpoint URL.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_id_validation() {
        assert!(ProjectId::new("a1b2-c3").is_ok());
        assert_eq!(ProjectId::new(""), Err(InvalidProjectId::Empty));
        assert_eq!(
            ProjectId::new("a/b"),
            Err(InvalidProjectId::InvalidChar('/'))
        );
        assert_eq!(
            ProjectId::new("a b"),
            Err(InvalidProjectId::InvalidChar(' '))
        );
        for (id, bad) in [("proj?x", '?'), ("proj#y", '#'), ("proj%2Fx", '%')] {
            assert_eq!(ProjectId::new(id), Err(InvalidProjectId::InvalidChar(bad)));
        }
    }

    #[test]
    fn test_project_id_serde() {
        let id: ProjectId = serde_json::from_str("\"proj-1\"").unwrap();
        assert_eq!(id.as_str(), "proj-1");
        assert!(serde_json::from_str::<ProjectId>("\"\"").is_err());
    }

    #[test]
    fn test_endpoint_for_project() {
        let id = ProjectId::new("f3c1").unwrap();
        let endpoint = Endpoint::for_project("localhost", 7702, &id);
        assert_eq!(endpoint.as_str(), "ws://localhost:7702/f3c1");
    }

    #[test]
    fn test_endpoint_parse() {
        assert!(Endpoint::parse("ws://127.0.0.1:9000/p").is_some());
        assert!(Endpoint::parse("wss://host/p").is_some());
        assert!(Endpoint::parse("http://host/p").is_none());
        assert!(Endpoint::parse("ws://").is_none());
    }
}
