//! Stable resource identifiers
//!
//! Scalar resources are keyed by the raw server id. Resources addressed
//! inside a parent scope (a rule within a cluster, a peering within a
//! datacenter) are keyed by `"<scope>:<child>"`. Segments are never escaped,
//! so neither half may itself contain `:`.

use crate::error::{CloudError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

const DELIMITER: char = ':';

/// Durable identifier persisted by the caller to re-identify a resource.
///
/// An empty id means the resource is no longer tracked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StableId(String);

impl StableId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Forget the resource; the caller drops it from tracked state.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Split a composite id into `(scope, child)`.
    pub fn split(&self) -> Result<(&str, &str)> {
        decode(&self.0)
    }
}

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for StableId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for StableId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Join a scope and child id into a composite [`StableId`].
pub fn encode(scope: &str, child: &str) -> StableId {
    StableId(format!("{scope}{DELIMITER}{child}"))
}

/// Split a composite id back into `(scope, child)`.
pub fn decode(id: &str) -> Result<(&str, &str)> {
    let mut parts = id.split(DELIMITER);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scope), Some(child), None) if !scope.is_empty() && !child.is_empty() => {
            Ok((scope, child))
        }
        _ => Err(CloudError::MalformedIdentifier(id.to_string())),
    }
}

/// Reject a segment that would make the composite id undecodable.
pub fn ensure_segment(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(CloudError::InvalidConfig(format!("{field} must not be empty")));
    }
    if value.contains(DELIMITER) {
        return Err(CloudError::InvalidConfig(format!(
            "{field} '{value}' must not contain '{DELIMITER}'"
        )));
    }
    Ok(())
}
