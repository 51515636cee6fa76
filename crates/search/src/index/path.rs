//! Search path type.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies where a criterion applies: a resource type and a field path
/// within it.
///
/// Paths are value types and are used as map keys throughout the engine.
///
/// ```
/// use helios_search::index::SearchPath;
///
/// let path = SearchPath::new("Patient", "name.family");
/// assert_eq!(path.to_string(), "Patient.name.family");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SearchPath {
    resource: String,
    path: String,
}

impl SearchPath {
    /// Creates a new search path.
    pub fn new(resource: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            path: path.into(),
        }
    }

    /// Returns the resource type.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Returns the field path within the resource.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the dotted path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('.').filter(|s| !s.is_empty())
    }
}

impl fmt::Display for SearchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.path)
    }
}
