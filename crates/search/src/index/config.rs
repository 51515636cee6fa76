//! Per-tenant index configuration.
//!
//! The configuration is loaded from a JSON document of the form:
//!
//! ```json
//! {
//!   "resources": {
//!     "Patient": {
//!       "name": { "path": "name.family", "type": "string" },
//!       "organization": { "path": "managingOrganization", "type": "reference" }
//!     },
//!     "Organization": {}
//!   }
//! }
//! ```
//!
//! Every configured resource type implicitly gets an `_id` token index at path `id`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::path::SearchPath;
use crate::error::ConfigurationError;

/// Name and path of the implicit logical-id parameter.
pub(crate) const ID_PARAMETER: &str = "_id";
pub(crate) const ID_PATH: &str = "id";

/// The declared type of an index, which decides the leaf expression kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    /// A simple string, like a name or description.
    String,
    /// A code, optionally qualified by a system.
    Token,
    /// A reference to another resource.
    Reference,
    /// A quantity (number with optional units).
    Quantity,
    /// A plain number; searched with quantity expressions.
    Number,
    /// A date, dateTime or instant.
    Date,
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexType::String => write!(f, "string"),
            IndexType::Token => write!(f, "token"),
            IndexType::Reference => write!(f, "reference"),
            IndexType::Quantity => write!(f, "quantity"),
            IndexType::Number => write!(f, "number"),
            IndexType::Date => write!(f, "date"),
        }
    }
}

impl FromStr for IndexType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" => Ok(IndexType::String),
            "token" => Ok(IndexType::Token),
            "reference" => Ok(IndexType::Reference),
            "quantity" => Ok(IndexType::Quantity),
            "number" => Ok(IndexType::Number),
            "date" => Ok(IndexType::Date),
            _ => Err(format!("unknown index type: {}", s)),
        }
    }
}

/// A single configured search parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Dotted field path within the resource.
    pub path: String,

    /// The index type.
    #[serde(rename = "type")]
    pub index_type: IndexType,
}

impl IndexDefinition {
    /// Creates a new index definition.
    pub fn new(path: impl Into<String>, index_type: IndexType) -> Self {
        Self {
            path: path.into(),
            index_type,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IndexDocument {
    resources: BTreeMap<String, BTreeMap<String, IndexDefinition>>,
}

/// The index configuration of one tenant.
///
/// Lookups go both ways: by `(resource_type, parameter)` for query building,
/// and by [`SearchPath`] for validating factory input.
#[derive(Debug, Clone, Default)]
pub struct IndexConfig {
    /// Parameters indexed by resource type, then parameter name.
    params_by_type: HashMap<String, HashMap<String, IndexDefinition>>,

    /// Index types by search path.
    types_by_path: HashMap<SearchPath, IndexType>,
}

impl IndexConfig {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from its JSON text.
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        let document: IndexDocument = serde_json::from_str(json)?;
        Self::from_document(document)
    }

    /// Builds a configuration from an already-parsed JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigurationError> {
        let document: IndexDocument = serde_json::from_value(value)?;
        Self::from_document(document)
    }

    fn from_document(document: IndexDocument) -> Result<Self, ConfigurationError> {
        let mut config = Self::new();
        for (resource_type, params) in document.resources {
            config.add_resource_type(&resource_type);
            for (name, definition) in params {
                config.add_parameter(&resource_type, &name, definition)?;
            }
        }

        tracing::debug!(
            resource_types = config.params_by_type.len(),
            indexes = config.types_by_path.len(),
            "Loaded index configuration"
        );
        Ok(config)
    }

    /// Declares a resource type, adding its implicit `_id` index.
    pub fn add_resource_type(&mut self, resource_type: &str) {
        if self.params_by_type.contains_key(resource_type) {
            return;
        }
        let id = IndexDefinition::new(ID_PATH, IndexType::Token);
        self.types_by_path
            .insert(SearchPath::new(resource_type, ID_PATH), IndexType::Token);
        self.params_by_type
            .entry(resource_type.to_string())
            .or_default()
            .insert(ID_PARAMETER.to_string(), id);
    }

    /// Registers a search parameter.
    ///
    /// Two parameters may share a path only if they agree on its type.
    pub fn add_parameter(
        &mut self,
        resource_type: &str,
        name: &str,
        definition: IndexDefinition,
    ) -> Result<(), ConfigurationError> {
        if definition.path.is_empty() {
            return Err(ConfigurationError::InvalidIndexConfig {
                message: format!("parameter {}.{} has an empty path", resource_type, name),
            });
        }

        self.add_resource_type(resource_type);
        let search_path = SearchPath::new(resource_type, &definition.path);
        if let Some(existing) = self.types_by_path.get(&search_path) {
            if *existing != definition.index_type {
                return Err(ConfigurationError::InvalidIndexConfig {
                    message: format!(
                        "{} is indexed as both {} and {}",
                        search_path, existing, definition.index_type
                    ),
                });
            }
        }

        self.types_by_path
            .insert(search_path, definition.index_type);
        self.params_by_type
            .entry(resource_type.to_string())
            .or_default()
            .insert(name.to_string(), definition);
        Ok(())
    }

    /// Returns true if the resource type is configured.
    pub fn has_resource_type(&self, resource_type: &str) -> bool {
        self.params_by_type.contains_key(resource_type)
    }

    /// Returns all configured resource types.
    pub fn resource_types(&self) -> Vec<&str> {
        self.params_by_type.keys().map(String::as_str).collect()
    }

    /// Gets a parameter definition by resource type and name.
    pub fn parameter(&self, resource_type: &str, name: &str) -> Option<&IndexDefinition> {
        self.params_by_type
            .get(resource_type)
            .and_then(|params| params.get(name))
    }

    /// Gets the index type configured at a search path.
    pub fn index_type(&self, path: &SearchPath) -> Option<IndexType> {
        self.types_by_path.get(path).copied()
    }

    /// Fails unless the resource type is configured.
    pub fn require_resource_type(&self, resource_type: &str) -> Result<(), ConfigurationError> {
        if self.has_resource_type(resource_type) {
            Ok(())
        } else {
            Err(ConfigurationError::UnknownResourceType {
                resource_type: resource_type.to_string(),
            })
        }
    }

    /// Resolves a parameter name to its search path and index type.
    pub fn resolve(
        &self,
        resource_type: &str,
        name: &str,
    ) -> Result<(SearchPath, IndexType), ConfigurationError> {
        self.require_resource_type(resource_type)?;
        let definition = self.parameter(resource_type, name).ok_or_else(|| {
            ConfigurationError::UnknownParameter {
                resource_type: resource_type.to_string(),
                parameter: name.to_string(),
            }
        })?;
        Ok((
            SearchPath::new(resource_type, &definition.path),
            definition.index_type,
        ))
    }

    /// Checks that a path is indexed with one of the expected types and
    /// returns the configured type.
    pub fn require(
        &self,
        path: &SearchPath,
        expected: &[IndexType],
    ) -> Result<IndexType, ConfigurationError> {
        self.require_resource_type(path.resource())?;
        let actual =
            self.index_type(path)
                .ok_or_else(|| ConfigurationError::UnknownSearchPath {
                    resource: path.resource().to_string(),
                    path: path.path().to_string(),
                })?;

        if expected.contains(&actual) {
            Ok(actual)
        } else {
            Err(ConfigurationError::IndexTypeMismatch {
                resource: path.resource().to_string(),
                path: path.path().to_string(),
                expected: expected
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("|"),
                actual: actual.to_string(),
            })
        }
    }
}
