//! Tenant permission types.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Operations a tenant context may be allowed to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Read individual resources (used for `_include` resolution).
    Read,
    /// Search for resources.
    Search,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read => write!(f, "read"),
            Operation::Search => write!(f, "search"),
        }
    }
}

/// Permissions granted to a tenant context.
///
/// ```
/// use helios_search::tenant::{Operation, TenantPermissions};
///
/// let perms = TenantPermissions::builder()
///     .allow_operations(vec![Operation::Search])
///     .allow_resource_types(vec!["Patient"])
///     .build();
/// assert!(perms.can_perform(Operation::Search, "Patient"));
/// assert!(!perms.can_perform(Operation::Search, "Observation"));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantPermissions {
    /// Allowed operations. If None, all operations are allowed.
    allowed_operations: Option<HashSet<Operation>>,

    /// Allowed resource types. If None, all resource types are allowed.
    allowed_resource_types: Option<HashSet<String>>,
}

impl TenantPermissions {
    /// Creates permissions with full access to all operations and resource types.
    pub fn full_access() -> Self {
        Self::default()
    }

    /// Creates read-only permissions (read and search).
    pub fn read_only() -> Self {
        Self::builder()
            .allow_operations(vec![Operation::Read, Operation::Search])
            .build()
    }

    /// Creates a builder for custom permissions.
    pub fn builder() -> TenantPermissionsBuilder {
        TenantPermissionsBuilder::default()
    }

    /// Returns `true` if the given operation is permitted on the given resource type.
    pub fn can_perform(&self, operation: Operation, resource_type: &str) -> bool {
        if let Some(ref allowed_ops) = self.allowed_operations {
            if !allowed_ops.contains(&operation) {
                return false;
            }
        }

        if let Some(ref allowed_types) = self.allowed_resource_types {
            if !allowed_types.contains(resource_type) {
                return false;
            }
        }

        true
    }
}

/// Builder for creating custom tenant permissions.
#[derive(Debug, Default)]
pub struct TenantPermissionsBuilder {
    allowed_operations: Option<HashSet<Operation>>,
    allowed_resource_types: Option<HashSet<String>>,
}

impl TenantPermissionsBuilder {
    /// Restricts the permitted operations.
    pub fn allow_operations(mut self, operations: Vec<Operation>) -> Self {
        self.allowed_operations = Some(operations.into_iter().collect());
        self
    }

    /// Restricts the permitted resource types.
    pub fn allow_resource_types<S: Into<String>>(mut self, types: Vec<S>) -> Self {
        self.allowed_resource_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Builds the permissions.
    pub fn build(self) -> TenantPermissions {
        TenantPermissions {
            allowed_operations: self.allowed_operations,
            allowed_resource_types: self.allowed_resource_types,
        }
    }
}
