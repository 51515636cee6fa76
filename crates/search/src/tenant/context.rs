//! Tenant context for engine operations.

use std::sync::Arc;

use super::id::TenantId;
use super::permissions::{Operation, TenantPermissions};
use crate::error::TenantError;

/// A tenant context required by every engine operation.
///
/// The context is cheap to clone; permissions are shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct TenantContext {
    tenant_id: TenantId,
    permissions: Arc<TenantPermissions>,
    /// Optional correlation ID for request tracing.
    correlation_id: Option<String>,
}

impl TenantContext {
    /// Creates a new tenant context with the given ID and permissions.
    pub fn new(tenant_id: TenantId, permissions: TenantPermissions) -> Self {
        Self {
            tenant_id,
            permissions: Arc::new(permissions),
            correlation_id: None,
        }
    }

    /// Sets the correlation ID used in log output.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Returns the tenant ID.
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Returns the permissions for this context.
    pub fn permissions(&self) -> &TenantPermissions {
        &self.permissions
    }

    /// Returns the correlation ID, if set.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Checks if the given operation is permitted on the given resource type.
    pub fn check_permission(
        &self,
        operation: Operation,
        resource_type: &str,
    ) -> Result<(), TenantError> {
        if self.permissions.can_perform(operation, resource_type) {
            Ok(())
        } else {
            Err(TenantError::OperationNotPermitted {
                tenant_id: self.tenant_id.clone(),
                operation: operation.to_string(),
                resource_type: resource_type.to_string(),
            })
        }
    }
}
