//! Per-tenant index configuration registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::config::IndexConfig;
use crate::error::TenantError;
use crate::tenant::TenantId;

/// Holds the index configuration of every tenant.
///
/// Lookups fall back from a tenant to its ancestors and finally to the default
/// configuration, if one was set. Configurations are swapped atomically as
/// whole `Arc`s, so readers never see a half-updated configuration.
pub struct TenantIndexRegistry {
    default: Option<Arc<IndexConfig>>,
    tenants: RwLock<HashMap<TenantId, Arc<IndexConfig>>>,
}

impl TenantIndexRegistry {
    /// Creates a registry without a default configuration.
    pub fn new() -> Self {
        Self {
            default: None,
            tenants: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a registry whose tenants fall back to `default`.
    pub fn with_default(default: IndexConfig) -> Self {
        Self {
            default: Some(Arc::new(default)),
            tenants: RwLock::new(HashMap::new()),
        }
    }

    /// Registers or replaces a tenant's configuration.
    pub fn register(&self, tenant_id: TenantId, config: IndexConfig) {
        tracing::info!(tenant = %tenant_id, "Registered index configuration");
        self.tenants.write().insert(tenant_id, Arc::new(config));
    }

    /// Removes a tenant's configuration, returning it if present.
    pub fn unregister(&self, tenant_id: &TenantId) -> Option<Arc<IndexConfig>> {
        self.tenants.write().remove(tenant_id)
    }

    /// Returns the configuration that applies to a tenant.
    pub fn for_tenant(&self, tenant_id: &TenantId) -> Result<Arc<IndexConfig>, TenantError> {
        let tenants = self.tenants.read();
        let mut current = Some(tenant_id.clone());
        while let Some(id) = current {
            if let Some(config) = tenants.get(&id) {
                return Ok(Arc::clone(config));
            }
            current = id.parent();
        }

        self.default
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| TenantError::UnknownTenant {
                tenant_id: tenant_id.clone(),
            })
    }

    /// Returns the number of tenant-specific configurations.
    pub fn len(&self) -> usize {
        self.tenants.read().len()
    }

    /// Returns true if no tenant-specific configuration is registered.
    pub fn is_empty(&self) -> bool {
        self.tenants.read().is_empty()
    }
}

impl Default for TenantIndexRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TenantIndexRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantIndexRegistry")
            .field("has_default", &self.default.is_some())
            .field("tenants", &self.tenants.read().keys().collect::<Vec<_>>())
            .finish()
    }
}
