//! Tenant identity and permissions.
//!
//! Every engine entry point takes a [`TenantContext`] explicitly. There is no
//! ambient "current tenant": the context is threaded through expression
//! building, cursor resolution and storage calls, so each function can be
//! exercised in isolation.
//!
//! ```
//! use helios_search::tenant::{Operation, TenantContext, TenantId, TenantPermissions};
//!
//! let ctx = TenantContext::new(TenantId::new("acme"), TenantPermissions::read_only());
//! assert!(ctx.check_permission(Operation::Search, "Patient").is_ok());
//! ```

mod context;
mod id;
mod permissions;

pub use context::TenantContext;
pub use id::TenantId;
pub use permissions::{Operation, TenantPermissions, TenantPermissionsBuilder};
