//! Helios FHIR Server Search Engine
//!
//! This crate turns FHIR search parameters into a typed expression tree,
//! executes it against a storage backend and pages through the results with
//! encrypted continuation cursors. Paging is revision-consistent: every page
//! of a run is evaluated against the storage revision taken when the first
//! page was served, so concurrent writes never shift or duplicate results.
//!
//! # Architecture
//!
//! - [`tenant`] - Tenant identity and permissions, passed explicitly to every call
//! - [`index`] - Per-tenant index configuration that leaves are validated against
//! - [`expression`] - The expression tree, its factory, the query builder and the codec
//! - [`core`] - The storage trait the engine executes queries through
//! - [`cursor`] - Paging state, cursor encryption and the expiry sweep
//! - [`hooks`] - Typed notifications for paging events
//! - [`backends`] - Storage implementations
//! - [`config`] - Paging configuration
//! - [`error`] - Error types for all operations
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use helios_search::backends::memory::InMemorySearchStorage;
//! use helios_search::config::PagingConfig;
//! use helios_search::cursor::{InMemoryPagingStore, NextUrlManager};
//! use helios_search::expression::{build_expression, page_size_from};
//! use helios_search::index::IndexConfig;
//! use helios_search::tenant::{TenantContext, TenantId, TenantPermissions};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let config = IndexConfig::from_value(json!({
//!     "resources": { "Patient": { "gender": { "path": "gender", "type": "token" } } }
//! })).unwrap();
//! let tenant = TenantContext::new(TenantId::new("acme"), TenantPermissions::full_access());
//!
//! let storage = Arc::new(InMemorySearchStorage::new());
//! for _ in 0..3 {
//!     storage.create(&tenant, "Patient", json!({ "gender": "female" }));
//! }
//!
//! let paging = PagingConfig::default();
//! let manager = NextUrlManager::new(storage, Arc::new(InMemoryPagingStore::new()), paging.clone())
//!     .unwrap();
//!
//! let params = vec![
//!     ("gender".to_string(), "female".to_string()),
//!     ("_count".to_string(), "2".to_string()),
//! ];
//! let select = build_expression(&tenant, "Patient", &params, &config).unwrap();
//! let page_size = page_size_from(&params, &paging).unwrap();
//!
//! let first = manager.first_page(&tenant, select, page_size).await.unwrap();
//! assert_eq!(first.ids.len(), 2);
//!
//! let cursor = first.next_cursor.unwrap();
//! let second = manager.next_page(&tenant, &cursor).await.unwrap();
//! assert_eq!(second.ids.len(), 1);
//! assert!(second.next_cursor.is_none());
//! # });
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod config;
pub mod core;
pub mod cursor;
pub mod error;
pub mod expression;
pub mod hooks;
pub mod index;
pub mod tenant;

// Re-export commonly used types at crate root
pub use config::PagingConfig;
pub use error::{EngineError, EngineResult};
pub use expression::{Expression, ExpressionFactory, SelectExpression};
pub use index::{IndexConfig, SearchPath};
pub use tenant::{TenantContext, TenantId, TenantPermissions};

// Re-export core traits
pub use core::SearchStorage;
pub use cursor::{NextUrlManager, PagingStore};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
