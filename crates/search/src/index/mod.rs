//! Index configuration.
//!
//! An [`IndexConfig`] describes, for one tenant, which resource types exist and
//! which search parameters are indexed at which field path with which type. The
//! expression factory resolves every leaf through it, so a query can never name
//! a path the storage layer was not told to index.

mod config;
mod path;
mod registry;

pub use config::{IndexConfig, IndexDefinition, IndexType};
pub use path::SearchPath;
pub use registry::TenantIndexRegistry;
