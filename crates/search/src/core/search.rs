//! Storage-side execution of search expressions.

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::expression::{Expression, IncludeExpression};
use crate::tenant::TenantContext;

/// Executes expression trees against stored records.
///
/// Every record carries the revision at which it was written. A backend orders
/// matches by a stable key (write order, then id) and must never return a
/// record written after `revision_ceiling`, which is what keeps a paging run
/// stable while other clients write.
///
/// Errors are propagated to the caller unchanged.
#[async_trait]
pub trait SearchStorage: Send + Sync {
    /// Returns a short name for this backend, used in logs.
    fn backend_name(&self) -> &'static str;

    /// Returns the highest revision visible to the tenant right now.
    async fn current_revision(&self, tenant: &TenantContext) -> EngineResult<i64>;

    /// Returns up to `limit` ids of `resource_type` records matching `root`,
    /// in stable order, starting after `after_id` when given.
    async fn execute_query(
        &self,
        tenant: &TenantContext,
        resource_type: &str,
        root: &Expression,
        revision_ceiling: i64,
        after_id: Option<&str>,
        limit: usize,
    ) -> EngineResult<Vec<String>>;

    /// Counts every record matching `root`.
    async fn count_matching(
        &self,
        tenant: &TenantContext,
        resource_type: &str,
        root: &Expression,
        revision_ceiling: i64,
    ) -> EngineResult<i64>;

    /// Resolves include directives for the given matches, returning the
    /// `Type/id` literals of the linked records.
    async fn resolve_includes(
        &self,
        _tenant: &TenantContext,
        _includes: &[&IncludeExpression],
        _ids: &[String],
        _revision_ceiling: i64,
    ) -> EngineResult<Vec<String>> {
        Ok(Vec::new())
    }
}
