//! Server-side state of an in-flight paged query.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::expression::SelectExpression;
use crate::tenant::TenantId;

/// What is known about the size of a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CountResult {
    /// Nothing is known.
    #[default]
    Unknown,
    /// The exact number of matches.
    Exact(u64),
    /// At least this many records match.
    AtLeast(u64),
}

impl CountResult {
    /// Returns the count if it is exact.
    pub fn exact(&self) -> Option<u64> {
        match self {
            CountResult::Exact(n) => Some(*n),
            CountResult::Unknown | CountResult::AtLeast(_) => None,
        }
    }

    /// Returns the lower bound on the number of matches.
    pub fn lower_bound(&self) -> u64 {
        match self {
            CountResult::Unknown => 0,
            CountResult::Exact(n) | CountResult::AtLeast(n) => *n,
        }
    }
}

/// Paging state of one query, keyed by `uuid`.
///
/// Created with the first page, updated on every following page and removed by
/// the expiry sweep. `seen_ids` holds the ids of the page that ended at
/// `last_id`; it is replaced, never grown, so its size is bounded by the page
/// size.
#[derive(Debug, Clone, PartialEq)]
pub struct PagingData {
    /// The resource type being searched.
    pub resource_type: String,
    /// The query being paged.
    pub select: SelectExpression,
    /// Page size of the run.
    pub page_size: u32,
    /// What is known about the result set size.
    pub size: CountResult,
    /// Unique id of this state.
    pub uuid: String,
    /// Id of the last record served.
    pub last_id: String,
    /// Last access time, in milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Ids served on the page that ended at `last_id`.
    pub seen_ids: HashSet<String>,
    /// Tenant that owns this state.
    pub tenant_id: TenantId,
}

impl PagingData {
    /// Returns true if the state is older than `validity_ms` at `now_ms`.
    pub fn is_expired(&self, now_ms: i64, validity_ms: i64) -> bool {
        now_ms.saturating_sub(self.timestamp) > validity_ms
    }

    /// Records that the page ending at `last_id` was served.
    pub(crate) fn advance(&mut self, last_id: String, served: HashSet<String>, now_ms: i64) {
        self.last_id = last_id;
        self.seen_ids = served;
        self.timestamp = now_ms;
    }
}
