//! In-memory search storage.
//!
//! Keeps every version of every record per tenant, tagged with the tenant
//! revision at which it was written. Queries evaluate the expression tree
//! directly against the JSON content of the newest version at or below the
//! revision ceiling, so a paging run started at revision `r` keeps seeing the
//! data as it was at `r`.
//!
//! Records are ordered by first write, which gives the stable order paging
//! relies on. Updates keep a record in place; deletes leave a tombstone so the
//! record stays addressable as a paging boundary.
//!
//! ```
//! use helios_search::backends::memory::InMemorySearchStorage;
//! use helios_search::tenant::{TenantContext, TenantId, TenantPermissions};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let storage = InMemorySearchStorage::new();
//! let tenant = TenantContext::new(TenantId::new("acme"), TenantPermissions::full_access());
//! let id = storage.create(&tenant, "Patient", json!({ "gender": "female" }));
//! assert_eq!(storage.revision(&tenant), 1);
//! assert!(storage.read(&tenant, "Patient", &id).is_some());
//! # });
//! ```

mod matcher;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use crate::core::SearchStorage;
use crate::error::{BackendError, EngineResult};
use crate::expression::{Expression, IncludeExpression};
use crate::tenant::{TenantContext, TenantId};

use matcher::{Matcher, reference_literal, values_at};

/// One write of a record. `None` content marks a delete.
#[derive(Debug, Clone)]
struct Version {
    revision: i64,
    content: Option<Value>,
}

#[derive(Debug, Clone)]
struct StoredRecord {
    id: String,
    versions: Vec<Version>,
}

impl StoredRecord {
    /// Returns the content visible at `ceiling`.
    fn at(&self, ceiling: i64) -> Option<&Value> {
        self.versions
            .iter()
            .rev()
            .find(|v| v.revision <= ceiling)
            .and_then(|v| v.content.as_ref())
    }

    fn latest(&self) -> Option<&Value> {
        self.versions.last().and_then(|v| v.content.as_ref())
    }
}

#[derive(Debug, Default)]
struct TypeRecords {
    by_seq: BTreeMap<u64, StoredRecord>,
    seq_by_id: HashMap<String, u64>,
}

/// Records of one tenant.
#[derive(Debug, Default)]
pub(crate) struct TenantData {
    revision: i64,
    next_seq: u64,
    types: HashMap<String, TypeRecords>,
}

impl TenantData {
    /// Iterates over the records of a type visible at `ceiling`, in write order.
    pub(crate) fn visible<'a>(
        &'a self,
        resource_type: &str,
        ceiling: i64,
    ) -> impl Iterator<Item = (&'a str, &'a Value)> + 'a {
        self.types
            .get(resource_type)
            .into_iter()
            .flat_map(|records| records.by_seq.values())
            .filter_map(move |record| record.at(ceiling).map(|doc| (record.id.as_str(), doc)))
    }

    fn get(&self, resource_type: &str, id: &str) -> Option<&StoredRecord> {
        let records = self.types.get(resource_type)?;
        records.by_seq.get(records.seq_by_id.get(id)?)
    }

    /// Appends a version, creating the record if needed, and bumps the revision.
    fn write(&mut self, resource_type: &str, id: &str, content: Option<Value>) -> i64 {
        self.revision += 1;
        let revision = self.revision;
        let records = self.types.entry(resource_type.to_string()).or_default();
        let version = Version { revision, content };

        match records.seq_by_id.get(id) {
            Some(seq) => {
                if let Some(record) = records.by_seq.get_mut(seq) {
                    record.versions.push(version);
                }
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                records.seq_by_id.insert(id.to_string(), seq);
                records.by_seq.insert(
                    seq,
                    StoredRecord {
                        id: id.to_string(),
                        versions: vec![version],
                    },
                );
            }
        }
        revision
    }
}

/// Process-local [`SearchStorage`] over JSON documents.
#[derive(Debug, Default)]
pub struct InMemorySearchStorage {
    tenants: RwLock<HashMap<TenantId, TenantData>>,
}

impl InMemorySearchStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new record and returns its id.
    ///
    /// The id is taken from the document's `id` field, or generated when absent.
    pub fn create(&self, tenant: &TenantContext, resource_type: &str, mut doc: Value) -> String {
        let id = doc
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if let Value::Object(obj) = &mut doc {
            obj.insert("id".to_string(), Value::String(id.clone()));
            obj.insert(
                "resourceType".to_string(),
                Value::String(resource_type.to_string()),
            );
        }

        let revision = self
            .tenants
            .write()
            .entry(tenant.tenant_id().clone())
            .or_default()
            .write(resource_type, &id, Some(doc));
        tracing::trace!(tenant = %tenant.tenant_id(), resource_type, id = %id, revision, "Created record");
        id
    }

    /// Writes a new version of a record, creating it if it does not exist.
    /// Returns the revision of the write.
    pub fn update(&self, tenant: &TenantContext, resource_type: &str, id: &str, mut doc: Value) -> i64 {
        if let Value::Object(obj) = &mut doc {
            obj.insert("id".to_string(), Value::String(id.to_string()));
            obj.insert(
                "resourceType".to_string(),
                Value::String(resource_type.to_string()),
            );
        }
        self.tenants
            .write()
            .entry(tenant.tenant_id().clone())
            .or_default()
            .write(resource_type, id, Some(doc))
    }

    /// Deletes a record. Returns false if it did not exist.
    pub fn delete(&self, tenant: &TenantContext, resource_type: &str, id: &str) -> bool {
        let mut tenants = self.tenants.write();
        let Some(data) = tenants.get_mut(tenant.tenant_id()) else {
            return false;
        };
        if data.get(resource_type, id).and_then(StoredRecord::latest).is_none() {
            return false;
        }
        data.write(resource_type, id, None);
        true
    }

    /// Returns the current content of a record.
    pub fn read(&self, tenant: &TenantContext, resource_type: &str, id: &str) -> Option<Value> {
        self.tenants
            .read()
            .get(tenant.tenant_id())?
            .get(resource_type, id)?
            .latest()
            .cloned()
    }

    /// Returns the tenant's current revision; zero before the first write.
    pub fn revision(&self, tenant: &TenantContext) -> i64 {
        self.tenants
            .read()
            .get(tenant.tenant_id())
            .map_or(0, |data| data.revision)
    }

    fn matching_ids(
        data: &TenantData,
        resource_type: &str,
        root: &Expression,
        ceiling: i64,
        after_id: Option<&str>,
        limit: usize,
    ) -> EngineResult<Vec<String>> {
        let Some(records) = data.types.get(resource_type) else {
            return match after_id {
                Some(id) => Err(unknown_boundary(id)),
                None => Ok(Vec::new()),
            };
        };

        let start = match after_id {
            Some(id) => {
                let seq = records
                    .seq_by_id
                    .get(id)
                    .ok_or_else(|| unknown_boundary(id))?;
                Bound::Excluded(*seq)
            }
            None => Bound::Unbounded,
        };

        let matcher = Matcher {
            tenant: data,
            ceiling,
        };
        Ok(records
            .by_seq
            .range((start, Bound::Unbounded))
            .filter_map(|(_, record)| {
                let doc = record.at(ceiling)?;
                matcher
                    .matches(root, resource_type, &record.id, doc)
                    .then(|| record.id.clone())
            })
            .take(limit)
            .collect())
    }
}

fn unknown_boundary(id: &str) -> crate::error::EngineError {
    BackendError::QueryError {
        message: format!("paging boundary '{}' does not exist", id),
    }
    .into()
}

#[async_trait]
impl SearchStorage for InMemorySearchStorage {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn current_revision(&self, tenant: &TenantContext) -> EngineResult<i64> {
        Ok(self.revision(tenant))
    }

    async fn execute_query(
        &self,
        tenant: &TenantContext,
        resource_type: &str,
        root: &Expression,
        revision_ceiling: i64,
        after_id: Option<&str>,
        limit: usize,
    ) -> EngineResult<Vec<String>> {
        let tenants = self.tenants.read();
        let Some(data) = tenants.get(tenant.tenant_id()) else {
            return Ok(Vec::new());
        };
        Self::matching_ids(data, resource_type, root, revision_ceiling, after_id, limit)
    }

    async fn count_matching(
        &self,
        tenant: &TenantContext,
        resource_type: &str,
        root: &Expression,
        revision_ceiling: i64,
    ) -> EngineResult<i64> {
        let tenants = self.tenants.read();
        let Some(data) = tenants.get(tenant.tenant_id()) else {
            return Ok(0);
        };
        let ids = Self::matching_ids(
            data,
            resource_type,
            root,
            revision_ceiling,
            None,
            usize::MAX,
        )?;
        Ok(ids.len() as i64)
    }

    async fn resolve_includes(
        &self,
        tenant: &TenantContext,
        includes: &[&IncludeExpression],
        ids: &[String],
        revision_ceiling: i64,
    ) -> EngineResult<Vec<String>> {
        let tenants = self.tenants.read();
        let Some(data) = tenants.get(tenant.tenant_id()) else {
            return Ok(Vec::new());
        };

        let mut seen = HashSet::new();
        let mut included = Vec::new();
        for include in includes {
            let path = include.path();
            for id in ids {
                let Some(doc) = data
                    .get(path.resource(), id)
                    .and_then(|record| record.at(revision_ceiling))
                else {
                    continue;
                };
                for literal in values_at(doc, path).filter_map(reference_literal) {
                    let visible = literal.split_once('/').is_some_and(|(rt, target)| {
                        data.get(rt, target)
                            .and_then(|record| record.at(revision_ceiling))
                            .is_some()
                    });
                    if visible && seen.insert(literal.clone()) {
                        included.push(literal);
                    }
                }
            }
        }
        Ok(included)
    }
}
