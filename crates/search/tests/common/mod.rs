//! Shared fixtures for the search engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Notify;

use helios_search::backends::memory::InMemorySearchStorage;
use helios_search::config::PagingConfig;
use helios_search::core::SearchStorage;
use helios_search::cursor::{InMemoryPagingStore, ManualClock, NextUrlManager, SearchPage};
use helios_search::error::EngineResult;
use helios_search::expression::{Expression, IncludeExpression, SelectExpression, build_expression};
use helios_search::hooks::HookRegistry;
use helios_search::index::IndexConfig;
use helios_search::tenant::{TenantContext, TenantId, TenantPermissions};

/// Start time of every manual clock, 2024-01-01T00:00:00Z.
pub const EPOCH_MS: i64 = 1_704_067_200_000;

/// Link validity used by the harness.
pub const LINK_VALIDITY: Duration = Duration::from_secs(60);

/// Index configuration covering patients, observations and organizations.
pub fn index_config() -> IndexConfig {
    IndexConfig::from_value(json!({
        "resources": {
            "Patient": {
                "name": { "path": "name.family", "type": "string" },
                "given": { "path": "name.given", "type": "string" },
                "gender": { "path": "gender", "type": "token" },
                "identifier": { "path": "identifier", "type": "token" },
                "birthdate": { "path": "birthDate", "type": "date" },
                "organization": { "path": "managingOrganization", "type": "reference" }
            },
            "Observation": {
                "subject": { "path": "subject", "type": "reference" },
                "code": { "path": "code", "type": "token" },
                "value-quantity": { "path": "valueQuantity", "type": "quantity" },
                "date": { "path": "effectiveDateTime", "type": "date" }
            },
            "Organization": {
                "name": { "path": "name", "type": "string" }
            }
        }
    }))
    .expect("index configuration should parse")
}

/// Creates a tenant context with full access.
pub fn create_tenant(id: &str) -> TenantContext {
    TenantContext::new(TenantId::new(id), TenantPermissions::full_access())
}

/// Converts string pairs into query parameters.
pub fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

/// A patient document.
pub fn patient(id: &str, family: &str, gender: &str) -> Value {
    json!({
        "id": id,
        "name": [{ "family": family, "given": ["Test"] }],
        "gender": gender
    })
}

/// An observation about `patient_id`.
pub fn observation(id: &str, patient_id: &str, code: &str, value: f64) -> Value {
    json!({
        "id": id,
        "subject": { "reference": format!("Patient/{}", patient_id) },
        "code": { "coding": [{ "system": "http://loinc.org", "code": code }] },
        "valueQuantity": { "value": value, "unit": "mg" },
        "effectiveDateTime": "2024-03-01T10:00:00Z"
    })
}

/// A storage, paging store and manager wired together around a manual clock.
pub struct Harness {
    pub storage: Arc<InMemorySearchStorage>,
    pub store: Arc<InMemoryPagingStore>,
    pub clock: Arc<ManualClock>,
    pub manager: Arc<NextUrlManager>,
    pub config: IndexConfig,
}

impl Harness {
    /// Creates a harness without hooks.
    pub fn new() -> Self {
        Self::with_hooks(HookRegistry::empty())
    }

    /// Creates a harness whose manager notifies `hooks`.
    pub fn with_hooks(hooks: HookRegistry) -> Self {
        Self::build(paging_config(), hooks)
    }

    /// Creates a harness with custom paging settings.
    pub fn build(paging: PagingConfig, hooks: HookRegistry) -> Self {
        let storage = Arc::new(InMemorySearchStorage::new());
        Self::assemble(paging, hooks, storage.clone(), storage)
    }

    /// Creates a harness whose manager queries through `wrap(storage)`.
    ///
    /// Records are still seeded into the in-memory storage directly.
    pub fn wrapping<S, F>(wrap: F) -> (Self, Arc<S>)
    where
        S: SearchStorage + 'static,
        F: FnOnce(Arc<InMemorySearchStorage>) -> S,
    {
        let storage = Arc::new(InMemorySearchStorage::new());
        let backend = Arc::new(wrap(storage.clone()));
        let harness = Self::assemble(
            paging_config(),
            HookRegistry::empty(),
            storage,
            backend.clone(),
        );
        (harness, backend)
    }

    fn assemble(
        paging: PagingConfig,
        hooks: HookRegistry,
        storage: Arc<InMemorySearchStorage>,
        backend: Arc<dyn SearchStorage>,
    ) -> Self {
        let store = Arc::new(InMemoryPagingStore::new());
        let clock = Arc::new(ManualClock::new(EPOCH_MS));
        let manager = NextUrlManager::new(backend, store.clone(), paging)
            .expect("paging configuration should be valid")
            .with_clock(clock.clone())
            .with_hooks(hooks);

        Self {
            storage,
            store,
            clock,
            manager: Arc::new(manager),
            config: index_config(),
        }
    }

    /// Stores `count` female patients with ids `p000`, `p001`, ...
    pub fn seed_patients(&self, tenant: &TenantContext, count: usize) -> Vec<String> {
        (0..count)
            .map(|i| {
                self.storage.create(
                    tenant,
                    "Patient",
                    patient(&format!("p{:03}", i), "Smith", "female"),
                )
            })
            .collect()
    }

    /// Builds a query from string pairs.
    pub fn select(
        &self,
        tenant: &TenantContext,
        resource_type: &str,
        pairs: &[(&str, &str)],
    ) -> SelectExpression {
        build_expression(tenant, resource_type, &params(pairs), &self.config)
            .expect("query should build")
    }

    /// Follows cursors from `first` until the results are exhausted and
    /// returns every page.
    pub async fn drain(&self, tenant: &TenantContext, first: SearchPage) -> Vec<SearchPage> {
        let mut pages = vec![first];
        while let Some(cursor) = pages.last().and_then(|p| p.next_cursor.clone()) {
            let page = self
                .manager
                .next_page(tenant, &cursor)
                .await
                .expect("next page should load");
            pages.push(page);
        }
        pages
    }
}

/// Paging settings with a hex key and a short link validity.
pub fn paging_config() -> PagingConfig {
    PagingConfig {
        link_validity: LINK_VALIDITY,
        cursor_key: Some("00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff".to_string()),
        ..PagingConfig::default()
    }
}

/// Flattens the ids of every page in order.
pub fn all_ids(pages: &[SearchPage]) -> Vec<String> {
    pages.iter().flat_map(|p| p.ids.iter().cloned()).collect()
}

// ============================================================================
// Storage Collaborators
// ============================================================================

/// Storage that starts each continuation query `overlap` records early, so
/// the tail of the previous page comes back again.
pub struct OverlappingStorage {
    inner: Arc<InMemorySearchStorage>,
    overlap: usize,
}

impl OverlappingStorage {
    pub fn new(inner: Arc<InMemorySearchStorage>, overlap: usize) -> Self {
        Self { inner, overlap }
    }
}

#[async_trait]
impl SearchStorage for OverlappingStorage {
    fn backend_name(&self) -> &'static str {
        "overlapping"
    }

    async fn current_revision(&self, tenant: &TenantContext) -> EngineResult<i64> {
        self.inner.current_revision(tenant).await
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
        let all = self
            .inner
            .execute_query(tenant, resource_type, root, revision_ceiling, None, usize::MAX)
            .await?;
        let start = match after_id {
            Some(id) => all
                .iter()
                .position(|candidate| candidate == id)
                .map_or(all.len(), |boundary| (boundary + 1).saturating_sub(self.overlap)),
            None => 0,
        };
        Ok(all.into_iter().skip(start).take(limit).collect())
    }

    async fn count_matching(
        &self,
        tenant: &TenantContext,
        resource_type: &str,
        root: &Expression,
        revision_ceiling: i64,
    ) -> EngineResult<i64> {
        self.inner
            .count_matching(tenant, resource_type, root, revision_ceiling)
            .await
    }

    async fn resolve_includes(
        &self,
        tenant: &TenantContext,
        includes: &[&IncludeExpression],
        ids: &[String],
        revision_ceiling: i64,
    ) -> EngineResult<Vec<String>> {
        self.inner
            .resolve_includes(tenant, includes, ids, revision_ceiling)
            .await
    }
}

/// Storage that, once armed, holds the next query until released.
pub struct GatedStorage {
    inner: Arc<InMemorySearchStorage>,
    armed: AtomicBool,
    /// Notified when an armed query starts waiting.
    pub reached: Notify,
    /// Releases the waiting query.
    pub resume: Notify,
}

impl GatedStorage {
    pub fn new(inner: Arc<InMemorySearchStorage>) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(false),
            reached: Notify::new(),
            resume: Notify::new(),
        }
    }

    /// Makes the next query wait for [`GatedStorage::resume`].
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SearchStorage for GatedStorage {
    fn backend_name(&self) -> &'static str {
        "gated"
    }

    async fn current_revision(&self, tenant: &TenantContext) -> EngineResult<i64> {
        self.inner.current_revision(tenant).await
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
        if self.armed.swap(false, Ordering::SeqCst) {
            self.reached.notify_one();
            self.resume.notified().await;
        }
        self.inner
            .execute_query(tenant, resource_type, root, revision_ceiling, after_id, limit)
            .await
    }

    async fn count_matching(
        &self,
        tenant: &TenantContext,
        resource_type: &str,
        root: &Expression,
        revision_ceiling: i64,
    ) -> EngineResult<i64> {
        self.inner
            .count_matching(tenant, resource_type, root, revision_ceiling)
            .await
    }
}

/// Storage that reports a fixed total regardless of the data.
pub struct MiscountingStorage {
    inner: Arc<InMemorySearchStorage>,
    count: i64,
}

impl MiscountingStorage {
    pub fn new(inner: Arc<InMemorySearchStorage>, count: i64) -> Self {
        Self { inner, count }
    }
}

#[async_trait]
impl SearchStorage for MiscountingStorage {
    fn backend_name(&self) -> &'static str {
        "miscounting"
    }

    async fn current_revision(&self, tenant: &TenantContext) -> EngineResult<i64> {
        self.inner.current_revision(tenant).await
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
        self.inner
            .execute_query(tenant, resource_type, root, revision_ceiling, after_id, limit)
            .await
    }

    async fn count_matching(
        &self,
        _tenant: &TenantContext,
        _resource_type: &str,
        _root: &Expression,
        _revision_ceiling: i64,
    ) -> EngineResult<i64> {
        Ok(self.count)
    }
}
