//! Issuing and resolving continuation cursors.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use uuid::Uuid;

use super::context::{CursorPayload, SearchContext};
use super::encrypter::CursorEncrypter;
use super::paging::{CountResult, PagingData};
use super::store::PagingStore;
use crate::config::PagingConfig;
use crate::core::SearchStorage;
use crate::error::{BackendError, ConfigurationError, CursorError, EngineResult};
use crate::expression::{SelectExpression, TotalMode};
use crate::hooks::{CursorIssued, HookRegistry, PageServed, PagingExpired};
use crate::tenant::{Operation, TenantContext};

/// Source of the current time, in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now_millis(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Creates a clock reading `start_ms`.
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(duration_millis(by), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    /// Ids of the matches on this page, in stable order.
    pub ids: Vec<String>,
    /// `Type/id` literals of included records.
    pub included: Vec<String>,
    /// What is known about the total number of matches.
    pub total: CountResult,
    /// Cursor for the next page, or `None` when the results are exhausted.
    pub next_cursor: Option<String>,
}

/// A cursor resolved against its paging state.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCursor {
    /// The stored paging state.
    pub paging: PagingData,
    /// Where the requested page starts.
    pub context: SearchContext,
}

/// Orchestrates paged searches.
///
/// The first page takes a revision snapshot from storage and embeds it in the
/// cursor, so later pages never see records written after the run started.
/// Paging state lives in a [`PagingStore`] until it is older than the configured
/// link validity.
pub struct NextUrlManager {
    storage: Arc<dyn SearchStorage>,
    store: Arc<dyn PagingStore>,
    encrypter: CursorEncrypter,
    config: PagingConfig,
    hooks: HookRegistry,
    clock: Arc<dyn Clock>,
}

impl NextUrlManager {
    /// Creates a manager.
    ///
    /// The configuration is validated first. The cursor key comes from
    /// `config.cursor_key`; without one a random key is generated.
    pub fn new(
        storage: Arc<dyn SearchStorage>,
        store: Arc<dyn PagingStore>,
        config: PagingConfig,
    ) -> Result<Self, ConfigurationError> {
        config
            .validate()
            .map_err(|errors| ConfigurationError::InvalidPagingConfig { errors })?;

        let encrypter = match config.cursor_key.as_deref() {
            Some(key) => CursorEncrypter::from_key_str(key)?,
            None => {
                tracing::warn!("No cursor key configured; cursors will not survive a restart");
                CursorEncrypter::generate()
            }
        };

        Ok(Self {
            storage,
            store,
            encrypter,
            config,
            hooks: HookRegistry::empty(),
            clock: Arc::new(SystemClock),
        })
    }

    /// Sets the hooks notified of paging events.
    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the paging configuration.
    pub fn config(&self) -> &PagingConfig {
        &self.config
    }

    /// Runs a query and returns its first page.
    pub async fn first_page(
        &self,
        tenant: &TenantContext,
        select: SelectExpression,
        page_size: u32,
    ) -> EngineResult<SearchPage> {
        let resource_type = select.resource_type().to_string();
        tenant.check_permission(Operation::Search, &resource_type)?;
        let page_size = page_size.clamp(1, self.config.max_page_size.max(1));

        let revision = self.storage.current_revision(tenant).await?;
        let mut ids = self
            .storage
            .execute_query(
                tenant,
                &resource_type,
                select.root(),
                revision,
                None,
                page_size as usize + 1,
            )
            .await?;
        let has_more = ids.len() > page_size as usize;
        ids.truncate(page_size as usize);

        let size = match select.total_mode() {
            TotalMode::None => CountResult::Unknown,
            TotalMode::BestEffort if has_more => CountResult::AtLeast(u64::from(page_size) + 1),
            TotalMode::BestEffort => CountResult::Exact(ids.len() as u64),
            TotalMode::Always => {
                let count = self
                    .storage
                    .count_matching(tenant, &resource_type, select.root(), revision)
                    .await?;
                let count = u64::try_from(count).map_err(|_| BackendError::QueryError {
                    message: format!(
                        "{} returned a negative count: {}",
                        self.storage.backend_name(),
                        count
                    ),
                })?;
                CountResult::Exact(count)
            }
        };

        let included = self.includes(tenant, &select, &ids, revision).await?;

        let mut uuid = None;
        let mut next_cursor = None;
        if let (true, Some(last_id)) = (has_more, ids.last()) {
            let paging = PagingData {
                resource_type: resource_type.clone(),
                select,
                page_size,
                size,
                uuid: Uuid::new_v4().to_string(),
                last_id: last_id.clone(),
                timestamp: self.clock.now_millis(),
                seen_ids: ids.iter().cloned().collect(),
                tenant_id: tenant.tenant_id().clone(),
            };
            let context = SearchContext::new(revision)
                .after(last_id.clone())
                .with_total(exact_total(size));
            next_cursor = Some(self.serialize_cursor(&paging, &context)?);
            self.store.insert(paging.clone()).await?;

            tracing::debug!(
                tenant = %tenant.tenant_id(),
                correlation_id = ?tenant.correlation_id(),
                uuid = %paging.uuid,
                resource_type = %resource_type,
                revision,
                "Issued paging cursor"
            );
            self.hooks.dispatch(&CursorIssued {
                tenant_id: tenant.tenant_id().clone(),
                uuid: paging.uuid.clone(),
                resource_type: resource_type.clone(),
            });
            uuid = Some(paging.uuid);
        }

        self.hooks.dispatch(&PageServed {
            tenant_id: tenant.tenant_id().clone(),
            uuid,
            resource_type,
            count: ids.len(),
            has_next: next_cursor.is_some(),
        });

        Ok(SearchPage {
            ids,
            included,
            total: size,
            next_cursor,
        })
    }

    /// Returns the page a cursor points at.
    pub async fn next_page(&self, tenant: &TenantContext, cursor: &str) -> EngineResult<SearchPage> {
        let ResolvedCursor { paging, context } = self.resolve_cursor(tenant, cursor).await?;
        tenant.check_permission(Operation::Search, &paging.resource_type)?;

        let page_size = paging.page_size as usize;
        let after_id = (!context.first_id.is_empty()).then_some(context.first_id.as_str());

        // The stored ids belong to the page ending at `last_id`; they only
        // overlap a page that starts at that same boundary.
        let no_overlap = HashSet::new();
        let skip = if context.first_id == paging.last_id {
            &paging.seen_ids
        } else {
            &no_overlap
        };

        let candidates = self
            .storage
            .execute_query(
                tenant,
                &paging.resource_type,
                paging.select.root(),
                context.revision,
                after_id,
                page_size + 1 + skip.len(),
            )
            .await?;
        let mut ids: Vec<String> = candidates
            .into_iter()
            .filter(|id| !skip.contains(id))
            .collect();
        let has_more = ids.len() > page_size;
        ids.truncate(page_size);

        let included = self
            .includes(tenant, &paging.select, &ids, context.revision)
            .await?;

        let mut next_cursor = None;
        if let Some(last_id) = ids.last() {
            let served: HashSet<String> = ids.iter().cloned().collect();
            let now = self.clock.now_millis();
            if !self
                .store
                .advance(&paging.uuid, last_id.clone(), served, now)
                .await?
            {
                return Err(CursorError::Expired {
                    uuid: paging.uuid.clone(),
                }
                .into());
            }
            if has_more {
                next_cursor = Some(self.serialize_cursor(&paging, &context.after(last_id.clone()))?);
            }
        }

        self.hooks.dispatch(&PageServed {
            tenant_id: tenant.tenant_id().clone(),
            uuid: Some(paging.uuid.clone()),
            resource_type: paging.resource_type.clone(),
            count: ids.len(),
            has_next: next_cursor.is_some(),
        });

        Ok(SearchPage {
            ids,
            included,
            total: paging.size,
            next_cursor,
        })
    }

    /// Encrypts a cursor for the page of `paging` that starts at `context`.
    pub fn serialize_cursor(
        &self,
        paging: &PagingData,
        context: &SearchContext,
    ) -> EngineResult<String> {
        let payload = CursorPayload {
            uuid: paging.uuid.clone(),
            tenant_id: paging.tenant_id.clone(),
            context: context.clone(),
            page_size: paging.page_size,
            select: paging.select.clone(),
        };
        self.encrypter.encrypt(&payload.encode())
    }

    /// Decrypts a cursor and looks up its paging state.
    ///
    /// Fails with [`CursorError::InvalidLink`] if the cursor was not issued by
    /// this server to this tenant, [`CursorError::Unreadable`] if its payload is
    /// corrupt, and [`CursorError::Expired`] if its paging state is gone or too
    /// old.
    pub async fn resolve_cursor(
        &self,
        tenant: &TenantContext,
        cursor: &str,
    ) -> EngineResult<ResolvedCursor> {
        let plaintext = self.encrypter.decrypt(cursor).inspect_err(|_| {
            tracing::warn!(
                tenant = %tenant.tenant_id(),
                correlation_id = ?tenant.correlation_id(),
                "Rejected cursor that failed to decrypt"
            );
        })?;
        let payload = CursorPayload::decode(&plaintext).inspect_err(|e| {
            tracing::warn!(
                tenant = %tenant.tenant_id(),
                correlation_id = ?tenant.correlation_id(),
                error = %e,
                "Rejected unreadable cursor"
            );
        })?;

        if &payload.tenant_id != tenant.tenant_id() {
            tracing::warn!(
                tenant = %tenant.tenant_id(),
                correlation_id = ?tenant.correlation_id(),
                issued_to = %payload.tenant_id,
                "Rejected cursor issued to another tenant"
            );
            return Err(CursorError::InvalidLink.into());
        }

        let expired = || CursorError::Expired {
            uuid: payload.uuid.clone(),
        };
        let paging = self.store.get(&payload.uuid).await?.ok_or_else(expired)?;

        if &paging.tenant_id != tenant.tenant_id() || paging.select != payload.select {
            return Err(CursorError::InvalidLink.into());
        }

        let validity = duration_millis(self.config.link_validity);
        if paging.is_expired(self.clock.now_millis(), validity) {
            if self.store.remove(&paging.uuid).await?.is_some() {
                self.hooks.dispatch(&PagingExpired {
                    uuid: paging.uuid.clone(),
                });
            }
            tracing::debug!(uuid = %paging.uuid, "Paging state expired");
            return Err(expired().into());
        }

        Ok(ResolvedCursor {
            paging,
            context: payload.context,
        })
    }

    /// Removes every paging state older than the link validity.
    ///
    /// Returns the number of records removed; running it again right away
    /// removes nothing.
    pub async fn sweep_expired(&self) -> EngineResult<usize> {
        let validity = duration_millis(self.config.link_validity);
        let cutoff = self.clock.now_millis().saturating_sub(validity);
        let removed = self.store.remove_expired(cutoff).await?;

        for uuid in &removed {
            self.hooks.dispatch(&PagingExpired { uuid: uuid.clone() });
        }
        if !removed.is_empty() {
            tracing::info!(removed = removed.len(), "Swept expired paging state");
        }
        Ok(removed.len())
    }

    async fn includes(
        &self,
        tenant: &TenantContext,
        select: &SelectExpression,
        ids: &[String],
        revision: i64,
    ) -> EngineResult<Vec<String>> {
        let includes = select.root().includes();
        if includes.is_empty() || ids.is_empty() {
            return Ok(Vec::new());
        }
        let included = self
            .storage
            .resolve_includes(tenant, &includes, ids, revision)
            .await?;

        // Linked records are only returned if the tenant may read their type.
        Ok(included
            .into_iter()
            .filter(|literal| {
                literal.split_once('/').is_some_and(|(resource_type, _)| {
                    tenant
                        .permissions()
                        .can_perform(Operation::Read, resource_type)
                })
            })
            .collect())
    }
}

impl std::fmt::Debug for NextUrlManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NextUrlManager")
            .field("backend", &self.storage.backend_name())
            .field("config", &self.config)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

fn exact_total(size: CountResult) -> Option<i64> {
    size.exact().and_then(|n| i64::try_from(n).ok())
}
