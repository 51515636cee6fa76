//! Typed hooks for paging lifecycle events.
//!
//! Hooks are registered per event type through a [`HookRegistryBuilder`] when
//! the engine is assembled; the resulting [`HookRegistry`] is immutable.
//! Dispatch is synchronous and isolated: a hook that fails or panics is logged
//! and the remaining hooks still run.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::tenant::TenantId;

/// Error type for hook execution.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// Hook execution failed with a message.
    #[error("hook execution failed: {0}")]
    Execution(String),
}

impl HookError {
    /// Create an execution error from a string.
    pub fn execution(msg: impl Into<String>) -> Self {
        HookError::Execution(msg.into())
    }
}

/// A handler for events of type `E`.
pub trait Hook<E>: Send + Sync {
    /// Unique name for this hook (for logging).
    fn name(&self) -> &str;

    /// Handle an event. Should be quick and non-blocking.
    fn handle(&self, event: &E) -> Result<(), HookError>;
}

/// A cursor was issued for a new paging run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorIssued {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Id of the new paging state.
    pub uuid: String,
    /// Resource type searched.
    pub resource_type: String,
}

/// A page of results was served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageServed {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Paging state id, absent when the first page held every match.
    pub uuid: Option<String>,
    /// Resource type searched.
    pub resource_type: String,
    /// Number of matches on the page.
    pub count: usize,
    /// Whether a next cursor was returned.
    pub has_next: bool,
}

/// Paging state was removed because it expired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagingExpired {
    /// Id of the removed paging state.
    pub uuid: String,
}

type Handlers<E> = Vec<Arc<dyn Hook<E>>>;

/// Event types that can be dispatched through a [`HookRegistry`].
pub trait HookEvent: Sized + 'static {
    /// Event name used in logs.
    const NAME: &'static str;

    #[doc(hidden)]
    fn handlers(registry: &HookRegistry) -> &Handlers<Self>;

    #[doc(hidden)]
    fn handlers_mut(registry: &mut HookRegistry) -> &mut Handlers<Self>;
}

macro_rules! hook_event {
    ($event:ty, $field:ident, $name:literal) => {
        impl HookEvent for $event {
            const NAME: &'static str = $name;

            fn handlers(registry: &HookRegistry) -> &Handlers<Self> {
                &registry.$field
            }

            fn handlers_mut(registry: &mut HookRegistry) -> &mut Handlers<Self> {
                &mut registry.$field
            }
        }
    };
}

hook_event!(CursorIssued, cursor_issued, "cursor_issued");
hook_event!(PageServed, page_served, "page_served");
hook_event!(PagingExpired, paging_expired, "paging_expired");

/// Immutable set of hooks, one list per event type.
#[derive(Default, Clone)]
pub struct HookRegistry {
    cursor_issued: Handlers<CursorIssued>,
    page_served: Handlers<PageServed>,
    paging_expired: Handlers<PagingExpired>,
}

impl HookRegistry {
    /// Creates a builder.
    pub fn builder() -> HookRegistryBuilder {
        HookRegistryBuilder::default()
    }

    /// Creates a registry without hooks.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the number of hooks registered for `E`.
    pub fn hook_count<E: HookEvent>(&self) -> usize {
        E::handlers(self).len()
    }

    /// Runs every hook registered for the event's type, in registration order.
    pub fn dispatch<E: HookEvent>(&self, event: &E) {
        for hook in E::handlers(self) {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| hook.handle(event)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(hook = hook.name(), event = E::NAME, error = %e, "Hook failed");
                }
                Err(_) => {
                    tracing::warn!(hook = hook.name(), event = E::NAME, "Hook panicked");
                }
            }
        }
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("cursor_issued", &self.cursor_issued.len())
            .field("page_served", &self.page_served.len())
            .field("paging_expired", &self.paging_expired.len())
            .finish()
    }
}

/// Builder for [`HookRegistry`].
#[derive(Default)]
pub struct HookRegistryBuilder {
    registry: HookRegistry,
}

impl HookRegistryBuilder {
    /// Registers a hook for events of type `E`.
    pub fn register<E: HookEvent>(mut self, hook: Arc<dyn Hook<E>>) -> Self {
        tracing::debug!(hook = hook.name(), event = E::NAME, "Registered hook");
        E::handlers_mut(&mut self.registry).push(hook);
        self
    }

    /// Registers a closure for events of type `E`.
    pub fn on<E, F>(self, name: impl Into<String>, f: F) -> Self
    where
        E: HookEvent,
        F: Fn(&E) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.register::<E>(Arc::new(FnHook {
            name: name.into(),
            f,
        }))
    }

    /// Builds the registry.
    pub fn build(self) -> HookRegistry {
        self.registry
    }
}

struct FnHook<F> {
    name: String,
    f: F,
}

impl<E, F> Hook<E> for FnHook<F>
where
    F: Fn(&E) -> Result<(), HookError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, event: &E) -> Result<(), HookError> {
        (self.f)(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn expired(uuid: &str) -> PagingExpired {
        PagingExpired {
            uuid: uuid.to_string(),
        }
    }

    #[test]
    fn test_dispatch_by_event_type() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let registry = HookRegistry::builder()
            .on("record", move |e: &PagingExpired| {
                sink.lock().push(e.uuid.clone());
                Ok(())
            })
            .build();

        assert_eq!(registry.hook_count::<PagingExpired>(), 1);
        assert_eq!(registry.hook_count::<CursorIssued>(), 0);

        registry.dispatch(&expired("a"));
        registry.dispatch(&CursorIssued {
            tenant_id: TenantId::new("acme"),
            uuid: "b".to_string(),
            resource_type: "Patient".to_string(),
        });
        assert_eq!(*seen.lock(), vec!["a".to_string()]);
    }

    #[test]
    fn test_failing_hooks_are_isolated() {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let registry = HookRegistry::builder()
            .on("fails", |_: &PagingExpired| Err(HookError::execution("nope")))
            .on("panics", |_: &PagingExpired| -> Result<(), HookError> {
                panic!("hook bug")
            })
            .on("counts", move |_: &PagingExpired| {
                *counter.lock() += 1;
                Ok(())
            })
            .build();

        registry.dispatch(&expired("a"));
        assert_eq!(*calls.lock(), 1);
    }
}
