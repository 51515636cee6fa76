//! Tests for tenant isolation across configuration, data and cursors.

mod common;

use serde_json::json;

use helios_search::cursor::PagingStore;
use helios_search::error::{CursorError, EngineError, TenantError};
use helios_search::expression::build_expression;
use helios_search::index::{IndexConfig, TenantIndexRegistry};
use helios_search::tenant::{Operation, TenantContext, TenantId, TenantPermissions};

use common::{Harness, create_tenant, index_config, params};

// ============================================================================
// Index Configuration
// ============================================================================

/// Each tenant resolves parameters through its own configuration.
#[test]
fn test_per_tenant_index_config() {
    let registry = TenantIndexRegistry::new();
    registry.register(TenantId::new("acme"), index_config());
    registry.register(
        TenantId::new("globex"),
        IndexConfig::from_value(json!({
            "resources": { "Patient": { "nickname": { "path": "name.given", "type": "string" } } }
        }))
        .unwrap(),
    );

    let acme = create_tenant("acme");
    let globex = create_tenant("globex");
    let acme_config = registry.for_tenant(acme.tenant_id()).unwrap();
    let globex_config = registry.for_tenant(globex.tenant_id()).unwrap();

    let nickname = params(&[("nickname", "Jo")]);
    assert!(build_expression(&globex, "Patient", &nickname, &globex_config).is_ok());
    assert!(build_expression(&acme, "Patient", &nickname, &acme_config).is_err());

    let gender = params(&[("gender", "female")]);
    assert!(build_expression(&acme, "Patient", &gender, &acme_config).is_ok());
    assert!(build_expression(&globex, "Patient", &gender, &globex_config).is_err());
}

/// Nested tenants inherit their parent's configuration; unknown tenants are
/// reported as such.
#[test]
fn test_registry_fallback() {
    let registry = TenantIndexRegistry::new();
    registry.register(TenantId::new("acme"), index_config());

    assert!(registry.for_tenant(&TenantId::new("acme/research")).is_ok());

    let err: EngineError = registry
        .for_tenant(&TenantId::new("initech"))
        .unwrap_err()
        .into();
    assert!(matches!(err, EngineError::Tenant(TenantError::UnknownTenant { .. })));
    assert_eq!(err.status_code(), 404);

    let registry = TenantIndexRegistry::with_default(index_config());
    assert!(registry.for_tenant(&TenantId::new("initech")).is_ok());
}

// ============================================================================
// Data and Cursor Isolation
// ============================================================================

/// A tenant never sees another tenant's records.
#[test]
fn test_data_isolation() {
    tokio_test::block_on(async {
        let harness = Harness::new();
        let acme = create_tenant("acme");
        let globex = create_tenant("globex");
        harness.seed_patients(&acme, 3);
        harness.seed_patients(&globex, 1);

        let acme_page = harness
            .manager
            .first_page(&acme, harness.select(&acme, "Patient", &[]), 10)
            .await
            .unwrap();
        let globex_page = harness
            .manager
            .first_page(&globex, harness.select(&globex, "Patient", &[]), 10)
            .await
            .unwrap();

        assert_eq!(acme_page.ids.len(), 3);
        assert_eq!(globex_page.ids.len(), 1);
    });
}

/// A cursor issued to one tenant is rejected for another, and the owner can
/// still use it afterwards.
#[test]
fn test_cursor_bound_to_tenant() {
    tokio_test::block_on(async {
        let harness = Harness::new();
        let acme = create_tenant("acme");
        let globex = create_tenant("globex");
        harness.seed_patients(&acme, 5);
        harness.seed_patients(&globex, 5);

        let select = harness.select(&acme, "Patient", &[]);
        let cursor = harness
            .manager
            .first_page(&acme, select, 2)
            .await
            .unwrap()
            .next_cursor
            .unwrap();

        let err = harness.manager.next_page(&globex, &cursor).await.unwrap_err();
        assert!(matches!(err, EngineError::Cursor(CursorError::InvalidLink)));
        assert_eq!(harness.store.len().await.unwrap(), 1);

        let page = harness.manager.next_page(&acme, &cursor).await.unwrap();
        assert_eq!(page.ids.len(), 2);
    });
}

// ============================================================================
// Permissions
// ============================================================================

/// Searching requires the search permission on the resource type.
#[test]
fn test_search_permission() {
    tokio_test::block_on(async {
        let harness = Harness::new();
        let restricted = TenantContext::new(
            TenantId::new("acme"),
            TenantPermissions::builder()
                .allow_operations(vec![Operation::Search])
                .allow_resource_types(vec!["Patient"])
                .build(),
        );

        let err = build_expression(
            &restricted,
            "Observation",
            &params(&[]),
            &harness.config,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Tenant(TenantError::OperationNotPermitted { .. })
        ));
        assert_eq!(err.status_code(), 403);

        let admin = create_tenant("acme");
        let select = harness.select(&admin, "Observation", &[]);
        let err = harness
            .manager
            .first_page(&restricted, select, 10)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
    });
}

/// Losing the search permission mid-run blocks the following pages.
#[test]
fn test_permission_checked_on_every_page() {
    tokio_test::block_on(async {
        let harness = Harness::new();
        let admin = create_tenant("acme");
        harness.seed_patients(&admin, 5);

        let select = harness.select(&admin, "Patient", &[]);
        let cursor = harness
            .manager
            .first_page(&admin, select, 2)
            .await
            .unwrap()
            .next_cursor
            .unwrap();

        let reader = TenantContext::new(
            TenantId::new("acme"),
            TenantPermissions::builder()
                .allow_operations(vec![Operation::Read])
                .build(),
        );
        let err = harness.manager.next_page(&reader, &cursor).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Tenant(TenantError::OperationNotPermitted { .. })
        ));
    });
}

/// Included records are dropped when the tenant may not read their type.
#[test]
fn test_includes_require_read_permission() {
    tokio_test::block_on(async {
        let harness = Harness::new();
        let admin = create_tenant("acme");
        harness
            .storage
            .create(&admin, "Organization", json!({ "id": "o1", "name": "Acme" }));
        harness.storage.create(
            &admin,
            "Patient",
            json!({ "id": "p1", "managingOrganization": { "reference": "Organization/o1" } }),
        );
        let select = harness.select(&admin, "Patient", &[("_include", "Patient:organization")]);

        let page = harness
            .manager
            .first_page(&admin, select.clone(), 10)
            .await
            .unwrap();
        assert_eq!(page.included, vec!["Organization/o1".to_string()]);

        let patients_only = TenantContext::new(
            TenantId::new("acme"),
            TenantPermissions::builder()
                .allow_operations(vec![Operation::Search, Operation::Read])
                .allow_resource_types(vec!["Patient"])
                .build(),
        );
        let page = harness
            .manager
            .first_page(&patients_only, select, 10)
            .await
            .unwrap();
        assert_eq!(page.ids, vec!["p1".to_string()]);
        assert!(page.included.is_empty());
    });
}
