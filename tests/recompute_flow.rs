mod common;

use std::collections::BTreeMap;

use chrono::Duration;
use pretty_assertions::assert_eq;
use tokio_test::{assert_err, assert_ok};

use token_proxy_binder::error::AppError;
use token_proxy_binder::models::{EffectiveMode, MembershipInput};
use token_proxy_binder::services::{CapacityDiagnostics, CleanupOptions, RecomputeParams};

use common::*;

const THIRTY_MINUTES_MS: i64 = 30 * 60 * 1000;

fn params(pool_id: i64, max_slots: u32, strict: bool) -> RecomputeParams {
    RecomputeParams {
        pool_id,
        max_slots_per_endpoint: max_slots,
        strict,
    }
}

#[tokio::test]
async fn strict_shortfall_rejects_without_writing() {
    let h = harness().await;
    let pool = insert_pool(&h.db, "default").await;
    let endpoint = insert_endpoint(&h.db, "10.0.0.1", true, true).await;
    add_member(&h.db, pool, endpoint, 1.0).await;
    insert_credentials(&h.db, 5).await;

    let err = h
        .state
        .coordinator
        .recompute(params(pool, 2, true), None)
        .await
        .unwrap_err();

    match err {
        AppError::CapacityShortfall(diag) => assert_eq!(
            diag,
            CapacityDiagnostics {
                token_count: 5,
                endpoint_count: 1,
                max_slots_per_endpoint: 2,
                weight_sum: 1.0,
                capacity: 2,
            }
        ),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(primaries(&h.db, pool).await.is_empty());
    assert_eq!(audit_count(&h.db, "binding.recompute").await, 0);
}

#[tokio::test]
async fn lenient_recompute_reports_overflow() {
    let h = harness().await;
    let pool = insert_pool(&h.db, "default").await;
    let endpoint = insert_endpoint(&h.db, "10.0.0.1", true, true).await;
    add_member(&h.db, pool, endpoint, 1.0).await;
    insert_credentials(&h.db, 5).await;

    let outcome = assert_ok!(h.state.coordinator.recompute(params(pool, 2, false), None).await);

    assert_eq!(outcome.recomputed, 5);
    assert_eq!(outcome.over_capacity_assigned, 3);
    assert_eq!(outcome.capacity, 2);
    assert_eq!(outcome.token_count, 5);
    assert_eq!(outcome.endpoint_count, 1);
    assert!(!outcome.strict);

    let stored = primaries(&h.db, pool).await;
    assert_eq!(stored.len(), 5);
    assert!(stored.values().all(|p| *p == Some(endpoint)));
    assert_eq!(audit_count(&h.db, "binding.recompute").await, 1);
}

#[tokio::test]
async fn override_set_and_clear_switch_effective_mode() {
    let h = harness().await;
    let pool = insert_pool(&h.db, "default").await;
    let e10 = insert_endpoint(&h.db, "10.0.0.10", true, true).await;
    let e11 = insert_endpoint(&h.db, "10.0.0.11", true, true).await;
    add_member(&h.db, pool, e10, 1.0).await;
    add_member(&h.db, pool, e11, 1.0).await;
    let creds = insert_credentials(&h.db, 1).await;

    assert_ok!(h.state.coordinator.recompute(params(pool, 2, true), None).await);
    let binding = binding_id(&h.db, creds[0], pool).await;

    let outcome = assert_ok!(
        h.state
            .overrides
            .set_override(binding, e11, THIRTY_MINUTES_MS, Some("diagnostic"), Some("req-1"))
            .await
    );
    assert_eq!(outcome.override_endpoint_id, e11);
    assert_eq!(outcome.override_expires_at, start_time() + Duration::minutes(30));

    let views = h.state.registry.list_pool_bindings(pool, h.clock_now()).await.unwrap();
    assert_eq!(views[0].effective_mode, EffectiveMode::Override);
    assert_eq!(views[0].effective_endpoint_id, Some(e11));

    assert_ok!(h.state.overrides.clear_override(binding, None).await);

    let views = h.state.registry.list_pool_bindings(pool, h.clock_now()).await.unwrap();
    assert_eq!(views[0].effective_mode, EffectiveMode::Primary);
    assert_eq!(views[0].effective_endpoint_id, Some(e10));
    assert!(views[0].override_endpoint.is_none());

    let reason: Option<String> = sqlx::query_scalar(
        "SELECT json_extract(detail_json, '$.reason') FROM admin_audit WHERE action = 'binding.override.set'",
    )
    .fetch_one(&h.db)
    .await
    .unwrap();
    assert_eq!(reason.as_deref(), Some("diagnostic"));
}

#[tokio::test]
async fn strict_success_respects_slots_and_conserves_tokens() {
    let h = harness().await;
    let pool = insert_pool(&h.db, "weighted").await;
    let a = insert_endpoint(&h.db, "10.0.1.1", true, true).await;
    let b = insert_endpoint(&h.db, "10.0.1.2", true, true).await;
    let c = insert_endpoint(&h.db, "10.0.1.3", true, true).await;
    add_member(&h.db, pool, a, 0.5).await;
    add_member(&h.db, pool, b, 1.0).await;
    add_member(&h.db, pool, c, 2.5).await;
    insert_credentials(&h.db, 12).await;

    let outcome = assert_ok!(h.state.coordinator.recompute(params(pool, 4, true), None).await);
    assert_eq!(outcome.capacity, 16);
    assert_eq!(outcome.over_capacity_assigned, 0);

    let mut counts: BTreeMap<i64, u32> = BTreeMap::new();
    for endpoint in primaries(&h.db, pool).await.values().flatten() {
        *counts.entry(*endpoint).or_default() += 1;
    }
    assert!(counts.get(&a).copied().unwrap_or(0) <= 2);
    assert!(counts.get(&b).copied().unwrap_or(0) <= 4);
    assert!(counts.get(&c).copied().unwrap_or(0) <= 10);
    assert_eq!(counts.values().sum::<u32>(), 12);
}

#[tokio::test]
async fn repeated_recompute_is_deterministic() {
    let h = harness().await;
    let pool = insert_pool(&h.db, "default").await;
    for (i, weight) in [1.0, 2.0, 0.5].into_iter().enumerate() {
        let e = insert_endpoint(&h.db, &format!("10.0.2.{i}"), true, true).await;
        add_member(&h.db, pool, e, weight).await;
    }
    insert_credentials(&h.db, 9).await;

    assert_ok!(h.state.coordinator.recompute(params(pool, 3, false), None).await);
    let first = primaries(&h.db, pool).await;
    assert_ok!(h.state.coordinator.recompute(params(pool, 3, false), None).await);
    let second = primaries(&h.db, pool).await;

    assert_eq!(first, second);
}

#[tokio::test]
async fn override_survives_recompute_until_expiry() {
    let h = harness().await;
    let pool = insert_pool(&h.db, "default").await;
    let e1 = insert_endpoint(&h.db, "10.0.3.1", true, true).await;
    let e2 = insert_endpoint(&h.db, "10.0.3.2", true, true).await;
    add_member(&h.db, pool, e1, 1.0).await;
    add_member(&h.db, pool, e2, 1.0).await;
    let creds = insert_credentials(&h.db, 2).await;

    assert_ok!(h.state.coordinator.recompute(params(pool, 2, true), None).await);
    let binding = binding_id(&h.db, creds[0], pool).await;
    assert_ok!(
        h.state
            .overrides
            .set_override(binding, e2, THIRTY_MINUTES_MS, None, None)
            .await
    );

    // 权重变化后重算只改主代理
    sqlx::query("UPDATE proxy_pool_endpoints SET weight = 3 WHERE endpoint_id = ?")
        .bind(e1)
        .execute(&h.db)
        .await
        .unwrap();
    assert_ok!(h.state.coordinator.recompute(params(pool, 2, true), None).await);

    let views = h.state.registry.list_pool_bindings(pool, h.clock_now()).await.unwrap();
    let view = views.iter().find(|v| v.binding_id == binding).unwrap();
    assert_eq!(view.effective_mode, EffectiveMode::Override);
    assert_eq!(view.effective_endpoint_id, Some(e2));

    h.clock.advance(Duration::minutes(30));

    let views = h.state.registry.list_pool_bindings(pool, h.clock_now()).await.unwrap();
    let view = views.iter().find(|v| v.binding_id == binding).unwrap();
    assert_eq!(view.effective_mode, EffectiveMode::Primary);
    assert_eq!(view.effective_endpoint_id, Some(e1));
    // 过期不需要写入，覆盖字段仍在
    assert_eq!(view.override_endpoint.as_ref().map(|e| e.id), Some(e2));
}

#[tokio::test]
async fn clearing_twice_is_idempotent() {
    let h = harness().await;
    let pool = insert_pool(&h.db, "default").await;
    let e1 = insert_endpoint(&h.db, "10.0.4.1", true, true).await;
    add_member(&h.db, pool, e1, 1.0).await;
    let creds = insert_credentials(&h.db, 1).await;
    assert_ok!(h.state.coordinator.recompute(params(pool, 2, true), None).await);
    let binding = binding_id(&h.db, creds[0], pool).await;

    assert_ok!(h.state.overrides.set_override(binding, e1, 1000, None, None).await);
    assert_eq!(assert_ok!(h.state.overrides.clear_override(binding, None).await), binding);
    let after_first = primaries(&h.db, pool).await;
    assert_eq!(assert_ok!(h.state.overrides.clear_override(binding, None).await), binding);

    assert_eq!(primaries(&h.db, pool).await, after_first);
    assert_eq!(audit_count(&h.db, "binding.override.clear").await, 1);
}

#[tokio::test]
async fn strict_shortfall_keeps_previous_primaries() {
    let h = harness().await;
    let pool = insert_pool(&h.db, "default").await;
    let e1 = insert_endpoint(&h.db, "10.0.5.1", true, true).await;
    add_member(&h.db, pool, e1, 1.0).await;
    insert_credentials(&h.db, 2).await;
    assert_ok!(h.state.coordinator.recompute(params(pool, 2, true), None).await);
    let before = primaries(&h.db, pool).await;

    insert_credentials(&h.db, 3).await;
    assert_err!(h.state.coordinator.recompute(params(pool, 2, true), None).await);

    assert_eq!(primaries(&h.db, pool).await, before);
}

#[tokio::test]
async fn concurrent_recompute_on_same_pool_conflicts() {
    let h = harness().await;
    let pool_a = insert_pool(&h.db, "a").await;
    let pool_b = insert_pool(&h.db, "b").await;
    let e1 = insert_endpoint(&h.db, "10.0.6.1", true, true).await;
    add_member(&h.db, pool_a, e1, 1.0).await;
    add_member(&h.db, pool_b, e1, 1.0).await;
    insert_credentials(&h.db, 1).await;

    let guard = h.state.coordinator.locks().try_acquire(pool_a).unwrap();

    let err = h
        .state
        .coordinator
        .recompute(params(pool_a, 2, true), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_ok!(h.state.coordinator.recompute(params(pool_b, 2, true), None).await);

    drop(guard);
    assert_ok!(h.state.coordinator.recompute(params(pool_a, 2, true), None).await);
}

#[tokio::test]
async fn inactive_endpoints_and_disabled_credentials_are_skipped() {
    let h = harness().await;
    let pool = insert_pool(&h.db, "default").await;
    let live = insert_endpoint(&h.db, "10.0.7.1", true, true).await;
    let down = insert_endpoint(&h.db, "10.0.7.2", true, false).await;
    let off = insert_endpoint(&h.db, "10.0.7.3", false, true).await;
    for e in [live, down, off] {
        add_member(&h.db, pool, e, 1.0).await;
    }
    let enabled = insert_credential(&h.db, "on", true).await;
    let disabled = insert_credential(&h.db, "off", false).await;

    let outcome = assert_ok!(h.state.coordinator.recompute(params(pool, 2, true), None).await);
    assert_eq!(outcome.endpoint_count, 1);
    assert_eq!(outcome.token_count, 1);

    let stored = primaries(&h.db, pool).await;
    assert_eq!(stored.get(&enabled), Some(&Some(live)));
    assert!(!stored.contains_key(&disabled));
}

#[tokio::test]
async fn recompute_rejects_bad_input() {
    let h = harness().await;
    let pool = insert_pool(&h.db, "default").await;

    assert!(matches!(
        h.state.coordinator.recompute(params(pool, 0, true), None).await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        h.state.coordinator.recompute(params(pool, 1001, true), None).await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        h.state.coordinator.recompute(params(pool + 100, 2, true), None).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn set_override_validates_target() {
    let h = harness().await;
    let pool = insert_pool(&h.db, "default").await;
    let member = insert_endpoint(&h.db, "10.0.8.1", true, true).await;
    let outsider = insert_endpoint(&h.db, "10.0.8.2", true, true).await;
    add_member(&h.db, pool, member, 1.0).await;
    let creds = insert_credentials(&h.db, 1).await;
    assert_ok!(h.state.coordinator.recompute(params(pool, 2, true), None).await);
    let binding = binding_id(&h.db, creds[0], pool).await;
    let overrides = &h.state.overrides;

    assert!(matches!(
        overrides.set_override(binding, outsider, 1000, None, None).await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        overrides.set_override(binding, outsider + 100, 1000, None, None).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        overrides.set_override(binding + 100, member, 1000, None, None).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        overrides.set_override(binding, member, 0, None, None).await,
        Err(AppError::Validation(_))
    ));
    let too_long = 31 * 24 * 60 * 60 * 1000;
    assert!(matches!(
        overrides.set_override(binding, member, too_long, None, None).await,
        Err(AppError::Validation(_))
    ));

    assert_eq!(audit_count(&h.db, "binding.override.set").await, 0);
}

#[tokio::test]
async fn membership_replacement_validates_and_counts() {
    let h = harness().await;
    let pool = insert_pool(&h.db, "default").await;
    let e1 = insert_endpoint(&h.db, "10.0.9.1", true, true).await;
    let e2 = insert_endpoint(&h.db, "10.0.9.2", true, true).await;
    let e3 = insert_endpoint(&h.db, "10.0.9.3", true, true).await;
    add_member(&h.db, pool, e1, 1.0).await;
    add_member(&h.db, pool, e3, 1.0).await;
    let writer = &h.state.memberships;

    let item = |endpoint_id: i64, weight: f64| MembershipInput {
        endpoint_id,
        weight,
        enabled: true,
    };

    let change = assert_ok!(
        writer
            .replace_pool_memberships(pool, vec![item(e1, 2.0), item(e2, 1.0), item(e2, 5.0)], None)
            .await
    );
    assert_eq!((change.created, change.updated, change.removed), (1, 1, 1));

    let weights: Vec<(i64, f64)> = sqlx::query_as(
        "SELECT endpoint_id, weight FROM proxy_pool_endpoints WHERE pool_id = ? ORDER BY endpoint_id",
    )
    .bind(pool)
    .fetch_all(&h.db)
    .await
    .unwrap();
    assert_eq!(weights, vec![(e1, 2.0), (e2, 1.0)]);

    assert!(matches!(
        writer.replace_pool_memberships(pool, vec![item(e1 + 100, 1.0)], None).await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        writer.replace_pool_memberships(pool, vec![item(e1, -1.0)], None).await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        writer.replace_pool_memberships(pool + 100, vec![item(e1, 1.0)], None).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn removing_endpoint_cascades_and_recomputes() {
    let h = harness().await;
    let pool = insert_pool(&h.db, "default").await;
    let keep = insert_endpoint(&h.db, "10.0.10.1", true, true).await;
    let gone = insert_endpoint(&h.db, "10.0.10.2", true, true).await;
    add_member(&h.db, pool, keep, 1.0).await;
    add_member(&h.db, pool, gone, 1.0).await;
    let creds = insert_credentials(&h.db, 2).await;
    assert_ok!(h.state.coordinator.recompute(params(pool, 2, true), None).await);
    let binding = binding_id(&h.db, creds[0], pool).await;
    assert_ok!(h.state.overrides.set_override(binding, gone, THIRTY_MINUTES_MS, None, None).await);

    let options = CleanupOptions {
        recompute: true,
        strict: false,
        max_slots_per_endpoint: 2,
    };
    let outcome = assert_ok!(h.state.cleanup.remove_endpoint(gone, options, None).await);

    assert_eq!(outcome.overrides_cleared, 1);
    assert_eq!(outcome.affected_pool_ids, vec![pool]);
    assert_eq!(outcome.recomputes.len(), 1);
    assert!(outcome.warnings.is_empty());

    let stored = primaries(&h.db, pool).await;
    assert!(stored.values().all(|p| *p == Some(keep)));

    let enabled: bool = sqlx::query_scalar("SELECT enabled FROM proxy_endpoints WHERE id = ?")
        .bind(gone)
        .fetch_one(&h.db)
        .await
        .unwrap();
    assert!(!enabled);
}

#[tokio::test]
async fn cleanup_recompute_failures_become_warnings() {
    let h = harness().await;
    let pool = insert_pool(&h.db, "default").await;
    let keep = insert_endpoint(&h.db, "10.0.11.1", true, true).await;
    let gone = insert_endpoint(&h.db, "10.0.11.2", true, true).await;
    add_member(&h.db, pool, keep, 1.0).await;
    add_member(&h.db, pool, gone, 1.0).await;
    insert_credentials(&h.db, 4).await;

    let options = CleanupOptions {
        recompute: true,
        strict: true,
        max_slots_per_endpoint: 2,
    };
    let outcome = assert_ok!(h.state.cleanup.remove_endpoint(gone, options, None).await);

    assert!(outcome.recomputes.is_empty());
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].starts_with(&format!("pool#{pool}")));

    assert!(matches!(
        h.state.cleanup.remove_endpoint(gone + 100, options, None).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn route_resolution_creates_binding_and_follows_override() {
    let h = harness().await;
    let pool = insert_pool(&h.db, "default").await;
    let e1 = insert_endpoint(&h.db, "10.0.12.1", true, true).await;
    let e2 = insert_endpoint(&h.db, "10.0.12.2", true, true).await;
    add_member(&h.db, pool, e1, 1.0).await;
    add_member(&h.db, pool, e2, 1.0).await;
    let cred = insert_credential(&h.db, "fresh", true).await;

    let route = assert_ok!(h.state.routes.resolve(pool, cred).await);
    assert!(route.endpoint.is_none());
    assert!(!route.available);
    assert_eq!(primaries(&h.db, pool).await.get(&cred), Some(&None));

    assert_ok!(h.state.coordinator.recompute(params(pool, 2, true), None).await);
    let route = assert_ok!(h.state.routes.resolve(pool, cred).await);
    assert_eq!(route.endpoint.as_ref().map(|e| e.id), Some(e1));
    assert_eq!(route.effective_mode, EffectiveMode::Primary);
    assert!(route.available);

    assert_ok!(
        h.state
            .overrides
            .set_override(route.binding_id, e2, THIRTY_MINUTES_MS, None, None)
            .await
    );
    let route = assert_ok!(h.state.routes.resolve(pool, cred).await);
    assert_eq!(route.endpoint.map(|e| e.host), Some("10.0.12.2".to_string()));
    assert_eq!(route.effective_mode, EffectiveMode::Override);

    assert!(matches!(
        h.state.routes.resolve(pool, cred + 100).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn override_may_target_unreachable_member() {
    let h = harness().await;
    let pool = insert_pool(&h.db, "default").await;
    let live = insert_endpoint(&h.db, "10.0.13.1", true, true).await;
    let flaky = insert_endpoint(&h.db, "10.0.13.2", true, false).await;
    add_member(&h.db, pool, live, 1.0).await;
    add_member(&h.db, pool, flaky, 1.0).await;
    let creds = insert_credentials(&h.db, 1).await;

    let outcome = assert_ok!(h.state.coordinator.recompute(params(pool, 2, true), None).await);
    // 不可达节点不提供槽位
    assert_eq!(outcome.endpoint_count, 1);
    let binding = binding_id(&h.db, creds[0], pool).await;

    let set = assert_ok!(
        h.state
            .overrides
            .set_override(binding, flaky, 60_000, None, None)
            .await
    );
    assert_eq!(set.override_endpoint_id, flaky);

    let route = assert_ok!(h.state.routes.resolve(pool, creds[0]).await);
    assert_eq!(route.effective_mode, EffectiveMode::Override);
    assert_eq!(route.endpoint.map(|e| e.id), Some(flaky));
    assert!(!route.available);
}

#[tokio::test]
async fn override_rejects_disabled_membership() {
    let h = harness().await;
    let pool = insert_pool(&h.db, "default").await;
    let live = insert_endpoint(&h.db, "10.0.14.1", true, true).await;
    let parked = insert_endpoint(&h.db, "10.0.14.2", true, true).await;
    add_member(&h.db, pool, live, 1.0).await;
    add_member(&h.db, pool, parked, 1.0).await;
    sqlx::query("UPDATE proxy_pool_endpoints SET enabled = 0 WHERE endpoint_id = ?")
        .bind(parked)
        .execute(&h.db)
        .await
        .unwrap();
    let creds = insert_credentials(&h.db, 1).await;
    assert_ok!(h.state.coordinator.recompute(params(pool, 2, true), None).await);
    let binding = binding_id(&h.db, creds[0], pool).await;

    assert!(matches!(
        h.state
            .overrides
            .set_override(binding, parked, 60_000, None, None)
            .await,
        Err(AppError::Validation(_))
    ));
}
