//! Integration tests against a real Postgres instance.
//!
//! Skipped unless `DATABASE_URL` is set — there's no embedded Postgres here,
//! so these exercise the same claim/commit/reap semantics
//! `qrono-testing::MemoryJobStore`'s unit tests cover, just against real SQL
//! (the claim CTE's `FOR UPDATE SKIP LOCKED`, the bulk verdict `UPDATE ...
//! FROM UNNEST`, and RLS-backed tenant isolation).

use qrono_core::{CreateArgs, JobStatus, JobStore, Outcome, TenantScope, Verdict};
use qrono_postgres::{PgJobStore, TenantPool};
use sqlx::postgres::PgPoolOptions;

async fn test_store() -> Option<PgJobStore> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect to test database");
    PgJobStore::migrate(&pool).await.expect("run migrations");
    Some(PgJobStore::new(pool))
}

fn due_now(expr: &str) -> CreateArgs {
    CreateArgs {
        start_at: Some(chrono::Utc::now() - chrono::Duration::hours(1)),
        ..CreateArgs::new(expr)
    }
}

#[tokio::test]
async fn create_then_claim_then_commit_roundtrip() {
    let Some(store) = test_store().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let scope = TenantScope::owner(format!("acme-{}", fastrand::u64(..)));

    let job = store
        .create(&scope, "mailer", due_now("@after 1 minute"))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Ready);

    let claimed = store.claim_ready(&scope, "mailer", 10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, job.id);

    let rejected = store
        .apply_outcomes(
            &scope,
            "mailer",
            Verdict::Commit,
            &[Outcome {
                id: job.id,
                verdict: Verdict::Commit,
                state: None,
                expr: None,
            }],
            20,
        )
        .await
        .unwrap();
    assert!(rejected.is_empty());

    let refreshed = store.query_by_id(&scope, "mailer", job.id).await.unwrap();
    assert_eq!(refreshed.status, JobStatus::Success);
    assert_eq!(refreshed.execution_amount, 1);
}

#[tokio::test]
async fn claims_are_disjoint_under_concurrent_claimants() {
    let Some(store) = test_store().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let scope = TenantScope::owner(format!("acme-{}", fastrand::u64(..)));

    let mut args = Vec::new();
    for _ in 0..40 {
        args.push(due_now("@after 1 minute"));
    }
    store.batch_create(&scope, "x", args).await.unwrap();

    let store = std::sync::Arc::new(store);
    let (a, b) = tokio::join!(
        store.claim_ready(&scope, "x", 25),
        store.claim_ready(&scope, "x", 25)
    );
    let a = a.unwrap();
    let b = b.unwrap();
    let ids_a: std::collections::HashSet<_> = a.iter().map(|j| j.id).collect();
    let ids_b: std::collections::HashSet<_> = b.iter().map(|j| j.id).collect();
    assert!(ids_a.is_disjoint(&ids_b));
    assert_eq!(ids_a.len() + ids_b.len(), 40);
}

#[tokio::test]
async fn owner_scope_cannot_see_other_tenants_rows() {
    let Some(store) = test_store().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let owner_a = TenantScope::owner(format!("acme-{}", fastrand::u64(..)));
    let owner_b = TenantScope::owner(format!("globex-{}", fastrand::u64(..)));

    store
        .create(&owner_a, "billing", CreateArgs::new("@every 1 hour"))
        .await
        .unwrap();

    let rows = store
        .search(&owner_b, "billing", Default::default())
        .await
        .unwrap();
    assert!(rows.is_empty());
}

/// The backoff exponent is the *pre-increment* `execution_amount`: the first
/// failure backs off 2^0 = 1s, the second 2^1 = 2s, matching
/// `original_source/sqlc/batch.go`'s `batchUpdateFailedJobs`, where a single
/// `UPDATE`'s `SET` clauses all read the pre-update row.
#[tokio::test]
async fn fail_backoff_uses_pre_increment_execution_amount() {
    let Some(store) = test_store().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let scope = TenantScope::owner(format!("acme-{}", fastrand::u64(..)));

    let job = store
        .create(
            &scope,
            "x",
            CreateArgs {
                retries: Some(5),
                ..due_now("@after 1 minute")
            },
        )
        .await
        .unwrap();

    let fail = Outcome {
        id: job.id,
        verdict: Verdict::Fail,
        state: None,
        expr: None,
    };

    let before_first = chrono::Utc::now();
    store.claim_ready(&scope, "x", 10).await.unwrap();
    store
        .apply_outcomes(&scope, "x", Verdict::Fail, &[fail.clone()], 20)
        .await
        .unwrap();
    let after_first = store.query_by_id(&scope, "x", job.id).await.unwrap();
    assert_eq!(after_first.execution_amount, 1);
    let delta_first = after_first.run_at - before_first;
    assert!(
        delta_first >= chrono::Duration::seconds(1) && delta_first < chrono::Duration::seconds(2),
        "first failure should back off ~1s (2^0), got {delta_first:?}"
    );

    let before_second = chrono::Utc::now();
    store.claim_ready(&scope, "x", 10).await.unwrap();
    store
        .apply_outcomes(&scope, "x", Verdict::Fail, &[fail], 20)
        .await
        .unwrap();
    let after_second = store.query_by_id(&scope, "x", job.id).await.unwrap();
    assert_eq!(after_second.execution_amount, 2);
    let delta_second = after_second.run_at - before_second;
    assert!(
        delta_second >= chrono::Duration::seconds(2) && delta_second < chrono::Duration::seconds(3),
        "second failure should back off ~2s (2^1), got {delta_second:?}"
    );
}

/// The per-pool binding pattern (spec.md §4.7): every connection handed out
/// by a [`TenantPool`] already has `qrono.owner` bound, so a store built on
/// top of one sees only its own tenant's rows without any per-query
/// transaction.
#[tokio::test]
async fn tenant_pool_binds_owner_on_every_acquired_connection() {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };

    let owner_a = format!("acme-{}", fastrand::u64(..));
    let owner_b = format!("globex-{}", fastrand::u64(..));

    {
        let admin_pool = PgPoolOptions::new().max_connections(1).connect(&url).await.unwrap();
        PgJobStore::migrate(&admin_pool).await.unwrap();
    }

    let pool_a = TenantPool::connect(&url, TenantScope::owner(owner_a.clone()), 2)
        .await
        .expect("connect tenant pool");
    let store_a = pool_a.into_store();
    store_a
        .create(
            &TenantScope::owner(owner_a.clone()),
            "billing",
            due_now("@every 1 hour"),
        )
        .await
        .unwrap();

    let pool_b = TenantPool::connect(&url, TenantScope::owner(owner_b.clone()), 2)
        .await
        .expect("connect tenant pool");
    let store_b = pool_b.into_store();
    let rows = store_b
        .search(&TenantScope::owner(owner_b.clone()), "billing", Default::default())
        .await
        .unwrap();
    assert!(rows.is_empty());

    let rows = store_a
        .search(&TenantScope::owner(owner_a.clone()), "billing", Default::default())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn reap_resets_timed_out_pending_row_to_ready() {
    let Some(store) = test_store().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let scope = TenantScope::owner(format!("acme-{}", fastrand::u64(..)));

    let job = store
        .create(
            &scope,
            "x",
            CreateArgs {
                timeout: Some(1),
                ..due_now("@after 1 minute")
            },
        )
        .await
        .unwrap();
    store.claim_ready(&scope, "x", 10).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    let reclaimed = store.reap_timeouts(&scope, "x").await.unwrap();
    assert_eq!(reclaimed, vec![job.id]);
    let refreshed = store.query_by_id(&scope, "x", job.id).await.unwrap();
    assert_eq!(refreshed.status, JobStatus::Ready);
}
