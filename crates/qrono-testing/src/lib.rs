//! An in-process [`JobStore`] for testing `qrono-core` consumers without a
//! live Postgres instance.
//!
//! Promotes the teacher's empty `seesaw-testing` stub crate into an actual
//! test harness. `MemoryJobStore` implements the exact same claim/commit/reap
//! semantics `qrono-postgres::PgJobStore` implements against real SQL —
//! disjoint claims under concurrent access, `PAUSED` exclusion, verdict
//! translation (spec.md §4.5), reap-after-timeout (spec.md §4.6) — backed by
//! a single `tokio::sync::Mutex<Vec<Job>>` instead of row locks, since an
//! in-process mutex already gives the same "one claimant per row" guarantee
//! `FOR UPDATE SKIP LOCKED` buys a real database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qrono_core::{
    is_one_shot as expr_is_one_shot, next as cron_next, parse as parse_expr, CreateArgs,
    FailedOutcome, Job, JobStatus, JobStore, MetaSearchFilter, Outcome, SchedulerError,
    SearchFilter, TenantScope, UpdateArgs, Verdict, DEFAULT_OWNER,
};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// An in-process, single-process stand-in for a Postgres-backed `job` table.
///
/// Rows live in a `Vec` guarded by one `tokio::sync::Mutex`; every operation
/// takes the lock for its whole duration, which is exactly the isolation a
/// single `FOR UPDATE SKIP LOCKED` claim query buys against a real database
/// (at most one caller observes any given row as claimable at a time).
pub struct MemoryJobStore {
    rows: Mutex<Vec<Job>>,
    next_id: AtomicI64,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Test-only escape hatch: force a `PENDING` row's `last_run_at` far
    /// enough into the past that the next `reap_timeouts` tick reclaims it,
    /// without needing to actually sleep past its `timeout`.
    pub fn force_expire_timeout(&self, id: i64) {
        if let Ok(mut rows) = self.rows.try_lock() {
            if let Some(row) = rows.iter_mut().find(|j| j.id == id) {
                row.last_run_at = Some(Utc::now() - chrono::Duration::days(1));
            }
        }
    }

    fn generate_name() -> String {
        uuid::Uuid::new_v4().simple().to_string()[..24].to_string()
    }

    fn visible(scope: &TenantScope, row: &Job) -> bool {
        match scope {
            TenantScope::Admin => true,
            TenantScope::Owner(owner) => &row.owner == owner,
        }
    }

    /// A restricted tenant's writes are always attributed to their own
    /// scope, mirroring Postgres RLS's `WITH CHECK (owner = session.owner)`
    /// insert policy (spec.md §4.3) — the caller cannot name a different
    /// owner by supplying `CreateArgs.owner`. Admin callers may write as any
    /// owner, defaulting to `"default"` when none is supplied.
    fn owner_for_write(scope: &TenantScope, requested: &str) -> String {
        match scope {
            TenantScope::Admin if requested.is_empty() => DEFAULT_OWNER.to_string(),
            TenantScope::Admin => requested.to_string(),
            TenantScope::Owner(owner) => owner.clone(),
        }
    }

    fn find_conflict(
        rows: &[Job],
        executor: &str,
        owner: &str,
        name: &str,
        dedup_key: Option<&str>,
        exclude_id: Option<i64>,
    ) -> Option<&'static str> {
        for row in rows {
            if Some(row.id) == exclude_id || row.executor != executor || row.owner != owner {
                continue;
            }
            if row.name == name {
                return Some("name");
            }
            if let Some(key) = dedup_key {
                if row.deduplication_key.as_deref() == Some(key) {
                    return Some("deduplication_key");
                }
            }
        }
        None
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(
        &self,
        scope: &TenantScope,
        executor: &str,
        args: CreateArgs,
    ) -> Result<Job, SchedulerError> {
        let owner_requested = args.owner.clone().unwrap_or_default();
        let owner = Self::owner_for_write(scope, &owner_requested);
        let args = CreateArgs {
            owner: Some(owner),
            ..args
        }
        .normalize(i32::MAX)?; // max_retries enforced by Worker/engine, not the store

        let expr = parse_expr(&args.expr).map_err(SchedulerError::Expr)?;
        let now = Utc::now();
        let start_at = args.start_at.unwrap_or(now);
        let name = match args.name {
            Some(n) if !n.is_empty() => n,
            _ => Self::generate_name(),
        };

        let mut rows = self.rows.lock().await;
        let owner = args.owner.clone().unwrap();
        if let Some(field) = Self::find_conflict(
            &rows,
            executor,
            &owner,
            &name,
            args.deduplication_key.as_deref(),
            None,
        ) {
            return Err(SchedulerError::UniquenessViolation {
                executor: executor.to_string(),
                owner,
                field,
                value: if field == "name" {
                    name
                } else {
                    args.deduplication_key.clone().unwrap_or_default()
                },
            });
        }

        let run_at = cron_next(start_at.max(now), &expr);
        let job = Job {
            id: self.allocate_id(),
            expr: args.expr,
            name,
            state: args.state,
            meta: args.meta.unwrap_or(serde_json::Value::Null),
            status: JobStatus::Ready,
            executor: executor.to_string(),
            owner,
            timeout: args.timeout.unwrap(),
            retries: args.retries.unwrap(),
            start_at,
            run_at,
            last_run_at: None,
            created_at: now,
            execution_amount: 0,
            deduplication_key: args.deduplication_key,
        };
        rows.push(job.clone());
        Ok(job)
    }

    async fn batch_create(
        &self,
        scope: &TenantScope,
        executor: &str,
        args: Vec<CreateArgs>,
    ) -> Result<Vec<i64>, SchedulerError> {
        let mut ids = Vec::with_capacity(args.len());
        for a in args {
            ids.push(self.create(scope, executor, a).await?.id);
        }
        Ok(ids)
    }

    async fn update_by_id(
        &self,
        scope: &TenantScope,
        executor: &str,
        id: i64,
        patch: UpdateArgs,
    ) -> Result<Job, SchedulerError> {
        patch.validate().map_err(SchedulerError::Expr)?;
        let mut rows = self.rows.lock().await;
        let row = rows
            .iter_mut()
            .find(|j| j.id == id && j.executor == executor && Self::visible(scope, j))
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
        apply_update(row, patch)?;
        Ok(row.clone())
    }

    async fn update_by_name(
        &self,
        scope: &TenantScope,
        executor: &str,
        name: &str,
        patch: UpdateArgs,
    ) -> Result<Job, SchedulerError> {
        patch.validate().map_err(SchedulerError::Expr)?;
        let mut rows = self.rows.lock().await;
        let row = rows
            .iter_mut()
            .find(|j| j.name == name && j.executor == executor && Self::visible(scope, j))
            .ok_or_else(|| SchedulerError::NotFound(name.to_string()))?;
        apply_update(row, patch)?;
        Ok(row.clone())
    }

    async fn delete_by_id(
        &self,
        scope: &TenantScope,
        executor: &str,
        id: i64,
    ) -> Result<Job, SchedulerError> {
        let mut rows = self.rows.lock().await;
        let idx = rows
            .iter()
            .position(|j| j.id == id && j.executor == executor && Self::visible(scope, j))
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
        Ok(rows.remove(idx))
    }

    async fn delete_by_name(
        &self,
        scope: &TenantScope,
        executor: &str,
        name: &str,
    ) -> Result<Job, SchedulerError> {
        let mut rows = self.rows.lock().await;
        let idx = rows
            .iter()
            .position(|j| j.name == name && j.executor == executor && Self::visible(scope, j))
            .ok_or_else(|| SchedulerError::NotFound(name.to_string()))?;
        Ok(rows.remove(idx))
    }

    async fn query_by_id(
        &self,
        scope: &TenantScope,
        executor: &str,
        id: i64,
    ) -> Result<Job, SchedulerError> {
        let rows = self.rows.lock().await;
        rows.iter()
            .find(|j| j.id == id && j.executor == executor && Self::visible(scope, j))
            .cloned()
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))
    }

    async fn query_by_name(
        &self,
        scope: &TenantScope,
        executor: &str,
        name: &str,
    ) -> Result<Job, SchedulerError> {
        let rows = self.rows.lock().await;
        rows.iter()
            .find(|j| j.name == name && j.executor == executor && Self::visible(scope, j))
            .cloned()
            .ok_or_else(|| SchedulerError::NotFound(name.to_string()))
    }

    async fn search(
        &self,
        scope: &TenantScope,
        executor: &str,
        filter: SearchFilter,
    ) -> Result<Vec<Job>, SchedulerError> {
        let rows = self.rows.lock().await;
        let matches = rows.iter().filter(|j| {
            j.executor == executor
                && Self::visible(scope, j)
                && filter
                    .name_prefix
                    .as_deref()
                    .map(|p| j.name.starts_with(p))
                    .unwrap_or(true)
        });
        Ok(matches
            .skip(filter.skip.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn search_by_meta(
        &self,
        scope: &TenantScope,
        executor: &str,
        filter: MetaSearchFilter,
    ) -> Result<Vec<Job>, SchedulerError> {
        let rows = self.rows.lock().await;
        let matches = rows.iter().filter(|j| {
            j.executor == executor
                && Self::visible(scope, j)
                && (filter.statuses.is_empty() || filter.statuses.contains(&j.status))
                && filter.name.as_deref().map(|n| j.name == n).unwrap_or(true)
                && filter.from.map(|from| j.run_at >= from).unwrap_or(true)
                && filter.to.map(|to| j.run_at <= to).unwrap_or(true)
                && filter
                    .is_one_shot
                    .map(|wanted| j.is_one_shot() == wanted)
                    .unwrap_or(true)
                && filter
                    .meta_query
                    .as_ref()
                    .map(|q| &j.meta == q)
                    .unwrap_or(true)
        });
        Ok(matches
            .skip(filter.skip.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn stop(&self, scope: &TenantScope, executor: &str, id: i64) -> Result<Job, SchedulerError> {
        let mut rows = self.rows.lock().await;
        let row = rows
            .iter_mut()
            .find(|j| j.id == id && j.executor == executor && Self::visible(scope, j))
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
        if row.status == JobStatus::Ready {
            row.status = JobStatus::Paused;
        }
        Ok(row.clone())
    }

    async fn restart(&self, scope: &TenantScope, executor: &str, id: i64) -> Result<Job, SchedulerError> {
        let mut rows = self.rows.lock().await;
        let row = rows
            .iter_mut()
            .find(|j| j.id == id && j.executor == executor && Self::visible(scope, j))
            .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
        if row.status == JobStatus::Paused {
            row.status = JobStatus::Ready;
        }
        Ok(row.clone())
    }

    async fn claim_ready(
        &self,
        scope: &TenantScope,
        executor: &str,
        limit: i64,
    ) -> Result<Vec<Job>, SchedulerError> {
        let now = Utc::now();
        let mut rows = self.rows.lock().await;

        let mut candidates: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, j)| {
                j.executor == executor
                    && Self::visible(scope, j)
                    && j.status == JobStatus::Ready
                    && j.run_at <= now
            })
            .map(|(i, _)| i)
            .collect();
        // Oldest run_at first, per spec.md §4.2's fairness guidance.
        candidates.sort_by_key(|&i| rows[i].run_at);
        candidates.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(candidates.len());
        for idx in candidates {
            let row = &mut rows[idx];
            row.status = JobStatus::Pending;
            row.last_run_at = Some(now);
            claimed.push(row.clone());
        }
        Ok(claimed)
    }

    async fn apply_outcomes(
        &self,
        scope: &TenantScope,
        executor: &str,
        verdict: Verdict,
        outcomes: &[Outcome],
        max_retries: i32,
    ) -> Result<Vec<FailedOutcome>, SchedulerError> {
        let _ = max_retries; // retries are clamped at create time, not re-validated here
        let now = Utc::now();
        let mut rows = self.rows.lock().await;
        let mut rejected = Vec::new();

        for outcome in outcomes {
            let row = rows
                .iter_mut()
                .find(|j| j.id == outcome.id && j.executor == executor && Self::visible(scope, j));
            let Some(row) = row else {
                rejected.push(FailedOutcome {
                    id: outcome.id,
                    error: "row not found or not visible to this tenant".to_string(),
                });
                continue;
            };

            if let Some(state) = &outcome.state {
                if !state.is_empty() {
                    row.state = Some(state.clone());
                }
            }
            let effective_expr = match &outcome.expr {
                Some(e) if !e.is_empty() => {
                    match parse_expr(e) {
                        Ok(_) => {
                            row.expr = e.clone();
                            row.expr.clone()
                        }
                        Err(err) => {
                            rejected.push(FailedOutcome {
                                id: outcome.id,
                                error: format!("invalid expr override: {err}"),
                            });
                            continue;
                        }
                    }
                }
                _ => row.expr.clone(),
            };
            let one_shot = expr_is_one_shot(&effective_expr);
            let parsed = match parse_expr(&effective_expr) {
                Ok(e) => e,
                Err(err) => {
                    rejected.push(FailedOutcome {
                        id: outcome.id,
                        error: format!("stored expr no longer parses: {err}"),
                    });
                    continue;
                }
            };

            row.last_run_at = Some(now);
            match verdict {
                Verdict::Commit => {
                    row.execution_amount += 1;
                    row.status = if one_shot {
                        JobStatus::Success
                    } else {
                        JobStatus::Ready
                    };
                    row.run_at = cron_next(now, &parsed);
                }
                Verdict::Fail => {
                    // `original_source/sqlc/batch.go`'s `batchUpdateFailedJobs` issues this as a
                    // single `UPDATE ... SET execution_amount = execution_amount + 1, run_at = ...
                    // power(2, execution_amount) ...`: every `SET` expression reads the *old* row,
                    // so the backoff is computed from the pre-increment value.
                    let backoff_base = row.execution_amount;
                    row.execution_amount += 1;
                    row.retries -= 1;
                    if one_shot && row.retries <= 0 {
                        row.status = JobStatus::Failure;
                        row.run_at = now;
                    } else {
                        row.status = JobStatus::Ready;
                        row.run_at = if one_shot {
                            now + chrono::Duration::seconds(2i64.pow(backoff_base.max(0) as u32))
                        } else {
                            cron_next(now, &parsed)
                        };
                    }
                }
                Verdict::Retry => {
                    row.status = JobStatus::Ready;
                    row.run_at = cron_next(now, &parsed);
                }
            }
        }

        Ok(rejected)
    }

    async fn reap_timeouts(&self, scope: &TenantScope, executor: &str) -> Result<Vec<i64>, SchedulerError> {
        let now = Utc::now();
        let mut rows = self.rows.lock().await;
        let mut reclaimed = Vec::new();
        for row in rows.iter_mut() {
            if row.executor != executor || !Self::visible(scope, row) {
                continue;
            }
            if row.status != JobStatus::Pending || row.timeout <= 0 {
                continue;
            }
            let Some(last_run_at) = row.last_run_at else {
                continue;
            };
            if now - last_run_at > chrono::Duration::seconds(row.timeout as i64) {
                row.status = JobStatus::Ready;
                reclaimed.push(row.id);
            }
        }
        Ok(reclaimed)
    }
}

fn apply_update(row: &mut Job, patch: UpdateArgs) -> Result<(), SchedulerError> {
    if let Some(expr) = patch.expr {
        if !expr.is_empty() {
            row.expr = expr;
        }
    }
    if let Some(state) = patch.state {
        if !state.is_empty() {
            row.state = Some(state);
        }
    }
    if let Some(timeout) = patch.timeout {
        if timeout != 0 {
            row.timeout = timeout;
        }
    }
    let expr = parse_expr(&row.expr).map_err(SchedulerError::Expr)?;
    row.recompute_run_at(&expr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qrono_core::CreateArgs;

    fn admin() -> TenantScope {
        TenantScope::Admin
    }

    /// `@after`/`@every`'s smallest unit is a whole minute (spec.md §4.1),
    /// so tests that need an immediately-claimable row back-date
    /// `start_at` far enough that `start_at + interval` already elapsed,
    /// rather than sleeping a full minute.
    fn due_now(expr: &str) -> CreateArgs {
        CreateArgs {
            start_at: Some(Utc::now() - chrono::Duration::hours(1)),
            ..CreateArgs::new(expr)
        }
    }

    #[tokio::test]
    async fn create_assigns_generated_name_and_run_at() {
        let store = MemoryJobStore::new();
        let job = store
            .create(&admin(), "mailer", CreateArgs::new("@every 1 hour"))
            .await
            .unwrap();
        assert_eq!(job.name.len(), 24);
        assert!(job.run_at > job.created_at);
        assert_eq!(job.status, JobStatus::Ready);
    }

    #[tokio::test]
    async fn uniqueness_violation_on_duplicate_name() {
        let store = MemoryJobStore::new();
        let scope = TenantScope::owner("acme");
        store
            .create(
                &scope,
                "mailer",
                CreateArgs {
                    name: Some("nightly".into()),
                    ..CreateArgs::new("@every 1 hour")
                },
            )
            .await
            .unwrap();
        let err = store
            .create(
                &scope,
                "mailer",
                CreateArgs {
                    name: Some("nightly".into()),
                    ..CreateArgs::new("@every 2 hour")
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::UniquenessViolation { field: "name", .. }
        ));
    }

    #[tokio::test]
    async fn claims_are_disjoint_across_concurrent_callers() {
        let store = Arc::new(MemoryJobStore::new());
        let scope = TenantScope::owner("acme");
        for _ in 0..100 {
            store
                .create(&scope, "x", due_now("@after 1 minute"))
                .await
                .unwrap();
        }

        let (a, b) = tokio::join!(
            store.claim_ready(&scope, "x", 60),
            store.claim_ready(&scope, "x", 60)
        );
        let a = a.unwrap();
        let b = b.unwrap();
        let ids_a: std::collections::HashSet<_> = a.iter().map(|j| j.id).collect();
        let ids_b: std::collections::HashSet<_> = b.iter().map(|j| j.id).collect();
        assert!(ids_a.is_disjoint(&ids_b));
        assert_eq!(ids_a.len() + ids_b.len(), 100);
    }

    #[tokio::test]
    async fn paused_jobs_are_never_claimed() {
        let store = MemoryJobStore::new();
        let scope = TenantScope::owner("acme");
        let job = store
            .create(&scope, "x", due_now("@after 1 minute"))
            .await
            .unwrap();
        store.stop(&scope, "x", job.id).await.unwrap();
        let claimed = store.claim_ready(&scope, "x", 10).await.unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn commit_one_shot_reaches_success() {
        let store = MemoryJobStore::new();
        let scope = TenantScope::owner("acme");
        let job = store
            .create(&scope, "x", due_now("@after 1 minute"))
            .await
            .unwrap();
        store.claim_ready(&scope, "x", 10).await.unwrap();
        store
            .apply_outcomes(
                &scope,
                "x",
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
        let refreshed = store.query_by_id(&scope, "x", job.id).await.unwrap();
        assert_eq!(refreshed.status, JobStatus::Success);
        assert_eq!(refreshed.execution_amount, 1);
    }

    #[tokio::test]
    async fn fail_exhausts_retries_to_terminal_failure() {
        let store = MemoryJobStore::new();
        let scope = TenantScope::owner("acme");
        let job = store
            .create(
                &scope,
                "x",
                CreateArgs {
                    retries: Some(5),
                    ..CreateArgs::new("@after 1 hour")
                },
            )
            .await
            .unwrap();

        for attempt in 1..=5 {
            store.claim_ready(&scope, "x", 10).await.unwrap();
            store
                .apply_outcomes(
                    &scope,
                    "x",
                    Verdict::Fail,
                    &[Outcome {
                        id: job.id,
                        verdict: Verdict::Fail,
                        state: None,
                        expr: None,
                    }],
                    20,
                )
                .await
                .unwrap();
            let refreshed = store.query_by_id(&scope, "x", job.id).await.unwrap();
            assert_eq!(refreshed.execution_amount, attempt);
            if attempt < 5 {
                assert_eq!(refreshed.status, JobStatus::Ready);
            } else {
                assert_eq!(refreshed.status, JobStatus::Failure);
            }
        }
    }

    /// The backoff exponent is the *pre-increment* `execution_amount`
    /// (`original_source/sqlc/batch.go`'s `batchUpdateFailedJobs` reads
    /// `execution_amount` in the same `UPDATE` that increments it, so every
    /// `SET` expression sees the old row): the first failure backs off
    /// 2^0 = 1s, the second 2^1 = 2s, not 2^1/2^2.
    #[tokio::test]
    async fn fail_backoff_uses_pre_increment_execution_amount() {
        let store = MemoryJobStore::new();
        let scope = TenantScope::owner("acme");
        let job = store
            .create(
                &scope,
                "x",
                CreateArgs {
                    retries: Some(5),
                    ..due_now("@after 1 hour")
                },
            )
            .await
            .unwrap();

        let fail = |id: i64| Outcome {
            id,
            verdict: Verdict::Fail,
            state: None,
            expr: None,
        };

        let before_first = Utc::now();
        store.claim_ready(&scope, "x", 10).await.unwrap();
        store
            .apply_outcomes(&scope, "x", Verdict::Fail, &[fail(job.id)], 20)
            .await
            .unwrap();
        let after_first = store.query_by_id(&scope, "x", job.id).await.unwrap();
        assert_eq!(after_first.execution_amount, 1);
        let delta_first = after_first.run_at - before_first;
        assert!(
            delta_first >= chrono::Duration::seconds(1) && delta_first < chrono::Duration::seconds(2),
            "first failure should back off ~1s (2^0), got {delta_first:?}"
        );

        let before_second = Utc::now();
        store.claim_ready(&scope, "x", 10).await.unwrap();
        store
            .apply_outcomes(&scope, "x", Verdict::Fail, &[fail(job.id)], 20)
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

    #[tokio::test]
    async fn recurring_job_never_reaches_failure_on_exhausted_retries() {
        let store = MemoryJobStore::new();
        let scope = TenantScope::owner("acme");
        let job = store
            .create(
                &scope,
                "x",
                CreateArgs {
                    retries: Some(2),
                    ..CreateArgs::new("@every 1 hour")
                },
            )
            .await
            .unwrap();

        for _ in 0..10 {
            store
                .apply_outcomes(
                    &scope,
                    "x",
                    Verdict::Fail,
                    &[Outcome {
                        id: job.id,
                        verdict: Verdict::Fail,
                        state: None,
                        expr: None,
                    }],
                    20,
                )
                .await
                .unwrap();
        }
        let refreshed = store.query_by_id(&scope, "x", job.id).await.unwrap();
        assert_eq!(refreshed.status, JobStatus::Ready);
    }

    #[tokio::test]
    async fn reap_after_timeout_resets_to_ready() {
        let store = MemoryJobStore::new();
        let scope = TenantScope::owner("acme");
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
        store.force_expire_timeout(job.id);

        let reclaimed = store.reap_timeouts(&scope, "x").await.unwrap();
        assert_eq!(reclaimed, vec![job.id]);
        let refreshed = store.query_by_id(&scope, "x", job.id).await.unwrap();
        assert_eq!(refreshed.status, JobStatus::Ready);
    }

    #[tokio::test]
    async fn owner_scope_cannot_see_other_tenants_rows() {
        let store = MemoryJobStore::new();
        store
            .create(&TenantScope::owner("acme"), "x", CreateArgs::new("@every 1 hour"))
            .await
            .unwrap();
        let other = TenantScope::owner("globex");
        let rows = store
            .search(&other, "x", SearchFilter::default())
            .await
            .unwrap();
        assert!(rows.is_empty());
    }
}
