//! The `Job` data model (C3) and the `JobStore` trait that seams a
//! concrete backend (C2/C3) under the dispatch loop, batcher, and reaper.
//!
//! Field set and invariants follow spec.md §3. `id` is a server-assigned
//! monotonic 64-bit integer — unlike the teacher crate's `Uuid`-keyed
//! `ClaimedJob`, spec.md fixes the primary key type, so it is kept as
//! `i64` throughout.

use crate::cron;
use crate::error::{ExprError, SchedulerError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default maximum `retries` a caller may request at `create` time
/// (spec.md §6).
pub const DEFAULT_MAX_RETRIES: i32 = 20;

/// Default per-job timeout (seconds) when none is supplied
/// (`original_source/sqlc/queries.sql.go`'s `coalesce(nullif($timeout, 0), 120)`).
pub const DEFAULT_TIMEOUT_SECS: i32 = 120;

/// Default `retries` when none is supplied (`original_source/sqlc/batch.go`'s
/// `coalesce(nullif($retries, 0), 5)`).
pub const DEFAULT_RETRIES: i32 = 5;

/// Default tenant label (spec.md §3, `original_source/ctx/ctx.go`).
pub const DEFAULT_OWNER: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Ready,
    Pending,
    Success,
    Failure,
    Paused,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Ready => "READY",
            JobStatus::Pending => "PENDING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failure => "FAILURE",
            JobStatus::Paused => "PAUSED",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "READY" => Ok(JobStatus::Ready),
            "PENDING" => Ok(JobStatus::Pending),
            "SUCCESS" => Ok(JobStatus::Success),
            "FAILURE" => Ok(JobStatus::Failure),
            "PAUSED" => Ok(JobStatus::Paused),
            other => Err(SchedulerError::Store(anyhow::anyhow!(
                "unknown job status {other:?}"
            ))),
        }
    }
}

/// The durable job row (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub expr: String,
    pub name: String,
    pub state: Option<String>,
    pub meta: Value,
    pub status: JobStatus,
    pub executor: String,
    pub owner: String,
    pub timeout: i32,
    pub retries: i32,
    pub start_at: DateTime<Utc>,
    pub run_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub execution_amount: i32,
    pub deduplication_key: Option<String>,
}

impl Job {
    /// `tiny.next(coalesce(last_run_at, created_at), expr)`, ported from
    /// `original_source/sqlc/queries.sql.go`'s `UpdateJobByID`/`UpdateJobByName`.
    pub fn recompute_run_at(&mut self, expr: &cron::Expr) {
        let reference = self.last_run_at.unwrap_or(self.created_at);
        self.run_at = cron::next(reference, expr);
    }

    pub fn is_one_shot(&self) -> bool {
        cron::is_one_shot(&self.expr)
    }
}

/// Arguments to `create`/`batch_create` (spec.md §6).
#[derive(Debug, Clone, Default)]
pub struct CreateArgs {
    pub expr: String,
    pub name: Option<String>,
    pub state: Option<String>,
    pub meta: Option<Value>,
    pub timeout: Option<i32>,
    pub start_at: Option<DateTime<Utc>>,
    pub retries: Option<i32>,
    pub deduplication_key: Option<String>,
    pub owner: Option<String>,
}

impl CreateArgs {
    pub fn new(expr: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            ..Default::default()
        }
    }

    /// Validate and fill in defaults, returning the values a store impl
    /// needs to insert a row (spec.md §6: clamp retries, default owner,
    /// default timeout). Does not assign `id`/`name`/`run_at` — those
    /// remain store responsibilities since `name` generation and `run_at`
    /// computation both need server-side uniqueness/clock authority.
    pub fn normalize(mut self, max_retries: i32) -> Result<Self, SchedulerError> {
        cron::validate(&self.expr).map_err(SchedulerError::Expr)?;
        if let Some(r) = self.retries {
            if r > max_retries {
                return Err(SchedulerError::RetriesExceedMax {
                    requested: r,
                    max: max_retries,
                });
            }
        }
        if self.owner.as_deref().map(str::is_empty).unwrap_or(true) {
            self.owner = Some(DEFAULT_OWNER.to_string());
        }
        if self.timeout.unwrap_or(0) <= 0 {
            self.timeout = Some(DEFAULT_TIMEOUT_SECS);
        }
        if self.retries.unwrap_or(0) <= 0 {
            self.retries = Some(DEFAULT_RETRIES);
        }
        Ok(self)
    }
}

/// Patch fields for `update_by_id`/`update_by_name` (spec.md §6: `expr`,
/// `state`, `timeout`).
#[derive(Debug, Clone, Default)]
pub struct UpdateArgs {
    pub expr: Option<String>,
    pub state: Option<String>,
    pub timeout: Option<i32>,
}

impl UpdateArgs {
    pub fn validate(&self) -> Result<(), ExprError> {
        if let Some(expr) = &self.expr {
            cron::validate(expr)?;
        }
        Ok(())
    }
}

/// `search(filter, limit <= 1000, skip)` (spec.md §6).
#[derive(Debug, Clone)]
pub struct SearchFilter {
    pub name_prefix: Option<String>,
    pub limit: i64,
    pub skip: i64,
}

impl Default for SearchFilter {
    fn default() -> Self {
        Self {
            name_prefix: None,
            limit: 100,
            skip: 0,
        }
    }
}

impl SearchFilter {
    pub fn clamp_limit(mut self) -> Self {
        self.limit = self.limit.clamp(1, 1000);
        self
    }
}

/// `search_by_meta(query, statuses, from, to, name, is_one_shot, limit, skip)`.
#[derive(Debug, Clone, Default)]
pub struct MetaSearchFilter {
    pub meta_query: Option<Value>,
    pub statuses: Vec<JobStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub name: Option<String>,
    pub is_one_shot: Option<bool>,
    pub limit: i64,
    pub skip: i64,
}

/// A verdict reported for a claimed job (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Commit,
    Fail,
    Retry,
}

/// One outcome submitted to the commit batcher.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub id: i64,
    pub verdict: Verdict,
    pub state: Option<String>,
    pub expr: Option<String>,
}

/// A per-row failure surfaced from a flush (spec.md §7).
#[derive(Debug, Clone)]
pub struct FailedOutcome {
    pub id: i64,
    pub error: String,
}

/// The storage seam (C2/C3). A concrete backend (e.g. `qrono-postgres`'s
/// `PgJobStore`) implements this trait; `qrono-core`'s dispatch loop,
/// batcher, and reaper are written only against it.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(
        &self,
        scope: &TenantScope,
        executor: &str,
        args: CreateArgs,
    ) -> Result<Job, SchedulerError>;

    async fn batch_create(
        &self,
        scope: &TenantScope,
        executor: &str,
        args: Vec<CreateArgs>,
    ) -> Result<Vec<i64>, SchedulerError>;

    async fn update_by_id(
        &self,
        scope: &TenantScope,
        executor: &str,
        id: i64,
        patch: UpdateArgs,
    ) -> Result<Job, SchedulerError>;

    async fn update_by_name(
        &self,
        scope: &TenantScope,
        executor: &str,
        name: &str,
        patch: UpdateArgs,
    ) -> Result<Job, SchedulerError>;

    async fn delete_by_id(
        &self,
        scope: &TenantScope,
        executor: &str,
        id: i64,
    ) -> Result<Job, SchedulerError>;

    async fn delete_by_name(
        &self,
        scope: &TenantScope,
        executor: &str,
        name: &str,
    ) -> Result<Job, SchedulerError>;

    async fn query_by_id(
        &self,
        scope: &TenantScope,
        executor: &str,
        id: i64,
    ) -> Result<Job, SchedulerError>;

    async fn query_by_name(
        &self,
        scope: &TenantScope,
        executor: &str,
        name: &str,
    ) -> Result<Job, SchedulerError>;

    async fn search(
        &self,
        scope: &TenantScope,
        executor: &str,
        filter: SearchFilter,
    ) -> Result<Vec<Job>, SchedulerError>;

    async fn search_by_meta(
        &self,
        scope: &TenantScope,
        executor: &str,
        filter: MetaSearchFilter,
    ) -> Result<Vec<Job>, SchedulerError>;

    async fn stop(&self, scope: &TenantScope, executor: &str, id: i64) -> Result<Job, SchedulerError>;

    async fn restart(&self, scope: &TenantScope, executor: &str, id: i64) -> Result<Job, SchedulerError>;

    /// Atomically claim up to `limit` due jobs for `executor` (C2). `scope`
    /// restricts visibility to a single tenant unless `TenantScope::Admin`.
    async fn claim_ready(
        &self,
        scope: &TenantScope,
        executor: &str,
        limit: i64,
    ) -> Result<Vec<Job>, SchedulerError>;

    /// Apply one verdict's worth of buffered outcomes as a single bulk
    /// update (C5). Returns the ids that failed to apply; those rows are
    /// left untouched and remain `PENDING` until the reaper reclaims them.
    async fn apply_outcomes(
        &self,
        scope: &TenantScope,
        executor: &str,
        verdict: Verdict,
        outcomes: &[Outcome],
        max_retries: i32,
    ) -> Result<Vec<FailedOutcome>, SchedulerError>;

    /// Reset every `PENDING` row past its `timeout` back to `READY` (C6).
    /// Returns the reclaimed ids.
    async fn reap_timeouts(&self, scope: &TenantScope, executor: &str) -> Result<Vec<i64>, SchedulerError>;
}

/// Tenant scope threaded through every `JobStore` call (C7). `Admin` sees
/// every row; `Owner` is restricted by row-level security (or, for
/// backends without RLS, an explicit `WHERE owner = ..` clause per
/// spec.md §9's fallback guidance).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantScope {
    Admin,
    Owner(String),
}

impl TenantScope {
    pub fn owner(owner: impl Into<String>) -> Self {
        TenantScope::Owner(owner.into())
    }

    pub fn as_owner_str(&self) -> Option<&str> {
        match self {
            TenantScope::Admin => None,
            TenantScope::Owner(o) => Some(o),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_args_normalize_defaults() {
        let args = CreateArgs::new("@every 1 hour")
            .normalize(DEFAULT_MAX_RETRIES)
            .unwrap();
        assert_eq!(args.owner.as_deref(), Some(DEFAULT_OWNER));
        assert_eq!(args.timeout, Some(DEFAULT_TIMEOUT_SECS));
        assert_eq!(args.retries, Some(DEFAULT_RETRIES));
    }

    #[test]
    fn create_args_reject_excess_retries() {
        let args = CreateArgs {
            retries: Some(21),
            ..CreateArgs::new("@every 1 hour")
        };
        assert!(matches!(
            args.normalize(DEFAULT_MAX_RETRIES),
            Err(SchedulerError::RetriesExceedMax { requested: 21, max: 20 })
        ));
    }

    #[test]
    fn create_args_reject_bad_expr() {
        let args = CreateArgs::new("@after ok week");
        assert!(args.normalize(DEFAULT_MAX_RETRIES).is_err());
    }

    #[test]
    fn search_filter_clamps_limit() {
        let f = SearchFilter {
            limit: 5000,
            ..Default::default()
        }
        .clamp_limit();
        assert_eq!(f.limit, 1000);
    }
}
