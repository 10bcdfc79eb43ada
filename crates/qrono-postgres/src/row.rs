//! The `qrono.job` row shape, mapped to/from [`qrono_core::Job`].
//!
//! A plain `#[derive(sqlx::FromRow)]` struct rather than `sqlx::query!`'s
//! compile-time checked queries, since the latter requires a live
//! `DATABASE_URL` at build time — `sqlx::query_as` binds by column name at
//! runtime instead, same as the teacher's `seesaw-job-postgres`.

use chrono::{DateTime, Utc};
use qrono_core::{Job, JobStatus};
use serde_json::Value;
use std::str::FromStr;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct JobRow {
    pub id: i64,
    pub expr: String,
    pub name: String,
    pub state: Option<String>,
    pub meta: Value,
    pub status: String,
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

impl JobRow {
    pub(crate) fn into_job(self) -> Result<Job, qrono_core::SchedulerError> {
        Ok(Job {
            id: self.id,
            expr: self.expr,
            name: self.name,
            state: self.state,
            meta: self.meta,
            status: JobStatus::from_str(&self.status)?,
            executor: self.executor,
            owner: self.owner,
            timeout: self.timeout,
            retries: self.retries,
            start_at: self.start_at,
            run_at: self.run_at,
            last_run_at: self.last_run_at,
            created_at: self.created_at,
            execution_amount: self.execution_amount,
            deduplication_key: self.deduplication_key,
        })
    }
}

// `status` is cast to `text` since `qrono.job_status` is a Postgres enum
// type `sqlx` has no `Type` impl for here; every other column decodes via
// its native mapping (`chrono`/`serde_json` feature impls).
pub(crate) const JOB_COLUMNS: &str = "id, expr, name, state, meta, status::text AS status, executor, owner, \
    timeout, retries, start_at, run_at, last_run_at, created_at, execution_amount, deduplication_key";
