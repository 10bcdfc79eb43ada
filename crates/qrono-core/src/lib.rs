//! # qrono-core
//!
//! A durable, SQL-backed job scheduler's coordination layer: a cron-dialect
//! parser, the `Job`/`JobStore` data model, a per-executor dispatch loop,
//! an async commit batcher, a timeout reaper, and a tenant-scoping
//! adapter. Storage is a seam (`JobStore`); `qrono-postgres` supplies the
//! Postgres-backed implementation and `qrono-testing` an in-memory one for
//! tests.
//!
//! ## Core Concepts
//!
//! - [`job::Job`] — the durable row: schedule expression, status, owner,
//!   retry/timeout bookkeeping.
//! - [`job::JobStore`] — the storage seam every backend implements.
//! - [`cron::Expr`] — a parsed `@every`/`@after`/`@at`/5-field-cron schedule.
//! - [`engine::Worker`] — the facade applications construct: owns a store
//!   handle and a registry of running per-executor dispatch/batcher/reaper
//!   trios, exposing `fetch`/`ClaimedJob::commit`/`fail`/`retry` as the
//!   application-facing execution loop.
//!
//! ## Architecture
//!
//! ```text
//! Worker::start_executor("my-executor")
//!     │
//!     ├─► dispatch::run   ── claim_ready ──► claimed_tx ──► Worker::fetch ──► ClaimedJob
//!     │                                                                          │
//!     ├─► batcher::run    ◄── outcome_tx ◄── ClaimedJob::commit/fail/retry ─────┘
//!     │
//!     └─► reaper::run     ── reap_timeouts (reclaims abandoned PENDING rows)
//! ```
//!
//! ## What This Is Not
//!
//! qrono-core is **not**:
//! - An HTTP or GraphQL server
//! - A set of example job executors (HTTP callers, container runners)
//! - A migration CLI
//! - A distributed consensus or cross-store replication layer
//!
//! qrono-core **is**:
//! > The coordination layer for a durable, SQL-backed job scheduler, with
//! > at-least-once delivery and a pluggable storage backend.

mod batcher;
mod config;
mod cron;
mod dispatch;
mod engine;
mod error;
mod job;
mod job_builder;
mod reaper;
mod tenant;

// Re-export cron types and the pure `next`/`is_one_shot`/`validate` functions
// store implementations need to recompute `run_at` outside of `Job` methods
// (e.g. applying a verdict's `expr` override before the row is persisted).
pub use cron::{is_one_shot, next, parse, validate, CronSchedule, Expr, Interval, Unit};

// Re-export error types
pub use error::{ExprError, SchedulerError};

// Re-export job data model and storage seam
pub use job::{
    CreateArgs, FailedOutcome, Job, JobStatus, JobStore, MetaSearchFilter, Outcome, SearchFilter,
    TenantScope, UpdateArgs, Verdict, DEFAULT_MAX_RETRIES, DEFAULT_OWNER, DEFAULT_RETRIES,
    DEFAULT_TIMEOUT_SECS,
};

// Re-export the fluent job builder
pub use job_builder::{after, at, every, JobBuilder};

// Re-export tenant scoping adapters
pub use tenant::{AdminOwnerSetter, HeaderOwnerSetter, OwnerSetter, SharedOwnerSetter};

// Re-export configuration
pub use config::{ConfigError, WorkerConfig, WorkerConfigBuilder};

// Re-export the engine facade
pub use engine::{ClaimedJob, Worker};

// Re-export the commit batcher's flush report (used to surface rejected
// outcomes back to applications)
pub use batcher::FlushReport;

// Re-export commonly used external types
pub use async_trait::async_trait;
