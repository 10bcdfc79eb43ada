//! The `Worker` facade (spec.md §4/§6): one store handle fronting a
//! `DashMap`-keyed registry of per-executor dispatch/batcher/reaper trios.
//!
//! Grounded on `original_source/client.go`'s `Client`, which owns exactly
//! this trio of goroutines per executor behind a single `sync.Map`, and on
//! the teacher's `Engine`/`EngineBuilder`/`EngineHandle` split between a
//! long-lived coordinator and a cheaply-cloneable handle callers pass
//! around.

use crate::batcher::{self, FlushReport};
use crate::config::WorkerConfig;
use crate::dispatch;
use crate::error::SchedulerError;
use crate::job::{
    CreateArgs, Job, JobStore, MetaSearchFilter, Outcome, SearchFilter, TenantScope, UpdateArgs,
    Verdict,
};
use crate::reaper;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// State for one running executor: the three background loops plus the
/// channels a caller's `fetch`/`ClaimedJob::commit` interact with.
struct ExecutorHandle {
    cancel: watch::Sender<bool>,
    dispatch_task: JoinHandle<()>,
    batcher_task: JoinHandle<()>,
    reaper_task: JoinHandle<()>,
    claimed_rx: Mutex<mpsc::Receiver<Job>>,
    outcome_tx: mpsc::Sender<Outcome>,
    in_flight: Arc<AtomicI64>,
    max_in_flight: Arc<AtomicI64>,
    report_rx: Mutex<mpsc::UnboundedReceiver<FlushReport>>,
}

/// A job claimed by the dispatch loop, handed to application code through
/// [`Worker::fetch`]. Exactly one of [`ClaimedJob::commit`],
/// [`ClaimedJob::fail`], or [`ClaimedJob::retry`] must be called — the
/// direct analogue of `original_source/client.go`'s `job.Commit()` /
/// `job.Fail()` returned alongside each fetched job.
pub struct ClaimedJob {
    job: Job,
    outcome_tx: mpsc::Sender<Outcome>,
    in_flight: Arc<AtomicI64>,
    reported: bool,
}

impl std::ops::Deref for ClaimedJob {
    type Target = Job;
    fn deref(&self) -> &Job {
        &self.job
    }
}

impl ClaimedJob {
    /// The job ran to completion successfully.
    pub async fn commit(self, state: Option<String>) -> Result<(), SchedulerError> {
        self.report(Verdict::Commit, state, None).await
    }

    /// The job's executor threw a terminal error; `apply_outcomes` bumps
    /// its `execution_amount` and moves it to `FAILURE` once retries are
    /// exhausted (spec.md §4.5).
    pub async fn fail(self, state: Option<String>) -> Result<(), SchedulerError> {
        self.report(Verdict::Fail, state, None).await
    }

    /// The job should be retried: recurring jobs recompute `run_at` from
    /// `expr`, one-shot jobs are scheduled again via the supplied `expr`
    /// override (spec.md §4.5's retry-with-backoff case).
    pub async fn retry(self, state: Option<String>, expr: Option<String>) -> Result<(), SchedulerError> {
        self.report(Verdict::Retry, state, expr).await
    }

    async fn report(
        mut self,
        verdict: Verdict,
        state: Option<String>,
        expr: Option<String>,
    ) -> Result<(), SchedulerError> {
        self.reported = true;
        let outcome = Outcome {
            id: self.job.id,
            verdict,
            state,
            expr,
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.outcome_tx
            .send(outcome)
            .await
            .map_err(|_| SchedulerError::Store(anyhow::anyhow!("outcome channel closed")))
    }
}

impl Drop for ClaimedJob {
    fn drop(&mut self) {
        if !self.reported {
            // Caller dropped the job without reporting a verdict. Release
            // the in-flight slot so the dispatch loop isn't permanently
            // starved; the row itself is reclaimed later by the reaper
            // once its `timeout` elapses (spec.md §4.6).
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!(id = self.job.id, "claimed job dropped without a verdict, leaving it for the reaper");
        }
    }
}

/// The coordination facade spec.md §4/§6 describes: one store handle, a
/// registry of running executors, and the CRUD passthroughs applications
/// use to manage job rows outside of a fetch/commit cycle.
pub struct Worker {
    store: Arc<dyn JobStore>,
    config: WorkerConfig,
    executors: DashMap<String, ExecutorHandle>,
}

impl Worker {
    pub fn new(store: Arc<dyn JobStore>, config: WorkerConfig) -> Self {
        Self {
            store,
            config,
            executors: DashMap::new(),
        }
    }

    /// Start the dispatch/batcher/reaper trio for `executor` if it isn't
    /// already running. Idempotent, matching `original_source/client.go`'s
    /// `sync.Map.LoadOrStore` guard in `Fetch`.
    pub fn start_executor(&self, scope: TenantScope, executor: impl Into<String>) {
        let executor = executor.into();
        if self.executors.contains_key(&executor) {
            return;
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (claimed_tx, claimed_rx) = mpsc::channel(self.config.max_in_flight as usize + 1);
        let (outcome_tx, outcome_rx) = mpsc::channel(self.config.max_in_flight as usize + 1);
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let in_flight = Arc::new(AtomicI64::new(0));
        let max_in_flight = Arc::new(AtomicI64::new(self.config.max_in_flight as i64));

        let dispatch_task = tokio::spawn(dispatch::run(
            self.store.clone(),
            scope.clone(),
            executor.clone(),
            self.config.poll_interval,
            max_in_flight.clone(),
            in_flight.clone(),
            claimed_tx,
            cancel_rx.clone(),
        ));

        let batcher_task = tokio::spawn(batcher::run(
            self.store.clone(),
            scope.clone(),
            executor.clone(),
            self.config.flush_interval,
            self.config.max_flush_size,
            self.config.max_retries,
            outcome_rx,
            cancel_rx.clone(),
            Some(report_tx),
        ));

        let reaper_task = tokio::spawn(reaper::run(
            self.store.clone(),
            scope,
            executor.clone(),
            self.config.reset_interval,
            cancel_rx,
        ));

        self.executors.insert(
            executor,
            ExecutorHandle {
                cancel: cancel_tx,
                dispatch_task,
                batcher_task,
                reaper_task,
                claimed_rx: Mutex::new(claimed_rx),
                outcome_tx,
                in_flight,
                max_in_flight,
                report_rx: Mutex::new(report_rx),
            },
        );
    }

    /// Signal cancellation to `executor`'s trio and await all three tasks.
    /// Per spec.md §5, the batcher performs one final flush only after it
    /// has drained every outcome already in flight, so this returns once
    /// every already-claimed job's verdict (if reported) has been applied.
    pub async fn stop_executor(&self, executor: &str) {
        if let Some((_, handle)) = self.executors.remove(executor) {
            let _ = handle.cancel.send(true);
            let _ = handle.dispatch_task.await;
            let _ = handle.batcher_task.await;
            let _ = handle.reaper_task.await;
        }
    }

    /// Stop every running executor. Called on graceful shutdown.
    pub async fn stop_all(&self) {
        let names: Vec<String> = self.executors.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.stop_executor(&name).await;
        }
    }

    /// Pull the next claimed job for `executor`, if the dispatch loop has
    /// one buffered. Returns `None` once the loop has been cancelled and
    /// its output channel drained.
    pub async fn fetch(&self, executor: &str) -> Option<ClaimedJob> {
        let handle = self.executors.get(executor)?;
        let mut rx = handle.claimed_rx.lock().await;
        let job = rx.recv().await?;
        Some(ClaimedJob {
            job,
            outcome_tx: handle.outcome_tx.clone(),
            in_flight: handle.in_flight.clone(),
            reported: false,
        })
    }

    /// Drain buffered [`FlushReport`]s for `executor`, if any are
    /// available without blocking. Applications poll this to surface
    /// `apply_outcomes` rejections raised by the batcher.
    pub async fn try_next_flush_report(&self, executor: &str) -> Option<FlushReport> {
        let handle = self.executors.get(executor)?;
        let mut rx = handle.report_rx.lock().await;
        rx.try_recv().ok()
    }

    /// Current in-flight count for `executor` (spec.md §4.4's capacity
    /// bookkeeping), for diagnostics/metrics.
    pub fn in_flight(&self, executor: &str) -> i64 {
        self.executors
            .get(executor)
            .map(|h| h.in_flight.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Raise `executor`'s in-flight cap by `by` without restarting the
    /// dispatch loop, the direct analogue of
    /// `original_source/client.go`'s `IncreaseInFlight` (spec.md §4.4). A
    /// no-op if `executor` isn't running.
    pub fn increase_in_flight(&self, executor: &str, by: i64) {
        if let Some(handle) = self.executors.get(executor) {
            handle.max_in_flight.fetch_add(by, Ordering::SeqCst);
        }
    }

    /// Lower `executor`'s in-flight cap by `by`, the analogue of
    /// `original_source/client.go`'s `DecreaseInFlight`. Clamped at 1 so the
    /// dispatch loop never stalls entirely; a no-op if `executor` isn't
    /// running.
    pub fn decrease_in_flight(&self, executor: &str, by: i64) {
        if let Some(handle) = self.executors.get(executor) {
            handle
                .max_in_flight
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                    Some((cur - by).max(1))
                })
                .ok();
        }
    }

    /// Validates `args` against this worker's configured `max_retries`
    /// (spec.md §6: "Retries clamped to a configured maximum ... reject
    /// higher") before delegating to the store. The store's own `create`
    /// still fills in name/owner/timeout/retries defaults and computes
    /// `run_at`, since those need the store's clock/uniqueness authority.
    pub async fn create(
        &self,
        scope: &TenantScope,
        executor: &str,
        args: CreateArgs,
    ) -> Result<Job, SchedulerError> {
        let args = args.normalize(self.config.max_retries)?;
        self.store.create(scope, executor, args).await
    }

    pub async fn batch_create(
        &self,
        scope: &TenantScope,
        executor: &str,
        args: Vec<CreateArgs>,
    ) -> Result<Vec<i64>, SchedulerError> {
        let mut normalized = Vec::with_capacity(args.len());
        for a in args {
            normalized.push(a.normalize(self.config.max_retries)?);
        }
        self.store.batch_create(scope, executor, normalized).await
    }

    pub async fn update_by_id(
        &self,
        scope: &TenantScope,
        executor: &str,
        id: i64,
        patch: UpdateArgs,
    ) -> Result<Job, SchedulerError> {
        self.store.update_by_id(scope, executor, id, patch).await
    }

    pub async fn update_by_name(
        &self,
        scope: &TenantScope,
        executor: &str,
        name: &str,
        patch: UpdateArgs,
    ) -> Result<Job, SchedulerError> {
        self.store.update_by_name(scope, executor, name, patch).await
    }

    pub async fn delete_by_id(&self, scope: &TenantScope, executor: &str, id: i64) -> Result<Job, SchedulerError> {
        self.store.delete_by_id(scope, executor, id).await
    }

    pub async fn delete_by_name(&self, scope: &TenantScope, executor: &str, name: &str) -> Result<Job, SchedulerError> {
        self.store.delete_by_name(scope, executor, name).await
    }

    pub async fn query_by_id(&self, scope: &TenantScope, executor: &str, id: i64) -> Result<Job, SchedulerError> {
        self.store.query_by_id(scope, executor, id).await
    }

    pub async fn query_by_name(&self, scope: &TenantScope, executor: &str, name: &str) -> Result<Job, SchedulerError> {
        self.store.query_by_name(scope, executor, name).await
    }

    pub async fn search(
        &self,
        scope: &TenantScope,
        executor: &str,
        filter: SearchFilter,
    ) -> Result<Vec<Job>, SchedulerError> {
        self.store.search(scope, executor, filter.clamp_limit()).await
    }

    pub async fn search_by_meta(
        &self,
        scope: &TenantScope,
        executor: &str,
        filter: MetaSearchFilter,
    ) -> Result<Vec<Job>, SchedulerError> {
        self.store.search_by_meta(scope, executor, filter).await
    }

    pub async fn stop(&self, scope: &TenantScope, executor: &str, id: i64) -> Result<Job, SchedulerError> {
        self.store.stop(scope, executor, id).await
    }

    pub async fn restart(&self, scope: &TenantScope, executor: &str, id: i64) -> Result<Job, SchedulerError> {
        self.store.restart(scope, executor, id).await
    }
}
