//! C4: the per-worker dispatch loop.
//!
//! Ported from `original_source/client.go`'s `Fetch` goroutine, which polls
//! `fetchDueJobs` on a ticker and streams claimed rows onto a buffered Go
//! channel guarded by a semaphore of `maxInFlight`. Here the semaphore
//! becomes channel backpressure (a bounded `mpsc`), and the goroutine's
//! `ctx.Done()` select-arm becomes a `tokio::sync::watch<bool>`.

use crate::error::SchedulerError;
use crate::job::{Job, JobStore, TenantScope};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

/// Runs the dispatch loop until cancellation is observed, claiming due jobs
/// for `executor` on every tick and handing each one to `out`.
///
/// `in_flight` tracks how many claimed jobs are currently outstanding
/// (incremented here on claim, decremented by `engine.rs` when a
/// [`crate::job::Outcome`] is reported for one). Each tick claims no more
/// than `max_in_flight - in_flight.load()`, the direct port of
/// `original_source/client.go`'s `maxInFlight` semaphore.
///
/// `max_in_flight` is itself an atomic rather than a plain value so
/// `Worker::increase_in_flight`/`decrease_in_flight` (spec.md §4.4/§6,
/// `original_source/client.go`'s `IncreaseInFlight`/`DecreaseInFlight`) can
/// adjust the cap of an already-running executor without restarting it.
///
/// `out` is dropped when the loop exits, which is the signal the batcher
/// (C5) uses to know no further outcomes will ever be produced for jobs
/// claimed through this channel once the in-flight set drains — see
/// `engine.rs` for how the two channels are tied together.
pub async fn run(
    store: Arc<dyn JobStore>,
    scope: TenantScope,
    executor: String,
    poll_interval: Duration,
    max_in_flight: Arc<AtomicI64>,
    in_flight: Arc<AtomicI64>,
    out: mpsc::Sender<Job>,
    mut cancel: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            changed = cancel.changed() => {
                match changed {
                    Ok(()) if *cancel.borrow() => {
                        tracing::info!(executor = %executor, "dispatch loop cancelled");
                        break;
                    }
                    Ok(()) => continue,
                    Err(_) => break,
                }
            }
            _ = ticker.tick() => {
                let available = max_in_flight.load(Ordering::SeqCst) - in_flight.load(Ordering::SeqCst);
                if available <= 0 {
                    tracing::debug!(executor = %executor, "at max in-flight, skipping tick");
                    continue;
                }
                match claim_batch(&*store, &scope, &executor, available).await {
                    Ok(jobs) => {
                        let claimed = jobs.len();
                        if claimed > 0 {
                            in_flight.fetch_add(claimed as i64, Ordering::SeqCst);
                        }
                        for job in jobs {
                            if out.send(job).await.is_err() {
                                tracing::warn!(
                                    executor = %executor,
                                    "dispatch output channel closed while delivering claimed jobs"
                                );
                                return;
                            }
                        }
                        if claimed > 0 {
                            tracing::debug!(executor = %executor, claimed, "dispatched claimed jobs");
                        }
                    }
                    Err(err) => {
                        tracing::warn!(executor = %executor, error = %err, "claim_ready failed, will retry next tick");
                    }
                }
            }
        }
    }
}

async fn claim_batch(
    store: &dyn JobStore,
    scope: &TenantScope,
    executor: &str,
    limit: i64,
) -> Result<Vec<Job>, SchedulerError> {
    store.claim_ready(scope, executor, limit).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::CreateArgs;
    use qrono_testing::MemoryJobStore;

    /// `@every`/`@after`'s smallest unit is a whole minute (spec.md §4.1), so
    /// tests that need an immediately-claimable row back-date `start_at`
    /// rather than waiting a full minute for `run_at` to elapse.
    fn due_now(expr: &str) -> CreateArgs {
        CreateArgs {
            start_at: Some(chrono::Utc::now() - chrono::Duration::hours(1)),
            ..CreateArgs::new(expr)
        }
    }

    #[tokio::test]
    async fn dispatch_loop_delivers_claimed_jobs_then_stops_on_cancel() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let scope = TenantScope::owner("acme");
        store
            .create(&scope, "noop", due_now("@every 1 minute"))
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let in_flight = Arc::new(AtomicI64::new(0));

        let handle = tokio::spawn(run(
            store.clone(),
            scope,
            "noop".to_string(),
            Duration::from_millis(5),
            Arc::new(AtomicI64::new(10)),
            in_flight,
            tx,
            cancel_rx,
        ));

        let job = rx.recv().await.expect("a job should be dispatched");
        assert_eq!(job.executor, "noop");

        cancel_tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(rx.recv().await.is_none());
    }
}
