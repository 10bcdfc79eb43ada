//! C5: the async commit batcher.
//!
//! Ported from `original_source/client.go`'s `flush`/`reset` machinery: a
//! buffered slice of outcomes is flushed either when it reaches a size
//! threshold or on a fixed ticker, whichever comes first. Outcomes are
//! grouped by [`crate::job::Verdict`] before each flush, since
//! `JobStore::apply_outcomes` applies one verdict per call (bulk commit,
//! bulk fail, bulk retry are three distinct SQL statements in
//! `original_source/sqlc/batch.go`).
//!
//! On cancellation the batcher does not flush immediately: spec.md's
//! invariant is that every outcome already accepted into the channel gets
//! applied, so the loop drains `rx` to `None` before performing its final
//! flush.

use crate::job::{FailedOutcome, JobStore, Outcome, TenantScope, Verdict};
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Failures surfaced from a completed flush, grouped by verdict so callers
/// can tell which bulk statement produced them.
#[derive(Debug, Default)]
pub struct FlushReport {
    pub committed: usize,
    pub failed: usize,
    pub retried: usize,
    pub rejected: Vec<FailedOutcome>,
}

/// Runs the batcher until `rx` closes, buffering [`Outcome`]s and flushing
/// them to `store` in bulk. `report_tx`, if supplied, receives one
/// [`FlushReport`] per flush — `engine.rs` uses this to surface
/// `apply_outcomes` failures to callers without blocking the hot path.
pub async fn run(
    store: Arc<dyn JobStore>,
    scope: TenantScope,
    executor: String,
    flush_interval: Duration,
    max_flush_size: usize,
    max_retries: i32,
    mut rx: mpsc::Receiver<Outcome>,
    mut cancel: watch::Receiver<bool>,
    report_tx: Option<mpsc::UnboundedSender<FlushReport>>,
) {
    let mut buffer: SmallVec<[Outcome; 16]> = SmallVec::new();
    let mut ticker = tokio::time::interval(flush_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                flush(&*store, &scope, &executor, max_retries, &mut buffer, &report_tx).await;
            }
            changed = cancel.changed() => {
                if changed.is_ok() && *cancel.borrow() {
                    tracing::info!(executor = %executor, "batcher observed cancellation, draining outcome channel");
                    while let Some(outcome) = rx.recv().await {
                        buffer.push(outcome);
                        if buffer.len() >= max_flush_size {
                            flush(&*store, &scope, &executor, max_retries, &mut buffer, &report_tx).await;
                        }
                    }
                    flush(&*store, &scope, &executor, max_retries, &mut buffer, &report_tx).await;
                    return;
                }
            }
            outcome = rx.recv() => {
                match outcome {
                    Some(outcome) => {
                        buffer.push(outcome);
                        if buffer.len() >= max_flush_size {
                            flush(&*store, &scope, &executor, max_retries, &mut buffer, &report_tx).await;
                        }
                    }
                    None => {
                        flush(&*store, &scope, &executor, max_retries, &mut buffer, &report_tx).await;
                        return;
                    }
                }
            }
        }
    }
}

async fn flush(
    store: &dyn JobStore,
    scope: &TenantScope,
    executor: &str,
    max_retries: i32,
    buffer: &mut SmallVec<[Outcome; 16]>,
    report_tx: &Option<mpsc::UnboundedSender<FlushReport>>,
) {
    if buffer.is_empty() {
        return;
    }

    let mut commits: SmallVec<[Outcome; 16]> = SmallVec::new();
    let mut fails: SmallVec<[Outcome; 16]> = SmallVec::new();
    let mut retries: SmallVec<[Outcome; 16]> = SmallVec::new();
    for outcome in buffer.drain(..) {
        match outcome.verdict {
            Verdict::Commit => commits.push(outcome),
            Verdict::Fail => fails.push(outcome),
            Verdict::Retry => retries.push(outcome),
        }
    }

    let mut report = FlushReport::default();
    report.committed = commits.len();
    report.failed = fails.len();
    report.retried = retries.len();

    for (verdict, group) in [
        (Verdict::Commit, &commits[..]),
        (Verdict::Fail, &fails[..]),
        (Verdict::Retry, &retries[..]),
    ] {
        if group.is_empty() {
            continue;
        }
        match store
            .apply_outcomes(scope, executor, verdict, group, max_retries)
            .await
        {
            Ok(rejected) => {
                if !rejected.is_empty() {
                    tracing::warn!(
                        executor = %executor,
                        verdict = ?verdict,
                        count = rejected.len(),
                        "outcomes rejected by store, rows left for the reaper"
                    );
                    report.rejected.extend(rejected);
                }
            }
            Err(err) => {
                tracing::error!(executor = %executor, verdict = ?verdict, error = %err, "flush failed");
            }
        }
    }

    if let Some(tx) = report_tx {
        let _ = tx.send(report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::CreateArgs;
    use qrono_testing::MemoryJobStore;

    #[tokio::test]
    async fn flushes_on_channel_close_after_drain() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let scope = TenantScope::owner("acme");
        let job = store
            .create(&scope, "noop", CreateArgs::new("@every 1 minute"))
            .await
            .unwrap();

        let (tx, rx) = mpsc::channel(8);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (report_tx, mut report_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(run(
            store.clone(),
            scope.clone(),
            "noop".to_string(),
            Duration::from_secs(60),
            100,
            20,
            rx,
            cancel_rx,
            Some(report_tx),
        ));

        tx.send(Outcome {
            id: job.id,
            verdict: Verdict::Commit,
            state: None,
            expr: None,
        })
        .await
        .unwrap();
        drop(tx);

        handle.await.unwrap();
        let report = report_rx.recv().await.unwrap();
        assert_eq!(report.committed, 1);
    }

    #[tokio::test]
    async fn drains_remaining_outcomes_after_cancel_before_final_flush() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let scope = TenantScope::owner("acme");
        let job = store
            .create(&scope, "noop", CreateArgs::new("@every 1 minute"))
            .await
            .unwrap();

        let (tx, rx) = mpsc::channel(8);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (report_tx, mut report_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(run(
            store.clone(),
            scope.clone(),
            "noop".to_string(),
            Duration::from_secs(60),
            100,
            20,
            rx,
            cancel_rx,
            Some(report_tx),
        ));

        cancel_tx.send(true).unwrap();
        tx.send(Outcome {
            id: job.id,
            verdict: Verdict::Commit,
            state: None,
            expr: None,
        })
        .await
        .unwrap();
        drop(tx);

        handle.await.unwrap();
        let report = report_rx.recv().await.unwrap();
        assert_eq!(report.committed, 1);
    }
}
