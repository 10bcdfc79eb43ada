//! C6: the timeout reaper.
//!
//! Ported from `original_source/client.go`'s `reset` goroutine, which calls
//! `ResetTimeoutJobs` on a fixed ticker to reclaim `PENDING` rows whose
//! `timeout` has elapsed back to `READY`. Unlike dispatch/batcher there is
//! no per-call backpressure to manage, so the loop is a plain ticker with a
//! cancellation check.

use crate::job::{JobStore, TenantScope};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Runs the reaper loop until cancellation is observed.
pub async fn run(
    store: Arc<dyn JobStore>,
    scope: TenantScope,
    executor: String,
    reset_interval: Duration,
    mut cancel: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(reset_interval);

    loop {
        tokio::select! {
            biased;
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    tracing::info!(executor = %executor, "reaper loop cancelled");
                    break;
                }
            }
            _ = ticker.tick() => {
                match store.reap_timeouts(&scope, &executor).await {
                    Ok(ids) if !ids.is_empty() => {
                        tracing::info!(executor = %executor, reclaimed = ids.len(), "reclaimed timed-out jobs");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(executor = %executor, error = %err, "reap_timeouts failed, will retry next tick");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::CreateArgs;
    use qrono_testing::MemoryJobStore;

    #[tokio::test]
    async fn reaper_reclaims_timed_out_jobs() {
        let store = Arc::new(MemoryJobStore::new());
        let scope = TenantScope::owner("acme");
        // `@every`'s smallest unit is a whole minute (spec.md §4.1); back-date
        // `start_at` so the freshly-created row is immediately claimable
        // instead of waiting a full minute for `run_at` to elapse.
        let job = store
            .create(
                &scope,
                "noop",
                CreateArgs {
                    start_at: Some(chrono::Utc::now() - chrono::Duration::hours(1)),
                    ..CreateArgs::new("@every 1 minute")
                },
            )
            .await
            .unwrap();
        let claimed = store.claim_ready(&scope, "noop", 10).await.unwrap();
        assert_eq!(claimed.len(), 1, "job should be claimable once due");
        store.force_expire_timeout(job.id);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let store_dyn: Arc<dyn JobStore> = store.clone();
        let handle = tokio::spawn(run(
            store_dyn,
            scope.clone(),
            "noop".to_string(),
            Duration::from_millis(5),
            cancel_rx,
        ));

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel_tx.send(true).unwrap();
        handle.await.unwrap();

        let refreshed = store.query_by_id(&scope, "noop", job.id).await.unwrap();
        assert_eq!(refreshed.status, crate::job::JobStatus::Ready);
    }
}
