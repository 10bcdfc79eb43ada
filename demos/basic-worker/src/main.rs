//! A minimal end-to-end wiring of [`qrono_core::Worker`]: register one
//! executor, seed a couple of jobs, and run the fetch/commit loop until
//! `ctrl-c`.
//!
//! Connects to Postgres when `DATABASE_URL` is set (applying migrations on
//! startup via `PgJobStore::migrate`), otherwise falls back to
//! `qrono_testing::MemoryJobStore` so the demo runs with no external
//! dependencies.
//!
//! ```text
//! cargo run -p basic-worker
//! DATABASE_URL=postgres://localhost/qrono cargo run -p basic-worker
//! ```

use anyhow::Result;
use qrono_core::{CreateArgs, JobStore, TenantScope, Worker, WorkerConfig};
use std::sync::Arc;
use std::time::Duration;

const EXECUTOR: &str = "email-sender";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store: Arc<dyn JobStore> = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            tracing::info!("connecting to Postgres");
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(5)
                .connect(&url)
                .await?;
            qrono_postgres::PgJobStore::migrate(&pool).await?;
            Arc::new(qrono_postgres::PgJobStore::new(pool))
        }
        Err(_) => {
            tracing::info!("DATABASE_URL not set, using the in-memory store");
            Arc::new(qrono_testing::MemoryJobStore::new())
        }
    };

    let worker = Worker::new(
        store,
        WorkerConfig::builder()
            .poll_interval(Duration::from_millis(250))
            .flush_interval(Duration::from_millis(250))
            .reset_interval(Duration::from_secs(30))
            .build(),
    );

    let scope = TenantScope::owner("demo");
    seed_jobs(&worker, &scope).await?;
    worker.start_executor(scope.clone(), EXECUTOR);

    tracing::info!("worker running, press ctrl-c to stop");
    let fetch_loop = run_fetch_loop(&worker);

    tokio::select! {
        _ = fetch_loop => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }

    worker.stop_all().await;
    Ok(())
}

/// Seeds one recurring job and one one-shot job so there's always
/// something to fetch shortly after startup.
async fn seed_jobs(worker: &Worker, scope: &TenantScope) -> Result<()> {
    let recurring = worker
        .create(
            scope,
            EXECUTOR,
            CreateArgs {
                name: Some("nightly-digest".to_string()),
                ..CreateArgs::new("@every 1 minute")
            },
        )
        .await;
    match recurring {
        Ok(job) => tracing::info!(id = job.id, "seeded recurring job"),
        Err(err) => tracing::debug!(%err, "recurring job already exists, skipping"),
    }

    let one_shot = worker
        .create(
            scope,
            EXECUTOR,
            CreateArgs {
                name: Some("welcome-email".to_string()),
                start_at: Some(chrono::Utc::now()),
                ..CreateArgs::new("@after 1 minute")
            },
        )
        .await;
    match one_shot {
        Ok(job) => tracing::info!(id = job.id, "seeded one-shot job"),
        Err(err) => tracing::debug!(%err, "one-shot job already exists, skipping"),
    }

    Ok(())
}

/// Fetches claimed jobs forever, "executing" each by printing its name and
/// committing it. A real executor would dispatch `job.name`/`job.state` to
/// whatever work the row represents and report `fail`/`retry` on error.
async fn run_fetch_loop(worker: &Worker) {
    loop {
        let Some(claimed) = worker.fetch(EXECUTOR).await else {
            break;
        };
        tracing::info!(id = claimed.id, name = %claimed.name, "executing job");
        if let Err(err) = claimed.commit(Some("ok".to_string())).await {
            tracing::warn!(%err, "failed to report commit outcome");
        }
    }
}
