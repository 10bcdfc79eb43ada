//! Per-pool tenant binding (spec.md §4.7's first binding pattern).
//!
//! `PgJobStore::bind_owner` is the per-transaction pattern: a short
//! transaction sets `qrono.owner` locally, runs one statement, commits
//! (ported from `original_source/sqlc/owner.go`'s `WithOwner`). That
//! pattern pays a transaction per call. `TenantPool` is the other pattern
//! spec.md §4.7 requires: a pool whose connections already have
//! `qrono.owner` bound the moment a caller acquires them, and have it
//! cleared again before they go back into circulation, using `sqlx`'s
//! pool connection-lifecycle hooks rather than a transaction per query.

use crate::store::PgJobStore;
use qrono_core::TenantScope;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// A `PgPool` whose every connection runs bound to one [`TenantScope`] for
/// its entire time out of the pool.
///
/// `TenantScope::Admin` binds nothing — admin access is expected to run as
/// a role RLS doesn't apply to, same as [`PgJobStore::bind_owner`]'s Admin
/// no-op.
pub struct TenantPool {
    pool: PgPool,
}

impl TenantPool {
    /// Connects a pool capped at `max_connections`, binding `scope` on every
    /// connection as it's handed out and clearing it again before the
    /// connection is returned to the pool.
    ///
    /// A connection whose reset fails is discarded rather than recycled
    /// (spec.md:172) — `after_release` returning `Ok(false)` tells `sqlx` to
    /// close the connection instead of pooling it.
    pub async fn connect(
        url: &str,
        scope: TenantScope,
        max_connections: u32,
    ) -> Result<Self, sqlx::Error> {
        let bind_scope = scope.clone();
        let reset_scope = scope;
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .after_connect(move |conn, _meta| {
                let scope = bind_scope.clone();
                Box::pin(async move {
                    if let TenantScope::Owner(owner) = &scope {
                        sqlx::query("SELECT set_config('qrono.owner', $1, false)")
                            .bind(owner)
                            .execute(&mut *conn)
                            .await?;
                    }
                    Ok(())
                })
            })
            .after_release(move |conn, _meta| {
                let scope = reset_scope.clone();
                Box::pin(async move {
                    if !matches!(scope, TenantScope::Owner(_)) {
                        return Ok(true);
                    }
                    match sqlx::query("SELECT set_config('qrono.owner', '', false)")
                        .execute(&mut *conn)
                        .await
                    {
                        Ok(_) => Ok(true),
                        Err(_) => Ok(false),
                    }
                })
            })
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Wraps this scoped pool as a [`PgJobStore`]. Every query the returned
    /// store issues runs on a connection already bound to this pool's
    /// tenant, so `PgJobStore::bind_owner`'s per-transaction `SET LOCAL` is
    /// redundant (and harmless) on top of it.
    pub fn into_store(self) -> PgJobStore {
        PgJobStore::new(self.pool)
    }
}

impl From<TenantPool> for PgPool {
    fn from(tenant_pool: TenantPool) -> Self {
        tenant_pool.pool
    }
}
