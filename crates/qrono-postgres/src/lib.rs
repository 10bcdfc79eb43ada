//! # qrono-postgres
//!
//! The Postgres-backed [`qrono_core::JobStore`]: [`PgJobStore`]. Ported from
//! the teacher's `seesaw-job-postgres` crate (same `PgPool`-wrapping shape,
//! same `FOR UPDATE SKIP LOCKED` claim pattern) and `original_source`'s
//! `sqlc`-generated queries (exact SQL shapes for defaulting, the claim
//! CTE, and the bulk verdict-update statements).
//!
//! ```rust,ignore
//! use qrono_postgres::PgJobStore;
//! use sqlx::postgres::PgPoolOptions;
//!
//! let pool = PgPoolOptions::new().connect("postgres://localhost/qrono").await?;
//! PgJobStore::migrate(&pool).await?;
//! let store = PgJobStore::new(pool);
//! ```
//!
//! [`TenantPool`] is the per-pool alternative to binding the tenant on
//! every query transaction: connect one per tenant and every acquired
//! connection already has `qrono.owner` bound.

mod row;
mod store;
mod tenant_pool;

pub use store::PgJobStore;
pub use tenant_pool::TenantPool;
