//! Error types for the scheduler.
//!
//! Mirrors the error-kind table in spec.md §7: expression parse errors and
//! uniqueness violations are returned synchronously to callers; store/claim/
//! reap errors are meant to be logged and retried by the caller rather than
//! propagated as fatal.

use thiserror::Error;

/// A categorized expression-parse failure, returned by `validate()` and by
/// `create`/`update_*` when the supplied `expr` cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("expression is empty")]
    Empty,

    #[error("unrecognized expression prefix: {0:?}")]
    UnknownPrefix(String),

    #[error("invalid `@every`/`@after` interval: {0}")]
    BadInterval(String),

    #[error("unknown time unit {0:?} (expected minute(s)/hour(s)/day(s)/week(s)/month(s)/year(s))")]
    UnknownUnit(String),

    #[error("`@at` timestamp could not be parsed: {0:?}")]
    BadTimestamp(String),

    #[error("`@at` timestamp has no timezone offset; naive timestamps are rejected: {0:?}")]
    NaiveTimestamp(String),

    #[error("cron expression must have exactly 5 fields, found {0}")]
    WrongFieldCount(usize),

    #[error("cron field {field:?} uses unsupported syntax {token:?} (`?`, `L`, `#`, `W`, seconds, and year fields are not supported)")]
    UnsupportedSyntax { field: &'static str, token: String },

    #[error("cron field {field:?} value {token:?} is out of range")]
    OutOfRange { field: &'static str, token: String },

    #[error("cron field {field:?} could not be parsed: {token:?}")]
    Malformed { field: &'static str, token: String },
}

/// Top-level scheduler error.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid expression: {0}")]
    Expr(#[from] ExprError),

    #[error("uniqueness violation on ({executor:?}, {owner:?}): {field} {value:?} already in use")]
    UniquenessViolation {
        executor: String,
        owner: String,
        field: &'static str,
        value: String,
    },

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("retries {requested} exceeds configured maximum {max}")]
    RetriesExceedMax { requested: i32, max: i32 },

    #[error("transient store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error("tenant scope violation: caller owner {caller:?} does not match row owner {row:?}")]
    TenantScopeViolation { caller: String, row: String },
}

impl SchedulerError {
    /// Whether this error represents a transient condition a caller's
    /// next tick should simply retry, per spec.md §7.
    pub fn is_transient(&self) -> bool {
        matches!(self, SchedulerError::Store(_))
    }
}
