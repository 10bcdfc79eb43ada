//! A typestate-free fluent builder over [`CreateArgs`], mirroring
//! `original_source/sugar.go`'s generic `Scheduled[T]` helper (which lets
//! Go callers write `qron.Every(time.Hour).WithState(payload).Build()`
//! instead of hand-filling a `CreateJobParams`).
//!
//! `meta`/`state` stay `serde_json::Value`/`String` here rather than a
//! generic `T`, since spec.md §3 fixes both fields as already-serialized
//! JSON/text rather than a type parameter the store would need to erase.

use crate::cron::Expr;
use crate::job::CreateArgs;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Starts a [`JobBuilder`] for a recurring schedule (`@every <interval>`),
/// the direct analogue of `sugar.go`'s `qron.Every(...)`.
pub fn every(expr: impl Into<String>) -> JobBuilder {
    JobBuilder::new(expr)
}

/// Starts a [`JobBuilder`] for a one-shot delay (`@after <interval>`).
pub fn after(expr: impl Into<String>) -> JobBuilder {
    JobBuilder::new(expr)
}

/// Starts a [`JobBuilder`] for a one-shot absolute fire time (`@at <rfc3339>`).
pub fn at(expr: impl Into<String>) -> JobBuilder {
    JobBuilder::new(expr)
}

/// Fluent constructor for [`CreateArgs`]. Unlike `sugar.go`'s `Scheduled[T]`,
/// which is generic over the payload type, this builder validates the
/// schedule expression up front via [`crate::cron::parse`] so a malformed
/// `expr` is caught at `.build()` time rather than surfacing later as a
/// store error.
pub struct JobBuilder {
    args: CreateArgs,
    parsed: Result<Expr, crate::error::ExprError>,
}

impl JobBuilder {
    pub fn new(expr: impl Into<String>) -> Self {
        let expr = expr.into();
        let parsed = crate::cron::parse(&expr);
        Self {
            args: CreateArgs::new(expr),
            parsed,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.args.name = Some(name.into());
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.args.state = Some(state.into());
        self
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.args.meta = Some(meta);
        self
    }

    pub fn timeout_secs(mut self, secs: i32) -> Self {
        self.args.timeout = Some(secs);
        self
    }

    pub fn start_at(mut self, at: DateTime<Utc>) -> Self {
        self.args.start_at = Some(at);
        self
    }

    pub fn retries(mut self, n: i32) -> Self {
        self.args.retries = Some(n);
        self
    }

    pub fn deduplication_key(mut self, key: impl Into<String>) -> Self {
        self.args.deduplication_key = Some(key.into());
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.args.owner = Some(owner.into());
        self
    }

    /// Finish, returning the validated [`Expr`] alongside the assembled
    /// [`CreateArgs`] so callers don't need to re-parse `expr` themselves
    /// (`Worker::create` does exactly this).
    pub fn build(self) -> Result<(CreateArgs, Expr), crate::error::ExprError> {
        let expr = self.parsed?;
        Ok((self.args, expr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builds_valid_args() {
        let (args, expr) = every("@every 1 hour")
            .named("nightly-report")
            .timeout_secs(30)
            .build()
            .unwrap();
        assert_eq!(args.name.as_deref(), Some("nightly-report"));
        assert_eq!(args.timeout, Some(30));
        assert!(matches!(expr, Expr::Every(_)));
    }

    #[test]
    fn rejects_bad_expr_at_build_time() {
        let err = after("not-a-duration").build();
        assert!(err.is_err());
    }
}
