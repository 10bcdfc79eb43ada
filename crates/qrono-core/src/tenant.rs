//! Tenant scoping adapter (C7).
//!
//! `original_source/ctx/ctx.go`'s `ExecutorSetterMiddleware` reads an
//! `x-owner` HTTP header and binds it onto the request context before
//! every GraphQL resolver call. The HTTP/GraphQL surface itself is out of
//! scope here (spec.md §1), but the binding rule — "read caller identity,
//! default to `default`, bind as a `TenantScope`" — is the
//! `owner_setter` configuration option spec.md §6 requires, generalized
//! away from `net/http` to a transport-agnostic attribute map so it can
//! sit in front of any adapter a caller builds on top of this crate.

use crate::job::{TenantScope, DEFAULT_OWNER};
use std::collections::HashMap;
use std::sync::Arc;

/// Reads caller identity out of transport-level attributes (HTTP headers,
/// gRPC metadata, ...) and binds a [`TenantScope`] for the interaction.
pub trait OwnerSetter: Send + Sync {
    fn owner_for(&self, attributes: &HashMap<String, String>) -> TenantScope;
}

/// Default owner setter: reads a single attribute key, defaulting to
/// `"default"` when absent or empty — the direct port of
/// `ExecutorSetterMiddleware`.
pub struct HeaderOwnerSetter {
    pub header: String,
}

impl HeaderOwnerSetter {
    pub fn new(header: impl Into<String>) -> Self {
        Self { header: header.into() }
    }
}

impl Default for HeaderOwnerSetter {
    fn default() -> Self {
        Self::new("x-owner")
    }
}

impl OwnerSetter for HeaderOwnerSetter {
    fn owner_for(&self, attributes: &HashMap<String, String>) -> TenantScope {
        let owner = attributes
            .get(&self.header)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_OWNER.to_string());
        TenantScope::owner(owner)
    }
}

/// An owner setter that always binds the admin scope (bypasses row-level
/// scoping entirely — spec.md §4.3: "Admin callers bypass the adapter").
pub struct AdminOwnerSetter;

impl OwnerSetter for AdminOwnerSetter {
    fn owner_for(&self, _attributes: &HashMap<String, String>) -> TenantScope {
        TenantScope::Admin
    }
}

pub type SharedOwnerSetter = Arc<dyn OwnerSetter>;
