//! Scope Matching
//!
//! Path-pattern entitlements attached to credentials. An empty scope set is
//! unrestricted; otherwise some pattern must match the request path.

use crate::model::Key;

/// Check whether a single scope pattern matches a request path.
///
/// - `*` matches everything
/// - `/prefix/*` matches `/prefix` itself and anything under `/prefix/`
/// - anything else must match exactly
pub fn matches_scope(pattern: &str, path: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if let Some(prefix) = pattern.strip_suffix("/*") {
        return path == prefix || path.starts_with(&format!("{prefix}/"));
    }

    pattern == path
}

/// Check whether a key's scopes cover a request path.
///
/// An empty scope set means the key is unrestricted.
pub fn has_scope(key: &Key, path: &str) -> bool {
    if key.scopes.is_empty() {
        return true;
    }

    key.scopes.iter().any(|scope| matches_scope(scope, path))
}
