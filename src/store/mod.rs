//! Persistence Ports
//!
//! Capability interfaces the core consumes. Any backend is acceptable
//! provided it upholds these contracts; the in-memory reference
//! implementations live in [`memory`] and in the sharded stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{Key, QuotaState, RateLimitConfig, UsageEvent, UsageSummary, User, WindowState};
use crate::ratelimit::RateLimitDecision;
use crate::usage::UsagePeriod;

/// In-memory reference implementations
pub mod memory;

// ============================================================================
// Credential Store
// ============================================================================

/// Storage for issued credentials, indexed by the non-unique token prefix
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// All keys sharing a lookup prefix; duplicates are permitted but rare
    async fn get_by_prefix(&self, prefix: &str) -> Result<Vec<Key>>;

    /// Persist a newly issued key
    async fn create(&self, key: Key) -> Result<()>;

    /// Set the revocation instant. Idempotent: revoking an absent or
    /// already-revoked key succeeds vacuously, and a set instant is never
    /// overwritten.
    async fn revoke(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    /// All keys owned by a user
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Key>>;

    /// Best-effort last-used bookkeeping. Idempotent when the key is
    /// absent; implementations may ignore instants older than the stored
    /// value.
    async fn update_last_used(&self, id: &str, at: DateTime<Utc>) -> Result<()>;
}

// ============================================================================
// User Store
// ============================================================================

/// Storage for accounts with a unique, case-sensitive email index
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Persist a new account. Fails with a `duplicate_email` validation
    /// error when the email is taken.
    async fn create(&self, user: User) -> Result<()>;

    /// Account by id
    async fn get(&self, id: &str) -> Result<Option<User>>;

    /// Account by email (case-sensitive)
    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Replace an account; `not_found` when the id is unknown. The email
    /// index is updated atomically with the mutation.
    async fn update(&self, user: User) -> Result<()>;

    /// Remove an account; `not_found` when the id is unknown
    async fn delete(&self, id: &str) -> Result<()>;

    /// Paginated listing: `offset` past the end returns empty, `limit <= 0`
    /// means all remaining
    async fn list(&self, limit: i64, offset: usize) -> Result<Vec<User>>;
}

// ============================================================================
// Rate Limit Store
// ============================================================================

/// Per-credential window state with an atomic check-and-update
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Current state; the zero state for unknown keys
    async fn get(&self, key_id: &str) -> Result<WindowState>;

    /// Overwrite a key's state
    async fn set(&self, key_id: &str, state: WindowState) -> Result<()>;

    /// Atomic admission check for one credential
    async fn check(
        &self,
        key_id: &str,
        config: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision>;

    /// Stop background work. Closing twice is a programmer error.
    async fn close(&self) -> Result<()>;
}

// ============================================================================
// Quota Store
// ============================================================================

/// Per-(user, calendar month) counters
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Counters for a (user, period); see the reference implementation for
    /// read-through semantics
    async fn get(&self, user_id: &str, period_start: DateTime<Utc>) -> Result<QuotaState>;

    /// Add deltas and return the new state
    async fn increment(
        &self,
        user_id: &str,
        period_start: DateTime<Utc>,
        requests: u64,
        compute_units: f64,
        bytes: u64,
    ) -> Result<QuotaState>;

    /// Unconditionally replace from a durable summary
    async fn sync(
        &self,
        user_id: &str,
        period_start: DateTime<Utc>,
        summary: &UsageSummary,
    ) -> Result<QuotaState>;

    /// Stop background work. Closing twice is a programmer error.
    async fn close(&self) -> Result<()>;
}

// ============================================================================
// Usage Store
// ============================================================================

/// Durable usage event record
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Append a batch; empty batches are a no-op
    async fn record_batch(&self, events: Vec<UsageEvent>) -> Result<()>;

    /// Aggregate a user's events with `start <= timestamp <= end`
    async fn get_summary(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<UsageSummary>;

    /// Monthly aggregations, newest first, truncated to `periods` when
    /// positive
    async fn get_history(&self, user_id: &str, periods: usize) -> Result<Vec<UsagePeriod>>;

    /// Up to `limit` of a user's events, newest first
    async fn get_recent_requests(&self, user_id: &str, limit: usize) -> Result<Vec<UsageEvent>>;
}
