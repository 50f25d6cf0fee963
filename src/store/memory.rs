//! In-Memory Reference Stores
//!
//! Reference implementations of the persistence ports, suitable for tests
//! and single-node deployments. The sharded rate limit and quota stores
//! live in their own modules; this file holds the credential and user
//! stores plus the port impls that tie everything together.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::{ErrorCode, GatewayError, Result};
use crate::model::{Key, QuotaState, RateLimitConfig, UsageEvent, UsageSummary, User, WindowState};
use crate::quota::InMemoryQuotaStore;
use crate::ratelimit::{InMemoryRateLimitStore, RateLimitDecision};
use crate::store::{CredentialStore, QuotaStore, RateLimitStore, UsageStore, UserStore};
use crate::usage::{InMemoryUsageStore, UsagePeriod};

// ============================================================================
// Credential Store
// ============================================================================

#[derive(Default)]
struct CredentialInner {
    keys: HashMap<String, Key>,
    by_prefix: HashMap<String, Vec<String>>,
}

/// In-memory credential store with a prefix index
pub struct InMemoryCredentialStore {
    inner: RwLock<CredentialInner>,
}

impl InMemoryCredentialStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CredentialInner::default()),
        }
    }
}

impl Default for InMemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get_by_prefix(&self, prefix: &str) -> Result<Vec<Key>> {
        let inner = self.inner.read();
        let ids = inner.by_prefix.get(prefix);
        Ok(ids
            .into_iter()
            .flatten()
            .filter_map(|id| inner.keys.get(id))
            .cloned()
            .collect())
    }

    async fn create(&self, key: Key) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.keys.contains_key(&key.id) {
            return Err(GatewayError::Conflict(format!(
                "key {} already exists",
                key.id
            )));
        }
        inner
            .by_prefix
            .entry(key.prefix.clone())
            .or_default()
            .push(key.id.clone());
        inner.keys.insert(key.id.clone(), key);
        Ok(())
    }

    async fn revoke(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(key) = inner.keys.get_mut(id) {
            // A set revocation instant is never cleared or moved.
            if key.revoked_at.is_none() {
                key.revoked_at = Some(at);
            }
        }
        Ok(())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<Key>> {
        let inner = self.inner.read();
        let mut keys: Vec<Key> = inner
            .keys
            .values()
            .filter(|key| key.user_id == user_id)
            .cloned()
            .collect();
        keys.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(keys)
    }

    async fn update_last_used(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(key) = inner.keys.get_mut(id) {
            // Ignore stale touches so concurrent requests cannot regress
            // last_used.
            if key.last_used.map_or(true, |current| at > current) {
                key.last_used = Some(at);
            }
        }
        Ok(())
    }
}

// ============================================================================
// User Store
// ============================================================================

#[derive(Default)]
struct UserInner {
    users: HashMap<String, User>,
    by_email: HashMap<String, String>,
    order: Vec<String>,
}

/// In-memory user store with a unique email index
pub struct InMemoryUserStore {
    inner: RwLock<UserInner>,
}

impl InMemoryUserStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(UserInner::default()),
        }
    }
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn create(&self, user: User) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.by_email.contains_key(&user.email) {
            return Err(GatewayError::validation(
                ErrorCode::DuplicateEmail,
                format!("email {} is already registered", user.email),
            ));
        }
        if inner.users.contains_key(&user.id) {
            return Err(GatewayError::Conflict(format!(
                "user {} already exists",
                user.id
            )));
        }
        inner.by_email.insert(user.email.clone(), user.id.clone());
        inner.order.push(user.id.clone());
        inner.users.insert(user.id.clone(), user);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<User>> {
        Ok(self.inner.read().users.get(id).cloned())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let inner = self.inner.read();
        Ok(inner
            .by_email
            .get(email)
            .and_then(|id| inner.users.get(id))
            .cloned())
    }

    async fn update(&self, user: User) -> Result<()> {
        let mut inner = self.inner.write();
        let Some(existing) = inner.users.get(&user.id).cloned() else {
            return Err(GatewayError::NotFound(format!("user {}", user.id)));
        };

        if existing.email != user.email {
            if inner.by_email.contains_key(&user.email) {
                return Err(GatewayError::validation(
                    ErrorCode::DuplicateEmail,
                    format!("email {} is already registered", user.email),
                ));
            }
            inner.by_email.remove(&existing.email);
            inner.by_email.insert(user.email.clone(), user.id.clone());
        }
        inner.users.insert(user.id.clone(), user);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let Some(user) = inner.users.remove(id) else {
            return Err(GatewayError::NotFound(format!("user {id}")));
        };
        inner.by_email.remove(&user.email);
        inner.order.retain(|existing| existing != id);
        Ok(())
    }

    async fn list(&self, limit: i64, offset: usize) -> Result<Vec<User>> {
        let inner = self.inner.read();
        if offset >= inner.order.len() {
            return Ok(Vec::new());
        }

        let remaining = inner.order.len() - offset;
        let take = if limit <= 0 {
            remaining
        } else {
            remaining.min(limit as usize)
        };

        Ok(inner.order[offset..offset + take]
            .iter()
            .filter_map(|id| inner.users.get(id))
            .cloned()
            .collect())
    }
}

// ============================================================================
// Port Impls for the Sharded Stores
// ============================================================================

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn get(&self, key_id: &str) -> Result<WindowState> {
        Ok(InMemoryRateLimitStore::get(self, key_id))
    }

    async fn set(&self, key_id: &str, state: WindowState) -> Result<()> {
        InMemoryRateLimitStore::set(self, key_id, state);
        Ok(())
    }

    async fn check(
        &self,
        key_id: &str,
        config: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision> {
        Ok(InMemoryRateLimitStore::check(self, key_id, config, now))
    }

    async fn close(&self) -> Result<()> {
        InMemoryRateLimitStore::close(self).await
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn get(&self, user_id: &str, period_start: DateTime<Utc>) -> Result<QuotaState> {
        InMemoryQuotaStore::get(self, user_id, period_start).await
    }

    async fn increment(
        &self,
        user_id: &str,
        period_start: DateTime<Utc>,
        requests: u64,
        compute_units: f64,
        bytes: u64,
    ) -> Result<QuotaState> {
        InMemoryQuotaStore::increment(self, user_id, period_start, requests, compute_units, bytes)
            .await
    }

    async fn sync(
        &self,
        user_id: &str,
        period_start: DateTime<Utc>,
        summary: &UsageSummary,
    ) -> Result<QuotaState> {
        InMemoryQuotaStore::sync(self, user_id, period_start, summary).await
    }

    async fn close(&self) -> Result<()> {
        InMemoryQuotaStore::close(self).await
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn record_batch(&self, events: Vec<UsageEvent>) -> Result<()> {
        self.record_batch_sync(events)
    }

    async fn get_summary(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<UsageSummary> {
        Ok(self.summary(user_id, start, end))
    }

    async fn get_history(&self, user_id: &str, periods: usize) -> Result<Vec<UsagePeriod>> {
        Ok(self.history(user_id, periods))
    }

    async fn get_recent_requests(&self, user_id: &str, limit: usize) -> Result<Vec<UsageEvent>> {
        Ok(self.recent(user_id, limit))
    }
}
