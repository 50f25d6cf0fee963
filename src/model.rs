//! Domain Model
//!
//! Core data types shared across the gateway:
//! - Credentials and their lifecycle timestamps
//! - Users, plans, and endpoint cost rules
//! - Rate limit and quota state held by the sharded stores
//! - Usage events and their aggregations

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Credentials
// ============================================================================

/// An issued API credential.
///
/// The raw token never appears here: it is held only transiently during
/// validation. What is stored is its slow one-way hash and the first twelve
/// characters of its textual form, used as a non-unique lookup index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Key {
    /// Stable identifier
    pub id: String,

    /// Owning user
    pub user_id: String,

    /// Key name/description
    pub name: String,

    /// Argon2 hash of the raw token (PHC string)
    pub hash: String,

    /// First twelve characters of the raw token (non-unique index)
    pub prefix: String,

    /// Path-pattern entitlements; empty means unrestricted
    pub scopes: Vec<String>,

    /// Expiration (optional)
    pub expires_at: Option<DateTime<Utc>>,

    /// Revocation instant; once set it is never cleared
    pub revoked_at: Option<DateTime<Utc>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last successful use (best-effort)
    pub last_used: Option<DateTime<Utc>>,
}

impl Key {
    /// Whether the key is revoked
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Whether the key is expired at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now > expires_at,
            None => false,
        }
    }
}

// ============================================================================
// Users and Plans
// ============================================================================

/// Account status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    /// Account in good standing
    Active,
    /// Account suspended; all credentials are rejected
    Suspended,
    /// Account cancelled
    Cancelled,
}

/// A registered account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Stable identifier
    pub id: String,

    /// Unique email (case-sensitive)
    pub email: String,

    /// Argon2 hash of the login password
    pub password_hash: String,

    /// Subscribed plan
    pub plan_id: String,

    /// Account status
    pub status: UserStatus,

    /// Payment-provider customer id (optional)
    pub provider_customer_id: Option<String>,

    /// Payment-provider subscription id (optional)
    pub provider_subscription_id: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Cost override for a group of endpoints.
///
/// `path` is matched exactly, or as a prefix when it ends in `/*`. An empty
/// `method` matches every method. Rules are evaluated in order and the first
/// match wins, so operators must list specific rules before general ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointCost {
    /// Path pattern (exact or `/prefix/*`)
    pub path: String,

    /// HTTP method; empty matches all (case-sensitive)
    #[serde(default)]
    pub method: String,

    /// Multiplier applied to the request's compute cost
    pub cost_multiplier: f64,
}

/// A subscription plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Stable identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Requests admitted per minute per credential
    pub rate_limit_per_minute: u64,

    /// Requests per calendar month; negative means unlimited
    pub requests_per_month: i64,

    /// Monthly price in cents
    pub price_monthly: u64,

    /// Price per request over quota, in cents
    pub overage_price: f64,

    /// Per-endpoint cost overrides, first match wins
    #[serde(default)]
    pub endpoints: Vec<EndpointCost>,
}

// ============================================================================
// Rate Limiting
// ============================================================================

/// Per-credential rate limit parameters, derived from the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests admitted per window before burst tokens are consumed
    pub limit: u64,

    /// Window length
    pub window: Duration,

    /// Single-use allowances consumed after the primary limit is exhausted
    pub burst_tokens: u64,
}

impl RateLimitConfig {
    /// Derive a per-credential config from a plan.
    ///
    /// The plan's per-minute limit maps onto a one-minute window.
    pub fn from_plan(plan: &Plan, burst_tokens: u64) -> Self {
        Self {
            limit: plan.rate_limit_per_minute,
            window: Duration::from_secs(60),
            burst_tokens,
        }
    }
}

/// Per-credential window state held by the rate limit store.
///
/// `window_end` of `None` is the zero state: the next observation starts a
/// fresh window. `burst_used` never exceeds the config's `burst_tokens`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowState {
    /// Requests observed in the current window (primary + burst)
    pub count: u64,

    /// End of the current window; `None` means no window has started
    pub window_end: Option<DateTime<Utc>>,

    /// Burst tokens consumed in the current window
    pub burst_used: u64,

    /// Last observation, updated on every check including denials
    pub last_seen: Option<DateTime<Utc>>,
}

// ============================================================================
// Quotas
// ============================================================================

/// Per-(user, calendar month) quota counters.
///
/// Counters are monotone non-decreasing during the life of a period except
/// via an explicit sync from a durable summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaState {
    /// Owning user
    pub user_id: String,

    /// First instant of the UTC calendar month
    pub period_start: DateTime<Utc>,

    /// Requests admitted this period
    pub request_count: u64,

    /// Sum of cost multipliers this period
    pub compute_units: f64,

    /// Bytes transferred this period
    pub bytes_used: u64,

    /// Last mutation instant
    pub last_updated: DateTime<Utc>,
}

impl QuotaState {
    /// The zero state for a (user, period)
    pub fn zero(user_id: impl Into<String>, period_start: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            period_start,
            request_count: 0,
            compute_units: 0.0,
            bytes_used: 0,
            last_updated: period_start,
        }
    }
}

// ============================================================================
// Usage
// ============================================================================

/// Immutable record of one served request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    /// Unique event id
    pub id: String,

    /// Credential that served the request
    pub key_id: String,

    /// Owning user
    pub user_id: String,

    /// HTTP method
    pub method: String,

    /// Request path
    pub path: String,

    /// Response status code
    pub status_code: u16,

    /// Request latency in milliseconds
    pub latency_ms: u64,

    /// Request body size
    pub request_bytes: u64,

    /// Response body size
    pub response_bytes: u64,

    /// Cost multiplier resolved for (method, path)
    pub cost_multiplier: f64,

    /// Client address
    pub ip: String,

    /// Client user agent
    pub user_agent: String,

    /// Instant the request was served
    pub timestamp: DateTime<Utc>,
}

/// Aggregation of usage events over a time range
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    /// Number of events
    pub request_count: u64,

    /// Sum of cost multipliers
    pub compute_units: f64,

    /// Sum of request bytes
    pub bytes_in: u64,

    /// Sum of response bytes
    pub bytes_out: u64,

    /// Events with status code >= 400
    pub error_count: u64,
}

impl UsageSummary {
    /// Fold one event into the summary
    pub fn add(&mut self, event: &UsageEvent) {
        self.request_count += 1;
        self.compute_units += event.cost_multiplier;
        self.bytes_in += event.request_bytes;
        self.bytes_out += event.response_bytes;
        if event.status_code >= 400 {
            self.error_count += 1;
        }
    }
}
