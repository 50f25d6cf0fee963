//! Rate Limit HTTP Headers
//!
//! Renders the client-facing response contract:
//! - `X-RateLimit-Limit`, `X-RateLimit-Remaining`, `X-RateLimit-Reset`
//!   (Unix seconds of the window end) on every decision
//! - `Retry-After` and a 429 body identifying `limit_exceeded` on denials

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::RateLimitConfig;
use crate::ratelimit::RateLimitDecision;

/// `X-RateLimit-Limit`
pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
/// `X-RateLimit-Remaining`
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
/// `X-RateLimit-Reset`
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
/// `Retry-After`
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

// ============================================================================
// Header Rendering
// ============================================================================

/// Rate limit information rendered into response headers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitHeaders {
    /// Window limit (primary, excluding burst tokens)
    pub limit: u64,

    /// Remaining primary requests
    pub remaining: u64,

    /// Window end as Unix seconds
    pub reset: i64,

    /// Seconds until retry is worthwhile; only set on denials
    pub retry_after: Option<i64>,
}

impl RateLimitHeaders {
    /// Build from an admission decision
    pub fn from_decision(
        decision: &RateLimitDecision,
        config: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> Self {
        let retry_after = if decision.allowed {
            None
        } else {
            Some((decision.reset_at - now).num_seconds().max(1))
        };

        Self {
            limit: config.limit,
            remaining: decision.remaining,
            reset: decision.reset_at.timestamp(),
            retry_after,
        }
    }

    /// Render into header name/value pairs
    pub fn build(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert(HEADER_LIMIT.to_string(), self.limit.to_string());
        headers.insert(HEADER_REMAINING.to_string(), self.remaining.to_string());
        headers.insert(HEADER_RESET.to_string(), self.reset.to_string());
        if let Some(retry_after) = self.retry_after {
            headers.insert(HEADER_RETRY_AFTER.to_string(), retry_after.to_string());
        }
        headers
    }
}

/// The 429 body sent with a denial
pub fn deny_body(decision: &RateLimitDecision) -> serde_json::Value {
    serde_json::json!({
        "error": decision.reason_str(),
        "reset_at": decision.reset_at.timestamp(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::DenyReason;
    use chrono::TimeZone;
    use std::time::Duration;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn config() -> RateLimitConfig {
        RateLimitConfig {
            limit: 100,
            window: Duration::from_secs(60),
            burst_tokens: 10,
        }
    }

    #[test]
    fn test_allowed_headers() {
        let decision = RateLimitDecision {
            allowed: true,
            remaining: 42,
            reset_at: ts(1_060),
            reason: None,
        };

        let headers = RateLimitHeaders::from_decision(&decision, &config(), ts(1_000)).build();
        assert_eq!(headers[HEADER_LIMIT], "100");
        assert_eq!(headers[HEADER_REMAINING], "42");
        assert_eq!(headers[HEADER_RESET], "1060");
        assert!(!headers.contains_key(HEADER_RETRY_AFTER));
    }

    #[test]
    fn test_denied_headers_carry_retry_after() {
        let decision = RateLimitDecision {
            allowed: false,
            remaining: 0,
            reset_at: ts(1_060),
            reason: Some(DenyReason::LimitExceeded),
        };

        let headers = RateLimitHeaders::from_decision(&decision, &config(), ts(1_000)).build();
        assert_eq!(headers[HEADER_REMAINING], "0");
        assert_eq!(headers[HEADER_RETRY_AFTER], "60");

        let body = deny_body(&decision);
        assert_eq!(body["error"], "limit_exceeded");
        assert_eq!(body["reset_at"], 1_060);
    }
}
