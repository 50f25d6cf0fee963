//! Gateway Configuration
//!
//! Deserializable configuration for every core component. Loading from files
//! or CLI flags is the host's concern; the core only defines the shapes and
//! their defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// Component Configs
// ============================================================================

/// Credential validation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Wire prefix every issued token starts with, e.g. `ak_`
    pub token_prefix: String,

    /// Upper bound on same-prefix candidates verified per attempt.
    ///
    /// The lookup prefix is non-unique; bounding the candidate set caps the
    /// slow-hash work an attacker can force with a known prefix.
    pub max_prefix_candidates: usize,

    /// Last-used touch queue settings
    pub touch: TouchConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_prefix: "ak_".to_string(),
            max_prefix_candidates: 16,
            touch: TouchConfig::default(),
        }
    }
}

/// Bounded lossy queue feeding the last-used coalescer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TouchConfig {
    /// Queue capacity; touches beyond it are dropped, never blocking requests
    pub capacity: usize,

    /// How often buffered touches are flushed to the credential store
    pub flush_interval: Duration,
}

impl Default for TouchConfig {
    fn default() -> Self {
        Self {
            capacity: 4096,
            flush_interval: Duration::from_secs(10),
        }
    }
}

/// Sharded rate limit store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Number of shards; must be at least 1
    pub shards: usize,

    /// How often the background cleaner runs
    pub cleanup_interval: Duration,

    /// Entries whose window ended longer ago than this are deleted
    pub retention: Duration,

    /// Burst tokens granted per credential on top of the plan limit
    pub default_burst_tokens: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            shards: 32,
            cleanup_interval: Duration::from_secs(300),
            retention: Duration::from_secs(3600),
            default_burst_tokens: 0,
        }
    }
}

/// Sharded quota cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Number of shards; must be at least 1
    pub shards: usize,

    /// How often the background cleaner runs
    pub cleanup_interval: Duration,

    /// Periods older than this many months before now are deleted
    pub retention_months: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            shards: 32,
            cleanup_interval: Duration::from_secs(3600),
            retention_months: 2,
        }
    }
}

/// Usage recorder batching settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Channel capacity; events beyond it are dropped, never blocking requests
    pub capacity: usize,

    /// Batch size that triggers an immediate flush
    pub batch_size: usize,

    /// Interval flush for partially filled batches
    pub flush_interval: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            capacity: 8192,
            batch_size: 256,
            flush_interval: Duration::from_secs(5),
        }
    }
}

// ============================================================================
// Gateway Config
// ============================================================================

/// Top-level gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Credential validation settings
    pub auth: AuthConfig,

    /// Rate limit store settings
    pub rate_limit: LimiterConfig,

    /// Quota cache settings
    pub quota: QuotaConfig,

    /// Usage recorder settings
    pub recorder: RecorderConfig,

    /// Admit requests when the rate limit store fails on read.
    ///
    /// Auth store failures always deny; this only governs the limiter.
    /// Defaults to false (fail closed).
    pub fail_open_rate_limit: bool,
}

impl GatewayConfig {
    /// Set the token wire prefix
    pub fn with_token_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.auth.token_prefix = prefix.into();
        self
    }

    /// Set the burst tokens granted per credential
    pub fn with_burst_tokens(mut self, burst_tokens: u64) -> Self {
        self.rate_limit.default_burst_tokens = burst_tokens;
        self
    }

    /// Admit requests when the rate limit store fails on read
    pub fn with_fail_open_rate_limit(mut self, fail_open: bool) -> Self {
        self.fail_open_rate_limit = fail_open;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.auth.token_prefix, "ak_");
        assert_eq!(config.rate_limit.shards, 32);
        assert_eq!(config.quota.retention_months, 2);
        assert!(!config.fail_open_rate_limit);
    }

    #[test]
    fn test_builders() {
        let config = GatewayConfig::default()
            .with_token_prefix("gw_")
            .with_burst_tokens(5)
            .with_fail_open_rate_limit(true);

        assert_eq!(config.auth.token_prefix, "gw_");
        assert_eq!(config.rate_limit.default_burst_tokens, 5);
        assert!(config.fail_open_rate_limit);
    }

    #[test]
    fn test_round_trips_through_serde() {
        let config = GatewayConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: GatewayConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.rate_limit.shards, config.rate_limit.shards);
        assert_eq!(back.recorder.batch_size, config.recorder.batch_size);
    }
}
