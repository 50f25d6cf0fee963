//! Sharded Rate Limiting
//!
//! The hottest data structure in the gateway: a fixed array of shards, each
//! holding per-credential window state under its own mutex. One atomic
//! check-and-update per request, cleaned in the background.
//!
//! ## Algorithm
//!
//! Fixed window with burst tokens. Within a window a credential may make at
//! most `limit` primary requests plus `burst_tokens` single-use allowances;
//! when the observed time passes the window end, the state resets
//! implicitly on the next check.
//!
//! ## Sharding
//!
//! Shard selection is FNV-1a over the credential id modulo the shard count.
//! Operations on one credential are totally ordered by its shard mutex;
//! across shards there is no synchronization.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::LimiterConfig;
use crate::error::{GatewayError, Result};
use crate::model::{RateLimitConfig, WindowState};

/// HTTP rate limit headers
pub mod headers;

// ============================================================================
// Hashing
// ============================================================================

/// FNV-1a over a byte string.
///
/// Any fast non-cryptographic hash with comparable avalanche behavior would
/// do; FNV-1a keeps shard selection cheap and deterministic.
pub(crate) fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET_BASIS;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

// ============================================================================
// Decision
// ============================================================================

/// Why a request was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Window and burst tokens are exhausted
    LimitExceeded,
}

impl DenyReason {
    /// Wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LimitExceeded => "limit_exceeded",
        }
    }
}

/// Result of one admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    /// Whether the request is admitted
    pub allowed: bool,

    /// Primary requests left in the window; zero on burst admissions and
    /// denials
    pub remaining: u64,

    /// End of the current window
    pub reset_at: DateTime<Utc>,

    /// Deny reason; `None` when allowed
    pub reason: Option<DenyReason>,
}

impl RateLimitDecision {
    /// Wire form of the reason: empty when allowed
    pub fn reason_str(&self) -> &'static str {
        self.reason.map(|r| r.as_str()).unwrap_or("")
    }
}

// ============================================================================
// Sharded Window State
// ============================================================================

/// The sharded window-state map. Pure and synchronous; the async store
/// wraps it with the background cleaner.
pub(crate) struct WindowShards {
    shards: Vec<Mutex<HashMap<String, WindowState>>>,
}

impl WindowShards {
    fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        let shards = (0..shard_count)
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self { shards }
    }

    fn shard(&self, key_id: &str) -> &Mutex<HashMap<String, WindowState>> {
        let index = (fnv1a(key_id.as_bytes()) % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    /// Current state; zero for unknown keys.
    fn get(&self, key_id: &str) -> WindowState {
        self.shard(key_id)
            .lock()
            .get(key_id)
            .copied()
            .unwrap_or_default()
    }

    fn set(&self, key_id: &str, state: WindowState) {
        self.shard(key_id).lock().insert(key_id.to_string(), state);
    }

    /// The atomic check-and-update. Read-modify-write happens entirely under
    /// the shard lock, so operations on one key are totally ordered.
    fn check(
        &self,
        key_id: &str,
        config: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let mut shard = self.shard(key_id).lock();
        let state = shard.entry(key_id.to_string()).or_default();

        // Window roll: no window yet, or the observed time passed its end.
        let window_end = match state.window_end {
            Some(end) if now <= end => end,
            _ => {
                let end = now + config.window;
                state.count = 0;
                state.burst_used = 0;
                state.window_end = Some(end);
                end
            }
        };
        state.last_seen = Some(now);

        if state.count < config.limit {
            // Primary admission.
            state.count += 1;
            RateLimitDecision {
                allowed: true,
                remaining: config.limit - state.count,
                reset_at: window_end,
                reason: None,
            }
        } else if state.burst_used < config.burst_tokens {
            // Burst admission: a single-use allowance past the limit.
            state.count += 1;
            state.burst_used += 1;
            RateLimitDecision {
                allowed: true,
                remaining: 0,
                reset_at: window_end,
                reason: None,
            }
        } else {
            RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at: window_end,
                reason: Some(DenyReason::LimitExceeded),
            }
        }
    }

    /// Delete entries whose window ended before `cutoff`. Returns how many
    /// were removed.
    fn cleanup(&self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut map = shard.lock();
            let before = map.len();
            map.retain(|_, state| match state.window_end {
                Some(end) => end >= cutoff,
                None => true,
            });
            removed += before - map.len();
        }
        removed
    }

    fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }
}

// ============================================================================
// Store
// ============================================================================

/// In-memory sharded rate limit store with a background cleaner.
///
/// The cleaner wakes every `cleanup_interval` and deletes entries whose
/// window ended longer ago than the retention. `close` stops it; closing
/// twice is a programmer error.
pub struct InMemoryRateLimitStore {
    shards: Arc<WindowShards>,
    close_tx: Mutex<Option<watch::Sender<bool>>>,
    cleaner: Mutex<Option<JoinHandle<()>>>,
}

impl InMemoryRateLimitStore {
    /// Create the store and start its cleaner. Must be called from within a
    /// tokio runtime.
    pub fn new(config: LimiterConfig) -> Self {
        let shards = Arc::new(WindowShards::new(config.shards));
        let (close_tx, mut close_rx) = watch::channel(false);

        let cleaner_shards = shards.clone();
        let retention = config.retention;
        let cleaner = tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.cleanup_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it.
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let cutoff = Utc::now() - retention;
                        let removed = cleaner_shards.cleanup(cutoff);
                        if removed > 0 {
                            debug!(removed, "rate limit cleanup pass");
                        }
                    }
                    _ = close_rx.changed() => break,
                }
            }
            debug!("rate limit cleaner stopped");
        });

        Self {
            shards,
            close_tx: Mutex::new(Some(close_tx)),
            cleaner: Mutex::new(Some(cleaner)),
        }
    }

    /// Current state for a key; zero state for unknown keys
    pub fn get(&self, key_id: &str) -> WindowState {
        self.shards.get(key_id)
    }

    /// Overwrite a key's state (tests and reconciliation)
    pub fn set(&self, key_id: &str, state: WindowState) {
        self.shards.set(key_id, state);
    }

    /// Atomic check-and-update for one credential
    pub fn check(
        &self,
        key_id: &str,
        config: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        self.shards.check(key_id, config, now)
    }

    /// Number of tracked credentials
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Whether no credential is tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the cleaner. Closing twice is a programmer error.
    pub async fn close(&self) -> Result<()> {
        let close_tx = self
            .close_tx
            .lock()
            .take()
            .ok_or_else(|| GatewayError::internal("rate limit store already closed"))?;
        let _ = close_tx.send(true);

        let cleaner = self.cleaner.lock().take();
        if let Some(cleaner) = cleaner {
            cleaner
                .await
                .map_err(|e| GatewayError::internal(format!("rate limit cleaner panicked: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn config(limit: u64, window_secs: u64, burst: u64) -> RateLimitConfig {
        RateLimitConfig {
            limit,
            window: Duration::from_secs(window_secs),
            burst_tokens: burst,
        }
    }

    #[test]
    fn test_burst_then_steady_state() {
        let shards = WindowShards::new(32);
        let config = config(3, 60, 1);
        let start = ts(1_000);

        // Three primary admissions, one burst, then a denial.
        for expected_remaining in [2, 1, 0] {
            let decision = shards.check("k1", &config, start);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let burst = shards.check("k1", &config, start);
        assert!(burst.allowed);
        assert_eq!(burst.remaining, 0);

        let denied = shards.check("k1", &config, start);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reason, Some(DenyReason::LimitExceeded));
        assert_eq!(denied.reset_at, ts(1_060));

        // One second past the window end the state resets.
        let fresh = shards.check("k1", &config, ts(1_061));
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 2);
    }

    #[test]
    fn test_window_roll_resets_counters() {
        let shards = WindowShards::new(4);
        let config = config(2, 60, 3);

        shards.check("k1", &config, ts(0));
        shards.check("k1", &config, ts(0));
        shards.check("k1", &config, ts(0)); // burst

        shards.check("k1", &config, ts(61));
        let state = shards.get("k1");
        assert_eq!(state.count, 1);
        assert_eq!(state.burst_used, 0);
        assert_eq!(state.window_end, Some(ts(121)));
    }

    #[test]
    fn test_unknown_key_returns_zero_state() {
        let shards = WindowShards::new(8);
        let state = shards.get("never-seen");
        assert_eq!(state, WindowState::default());
    }

    #[test]
    fn test_denial_keeps_state_but_touches_last_seen() {
        let shards = WindowShards::new(8);
        let config = config(1, 60, 0);

        shards.check("k1", &config, ts(0));
        let before = shards.get("k1");

        let denied = shards.check("k1", &config, ts(10));
        assert!(!denied.allowed);

        let after = shards.get("k1");
        assert_eq!(after.count, before.count);
        assert_eq!(after.burst_used, before.burst_used);
        assert_eq!(after.window_end, before.window_end);
        assert_eq!(after.last_seen, Some(ts(10)));
    }

    #[test]
    fn test_cleanup_honors_fresh_entries() {
        let shards = WindowShards::new(8);
        let now = ts(10_000);

        shards.set(
            "fresh",
            WindowState {
                count: 1,
                window_end: Some(now + Duration::from_secs(60)),
                burst_used: 0,
                last_seen: Some(now),
            },
        );
        shards.set(
            "stale",
            WindowState {
                count: 5,
                window_end: Some(now - Duration::from_secs(7200)),
                burst_used: 0,
                last_seen: Some(now - Duration::from_secs(7200)),
            },
        );

        let removed = shards.cleanup(now - Duration::from_secs(3600));
        assert_eq!(removed, 1);
        assert_eq!(shards.len(), 1);
        assert_ne!(shards.get("fresh"), WindowState::default());
    }

    #[test]
    fn test_shard_count_clamped_to_one() {
        let shards = WindowShards::new(0);
        let config = config(1, 60, 0);
        assert!(shards.check("k1", &config, ts(0)).allowed);
    }

    #[test]
    fn test_same_shard_different_keys_are_independent() {
        // One shard forces every key into the same mutex.
        let shards = WindowShards::new(1);
        let config = config(1, 60, 0);

        assert!(shards.check("a", &config, ts(0)).allowed);
        assert!(shards.check("b", &config, ts(0)).allowed);
        assert!(!shards.check("a", &config, ts(1)).allowed);
        assert!(!shards.check("b", &config, ts(1)).allowed);
    }

    #[tokio::test]
    async fn test_store_close_is_once_only() {
        let store = InMemoryRateLimitStore::new(LimiterConfig::default());
        store.close().await.unwrap();
        assert!(store.close().await.is_err());
    }

    #[tokio::test]
    async fn test_store_cleaner_removes_stale_entries() {
        let store = InMemoryRateLimitStore::new(LimiterConfig {
            shards: 4,
            cleanup_interval: Duration::from_millis(20),
            retention: Duration::from_secs(3600),
            default_burst_tokens: 0,
        });

        let now = Utc::now();
        store.set(
            "stale",
            WindowState {
                count: 3,
                window_end: Some(now - Duration::from_secs(7200)),
                burst_used: 0,
                last_seen: None,
            },
        );
        store.set(
            "fresh",
            WindowState {
                count: 1,
                window_end: Some(now + Duration::from_secs(60)),
                burst_used: 0,
                last_seen: None,
            },
        );

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(store.get("stale"), WindowState::default());
        assert_ne!(store.get("fresh"), WindowState::default());
        store.close().await.unwrap();
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn fnv1a_is_deterministic(key in ".*") {
                prop_assert_eq!(fnv1a(key.as_bytes()), fnv1a(key.as_bytes()));
            }

            #[test]
            fn shard_selection_stays_in_bounds(key in ".*", shards in 1usize..128) {
                let index = (fnv1a(key.as_bytes()) % shards as u64) as usize;
                prop_assert!(index < shards);
            }

            #[test]
            fn admitted_never_exceeds_limit_plus_burst(
                limit in 1u64..20,
                burst in 0u64..10,
                attempts in 1usize..64,
            ) {
                let shards = WindowShards::new(4);
                let config = RateLimitConfig {
                    limit,
                    window: Duration::from_secs(60),
                    burst_tokens: burst,
                };
                let now = Utc.timestamp_opt(0, 0).unwrap();

                let admitted = (0..attempts)
                    .filter(|_| shards.check("k", &config, now).allowed)
                    .count() as u64;
                prop_assert!(admitted <= limit + burst);
            }
        }
    }
}
