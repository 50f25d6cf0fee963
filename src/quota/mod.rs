//! Sharded Quota Accounting
//!
//! Atomic per-(user, calendar month) counters: requests, compute units, and
//! bytes. Entries are keyed by an explicit `(user, year, month)` tuple
//! rather than a formatted date string; every instant within one UTC
//! calendar month maps to the same entry.
//!
//! When a usage store is attached, a miss is materialized read-through from
//! the durable monthly summary. A reconciliation job can overwrite an entry
//! wholesale with `sync`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::QuotaConfig;
use crate::error::{GatewayError, Result};
use crate::model::{QuotaState, UsageSummary};
use crate::ratelimit::fnv1a;
use crate::store::UsageStore;

// ============================================================================
// Periods
// ============================================================================

/// First instant of the UTC calendar month containing `ts`
pub fn period_start_for(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(ts.year(), ts.month(), 1, 0, 0, 0)
        .unwrap()
}

/// First instant of the month after `period_start` (exclusive period end)
pub fn next_period_start(period_start: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if period_start.month() == 12 {
        (period_start.year() + 1, 1)
    } else {
        (period_start.year(), period_start.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).unwrap()
}

/// First instant of the month `months` before `ts`'s month
pub fn months_before(ts: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    let mut year = ts.year();
    let mut month = ts.month() as i32 - months as i32;
    while month < 1 {
        month += 12;
        year -= 1;
    }
    Utc.with_ymd_and_hms(year, month as u32, 1, 0, 0, 0).unwrap()
}

/// Map key for one user's counters in one calendar month
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PeriodKey {
    user_id: String,
    year: i32,
    month: u32,
}

impl PeriodKey {
    fn new(user_id: &str, period_start: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            year: period_start.year(),
            month: period_start.month(),
        }
    }

    /// Shard hash over the explicit (user, year, month) tuple
    fn shard_hash(&self) -> u64 {
        let mut bytes = Vec::with_capacity(self.user_id.len() + 6);
        bytes.extend_from_slice(self.user_id.as_bytes());
        bytes.extend_from_slice(&self.year.to_le_bytes());
        bytes.extend_from_slice(&(self.month as u16).to_le_bytes());
        fnv1a(&bytes)
    }
}

// ============================================================================
// Sharded Counters
// ============================================================================

struct QuotaShards {
    shards: Vec<RwLock<HashMap<PeriodKey, QuotaState>>>,
}

impl QuotaShards {
    fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        let shards = (0..shard_count)
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        Self { shards }
    }

    fn shard(&self, key: &PeriodKey) -> &RwLock<HashMap<PeriodKey, QuotaState>> {
        let index = (key.shard_hash() % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    fn get(&self, key: &PeriodKey) -> Option<QuotaState> {
        self.shard(key).read().get(key).cloned()
    }

    /// Insert unless another writer got there first; returns the entry
    /// actually in the map.
    fn insert_if_absent(&self, key: PeriodKey, state: QuotaState) -> QuotaState {
        let mut shard = self.shard(&key).write();
        shard.entry(key).or_insert(state).clone()
    }

    fn increment(
        &self,
        key: PeriodKey,
        user_id: &str,
        period_start: DateTime<Utc>,
        requests: u64,
        compute_units: f64,
        bytes: u64,
        now: DateTime<Utc>,
    ) -> QuotaState {
        let mut shard = self.shard(&key).write();
        let state = shard
            .entry(key)
            .or_insert_with(|| QuotaState::zero(user_id, period_start));
        state.request_count += requests;
        state.compute_units += compute_units;
        state.bytes_used += bytes;
        state.last_updated = now;
        state.clone()
    }

    fn replace(&self, key: PeriodKey, state: QuotaState) -> QuotaState {
        let mut shard = self.shard(&key).write();
        shard.insert(key, state.clone());
        state
    }

    /// Delete entries whose period started before `cutoff`
    fn cleanup(&self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut map = shard.write();
            let before = map.len();
            map.retain(|_, state| state.period_start >= cutoff);
            removed += before - map.len();
        }
        removed
    }

    fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }
}

// ============================================================================
// Store
// ============================================================================

/// In-memory sharded quota cache with optional read-through backfill.
///
/// The background cleaner removes periods older than the configured
/// retention. `close` stops it; closing twice is a programmer error.
pub struct InMemoryQuotaStore {
    shards: Arc<QuotaShards>,
    usage: Option<Arc<dyn UsageStore>>,
    close_tx: parking_lot::Mutex<Option<watch::Sender<bool>>>,
    cleaner: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl InMemoryQuotaStore {
    /// Create the store without backfill. Must be called from within a
    /// tokio runtime.
    pub fn new(config: QuotaConfig) -> Self {
        Self::build(config, None)
    }

    /// Create the store with read-through backfill from a usage store
    pub fn with_usage_store(config: QuotaConfig, usage: Arc<dyn UsageStore>) -> Self {
        Self::build(config, Some(usage))
    }

    fn build(config: QuotaConfig, usage: Option<Arc<dyn UsageStore>>) -> Self {
        let shards = Arc::new(QuotaShards::new(config.shards));
        let (close_tx, mut close_rx) = watch::channel(false);

        let cleaner_shards = shards.clone();
        let retention_months = config.retention_months;
        let cleaner = tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.cleanup_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let cutoff = months_before(Utc::now(), retention_months);
                        let removed = cleaner_shards.cleanup(cutoff);
                        if removed > 0 {
                            debug!(removed, "quota cleanup pass");
                        }
                    }
                    _ = close_rx.changed() => break,
                }
            }
            debug!("quota cleaner stopped");
        });

        Self {
            shards,
            usage,
            close_tx: parking_lot::Mutex::new(Some(close_tx)),
            cleaner: parking_lot::Mutex::new(Some(cleaner)),
        }
    }

    /// Counters for a (user, period).
    ///
    /// On a miss with a usage store attached, the entry is materialized from
    /// the durable summary for `[period_start, next month)` and inserted; on
    /// a miss without one, the zero state is returned without inserting.
    pub async fn get(&self, user_id: &str, period_start: DateTime<Utc>) -> Result<QuotaState> {
        let period_start = period_start_for(period_start);
        let key = PeriodKey::new(user_id, period_start);

        if let Some(state) = self.shards.get(&key) {
            return Ok(state);
        }

        let Some(usage) = &self.usage else {
            return Ok(QuotaState::zero(user_id, period_start));
        };

        let period_end = next_period_start(period_start) - chrono::Duration::nanoseconds(1);
        let summary = usage.get_summary(user_id, period_start, period_end).await?;
        let state = state_from_summary(user_id, period_start, &summary, Utc::now());

        // A concurrent reader may have materialized the entry while the
        // summary query was in flight; the one in the map wins.
        Ok(self.shards.insert_if_absent(key, state))
    }

    /// Add deltas to a (user, period) and return the new state
    pub async fn increment(
        &self,
        user_id: &str,
        period_start: DateTime<Utc>,
        requests: u64,
        compute_units: f64,
        bytes: u64,
    ) -> Result<QuotaState> {
        let period_start = period_start_for(period_start);
        let key = PeriodKey::new(user_id, period_start);
        Ok(self.shards.increment(
            key,
            user_id,
            period_start,
            requests,
            compute_units,
            bytes,
            Utc::now(),
        ))
    }

    /// Unconditionally replace a (user, period) from a durable summary
    pub async fn sync(
        &self,
        user_id: &str,
        period_start: DateTime<Utc>,
        summary: &UsageSummary,
    ) -> Result<QuotaState> {
        let period_start = period_start_for(period_start);
        let key = PeriodKey::new(user_id, period_start);
        let state = state_from_summary(user_id, period_start, summary, Utc::now());
        Ok(self.shards.replace(key, state))
    }

    /// Number of tracked (user, period) entries
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Whether no entry is tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the cleaner. Closing twice is a programmer error.
    pub async fn close(&self) -> Result<()> {
        let close_tx = self
            .close_tx
            .lock()
            .take()
            .ok_or_else(|| GatewayError::internal("quota store already closed"))?;
        let _ = close_tx.send(true);

        let cleaner = self.cleaner.lock().take();
        if let Some(cleaner) = cleaner {
            cleaner
                .await
                .map_err(|e| GatewayError::internal(format!("quota cleaner panicked: {e}")))?;
        }
        Ok(())
    }

    #[cfg(test)]
    fn cleanup_now(&self, cutoff: DateTime<Utc>) -> usize {
        self.shards.cleanup(cutoff)
    }
}

fn state_from_summary(
    user_id: &str,
    period_start: DateTime<Utc>,
    summary: &UsageSummary,
    now: DateTime<Utc>,
) -> QuotaState {
    QuotaState {
        user_id: user_id.to_string(),
        period_start,
        request_count: summary.request_count,
        compute_units: summary.compute_units,
        bytes_used: summary.bytes_in + summary.bytes_out,
        last_updated: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UsageEvent;
    use crate::usage::InMemoryUsageStore;

    fn ymd(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_period_boundaries() {
        let inside = Utc.with_ymd_and_hms(2024, 1, 17, 23, 59, 59).unwrap();
        assert_eq!(
            period_start_for(inside),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );

        let december = Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap();
        assert_eq!(
            next_period_start(period_start_for(december)),
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
        );

        assert_eq!(
            months_before(ymd(2024, 1, 15), 2),
            Utc.with_ymd_and_hms(2023, 11, 1, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_cross_user_isolation() {
        let store = InMemoryQuotaStore::new(QuotaConfig::default());
        let period = ymd(2024, 1, 1);

        store.increment("a", period, 10, 10.0, 0).await.unwrap();
        store.increment("b", period, 20, 20.0, 0).await.unwrap();

        assert_eq!(store.get("a", period).await.unwrap().request_count, 10);
        assert_eq!(store.get("b", period).await.unwrap().request_count, 20);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_same_month_instants_share_an_entry() {
        let store = InMemoryQuotaStore::new(QuotaConfig::default());

        store.increment("u1", ymd(2024, 3, 5), 1, 1.0, 10).await.unwrap();
        store.increment("u1", ymd(2024, 3, 28), 1, 2.0, 20).await.unwrap();

        let state = store.get("u1", ymd(2024, 3, 15)).await.unwrap();
        assert_eq!(state.request_count, 2);
        assert!((state.compute_units - 3.0).abs() < f64::EPSILON);
        assert_eq!(state.bytes_used, 30);
        assert_eq!(store.len(), 1);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_miss_without_usage_store_returns_zero_without_inserting() {
        let store = InMemoryQuotaStore::new(QuotaConfig::default());

        let state = store.get("ghost", ymd(2024, 1, 1)).await.unwrap();
        assert_eq!(state.request_count, 0);
        assert!(store.is_empty());
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_miss_with_usage_store_backfills() {
        let usage = Arc::new(InMemoryUsageStore::new());
        let events: Vec<UsageEvent> = (0..3)
            .map(|i| UsageEvent {
                id: format!("ev{i}"),
                key_id: "k1".into(),
                user_id: "u1".into(),
                method: "GET".into(),
                path: "/v1/things".into(),
                status_code: 200,
                latency_ms: 5,
                request_bytes: 10,
                response_bytes: 40,
                cost_multiplier: 2.0,
                ip: "203.0.113.9".into(),
                user_agent: "curl/8.0".into(),
                timestamp: ymd(2024, 2, 10 + i),
            })
            .collect();
        usage.record_batch(events).await.unwrap();

        let store = InMemoryQuotaStore::with_usage_store(QuotaConfig::default(), usage);
        let state = store.get("u1", ymd(2024, 2, 1)).await.unwrap();

        assert_eq!(state.request_count, 3);
        assert!((state.compute_units - 6.0).abs() < f64::EPSILON);
        assert_eq!(state.bytes_used, 150);
        // The materialized entry is cached.
        assert_eq!(store.len(), 1);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_replaces_counters() {
        let store = InMemoryQuotaStore::new(QuotaConfig::default());
        let period = ymd(2024, 1, 1);

        store.increment("u1", period, 100, 100.0, 1000).await.unwrap();

        let summary = UsageSummary {
            request_count: 7,
            compute_units: 9.5,
            bytes_in: 30,
            bytes_out: 70,
            error_count: 1,
        };
        store.sync("u1", period, &summary).await.unwrap();

        let state = store.get("u1", period).await.unwrap();
        assert_eq!(state.request_count, 7);
        assert!((state.compute_units - 9.5).abs() < f64::EPSILON);
        assert_eq!(state.bytes_used, 100);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_additive() {
        let store = Arc::new(InMemoryQuotaStore::new(QuotaConfig::default()));
        let period = ymd(2024, 1, 1);

        store.increment("u1", period, 5, 0.0, 0).await.unwrap();

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.increment("u1", period, 1, 0.0, 0).await.unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.get("u1", period).await.unwrap().request_count, 69);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_old_periods() {
        let store = InMemoryQuotaStore::new(QuotaConfig::default());

        store.increment("u1", ymd(2023, 10, 1), 1, 0.0, 0).await.unwrap();
        store.increment("u1", ymd(2024, 1, 1), 1, 0.0, 0).await.unwrap();

        let removed = store.cleanup_now(months_before(ymd(2024, 1, 15), 2));
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("u1", ymd(2024, 1, 1)).await.unwrap().request_count, 1);
        store.close().await.unwrap();
    }
}
