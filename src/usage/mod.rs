//! Usage Pipeline
//!
//! Durable record of served requests: batch ingest, range summaries,
//! monthly history, and a recent-request window. The in-memory store is the
//! reference implementation of the usage port; `drain` hands its contents
//! to a durable sink.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::model::{UsageEvent, UsageSummary};
use crate::quota::period_start_for;

/// Batched fire-and-forget event recorder
pub mod recorder;

pub use recorder::UsageRecorder;

// ============================================================================
// History
// ============================================================================

/// One calendar month of aggregated usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsagePeriod {
    /// First instant of the month
    pub period_start: DateTime<Utc>,

    /// Aggregation over the month's events
    pub summary: UsageSummary,
}

// ============================================================================
// Store
// ============================================================================

/// In-memory usage event store
pub struct InMemoryUsageStore {
    events: RwLock<Vec<UsageEvent>>,
}

impl InMemoryUsageStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
        }
    }

    /// Append a batch in one critical section. Empty batches are a no-op;
    /// a batch carrying an already-recorded event id is rejected whole.
    pub fn record_batch_sync(&self, batch: Vec<UsageEvent>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut events = self.events.write();
        for event in &batch {
            if events.iter().any(|existing| existing.id == event.id) {
                return Err(GatewayError::Conflict(format!(
                    "usage event {} already recorded",
                    event.id
                )));
            }
        }
        events.extend(batch);
        Ok(())
    }

    /// Aggregate a user's events with `start <= timestamp <= end`
    pub fn summary(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> UsageSummary {
        let events = self.events.read();
        let mut summary = UsageSummary::default();
        for event in events
            .iter()
            .filter(|ev| ev.user_id == user_id && ev.timestamp >= start && ev.timestamp <= end)
        {
            summary.add(event);
        }
        summary
    }

    /// Aggregate a user's events per calendar month, newest first.
    ///
    /// Sorting happens before truncation: when `periods` is positive only
    /// the most recent `periods` months are returned, never an arbitrary
    /// subset.
    pub fn history(&self, user_id: &str, periods: usize) -> Vec<UsagePeriod> {
        let events = self.events.read();
        let mut buckets: HashMap<DateTime<Utc>, UsageSummary> = HashMap::new();
        for event in events.iter().filter(|ev| ev.user_id == user_id) {
            buckets
                .entry(period_start_for(event.timestamp))
                .or_default()
                .add(event);
        }
        drop(events);

        let mut history: Vec<UsagePeriod> = buckets
            .into_iter()
            .map(|(period_start, summary)| UsagePeriod {
                period_start,
                summary,
            })
            .collect();
        history.sort_by(|a, b| b.period_start.cmp(&a.period_start));
        if periods > 0 {
            history.truncate(periods);
        }
        history
    }

    /// Up to `limit` of a user's events, newest first
    pub fn recent(&self, user_id: &str, limit: usize) -> Vec<UsageEvent> {
        let events = self.events.read();
        events
            .iter()
            .rev()
            .filter(|ev| ev.user_id == user_id)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Remove and return every event in one critical section
    pub fn drain(&self) -> Vec<UsageEvent> {
        std::mem::take(&mut *self.events.write())
    }

    /// Number of stored events
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

impl Default for InMemoryUsageStore {
    fn default() -> Self {
        Self::new()
    }
}
