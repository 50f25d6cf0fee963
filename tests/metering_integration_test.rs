//! Integration tests for the metering stores
//!
//! Exercises the usage pipeline and quota accounting through the
//! persistence ports: range summaries, monthly history, reconciliation
//! sync, and the drain hook for durable sinks.

use std::sync::Arc;

use apigate::config::QuotaConfig;
use apigate::quota::{period_start_for, InMemoryQuotaStore};
use apigate::store::{QuotaStore, UsageStore};
use apigate::usage::InMemoryUsageStore;
use apigate::{UsageEvent, UsageSummary};
use chrono::{DateTime, TimeZone, Utc};

fn event(id: &str, user: &str, at: DateTime<Utc>) -> UsageEvent {
    UsageEvent {
        id: id.to_string(),
        key_id: "k1".to_string(),
        user_id: user.to_string(),
        method: "GET".to_string(),
        path: "/v1/things".to_string(),
        status_code: 200,
        latency_ms: 8,
        request_bytes: 50,
        response_bytes: 150,
        cost_multiplier: 1.5,
        ip: "203.0.113.9".to_string(),
        user_agent: "curl/8.0".to_string(),
        timestamp: at,
    }
}

#[tokio::test]
async fn test_summary_filters_users_and_window() {
    let store = InMemoryUsageStore::new();
    let t = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();

    store
        .record_batch(vec![
            event("a", "u1", t),
            event("b", "u1", t + chrono::Duration::minutes(30)),
            event("c", "u2", t + chrono::Duration::minutes(15)),
        ])
        .await
        .unwrap();

    let start = t - chrono::Duration::minutes(1);
    let end = t + chrono::Duration::hours(1);

    let u1 = store.get_summary("u1", start, end).await.unwrap();
    assert_eq!(u1.request_count, 2);
    assert!((u1.compute_units - 3.0).abs() < f64::EPSILON);

    let u2 = store.get_summary("u2", start, end).await.unwrap();
    assert_eq!(u2.request_count, 1);
}

#[tokio::test]
async fn test_history_is_newest_first_across_months() {
    let store = InMemoryUsageStore::new();
    let months = [(2023, 9), (2024, 2), (2023, 12), (2024, 1)];
    let batch = months
        .iter()
        .enumerate()
        .map(|(i, &(year, month))| {
            event(
                &format!("ev{i}"),
                "u1",
                Utc.with_ymd_and_hms(year, month, 14, 8, 0, 0).unwrap(),
            )
        })
        .collect();
    store.record_batch(batch).await.unwrap();

    let history = store.get_history("u1", 3).await.unwrap();
    let starts: Vec<_> = history
        .iter()
        .map(|period| (period.period_start.format("%Y-%m").to_string()))
        .collect();
    assert_eq!(starts, vec!["2024-02", "2024-01", "2023-12"]);
}

#[tokio::test]
async fn test_sync_round_trips_a_summary() {
    let quotas = InMemoryQuotaStore::new(QuotaConfig::default());
    let period = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    let summary = UsageSummary {
        request_count: 42,
        compute_units: 63.5,
        bytes_in: 1_000,
        bytes_out: 9_000,
        error_count: 3,
    };
    quotas.sync("u1", period, &summary).await.unwrap();

    let state = QuotaStore::get(&quotas, "u1", period).await.unwrap();
    assert_eq!(state.request_count, 42);
    assert!((state.compute_units - 63.5).abs() < f64::EPSILON);
    assert_eq!(state.bytes_used, 10_000);
    quotas.close().await.unwrap();
}

#[tokio::test]
async fn test_quota_backfills_from_usage_history() {
    let usage = Arc::new(InMemoryUsageStore::new());
    let in_period = Utc.with_ymd_and_hms(2024, 2, 15, 9, 0, 0).unwrap();
    let next_period = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

    usage
        .record_batch(vec![
            event("a", "u1", in_period),
            event("b", "u1", in_period + chrono::Duration::days(1)),
            // First instant of March belongs to the next period.
            event("c", "u1", next_period),
        ])
        .await
        .unwrap();

    let quotas = InMemoryQuotaStore::with_usage_store(QuotaConfig::default(), usage);

    let february = quotas
        .get("u1", period_start_for(in_period))
        .await
        .unwrap();
    assert_eq!(february.request_count, 2);

    let march = quotas.get("u1", next_period).await.unwrap();
    assert_eq!(march.request_count, 1);
    quotas.close().await.unwrap();
}

#[tokio::test]
async fn test_drain_hands_off_everything_once() {
    let store = InMemoryUsageStore::new();
    let t = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();

    store
        .record_batch(vec![event("a", "u1", t), event("b", "u2", t)])
        .await
        .unwrap();

    let drained = store.drain();
    assert_eq!(drained.len(), 2);
    assert!(store.is_empty());
    assert!(store.drain().is_empty());

    // Draining resets summaries too.
    let summary = store
        .get_summary("u1", t - chrono::Duration::hours(1), t + chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(summary.request_count, 0);
}
