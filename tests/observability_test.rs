//! Integration tests for drop-event observability
//!
//! The lossy queues surface back-pressure by dropping work and emitting
//! tracing events, never by failing requests. These tests capture the
//! events with a recording subscriber layer and pin that contract.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use apigate::auth::TouchQueue;
use apigate::config::{RecorderConfig, TouchConfig};
use apigate::store::memory::InMemoryCredentialStore;
use apigate::usage::{InMemoryUsageStore, UsageRecorder};
use apigate::UsageEvent;

// ============================================================================
// Recording Layer
// ============================================================================

#[derive(Debug, Clone)]
struct CapturedEvent {
    level: Level,
    target: String,
    message: String,
}

#[derive(Clone)]
struct CaptureLayer {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl CaptureLayer {
    fn new() -> (Self, Arc<Mutex<Vec<CapturedEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                events: events.clone(),
            },
            events,
        )
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            target: event.metadata().target().to_string(),
            message: visitor.message,
        });
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn usage_event(id: &str) -> UsageEvent {
    UsageEvent {
        id: id.to_string(),
        key_id: "k1".to_string(),
        user_id: "u1".to_string(),
        method: "GET".to_string(),
        path: "/v1/things".to_string(),
        status_code: 200,
        latency_ms: 3,
        request_bytes: 10,
        response_bytes: 20,
        cost_multiplier: 1.0,
        ip: "203.0.113.9".to_string(),
        user_agent: "curl/8.0".to_string(),
        timestamp: ts(1_700_000_000),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_recorder_overflow_emits_a_debug_event() {
    let (layer, events) = CaptureLayer::new();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(layer));

    let store = Arc::new(InMemoryUsageStore::new());
    let recorder = UsageRecorder::new(
        store.clone(),
        RecorderConfig {
            capacity: 1,
            batch_size: 64,
            flush_interval: Duration::from_secs(3600),
        },
    );

    // Single-threaded test runtime: the recorder task cannot drain between
    // two synchronous records, so the second overflows the channel.
    assert!(recorder.record(usage_event("kept")));
    assert!(!recorder.record(usage_event("shed")));
    assert_eq!(recorder.dropped(), 1);

    recorder.close().await.unwrap();

    // The request was never failed; the drop was logged at debug, not error.
    assert_eq!(store.len(), 1);
    let captured = events.lock().unwrap();
    assert!(captured.iter().any(|ev| {
        ev.level == Level::DEBUG
            && ev.target.ends_with("usage::recorder")
            && ev.message.contains("usage queue full")
    }));
    assert!(captured.iter().all(|ev| ev.level != Level::ERROR));
}

#[tokio::test]
async fn test_touch_overflow_emits_a_debug_event() {
    let (layer, events) = CaptureLayer::new();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(layer));

    let store = Arc::new(InMemoryCredentialStore::new());
    let queue = TouchQueue::new(
        store,
        TouchConfig {
            capacity: 1,
            flush_interval: Duration::from_secs(3600),
        },
    );

    queue.push("k1", ts(100));
    queue.push("k2", ts(101));
    assert_eq!(queue.dropped(), 1);

    queue.close().await.unwrap();

    let captured = events.lock().unwrap();
    assert!(captured.iter().any(|ev| {
        ev.level == Level::DEBUG
            && ev.target.ends_with("auth::touch")
            && ev.message.contains("touch queue full")
    }));
    assert!(captured.iter().all(|ev| ev.level != Level::ERROR));
}
