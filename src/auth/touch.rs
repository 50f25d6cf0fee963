//! Last-Used Touch Coalescer
//!
//! Successful validations schedule a best-effort `last_used` update. The
//! update is decoupled from the hot path through a bounded lossy queue: a
//! background task coalesces touches per key and flushes them to the
//! credential store on an interval. Back-pressure is surfaced by dropping
//! touches, never by failing requests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::TouchConfig;
use crate::error::{GatewayError, Result};
use crate::store::CredentialStore;

struct Touch {
    key_id: String,
    at: DateTime<Utc>,
}

/// Bounded lossy queue feeding a background last-used coalescer
pub struct TouchQueue {
    tx: Mutex<Option<mpsc::Sender<Touch>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    dropped: Arc<AtomicU64>,
}

impl TouchQueue {
    /// Start the coalescer task. Must be called from within a tokio runtime.
    pub fn new(store: Arc<dyn CredentialStore>, config: TouchConfig) -> Self {
        let (tx, mut rx) = mpsc::channel::<Touch>(config.capacity.max(1));
        let flush_interval = config.flush_interval;

        let handle = tokio::spawn(async move {
            let mut pending: HashMap<String, DateTime<Utc>> = HashMap::new();
            let mut interval = tokio::time::interval(flush_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    maybe = rx.recv() => match maybe {
                        Some(touch) => {
                            // Coalesce per key, keeping the newest instant so a
                            // late-arriving touch cannot regress last_used.
                            let entry = pending.entry(touch.key_id).or_insert(touch.at);
                            if touch.at > *entry {
                                *entry = touch.at;
                            }
                        }
                        None => break,
                    },
                    _ = interval.tick() => {
                        flush(store.as_ref(), &mut pending).await;
                    }
                }
            }

            flush(store.as_ref(), &mut pending).await;
            debug!("touch coalescer stopped");
        });

        Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Schedule a last-used update. Drops silently when the queue is full
    /// or already closed; a touch never fails a request.
    pub fn push(&self, key_id: &str, at: DateTime<Utc>) {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return;
        };

        let touch = Touch {
            key_id: key_id.to_string(),
            at,
        };
        if tx.try_send(touch).is_err() {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(total, "touch queue full, dropping last-used update");
        }
    }

    /// Touches dropped since startup
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop the coalescer after a final flush.
    ///
    /// Closing twice is a programmer error.
    pub async fn close(&self) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .take()
            .ok_or_else(|| GatewayError::internal("touch queue already closed"))?;
        drop(tx);

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| GatewayError::internal(format!("touch coalescer panicked: {e}")))?;
        }
        Ok(())
    }
}

async fn flush(store: &dyn CredentialStore, pending: &mut HashMap<String, DateTime<Utc>>) {
    for (key_id, at) in pending.drain() {
        if let Err(e) = store.update_last_used(&key_id, at).await {
            warn!(key_id = %key_id, error = %e, "failed to flush last-used update");
        }
    }
}
