//! Batched Usage Recording
//!
//! The tail of the request path writes usage fire-and-forget: events enter
//! a bounded channel and a background task flushes them to the usage store
//! in batches, either when a batch fills or on an interval. Back-pressure
//! is surfaced by dropping events, never by blocking requests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::RecorderConfig;
use crate::error::{GatewayError, Result};
use crate::model::UsageEvent;
use crate::store::UsageStore;

/// Bounded fire-and-forget recorder feeding a usage store
pub struct UsageRecorder {
    tx: Mutex<Option<mpsc::Sender<UsageEvent>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicU64,
}

impl UsageRecorder {
    /// Start the recorder task. Must be called from within a tokio runtime.
    pub fn new(store: Arc<dyn UsageStore>, config: RecorderConfig) -> Self {
        let (tx, mut rx) = mpsc::channel::<UsageEvent>(config.capacity.max(1));
        let batch_size = config.batch_size.max(1);

        let handle = tokio::spawn(async move {
            let mut batch: Vec<UsageEvent> = Vec::with_capacity(batch_size);
            let mut interval = tokio::time::interval(config.flush_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    maybe = rx.recv() => match maybe {
                        Some(event) => {
                            batch.push(event);
                            if batch.len() >= batch_size {
                                flush(store.as_ref(), &mut batch).await;
                            }
                        }
                        None => break,
                    },
                    _ = interval.tick() => {
                        flush(store.as_ref(), &mut batch).await;
                    }
                }
            }

            flush(store.as_ref(), &mut batch).await;
            debug!("usage recorder stopped");
        });

        Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue one event. Returns false when the event was dropped because
    /// the queue is full or the recorder already closed.
    pub fn record(&self, event: UsageEvent) -> bool {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return false;
        };

        match tx.try_send(event) {
            Ok(()) => true,
            Err(_) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(total, "usage queue full, dropping event");
                false
            }
        }
    }

    /// Events dropped since startup
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Flush outstanding events and stop the recorder.
    ///
    /// Closing twice is a programmer error.
    pub async fn close(&self) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .take()
            .ok_or_else(|| GatewayError::internal("usage recorder already closed"))?;
        drop(tx);

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| GatewayError::internal(format!("usage recorder panicked: {e}")))?;
        }
        Ok(())
    }
}

async fn flush(store: &dyn UsageStore, batch: &mut Vec<UsageEvent>) {
    if batch.is_empty() {
        return;
    }
    let events = std::mem::take(batch);
    let count = events.len();
    if let Err(e) = store.record_batch(events).await {
        warn!(count, error = %e, "failed to flush usage batch");
    }
}
