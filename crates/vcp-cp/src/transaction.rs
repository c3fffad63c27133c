//! Active transactions and their built-in sampling timer.
//!
//! The manager keeps one entry per CSMS-assigned transaction id. Each entry
//! owns a repeating timer (default 60 s) that asks a [`MeterSink`] to emit
//! meter values for the transaction. The fleet manager can pre-empt the
//! timer with `disable_timer` when its own 15 s loop takes over, while the
//! entry itself stays registered so late lookups still resolve.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Default sampling period of the built-in per-transaction timer, matching
/// the MeterValueSampleInterval configuration default when the fleet loop is
/// not running.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(60);

/// One active transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionState {
    pub transaction_id: i32,
    pub id_tag: String,
    pub connector_id: u32,
    pub started_at: DateTime<Utc>,
}

/// Receiver of periodic meter samples for a transaction. Implementations
/// capture whatever context they need (session handle, connector id).
#[async_trait]
pub trait MeterSink: Send + Sync {
    async fn emit_meter_values(&self, transaction: &TransactionState);
}

struct Entry {
    state: TransactionState,
    timer: Option<JoinHandle<()>>,
}

pub struct TransactionManager {
    entries: Mutex<HashMap<i32, Entry>>,
    sample_interval: Duration,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::with_interval(DEFAULT_SAMPLE_INTERVAL)
    }

    pub fn with_interval(sample_interval: Duration) -> Self {
        TransactionManager {
            entries: Mutex::new(HashMap::new()),
            sample_interval,
        }
    }

    /// Register a transaction and start its sampling timer.
    pub async fn start_transaction(&self, state: TransactionState, sink: Arc<dyn MeterSink>) {
        let interval = self.sample_interval;
        let timer_state = state.clone();
        let timer = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                sink.emit_meter_values(&timer_state).await;
            }
        });

        info!(
            transaction_id = state.transaction_id,
            connector_id = state.connector_id,
            "transaction registered"
        );
        let mut entries = self.entries.lock().await;
        if let Some(previous) = entries.insert(
            state.transaction_id,
            Entry {
                state,
                timer: Some(timer),
            },
        ) {
            // A duplicate id means the CSMS reused one; drop the old timer.
            if let Some(handle) = previous.timer {
                handle.abort();
            }
        }
    }

    /// Remove a transaction and stop its timer.
    pub async fn stop_transaction(&self, transaction_id: i32) -> Option<TransactionState> {
        let mut entries = self.entries.lock().await;
        let entry = entries.remove(&transaction_id)?;
        if let Some(timer) = entry.timer {
            timer.abort();
        }
        debug!(transaction_id, "transaction removed");
        Some(entry.state)
    }

    /// Stop the built-in timer but keep the transaction registered. Used
    /// when an external meter loop takes over sampling.
    pub async fn disable_timer(&self, transaction_id: i32) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&transaction_id) {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
                debug!(transaction_id, "built-in meter timer disabled");
            }
        }
    }

    pub async fn get(&self, transaction_id: i32) -> Option<TransactionState> {
        self.entries
            .lock()
            .await
            .get(&transaction_id)
            .map(|e| e.state.clone())
    }

    /// The most recently registered transaction bound to `connector_id`.
    pub async fn find_by_connector(&self, connector_id: u32) -> Option<TransactionState> {
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.state.connector_id == connector_id)
            .max_by_key(|e| e.state.started_at)
            .map(|e| e.state.clone())
    }

    pub async fn active_count(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Drop everything, stopping all timers. Called on session teardown.
    pub async fn stop_all(&self) {
        let mut entries = self.entries.lock().await;
        for (_, entry) in entries.drain() {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingSink {
        emitted: AtomicU32,
    }

    #[async_trait]
    impl MeterSink for CountingSink {
        async fn emit_meter_values(&self, _transaction: &TransactionState) {
            self.emitted.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn tx(id: i32, connector: u32) -> TransactionState {
        TransactionState {
            transaction_id: id,
            id_tag: "TAG1".to_string(),
            connector_id: connector,
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let manager = TransactionManager::new();
        let sink = Arc::new(CountingSink {
            emitted: AtomicU32::new(0),
        });

        manager.start_transaction(tx(42, 1), sink).await;
        assert_eq!(manager.active_count().await, 1);
        assert_eq!(manager.get(42).await.unwrap().connector_id, 1);

        let removed = manager.stop_transaction(42).await.unwrap();
        assert_eq!(removed.transaction_id, 42);
        assert_eq!(manager.active_count().await, 0);
        assert!(manager.stop_transaction(42).await.is_none());
    }

    #[tokio::test]
    async fn test_timer_fires_sink() {
        let manager = TransactionManager::with_interval(Duration::from_millis(10));
        let sink = Arc::new(CountingSink {
            emitted: AtomicU32::new(0),
        });

        manager.start_transaction(tx(7, 1), Arc::clone(&sink) as _).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        manager.stop_transaction(7).await;

        let fired = sink.emitted.load(Ordering::SeqCst);
        assert!(fired >= 2, "timer fired {fired} times");

        // No more firings after stop.
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(sink.emitted.load(Ordering::SeqCst), fired);
    }

    #[tokio::test]
    async fn test_disable_timer_keeps_entry() {
        let manager = TransactionManager::with_interval(Duration::from_millis(10));
        let sink = Arc::new(CountingSink {
            emitted: AtomicU32::new(0),
        });

        manager.start_transaction(tx(9, 2), Arc::clone(&sink) as _).await;
        manager.disable_timer(9).await;
        let before = sink.emitted.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.emitted.load(Ordering::SeqCst), before);
        // Still registered for correlation.
        assert!(manager.get(9).await.is_some());
    }

    #[tokio::test]
    async fn test_find_by_connector_prefers_latest() {
        let manager = TransactionManager::new();
        let sink = Arc::new(CountingSink {
            emitted: AtomicU32::new(0),
        });

        let mut first = tx(1, 3);
        first.started_at = Utc::now() - chrono::Duration::seconds(10);
        manager.start_transaction(first, Arc::clone(&sink) as _).await;
        manager.start_transaction(tx(2, 3), Arc::clone(&sink) as _).await;

        let found = manager.find_by_connector(3).await.unwrap();
        assert_eq!(found.transaction_id, 2);
        assert!(manager.find_by_connector(8).await.is_none());
    }
}
