//! Outstanding-call correlation table.
//!
//! Every outbound Call registers an entry keyed by message id. The entry
//! holds a one-shot waiter plus enough of the original call for the
//! response-handler hook. Entries older than the call timeout are evicted
//! by a per-entry timer, failing the waiter with `CallTimeout`.

use crate::error::SessionError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;
use vcp_types::Call;

/// Server side of one outstanding call.
pub struct PendingCall {
    pub action: String,
    pub request: Value,
    waiter: oneshot::Sender<Result<Value, SessionError>>,
}

impl PendingCall {
    /// Wake the caller. A dropped receiver (fire-and-forget send) is fine.
    pub fn complete(self, result: Result<Value, SessionError>) {
        let _ = self.waiter.send(result);
    }
}

#[derive(Clone)]
pub struct PendingCalls {
    entries: Arc<Mutex<HashMap<String, PendingCall>>>,
    timeout: Duration,
}

impl PendingCalls {
    pub fn new(timeout: Duration) -> Self {
        PendingCalls {
            entries: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    /// Register `call` and return the waiter end. Spawns the eviction timer.
    pub async fn register(&self, call: &Call) -> oneshot::Receiver<Result<Value, SessionError>> {
        let (tx, rx) = oneshot::channel();
        {
            let mut entries = self.entries.lock().await;
            entries.insert(
                call.message_id.clone(),
                PendingCall {
                    action: call.action.clone(),
                    request: call.payload.clone(),
                    waiter: tx,
                },
            );
        }

        let table = self.clone();
        let message_id = call.message_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(table.timeout).await;
            if let Some(entry) = table.take(&message_id).await {
                debug!(%message_id, action = %entry.action, "evicting stale pending call");
                let action = entry.action.clone();
                entry.complete(Err(SessionError::CallTimeout { action }));
            }
        });

        rx
    }

    /// Remove and return the entry for `message_id`, if still outstanding.
    pub async fn take(&self, message_id: &str) -> Option<PendingCall> {
        self.entries.lock().await.remove(message_id)
    }

    /// Fail every outstanding call with `TransportClosed`.
    pub async fn fail_all(&self) {
        let drained: Vec<PendingCall> = {
            let mut entries = self.entries.lock().await;
            entries.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            entry.complete(Err(SessionError::TransportClosed));
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
