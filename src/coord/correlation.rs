//! Correlation table
//!
//! Maps an in-flight id to a single-resolution slot so that a caller can
//! wait on a reply that arrives through some other path.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::coord::types::RequestId;
use crate::core::errors::{OrchestratorError, Result};

/// Waitable side of a registered slot
#[derive(Debug)]
pub struct CorrelationHandle<V> {
    request_id: RequestId,
    rx: oneshot::Receiver<V>,
}

impl<V> CorrelationHandle<V> {
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }
}

/// Removes a slot that is still pending when its waiter goes away
struct PendingGuard<'a, V> {
    table: &'a CorrelationTable<V>,
    request_id: Option<RequestId>,
}

impl<V> PendingGuard<'_, V> {
    fn disarm(&mut self) {
        self.request_id = None;
    }
}

impl<V> Drop for PendingGuard<'_, V> {
    fn drop(&mut self) {
        if let Some(request_id) = self.request_id.take() {
            if self.table.pending.lock().remove(&request_id).is_some() {
                debug!(request_id = %request_id, "Waiter cancelled, correlation removed");
            }
        }
    }
}

/// Process-wide table of pending correlations, one entry per id
#[derive(Debug)]
pub struct CorrelationTable<V> {
    pending: Mutex<HashMap<RequestId, oneshot::Sender<V>>>,
}

impl<V> Default for CorrelationTable<V> {
    fn default() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: Send> CorrelationTable<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a slot for `request_id`. Fails if one is already pending.
    pub fn register(&self, request_id: RequestId) -> Result<CorrelationHandle<V>> {
        let mut pending = self.pending.lock();
        if pending.contains_key(&request_id) {
            return Err(OrchestratorError::duplicate_request(
                &request_id,
                "correlation already registered",
            ));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(request_id.clone(), tx);
        debug!(request_id = %request_id, pending = pending.len(), "Registered correlation");
        Ok(CorrelationHandle { request_id, rx })
    }

    /// Complete the slot for `request_id`.
    ///
    /// Only the first call has an effect; later calls and calls for unknown
    /// ids are silent no-ops. Returns whether a waiting slot was completed.
    pub fn resolve(&self, request_id: &RequestId, value: V) -> bool {
        let sender = self.pending.lock().remove(request_id);
        match sender {
            Some(tx) => {
                if tx.send(value).is_err() {
                    debug!(request_id = %request_id, "Correlation resolved after waiter left");
                    return false;
                }
                true
            }
            None => {
                debug!(request_id = %request_id, "No pending correlation, reply discarded");
                false
            }
        }
    }

    /// Drop a pending slot without resolving it
    pub fn cancel(&self, request_id: &RequestId) -> bool {
        self.pending.lock().remove(request_id).is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Suspend until the slot is resolved.
    ///
    /// Dropping the returned future before resolution removes the entry.
    pub async fn await_result(&self, handle: CorrelationHandle<V>) -> Result<V> {
        let CorrelationHandle { request_id, rx } = handle;
        let mut guard = PendingGuard {
            table: self,
            request_id: Some(request_id.clone()),
        };
        let received = rx.await;
        guard.disarm();
        match received {
            Ok(value) => Ok(value),
            Err(_) => {
                self.cancel(&request_id);
                Err(OrchestratorError::channel(
                    "correlation",
                    format!("slot for {} dropped before resolution", request_id),
                ))
            }
        }
    }

    /// Like [`await_result`](Self::await_result) but gives up after `timeout`,
    /// removing the entry so the table cannot grow without bound
    pub async fn await_result_timeout(
        &self,
        handle: CorrelationHandle<V>,
        timeout: Duration,
    ) -> Result<V> {
        let request_id = handle.request_id.clone();
        match tokio::time::timeout(timeout, self.await_result(handle)).await {
            Ok(result) => result,
            Err(_) => {
                self.cancel(&request_id);
                warn!(request_id = %request_id, timeout_ms = timeout.as_millis() as u64, "Correlation timed out");
                Err(OrchestratorError::timeout("correlation", timeout.as_millis() as u64))
            }
        }
    }
}
