//! Blocking calls over a fire-and-forget transport
//!
//! The caller registers a correlation slot, dispatches the task, and
//! suspends until the reply for that correlation id is delivered back.
//! Late or duplicate replies find no slot and are dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::coord::correlation::CorrelationTable;
use crate::coord::types::{ReplyEnvelope, RequestId, TaskEnvelope, WorkerReply, WorkerTask};
use crate::core::errors::Result;
use crate::worker::{ReplySink, SpawnDispatcher, TaskDispatcher, WorkerClient};

/// Sink that resolves correlation slots
pub struct CorrelationSink {
    table: Arc<CorrelationTable<ReplyEnvelope>>,
}

impl CorrelationSink {
    pub fn new(table: Arc<CorrelationTable<ReplyEnvelope>>) -> Self {
        Self { table }
    }
}

#[async_trait]
impl ReplySink for CorrelationSink {
    async fn deliver(&self, reply: ReplyEnvelope) {
        let id = reply.correlation_id.clone();
        if !self.table.resolve(&id, reply) {
            debug!(correlation_id = %id, "Reply had no waiting caller");
        }
    }
}

pub struct CorrelatedCaller {
    table: Arc<CorrelationTable<ReplyEnvelope>>,
    dispatcher: Arc<dyn TaskDispatcher>,
    timeout: Option<Duration>,
}

impl CorrelatedCaller {
    /// Caller over an externally driven transport. Replies must be fed to
    /// [`handle_response`](Self::handle_response).
    pub fn new(
        table: Arc<CorrelationTable<ReplyEnvelope>>,
        dispatcher: Arc<dyn TaskDispatcher>,
    ) -> Self {
        Self {
            table,
            dispatcher,
            timeout: None,
        }
    }

    /// Caller that dispatches through `client` on spawned tasks and
    /// resolves its own slots
    pub fn over(client: Arc<dyn WorkerClient>) -> Self {
        let table = Arc::new(CorrelationTable::new());
        let sink = Arc::new(CorrelationSink::new(table.clone()));
        let dispatcher = Arc::new(SpawnDispatcher::new(client, sink));
        Self::new(table, dispatcher)
    }

    /// Give up waiting for a reply after `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Deliver a reply that arrived through the transport
    pub fn handle_response(&self, reply: ReplyEnvelope) -> bool {
        let id = reply.correlation_id.clone();
        self.table.resolve(&id, reply)
    }

    pub fn pending(&self) -> usize {
        self.table.pending_count()
    }
}

#[async_trait]
impl WorkerClient for CorrelatedCaller {
    async fn call(&self, address: &str, task: WorkerTask) -> Result<WorkerReply> {
        let correlation_id = RequestId::new();
        let handle = self.table.register(correlation_id.clone())?;
        if let Err(e) = self
            .dispatcher
            .dispatch(address, TaskEnvelope::new(correlation_id.clone(), task))
        {
            self.table.cancel(&correlation_id);
            return Err(e);
        }

        let reply = match self.timeout {
            Some(timeout) => self.table.await_result_timeout(handle, timeout).await?,
            None => self.table.await_result(handle).await?,
        };
        reply.outcome
    }
}
