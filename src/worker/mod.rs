//! Worker-facing seams
//!
//! - [`Worker`]: an in-process worker (extractor or section generator)
//! - [`WorkerClient`]: send a task to an addressed worker and await its reply
//! - [`TaskDispatcher`]: fire-and-forget send; the reply arrives later at a [`ReplySink`]
//!
//! No retries happen anywhere in this layer. A failure is handed to the
//! caller as soon as it is observed.

pub mod caller;
pub mod content;
pub mod http;
pub mod registry;
pub mod router;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::coord::types::{ReplyEnvelope, TaskEnvelope, TaskKind, WorkerReply, WorkerTask};
use crate::core::errors::{OrchestratorError, Result};

pub use caller::CorrelatedCaller;
pub use http::HttpWorkerClient;
pub use registry::{LocalWorkerClient, WorkerRegistry};
pub use router::TransportRouter;

/// An in-process worker.
///
/// Handlers are plain computation: read the task, do the work, return a
/// reply. A returned error means the worker could not produce any reply.
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, task: WorkerTask) -> anyhow::Result<WorkerReply>;
}

/// Blocking-style access to an addressed worker over any transport
#[async_trait]
pub trait WorkerClient: Send + Sync {
    /// Send one task and wait for the typed reply.
    ///
    /// Transport failures surface as `WorkerUnavailable`, uninterpretable
    /// replies as `WorkerProtocol`.
    async fn call(&self, address: &str, task: WorkerTask) -> Result<WorkerReply>;
}

/// Receives replies for previously dispatched tasks
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn deliver(&self, reply: ReplyEnvelope);
}

/// Fire-and-forget dispatch of a task to an addressed worker
pub trait TaskDispatcher: Send + Sync {
    /// Emit one outbound message. Never waits for the worker.
    fn dispatch(&self, address: &str, envelope: TaskEnvelope) -> Result<()>;
}

/// Check that a reply answers the task it was sent for
pub fn expect_kind(address: &str, kind: TaskKind, reply: WorkerReply) -> Result<WorkerReply> {
    if reply.matches(kind) {
        Ok(reply)
    } else {
        Err(OrchestratorError::worker_protocol(
            address,
            format!("reply does not answer {} task", kind),
        ))
    }
}

/// Dispatcher that runs each call on its own task and routes the outcome to
/// a sink
pub struct SpawnDispatcher {
    client: Arc<dyn WorkerClient>,
    sink: Arc<dyn ReplySink>,
}

impl SpawnDispatcher {
    pub fn new(client: Arc<dyn WorkerClient>, sink: Arc<dyn ReplySink>) -> Self {
        Self { client, sink }
    }
}

impl TaskDispatcher for SpawnDispatcher {
    fn dispatch(&self, address: &str, envelope: TaskEnvelope) -> Result<()> {
        if address.trim().is_empty() {
            return Err(OrchestratorError::worker_unavailable(
                address,
                "empty worker address",
            ));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            OrchestratorError::internal(format!("dispatch needs a tokio runtime: {}", e))
        })?;

        let client = self.client.clone();
        let sink = self.sink.clone();
        let address = address.to_string();
        let TaskEnvelope {
            correlation_id,
            task,
            ..
        } = envelope;
        let kind = task.kind();
        debug!(correlation_id = %correlation_id, worker = %address, kind = %kind, "Dispatching task");

        runtime.spawn(async move {
            let outcome = client
                .call(&address, task)
                .await
                .and_then(|reply| expect_kind(&address, kind, reply));
            if let Err(e) = &outcome {
                warn!(correlation_id = %correlation_id, worker = %address, error = %e, "Worker call failed");
            }
            sink.deliver(ReplyEnvelope {
                correlation_id,
                worker: address,
                kind,
                outcome,
            })
            .await;
        });
        Ok(())
    }
}
