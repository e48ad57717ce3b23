//! Registry of in-process workers
//!
//! Workers are registered under an address and invoked directly on the
//! calling task, which makes the registry a zero-hop transport.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::coord::types::{WorkerReply, WorkerTask};
use crate::core::errors::{OrchestratorError, Result};
use crate::worker::{Worker, WorkerClient};

/// Registry for worker instances keyed by address
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: Arc<DashMap<String, Arc<dyn Worker>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker, replacing any worker previously at `address`
    pub fn register(&self, address: impl Into<String>, worker: Arc<dyn Worker>) {
        let address = address.into();
        info!(worker = %worker.name(), address = %address, "Registered worker");
        self.workers.insert(address, worker);
    }

    pub fn get(&self, address: &str) -> Option<Arc<dyn Worker>> {
        self.workers.get(address).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, address: &str) -> bool {
        self.workers.contains_key(address)
    }

    pub fn list(&self) -> Vec<String> {
        self.workers.iter().map(|entry| entry.key().clone()).collect()
    }
}

/// Client that calls registered workers in-process
#[derive(Clone, Default)]
pub struct LocalWorkerClient {
    registry: WorkerRegistry,
}

impl LocalWorkerClient {
    pub fn new(registry: WorkerRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }
}

#[async_trait]
impl WorkerClient for LocalWorkerClient {
    async fn call(&self, address: &str, task: WorkerTask) -> Result<WorkerReply> {
        let worker = self.registry.get(address).ok_or_else(|| {
            OrchestratorError::worker_unavailable(address, "no worker registered at address")
        })?;
        debug!(worker = %worker.name(), task = task.type_name(), "Calling local worker");
        worker.handle(task).await.map_err(|e| {
            OrchestratorError::worker_unavailable(address, format!("worker failed: {:#}", e))
        })
    }
}
