//! Address-based transport selection

use std::sync::Arc;

use async_trait::async_trait;

use crate::coord::types::{WorkerReply, WorkerTask};
use crate::core::errors::{OrchestratorError, Result};
use crate::worker::{LocalWorkerClient, WorkerClient};

pub const LOCAL_SCHEME: &str = "local://";

/// Routes `local://` addresses to in-process workers and `http(s)://`
/// addresses to a remote client
#[derive(Clone)]
pub struct TransportRouter {
    local: LocalWorkerClient,
    remote: Option<Arc<dyn WorkerClient>>,
}

impl TransportRouter {
    pub fn new(local: LocalWorkerClient) -> Self {
        Self {
            local,
            remote: None,
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn WorkerClient>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn local(&self) -> &LocalWorkerClient {
        &self.local
    }
}

#[async_trait]
impl WorkerClient for TransportRouter {
    async fn call(&self, address: &str, task: WorkerTask) -> Result<WorkerReply> {
        if address.starts_with(LOCAL_SCHEME) {
            return self.local.call(address, task).await;
        }
        if address.starts_with("http://") || address.starts_with("https://") {
            return match &self.remote {
                Some(remote) => remote.call(address, task).await,
                None => Err(OrchestratorError::worker_unavailable(
                    address,
                    "no remote transport configured",
                )),
            };
        }
        Err(OrchestratorError::worker_unavailable(
            address,
            "unsupported address scheme",
        ))
    }
}
