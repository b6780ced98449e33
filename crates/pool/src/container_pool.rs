//! [`WorkerPool`] implementation shared by all container backends.

use async_trait::async_trait;
use srs_core::settings::WorkerPoolSettings;
use tokio::sync::RwLock;

use crate::backend::ContainerBackend;
use crate::connectivity::{wait_until_reachable, ConnectivityPolicy};
use crate::error::WorkerPoolError;
use crate::pool::WorkerPool;
use crate::worker::{CreationState, WorkerInfo};

/// Worker pool over a [`ContainerBackend`].
///
/// Creation follows a bounded-retry-then-compensate scheme: after the
/// backend reports a started container, its endpoint is probed per the
/// [`ConnectivityPolicy`]; a container that never becomes reachable is
/// killed so it cannot leak.
pub struct ContainerWorkerPool<B> {
    backend: B,
    connectivity: RwLock<ConnectivityPolicy>,
    probe_on_create: bool,
}

impl<B: ContainerBackend> ContainerWorkerPool<B> {
    pub fn new(backend: B, connectivity: ConnectivityPolicy) -> Self {
        Self {
            backend,
            connectivity: RwLock::new(connectivity.normalized()),
            probe_on_create: true,
        }
    }

    /// Skip the reachability probe (e.g. when the gateway cannot route to
    /// worker addresses and relies on the backend's own readiness).
    pub fn without_probe(mut self) -> Self {
        self.probe_on_create = false;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn set_connectivity_policy(&self, policy: ConnectivityPolicy) {
        *self.connectivity.write().await = policy.normalized();
    }

    /// Kill a container that failed its post-creation checks. Errors are
    /// logged and dropped; the creation error is what the caller sees.
    async fn compensate(&self, worker_id: &str) {
        if worker_id.is_empty() {
            return;
        }
        if let Err(e) = self.backend.remove(worker_id).await {
            tracing::warn!(worker_id, error = %e, "Failed to remove unreachable worker");
        } else {
            tracing::info!(worker_id, "Removed unreachable worker");
        }
    }
}

#[async_trait]
impl<B: ContainerBackend> WorkerPool for ContainerWorkerPool<B> {
    async fn start_create(&self) -> WorkerInfo {
        let worker = match self.backend.create_and_start().await {
            Ok(worker) => worker,
            Err(e) => {
                tracing::error!(error = %e, "Worker container creation failed");
                return WorkerInfo::failed(String::new(), e);
            }
        };

        if !self.probe_on_create || worker.creation_state != CreationState::Running {
            return worker;
        }

        let Some(endpoint) = worker.endpoint else {
            self.compensate(&worker.id).await;
            return WorkerInfo::failed(
                worker.id.clone(),
                WorkerPoolError::InvalidWorker(format!("worker {} has no endpoint", worker.id)),
            );
        };

        let policy = self.connectivity.read().await.clone();
        match wait_until_reachable(&worker.id, endpoint, &policy).await {
            Ok(()) => {
                tracing::info!(worker_id = %worker.id, %endpoint, "Worker created");
                worker
            }
            Err(e) => {
                tracing::error!(worker_id = %worker.id, error = %e, "Worker never became reachable");
                self.compensate(&worker.id).await;
                WorkerInfo::failed(worker.id, e)
            }
        }
    }

    async fn wait_create_completion(&self, worker: WorkerInfo) -> WorkerInfo {
        worker
    }

    async fn get(&self, id: &str) -> Result<Option<WorkerInfo>, WorkerPoolError> {
        self.backend.inspect(id).await
    }

    async fn kill(&self, id: &str) -> Result<(), WorkerPoolError> {
        self.backend.remove(id).await?;
        tracing::info!(worker_id = id, "Worker killed");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<WorkerInfo>, WorkerPoolError> {
        self.backend.list_running().await
    }

    async fn update_configuration(&self, settings: &WorkerPoolSettings) -> Result<(), WorkerPoolError> {
        self.backend.apply_settings(&settings.clone().normalized()).await
    }
}
