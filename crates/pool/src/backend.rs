use async_trait::async_trait;
use srs_core::settings::WorkerPoolSettings;

use crate::error::WorkerPoolError;
use crate::worker::WorkerInfo;

/// Thin transport over a container engine.
///
/// Implementations only translate calls into engine requests and map the
/// engine's answers; retry and compensation policy stays in
/// [`ContainerWorkerPool`](crate::ContainerWorkerPool).
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Create and start one worker container. The returned info is
    /// `Running` with the endpoint the engine assigned.
    async fn create_and_start(&self) -> Result<WorkerInfo, WorkerPoolError>;

    /// Inspect a container; `None` when it exists but is not running.
    async fn inspect(&self, id: &str) -> Result<Option<WorkerInfo>, WorkerPoolError>;

    /// Stop and remove a container.
    async fn remove(&self, id: &str) -> Result<(), WorkerPoolError>;

    /// Running worker containers owned by this backend.
    async fn list_running(&self) -> Result<Vec<WorkerInfo>, WorkerPoolError>;

    /// Apply updated settings (memory limit, backend-specific options).
    async fn apply_settings(&self, settings: &WorkerPoolSettings) -> Result<(), WorkerPoolError>;
}
