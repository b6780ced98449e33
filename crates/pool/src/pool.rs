use async_trait::async_trait;
use srs_core::settings::WorkerPoolSettings;

use crate::error::WorkerPoolError;
use crate::worker::{WebConsoleInfo, WorkerInfo};

/// Contract every worker backend satisfies.
///
/// `start_create` never returns `Err`: creation failures are reported
/// through [`WorkerInfo::creation_state`] so orchestration code inspects a
/// value instead of handling an error path.
#[async_trait]
pub trait WorkerPool: Send + Sync {
    /// Begin creating a worker.
    async fn start_create(&self) -> WorkerInfo;

    /// Wait until `worker` leaves the `Pending` state. Returns the input
    /// unchanged when creation already completed.
    async fn wait_create_completion(&self, worker: WorkerInfo) -> WorkerInfo;

    /// A running worker, or `None` when the backend no longer runs it.
    async fn get(&self, id: &str) -> Result<Option<WorkerInfo>, WorkerPoolError>;

    async fn kill(&self, id: &str) -> Result<(), WorkerPoolError>;

    /// All running workers managed by this pool.
    async fn list(&self) -> Result<Vec<WorkerInfo>, WorkerPoolError>;

    async fn update_configuration(&self, settings: &WorkerPoolSettings) -> Result<(), WorkerPoolError>;

    // -- web consoles --

    async fn create_web_console(
        &self,
        _vc_endpoint: &str,
        _token: &str,
        _all_linked: bool,
    ) -> Result<WebConsoleInfo, WorkerPoolError> {
        Err(WorkerPoolError::Unsupported("web console"))
    }

    async fn get_web_console(&self, _id: &str) -> Result<Option<WebConsoleInfo>, WorkerPoolError> {
        Err(WorkerPoolError::Unsupported("web console"))
    }

    async fn list_web_consoles(&self) -> Result<Vec<WebConsoleInfo>, WorkerPoolError> {
        Err(WorkerPoolError::Unsupported("web console"))
    }

    async fn kill_web_console(&self, _id: &str) -> Result<(), WorkerPoolError> {
        Err(WorkerPoolError::Unsupported("web console"))
    }
}
