use std::net::SocketAddr;

/// Failures of the worker pool and its backends.
///
/// Backend errors are flattened to strings so that a creation failure can
/// be carried inside a [`WorkerInfo`](crate::WorkerInfo) and cloned freely.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerPoolError {
    #[error("Backend request failed: {0}")]
    Backend(String),

    #[error("Worker {worker_id} not reachable at {endpoint} after {attempts} attempts: {reason}")]
    Unreachable {
        worker_id: String,
        endpoint: SocketAddr,
        attempts: u32,
        reason: String,
    },

    #[error("Invalid worker metadata: {0}")]
    InvalidWorker(String),

    #[error("Invalid backend configuration: {0}")]
    InvalidConfig(String),

    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
}
